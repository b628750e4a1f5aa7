//! # File Management Module
//!
//! Questo modulo gestisce la discovery degli asset e le utilità sui file.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva (lazy) degli asset in una directory
//! - Classificazione per estensione (immagine / audio / ignorato)
//! - Calcolo del path relativo rispetto alla root di scansione
//! - Utilità per dimensioni di file e directory
//!
//! ## Formati supportati:
//! - **Immagini**: JPG, JPEG, PNG
//! - **Audio**: MP3
//! - Tutto il resto viene classificato come `Ignored` e non elaborato
//!
//! ## Esempio:
//! ```rust,ignore
//! for asset in FileManager::scan(root, AssetKind::from_extension)? {
//!     match asset.kind {
//!         AssetKind::Image => { /* process image */ }
//!         AssetKind::Audio => { /* process audio */ }
//!         AssetKind::Ignored => {}
//!     }
//! }
//! ```

use crate::error::OptimizeError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a file is, as far as the pipeline cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Audio,
    Ignored,
}

impl AssetKind {
    /// Default classifier: jpg/jpeg/png are images, mp3 is audio.
    ///
    /// `ext` is expected lowercased.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" | "png" => Self::Image,
            "mp3" => Self::Audio,
            _ => Self::Ignored,
        }
    }
}

/// A file found under a scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    /// Path of the source file (root joined with `relative_path`)
    pub path: PathBuf,
    /// Path relative to the scan root
    pub relative_path: PathBuf,
    /// Lowercased extension, empty when the file has none
    pub extension: String,
    pub kind: AssetKind,
}

/// Manages file discovery and size bookkeeping
pub struct FileManager;

impl FileManager {
    /// Walk `root` recursively and yield every regular file with its classification.
    ///
    /// The walk itself is lazy; only the root is checked up front so that an
    /// unreadable root fails fast instead of producing an empty sequence.
    /// Entries that cannot be read mid-walk are logged and skipped.
    pub fn scan<F>(
        root: &Path,
        classify: F,
    ) -> Result<impl Iterator<Item = AssetFile>, OptimizeError>
    where
        F: Fn(&str) -> AssetKind,
    {
        std::fs::read_dir(root)
            .map_err(|e| OptimizeError::filesystem("Cannot read input directory", root, e))?;

        let base = root.to_path_buf();
        let assets = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry during scan: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let path = entry.into_path();
                let relative_path = path.strip_prefix(&base).ok()?.to_path_buf();
                let extension = Self::extension_of(&path);
                let kind = classify(&extension);
                Some(AssetFile {
                    path,
                    relative_path,
                    extension,
                    kind,
                })
            });

        Ok(assets)
    }

    /// Lowercased extension of `path`, empty if there is none
    pub fn extension_of(path: &Path) -> String {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Sum of the sizes of all regular files under `dir`
    pub fn dir_size(dir: &Path) -> u64 {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
