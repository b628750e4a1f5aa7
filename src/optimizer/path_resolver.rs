//! # Path Resolution Module
//!
//! Centralizza il calcolo dei path di output.
//! Il path di destinazione rispecchia sempre il path relativo della sorgente
//! sotto la root di output, con lo stesso nome file.

use crate::{error::OptimizeError, file_manager::AssetFile};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A scanned asset paired with the place its optimized copy goes
#[derive(Debug, Clone)]
pub struct OptimizationTarget {
    pub source: AssetFile,
    pub destination: PathBuf,
}

impl OptimizationTarget {
    /// Mirror `source.relative_path` under `dest_root`.
    ///
    /// Relative paths that would climb out of `dest_root` are rejected.
    pub fn new(source: AssetFile, dest_root: &Path) -> Result<Self, OptimizeError> {
        let destination = PathResolver::mirror(&source.relative_path, dest_root)?;
        debug!(
            "Resolved output path: {} -> {}",
            source.path.display(),
            destination.display()
        );
        Ok(Self { source, destination })
    }

    /// Create the destination's parent directories on the calling thread
    pub fn prepare(&self) -> Result<(), OptimizeError> {
        PathResolver::ensure_parent_dirs(&self.destination)
    }
}

/// Utility per calcolare i path di output in modo centralizzato
pub struct PathResolver;

impl PathResolver {
    /// Join `relative` onto `root`, refusing absolute paths and `..` components
    pub fn mirror(relative: &Path, root: &Path) -> Result<PathBuf, OptimizeError> {
        let escapes = relative.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes || relative.as_os_str().is_empty() {
            return Err(OptimizeError::Filesystem(format!(
                "Refusing to mirror path outside output root: {}",
                relative.display()
            )));
        }
        Ok(root.join(relative))
    }

    /// Crea le directory parent se necessario
    pub fn ensure_parent_dirs(path: &Path) -> Result<(), OptimizeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OptimizeError::filesystem("Failed to create parent directories for", path, e))?;
        }
        Ok(())
    }
}
