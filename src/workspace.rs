//! # Request Workspace Module
//!
//! Ogni upload HTTP lavora in una directory temporanea privata:
//!
//! ```text
//! <scratch>/asset-optimizer-XXXXXX/
//! ├── input.zip        # upload del client
//! ├── extracted/       # contenuto dell'archivio
//! ├── optimized/       # output della pipeline
//! └── optimized.zip    # archivio restituito
//! ```
//!
//! La directory viene rimossa esattamente una volta, sia in caso di successo
//! che di errore. `cleanup()` è idempotente e `Drop` fa da rete di sicurezza
//! se la richiesta viene interrotta prima.
//!
//! ## Cancellazione:
//! Il `TempDir` è condiviso (`Arc`) con i job bloccanti e i worker della
//! pipeline. Se la richiesta viene abortita a metà batch, la directory
//! sparisce quando l'ultimo job ancora in volo rilascia il suo riferimento.

use crate::{
    config::Config,
    error::OptimizeError,
    optimizer::{BatchPipeline, KeepAlive},
    progress::BatchReport,
};
use futures::{Stream, TryStreamExt};
use std::fmt::Display;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const INPUT_ARCHIVE: &str = "input.zip";
const EXTRACTED_DIR: &str = "extracted";
const OPTIMIZED_DIR: &str = "optimized";
const OUTPUT_ARCHIVE: &str = "optimized.zip";

/// Accept only names ending in `.zip` (case-insensitive), without directories
pub fn validate_upload_name(file_name: &str) -> Result<(), OptimizeError> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(OptimizeError::Validation("Uploaded file has no name".into()));
    }
    if !trimmed.to_ascii_lowercase().ends_with(".zip") {
        return Err(OptimizeError::Validation("Only .zip files are accepted".into()));
    }
    Ok(())
}

/// Scratch directory owned by a single request
pub struct RequestWorkspace {
    dir: Option<Arc<TempDir>>,
    root: PathBuf,
}

impl RequestWorkspace {
    /// Create a fresh, uniquely named directory under `scratch_root`
    /// (the system temp dir when `None`)
    pub fn create(scratch_root: Option<&Path>) -> Result<Self, OptimizeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("asset-optimizer-");
        let dir = match scratch_root {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OptimizeError::filesystem("Cannot create scratch root", parent, e))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| OptimizeError::Filesystem(format!("Cannot create request workspace: {}", e)))?;

        let root = dir.path().to_path_buf();
        debug!("Created request workspace {}", root.display());
        Ok(Self {
            dir: Some(Arc::new(dir)),
            root,
        })
    }

    /// Handle that keeps the directory on disk while a job still uses it
    fn keep_alive(&self) -> Option<KeepAlive> {
        self.dir.clone().map(|dir| dir as KeepAlive)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn input_archive(&self) -> PathBuf {
        self.root.join(INPUT_ARCHIVE)
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join(EXTRACTED_DIR)
    }

    pub fn optimized_dir(&self) -> PathBuf {
        self.root.join(OPTIMIZED_DIR)
    }

    pub fn output_archive(&self) -> PathBuf {
        self.root.join(OUTPUT_ARCHIVE)
    }

    /// Stream the upload body into `input.zip`, returning the byte count.
    ///
    /// A failing stream means the client's upload broke off, which is a
    /// validation error.
    pub async fn stage_upload<S, B, E>(&self, file_name: &str, stream: S) -> Result<u64, OptimizeError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let path = self.input_archive();
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| OptimizeError::filesystem("Cannot create", &path, e))?;

        let mut stream = std::pin::pin!(stream);
        let mut written = 0u64;
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| OptimizeError::Validation(format!("Upload interrupted: {}", e)))?
        {
            let chunk = chunk.as_ref();
            file.write_all(chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Staged upload {} ({} bytes)", file_name, written);
        Ok(written)
    }

    /// Unpack `input.zip` into `extracted/`
    pub async fn extract(&self) -> Result<PathBuf, OptimizeError> {
        let archive = self.input_archive();
        let target = self.extracted_dir();
        std::fs::create_dir_all(&target)
            .map_err(|e| OptimizeError::filesystem("Cannot create", &target, e))?;

        let dest = target.clone();
        let keep_alive = self.keep_alive();
        tokio::task::spawn_blocking(move || {
            let _keep_alive = keep_alive;
            extract_archive(&archive, &dest)
        })
        .await
            .map_err(|e| OptimizeError::Io(io::Error::other(e)))??;
        Ok(target)
    }

    /// Run the batch pipeline from `extracted/` into `optimized/`
    pub async fn optimize(&self, config: Config) -> Result<BatchReport, OptimizeError> {
        let mut pipeline = BatchPipeline::new(config);
        if let Some(keep_alive) = self.keep_alive() {
            pipeline = pipeline.with_keep_alive(keep_alive);
        }
        pipeline
            .run(&self.extracted_dir(), &self.optimized_dir())
            .await
    }

    /// Zip `optimized/` into `optimized.zip`
    pub async fn repackage(&self) -> Result<PathBuf, OptimizeError> {
        let source = self.optimized_dir();
        let archive = self.output_archive();
        let dest = archive.clone();
        let keep_alive = self.keep_alive();
        tokio::task::spawn_blocking(move || {
            let _keep_alive = keep_alive;
            create_archive(&source, &dest)
        })
        .await
            .map_err(|e| OptimizeError::Io(io::Error::other(e)))??;
        Ok(archive)
    }

    pub async fn read_output(&self) -> Result<Vec<u8>, OptimizeError> {
        let archive = self.output_archive();
        tokio::fs::read(&archive)
            .await
            .map_err(|e| OptimizeError::filesystem("Cannot read", &archive, e))
    }

    /// Remove the workspace. Safe to call more than once; failures are logged.
    ///
    /// While a job still holds a keep-alive handle, removal happens when
    /// that handle is dropped.
    pub fn cleanup(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match Arc::try_unwrap(dir) {
            Ok(dir) => match dir.close() {
                Ok(()) => debug!("Removed request workspace {}", self.root.display()),
                Err(e) => warn!("Failed to remove request workspace {}: {}", self.root.display(), e),
            },
            Err(shared) => {
                debug!(
                    "Request workspace {} still in use by {} job(s), removal deferred",
                    self.root.display(),
                    Arc::strong_count(&shared) - 1
                );
            }
        }
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Full upload-to-archive cycle for one request.
///
/// The workspace is removed before this returns, whatever the outcome.
pub async fn optimize_upload<S, B, E>(
    file_name: &str,
    stream: S,
    scratch_root: Option<&Path>,
    config: Config,
) -> Result<Vec<u8>, OptimizeError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    validate_upload_name(file_name)?;
    let mut workspace = RequestWorkspace::create(scratch_root)?;

    let result = async {
        workspace.stage_upload(file_name, stream).await?;
        workspace.extract().await?;
        let report = workspace.optimize(config).await?;
        info!("📦 {}: {}", file_name, report.format_summary());
        workspace.repackage().await?;
        workspace.read_output().await
    }
    .await;

    workspace.cleanup();
    result
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<(), OptimizeError> {
    let file = File::open(archive).map_err(|e| OptimizeError::filesystem("Cannot open", archive, e))?;
    let mut zip = ZipArchive::new(file)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or(zip::result::ZipError::InvalidArchive("entry path escapes the archive root"))?;
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| OptimizeError::filesystem("Cannot create", &out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OptimizeError::filesystem("Cannot create", parent, e))?;
        }
        let mut out = File::create(&out_path)
            .map_err(|e| OptimizeError::filesystem("Cannot create", &out_path, e))?;
        io::copy(&mut entry, &mut out)?;
    }

    debug!("Extracted {} entries into {}", zip.len(), dest.display());
    Ok(())
}

fn create_archive(source: &Path, archive: &Path) -> Result<(), OptimizeError> {
    let file = File::create(archive).map_err(|e| OptimizeError::filesystem("Cannot create", archive, e))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| OptimizeError::Io(io::Error::from(e)))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let name = archive_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())
                .map_err(|e| OptimizeError::filesystem("Cannot open", entry.path(), e))?;
            io::copy(&mut input, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Archive entry names always use `/`
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
