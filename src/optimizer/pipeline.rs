//! # Batch Pipeline
//!
//! Orchestratore di una singola esecuzione: svuota la root di output, scansiona
//! la root di input e smista ogni file all'ottimizzatore giusto.
//!
//! Un file che fallisce viene registrato nel report e la batch continua.
//! Solo gli errori sulle root (input illeggibile, output non creabile,
//! configurazione invalida) interrompono l'esecuzione.

use crate::{
    audio_processor::AudioOptimizer,
    config::Config,
    error::OptimizeError,
    file_manager::{AssetFile, AssetKind, FileManager},
    image_processor::ImageOptimizer,
    progress::{AssetFailure, BatchReport, FileOutcome, Reporter},
};
use std::any::Any;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The directory a batch writes into
pub struct OutputRoot;

impl OutputRoot {
    /// Delete `output_root` if present and recreate it empty.
    ///
    /// Refuses when the output root is the input root or one of its ancestors,
    /// since the reset would delete the sources. Runs on the caller's thread.
    pub fn reset(output_root: &Path, input_root: &Path) -> Result<(), OptimizeError> {
        let output_abs = Self::resolve(output_root)?;
        let input_abs = Self::resolve(input_root)?;
        if input_abs.starts_with(&output_abs) {
            return Err(OptimizeError::Filesystem(format!(
                "Output directory {} contains the input directory {}",
                output_root.display(),
                input_root.display()
            )));
        }

        match std::fs::remove_dir_all(output_root) {
            Ok(()) => debug!("Removed previous output at {}", output_root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(OptimizeError::filesystem("Cannot clear output directory", output_root, e)),
        }
        std::fs::create_dir_all(output_root)
            .map_err(|e| OptimizeError::filesystem("Cannot create output directory", output_root, e))
    }

    /// Canonicalize the deepest existing ancestor and re-append the rest
    fn resolve(path: &Path) -> Result<PathBuf, OptimizeError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let mut existing = absolute.as_path();
        let mut rest = Vec::new();
        loop {
            match existing.canonicalize() {
                Ok(canonical) => {
                    return Ok(rest.iter().rev().fold(canonical, |acc, part| acc.join(part)));
                }
                Err(_) => match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        rest.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(absolute),
                },
            }
        }
    }
}

/// Shared handle that must outlive every write into the output root.
///
/// Workers hold a clone until their last filesystem call returns, so the
/// owner of a scratch directory can tie its removal to the last drop.
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

type WorkerHandle = JoinHandle<Result<u64, OptimizeError>>;

/// Worker tasks of one run, aborted if the run is dropped before they finish
#[derive(Default)]
struct WorkerTasks {
    entries: Vec<(AssetFile, WorkerHandle)>,
}

impl Drop for WorkerTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.entries {
            handle.abort();
        }
    }
}

/// Runs image and audio optimization over one input tree
pub struct BatchPipeline {
    config: Arc<Config>,
    reporter: Reporter,
    keep_alive: Option<KeepAlive>,
}

impl BatchPipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            reporter: Reporter::default(),
            keep_alive: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Optimize every supported file under `input_root` into `output_root`
    pub async fn run(&mut self, input_root: &Path, output_root: &Path) -> Result<BatchReport, OptimizeError> {
        let start_time = Instant::now();
        self.config.validate()?;

        // Checks the input root before the output root is touched
        let scan = FileManager::scan(input_root, AssetKind::from_extension)?;
        OutputRoot::reset(output_root, input_root)?;

        let mut report = BatchReport::default();
        let mut assets = Vec::new();
        for asset in scan {
            if asset.kind == AssetKind::Ignored {
                debug!("Ignoring unsupported file: {}", asset.relative_path.display());
                report.skipped += 1;
            } else {
                assets.push(asset);
            }
        }

        info!(
            "Optimizing {} files from {} into {}",
            assets.len(),
            input_root.display(),
            output_root.display()
        );
        self.reporter.start(assets.len());

        let mut tasks = WorkerTasks::default();
        self.spawn_all(assets, output_root, &mut tasks).await?;
        for (asset, handle) in tasks.entries.iter_mut() {
            let result = match handle.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("worker task failed: {}", e)),
            };

            let outcome = FileOutcome {
                relative_path: asset.relative_path.clone(),
                kind: asset.kind,
                result,
            };
            match &outcome.result {
                Ok(size) => {
                    debug!("Optimized {} ({} bytes)", outcome.relative_path.display(), size);
                    report.succeeded += 1;
                }
                Err(reason) => {
                    warn!("Failed to optimize {}: {}", outcome.relative_path.display(), reason);
                    report.failed += 1;
                    report.failures.push(AssetFailure {
                        path: outcome.relative_path.clone(),
                        kind: outcome.kind,
                        reason: reason.clone(),
                    });
                }
            }
            self.reporter.file_complete(&outcome);
        }

        report.total_output_bytes = FileManager::dir_size(output_root);
        report.duration_seconds = start_time.elapsed().as_secs_f64();

        info!("=== Optimization Complete ===");
        info!("{}", report.format_summary());
        self.reporter.complete(&report);

        Ok(report)
    }

    /// Spawn one task per asset, at most `workers` running at a time
    async fn spawn_all(
        &self,
        assets: Vec<AssetFile>,
        output_root: &Path,
        tasks: &mut WorkerTasks,
    ) -> Result<(), OptimizeError> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let images = ImageOptimizer::new(self.config.clone()).with_keep_alive(self.keep_alive.clone());
        let audio = AudioOptimizer::new(self.config.clone());
        tasks.entries.reserve(assets.len());

        for asset in assets {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| OptimizeError::Io(io::Error::other(e)))?;

            let task_asset = asset.clone();
            let dest_root = output_root.to_path_buf();
            let images = images.clone();
            let audio = audio.clone();
            let keep_alive = self.keep_alive.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _keep_alive = keep_alive;
                match task_asset.kind {
                    AssetKind::Image => images.optimize(&task_asset, &dest_root).await,
                    AssetKind::Audio => audio.optimize(&task_asset, &dest_root).await,
                    AssetKind::Ignored => Err(OptimizeError::Validation(format!(
                        "unsupported file type: {}",
                        task_asset.relative_path.display()
                    ))),
                }
            });
            tasks.entries.push((asset, handle));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    fn relative_files(root: &Path) -> BTreeSet<PathBuf> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
            .collect()
    }

    fn test_config(temp: &TempDir) -> Config {
        Config {
            // Keeps audio deterministic whether or not ffmpeg is installed
            ffmpeg_path: Some(temp.path().join("no-ffmpeg")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_input_gives_empty_report() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        let output = temp.path().join("out");
        fs::create_dir_all(&input).unwrap();

        let report = BatchPipeline::new(test_config(&temp)).run(&input, &output).await.unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total_output_bytes, 0);
        assert!(output.is_dir());
        assert!(relative_files(&output).is_empty());
    }

    #[tokio::test]
    async fn test_failed_files_do_not_stop_the_batch() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        let output = temp.path().join("out");
        write_png(&input.join("a/one.png"), 600, 400);
        write_png(&input.join("two.png"), 100, 80);
        fs::write(input.join("bad.jpg"), b"definitely not a jpeg").unwrap();
        fs::create_dir_all(input.join("b")).unwrap();
        fs::write(input.join("b/song.mp3"), b"id3").unwrap();
        fs::write(input.join("notes.txt"), b"ignored").unwrap();

        let report = BatchPipeline::new(test_config(&temp)).run(&input, &output).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.skipped, 1);

        let failed: BTreeSet<_> = report.failures.iter().map(|f| f.path.clone()).collect();
        assert!(failed.contains(Path::new("bad.jpg")));
        assert!(failed.contains(&Path::new("b").join("song.mp3")));

        let expected: BTreeSet<PathBuf> =
            [Path::new("a").join("one.png"), PathBuf::from("two.png")].into_iter().collect();
        assert_eq!(relative_files(&output), expected);
        assert_eq!(report.total_output_bytes, FileManager::dir_size(&output));
        assert!(report.total_output_bytes > 0);

        let resized = image::open(output.join("a/one.png")).unwrap();
        assert_eq!(resized.width(), 512);
    }

    #[tokio::test]
    async fn test_reruns_produce_same_file_set() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        let output = temp.path().join("out");
        write_png(&input.join("x/y/sprite.png"), 64, 64);
        write_png(&input.join("bg.png"), 700, 300);

        BatchPipeline::new(test_config(&temp)).run(&input, &output).await.unwrap();
        let first = relative_files(&output);
        BatchPipeline::new(test_config(&temp)).run(&input, &output).await.unwrap();
        assert_eq!(first, relative_files(&output));
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_output_is_removed() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        let output = temp.path().join("out");
        write_png(&input.join("fresh.png"), 32, 32);
        fs::create_dir_all(output.join("old")).unwrap();
        fs::write(output.join("old/stale.png"), b"stale").unwrap();

        BatchPipeline::new(test_config(&temp)).run(&input, &output).await.unwrap();

        assert!(!output.join("old").exists());
        assert!(output.join("fresh.png").is_file());
    }

    #[tokio::test]
    async fn test_output_root_containing_input_is_refused() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in");
        write_png(&input.join("keep.png"), 16, 16);

        let same = BatchPipeline::new(test_config(&temp)).run(&input, &input).await;
        assert!(matches!(same, Err(OptimizeError::Filesystem(_))));

        let parent = BatchPipeline::new(test_config(&temp)).run(&input, temp.path()).await;
        assert!(matches!(parent, Err(OptimizeError::Filesystem(_))));

        assert!(input.join("keep.png").is_file());
    }

    #[tokio::test]
    async fn test_missing_input_leaves_output_alone() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("out");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("previous.png"), b"x").unwrap();

        let result = BatchPipeline::new(test_config(&temp))
            .run(&temp.path().join("missing"), &output)
            .await;

        assert!(matches!(result, Err(OptimizeError::Filesystem(_))));
        assert!(output.join("previous.png").exists());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            workers: 0,
            ..Default::default()
        };
        let result = BatchPipeline::new(config).run(temp.path(), &temp.path().join("out")).await;
        assert!(matches!(result, Err(OptimizeError::Config(_))));
    }
}
