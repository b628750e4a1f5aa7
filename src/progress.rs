//! # Progress and Report Module
//!
//! Questo modulo gestisce il feedback durante una batch e il report finale.
//!
//! ## Responsabilità:
//! - `BatchReport`: conteggi di successi/fallimenti/file ignorati, dettaglio
//!   dei fallimenti e dimensione totale dell'output
//! - `Reporter`: dove vanno gli eventi per file (niente, console, JSON)
//! - Progress bar con `indicatif` per le esecuzioni interattive
//!
//! ## Output console:
//! ```text
//! ✅ Image: photo.png -> 12KB
//! ❌ Audio song.mp3: Dependency missing: ffmpeg is required for audio processing
//! 🚀 Total output size: 123.45 KB
//! ```
//!
//! ## Output JSON (una riga per evento):
//! ```text
//! {"type":"file_complete","path":"a/photo.png","kind":"image","output_size":12345,"error":null}
//! {"type":"complete","report":{...}}
//! ```

use crate::file_manager::{AssetKind, FileManager};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// A file the pipeline could not optimize
#[derive(Debug, Clone, Serialize)]
pub struct AssetFailure {
    /// Path relative to the input root
    pub path: PathBuf,
    pub kind: AssetKind,
    pub reason: String,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Files with an unsupported extension, counted but not processed
    pub skipped: usize,
    pub failures: Vec<AssetFailure>,
    /// Sum of every file size under the output root after the run
    pub total_output_bytes: u64,
    pub duration_seconds: f64,
}

impl BatchReport {
    pub fn total_output_kb(&self) -> f64 {
        self.total_output_bytes as f64 / 1024.0
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Optimized: {} | Failed: {} | Skipped: {} | Output: {} in {:.1}s",
            self.succeeded,
            self.failed,
            self.skipped,
            FileManager::format_size(self.total_output_bytes),
            self.duration_seconds
        )
    }
}

/// Result of optimizing a single asset, as seen by the reporter
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub relative_path: PathBuf,
    pub kind: AssetKind,
    /// Output size on success, failure reason otherwise
    pub result: Result<u64, String>,
}

impl FileOutcome {
    fn file_name(&self) -> String {
        self.relative_path
            .file_name()
            .unwrap_or(self.relative_path.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            AssetKind::Image => "Image",
            AssetKind::Audio => "Audio",
            AssetKind::Ignored => "File",
        }
    }

    /// One console line for this outcome
    pub fn console_line(&self) -> String {
        match &self.result {
            Ok(size) => format!("✅ {}: {} -> {}KB", self.kind_label(), self.file_name(), size / 1024),
            Err(reason) => format!("❌ {} {}: {}", self.kind_label(), self.file_name(), reason),
        }
    }
}

/// Newline-delimited JSON events for machine consumers
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage<'a> {
    FileComplete {
        path: &'a PathBuf,
        kind: AssetKind,
        output_size: Option<u64>,
        error: Option<&'a str>,
    },
    Complete {
        report: &'a BatchReport,
    },
}

impl JsonMessage<'_> {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }
}

impl<'a> From<&'a FileOutcome> for JsonMessage<'a> {
    fn from(outcome: &'a FileOutcome) -> Self {
        Self::FileComplete {
            path: &outcome.relative_path,
            kind: outcome.kind,
            output_size: outcome.result.as_ref().ok().copied(),
            error: outcome.result.as_ref().err().map(String::as_str),
        }
    }
}

/// Manages the progress bar for interactive runs
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Print above the bar and advance it
    pub fn update(&self, line: &str, message: &str) {
        self.bar.println(line);
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// Where per-file events of a batch go
#[derive(Clone, Default)]
pub enum Reporter {
    /// Logging only (used by the HTTP service)
    #[default]
    Silent,
    /// Human readable lines on stdout, optionally under a progress bar
    Console {
        show_progress: bool,
        bar: Option<ProgressManager>,
    },
    /// One JSON object per line on stdout
    Json,
}

impl Reporter {
    pub fn console(show_progress: bool) -> Self {
        Self::Console { show_progress, bar: None }
    }

    /// Called once the number of processable files is known
    pub fn start(&mut self, total_files: usize) {
        if let Self::Console { show_progress: true, bar } = self {
            if total_files > 0 {
                *bar = Some(ProgressManager::new(total_files as u64));
            }
        }
    }

    pub fn file_complete(&self, outcome: &FileOutcome) {
        match self {
            Self::Silent => {}
            Self::Console { bar: Some(bar), .. } => {
                bar.update(&outcome.console_line(), &outcome.file_name());
            }
            Self::Console { bar: None, .. } => println!("{}", outcome.console_line()),
            Self::Json => JsonMessage::from(outcome).emit(),
        }
    }

    pub fn complete(&self, report: &BatchReport) {
        match self {
            Self::Silent => {}
            Self::Console { bar, .. } => {
                if let Some(bar) = bar {
                    bar.finish(&report.format_summary());
                }
                println!("\n🚀 Total output size: {:.2} KB", report.total_output_kb());
            }
            Self::Json => JsonMessage::Complete { report }.emit(),
        }
    }
}
