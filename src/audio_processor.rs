//! # Audio Processing Module
//!
//! Questo modulo gestisce la compressione degli MP3 delegando tutto a FFmpeg.
//!
//! ## Responsabilità:
//! - Transcodifica MP3 (libmp3lame) con bitrate configurabile
//! - Forza numero di canali (default mono) e sample rate (default 16 kHz)
//! - Rimuove tutti i metadata del container
//! - Sovrascrive sempre l'output
//! - Timeout per ogni processo: un ffmpeg bloccato viene terminato
//!
//! ## Comando eseguito:
//! ```text
//! ffmpeg -hide_banner -nostdin -i <in> -vn -codec:a libmp3lame -b:a 32k
//!        -ac 1 -ar 16000 -map_metadata -1 -y <out>
//! ```
//!
//! ## Error handling:
//! - Exit code non zero → `OptimizeError::Transcode` con lo stderr catturato
//! - Timeout → `OptimizeError::Timeout`
//! - ffmpeg non trovato → `OptimizeError::MissingDependency`
//! - In ogni caso l'output parziale viene rimosso e la batch continua

use crate::config::Config;
use crate::error::OptimizeError;
use crate::file_manager::AssetFile;
use crate::optimizer::path_resolver::OptimizationTarget;
use crate::platform::PlatformCommands;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Number of stderr lines kept in a transcode failure
const DIAGNOSTIC_TAIL_LINES: usize = 8;

/// Handles audio optimization through an external ffmpeg process
#[derive(Clone)]
pub struct AudioOptimizer {
    config: Arc<Config>,
}

impl AudioOptimizer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Transcode `asset` into `dest_root/<relative path>`, returning the output size
    pub async fn optimize(&self, asset: &AssetFile, dest_root: &Path) -> Result<u64, OptimizeError> {
        let target = OptimizationTarget::new(asset.clone(), dest_root)?;
        target.prepare()?;

        let result = self.transcode(&target.source.path, &target.destination).await;
        if result.is_err() {
            // ffmpeg may have created the file before failing
            let _ = tokio::fs::remove_file(&target.destination).await;
        }
        result?;

        let size = tokio::fs::metadata(&target.destination)
            .await
            .map_err(|e| OptimizeError::filesystem("Cannot stat output", &target.destination, e))?
            .len();
        Ok(size)
    }

    async fn transcode(&self, input_path: &Path, output_path: &Path) -> Result<(), OptimizeError> {
        let ffmpeg = self.ffmpeg_binary()?;
        let args = Self::build_args(input_path, output_path, &self.config);

        debug!(
            "🎵 Transcoding {} (bitrate: {}, channels: {}, rate: {})",
            input_path.display(),
            self.config.audio_bitrate,
            self.config.audio_channels,
            self.config.sample_rate
        );

        let mut cmd = Command::new(&ffmpeg);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start_time = Instant::now();
        let child = cmd.spawn().map_err(|e| {
            OptimizeError::MissingDependency(format!("failed to execute {}: {}", ffmpeg.display(), e))
        })?;

        // Dropping the future on timeout drops the child, which kills it
        let timeout = Duration::from_secs(self.config.transcode_timeout_secs);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!("ffmpeg timed out after {:?} on {}", timeout, input_path.display());
                OptimizeError::Timeout(format!(
                    "ffmpeg did not finish within {}s for {}",
                    timeout.as_secs(),
                    input_path.display()
                ))
            })??;

        if !output.status.success() {
            let diagnostic = Self::diagnostic_tail(&output.stderr);
            debug!(
                "ffmpeg failed after {:.1}s with {}: {}",
                start_time.elapsed().as_secs_f64(),
                output.status,
                diagnostic
            );
            return Err(OptimizeError::Transcode(format!("{} ({})", diagnostic, output.status)));
        }

        debug!("Transcode completed in {:.1}s", start_time.elapsed().as_secs_f64());
        Ok(())
    }

    fn ffmpeg_binary(&self) -> Result<PathBuf, OptimizeError> {
        PlatformCommands::instance()
            .resolve_tool("ffmpeg", self.config.ffmpeg_path.as_deref())
            .ok_or_else(|| {
                OptimizeError::MissingDependency(
                    "ffmpeg is required for audio processing".to_string(),
                )
            })
    }

    /// ffmpeg argument vector for one file
    pub fn build_args(input_path: &Path, output_path: &Path, config: &Config) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input_path.as_os_str().to_owned());
        args.extend(
            [
                "-vn".to_string(),
                "-codec:a".to_string(),
                "libmp3lame".to_string(),
                "-b:a".to_string(),
                config.audio_bitrate.clone(),
                "-ac".to_string(),
                config.audio_channels.to_string(),
                "-ar".to_string(),
                config.sample_rate.to_string(),
                "-map_metadata".to_string(),
                "-1".to_string(),
                "-y".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output_path.as_os_str().to_owned());
        args
    }

    /// Last non-empty lines of ffmpeg's stderr
    fn diagnostic_tail(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            return "ffmpeg exited without output".to_string();
        }
        let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        lines[start..].join(" | ")
    }
}
