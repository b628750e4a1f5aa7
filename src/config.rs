//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di compressione
//! - Definisce `ServerConfig` per il servizio HTTP
//! - Fornisce validazione robusta dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default pensati per budget di dimensione molto stretti
//!
//! ## Parametri di configurazione:
//! - `max_width`: Larghezza massima immagini (default: 512)
//! - `jpeg_quality`: Qualità JPEG (1-100, default: 30)
//! - `png_colors`: Dimensione palette PNG (2-256, default: 16)
//! - `audio_bitrate`: Bitrate MP3 (default: "32k")
//! - `audio_channels`: Canali audio (default: 1, mono)
//! - `sample_rate`: Frequenza di campionamento (default: 16000 Hz)
//! - `workers`: Numero di file elaborati in parallelo (default: 4)
//! - `transcode_timeout_secs`: Timeout per ogni processo ffmpeg (default: 120)
//! - `ffmpeg_path`: Path esplicito di ffmpeg (default: None = cerca nel PATH)
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     max_width: 1024,
//!     jpeg_quality: 60,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use crate::error::OptimizeError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Configuration for one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Images wider than this are downscaled to exactly this width
    pub max_width: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Number of palette entries for PNG output (2-256)
    pub png_colors: u16,
    /// MP3 bitrate in ffmpeg notation ("32k")
    pub audio_bitrate: String,
    /// Output channel count
    pub audio_channels: u8,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Number of files processed concurrently
    pub workers: usize,
    /// Upper bound for a single ffmpeg run
    pub transcode_timeout_secs: u64,
    /// Explicit ffmpeg binary (None = resolve from PATH)
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_width: 512,
            jpeg_quality: 30,
            png_colors: 16,
            audio_bitrate: "32k".to_string(),
            audio_channels: 1,
            sample_rate: 16000,
            workers: 4,
            transcode_timeout_secs: 120,
            ffmpeg_path: None,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), OptimizeError> {
        if self.max_width == 0 {
            return Err(OptimizeError::Config("Max image width must be greater than 0".into()));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(OptimizeError::Config("JPEG quality must be between 1 and 100".into()));
        }

        if !(2..=256).contains(&self.png_colors) {
            return Err(OptimizeError::Config("PNG palette size must be between 2 and 256".into()));
        }

        if !is_valid_bitrate(&self.audio_bitrate) {
            return Err(OptimizeError::Config(format!(
                "Audio bitrate must look like \"32k\" or \"128000\", got {:?}",
                self.audio_bitrate
            )));
        }

        if self.audio_channels == 0 {
            return Err(OptimizeError::Config("Audio channel count must be greater than 0".into()));
        }

        if self.sample_rate == 0 {
            return Err(OptimizeError::Config("Sample rate must be greater than 0".into()));
        }

        if self.workers == 0 {
            return Err(OptimizeError::Config("Number of workers must be greater than 0".into()));
        }

        if self.transcode_timeout_secs == 0 {
            return Err(OptimizeError::Config("Transcode timeout must be greater than 0".into()));
        }

        Ok(())
    }

    /// Load configuration from file, falling back to defaults when it does not exist
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Per-user config location (`~/.config/asset-optimizer/config.json` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("asset-optimizer").join("config.json"))
    }
}

/// Digits with an optional `k`/`M` suffix, as ffmpeg accepts for `-b:a`
fn is_valid_bitrate(bitrate: &str) -> bool {
    let digits = bitrate.trim_end_matches(['k', 'K', 'M']);
    let suffix_len = bitrate.len() - digits.len();
    suffix_len <= 1 && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Settings for the HTTP upload service
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind: SocketAddr,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
    /// Parent directory for per-request scratch directories (None = system temp dir)
    pub scratch_root: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_upload_bytes: 256 * 1024 * 1024,
            scratch_root: None,
        }
    }
}
