//! # Asset Optimizer - Main Entry Point
//!
//! Punto di ingresso della CLI.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti con `clap` (subcommand `optimize` e `serve`)
//! - Inizializzazione del logging con `tracing` (`RUST_LOG` o `--verbose`)
//! - Caricamento configurazione da file JSON con override da CLI
//! - Avvio della pipeline batch o del servizio HTTP
//!
//! ## Esempio di utilizzo:
//! ```bash
//! asset-optimizer                                   # assets_raw -> assets_optimized
//! asset-optimizer optimize raw/ out/ --png-colors 32 --json
//! asset-optimizer serve --bind 127.0.0.1:8000 --scratch-dir /var/tmp/assets
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use game_asset_optimizer::{server, BatchPipeline, Config, Reporter, ServerConfig};

#[derive(Parser)]
#[command(name = "asset-optimizer", version)]
#[command(about = "Shrink game images and audio to a tight size budget")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (JSON); defaults to the per-user config if present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize a directory tree into a fresh output directory
    Optimize(OptimizeArgs),
    /// Run the HTTP upload service
    Serve(ServeArgs),
}

#[derive(Args, Default)]
struct OptimizeArgs {
    /// Directory containing the raw assets
    #[arg(default_value = "assets_raw")]
    input: PathBuf,

    /// Output directory (deleted and recreated on every run)
    #[arg(default_value = "assets_optimized")]
    output: PathBuf,

    /// Maximum image width in pixels
    #[arg(long)]
    max_width: Option<u32>,

    /// JPEG quality (1-100)
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// PNG palette size (2-256)
    #[arg(long)]
    png_colors: Option<u16>,

    /// MP3 bitrate (e.g. 32k)
    #[arg(long)]
    audio_bitrate: Option<String>,

    /// Audio sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Emit newline-delimited JSON events on stdout
    #[arg(long)]
    json: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Parent directory for per-request scratch space (default: system temp dir)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Maximum upload size in MiB
    #[arg(long, default_value = "256")]
    max_upload_mb: usize,
}

impl OptimizeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(max_width) = self.max_width {
            config.max_width = max_width;
        }
        if let Some(quality) = self.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if let Some(colors) = self.png_colors {
            config.png_colors = colors;
        }
        if let Some(ref bitrate) = self.audio_bitrate {
            config.audio_bitrate = bitrate.clone();
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
    }

    fn reporter(&self) -> Reporter {
        if self.json {
            Reporter::Json
        } else {
            Reporter::console(!self.no_progress && std::io::IsTerminal::is_terminal(&std::io::stdout()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output on stdout stays parseable
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Some(Command::Serve(args)) => {
            let server = ServerConfig {
                bind: args.bind,
                max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
                scratch_root: args.scratch_dir,
            };
            server::serve(config, server).await
        }
        Some(Command::Optimize(args)) => run_optimize(config, args).await,
        None => run_optimize(config, OptimizeArgs {
            input: PathBuf::from("assets_raw"),
            output: PathBuf::from("assets_optimized"),
            ..Default::default()
        })
        .await,
    }
}

async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow::anyhow!("Config file does not exist: {}", path.display()));
            }
            Config::from_file(path)
                .await
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => match Config::default_path() {
            Some(path) => {
                debug!("Looking for config at {}", path.display());
                Config::from_file(&path)
                    .await
                    .with_context(|| format!("Failed to load config from {}", path.display()))
            }
            None => Ok(Config::default()),
        },
    }
}

async fn run_optimize(mut config: Config, args: OptimizeArgs) -> Result<()> {
    args.apply(&mut config);

    if !args.json {
        info!("📸 Optimizing assets from {} into {}", args.input.display(), args.output.display());
        info!(
            "Images: max width {}px, JPEG quality {}, PNG {} colors",
            config.max_width, config.jpeg_quality, config.png_colors
        );
        info!(
            "Audio: {} / {} channel(s) / {} Hz",
            config.audio_bitrate, config.audio_channels, config.sample_rate
        );
    }

    let reporter = args.reporter();
    BatchPipeline::new(config)
        .with_reporter(reporter)
        .run(&args.input, &args.output)
        .await?;

    Ok(())
}
