//! # Game Asset Optimizer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per il servizio HTTP
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per diverse operazioni
//! - `file_manager`: Discovery e classificazione degli asset
//! - `image_processor`: Resize e ricompressione immagini (JPEG/PNG a palette)
//! - `audio_processor`: Transcodifica MP3 tramite ffmpeg
//! - `platform`: Risoluzione dei tool esterni
//! - `optimizer`: Pipeline batch e calcolo dei path
//! - `progress`: Report finale, progress bar e output JSON
//! - `workspace`: Directory temporanea per singola richiesta HTTP
//! - `server`: Servizio HTTP `POST /optimize`
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use game_asset_optimizer::{BatchPipeline, Config};
//!
//! let report = BatchPipeline::new(Config::default())
//!     .run(Path::new("assets_raw"), Path::new("assets_optimized"))
//!     .await?;
//! println!("{:.2} KB", report.total_output_kb());
//! ```

pub mod audio_processor;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod optimizer;
pub mod platform;
pub mod progress;
pub mod server;
pub mod workspace;

pub use config::{Config, ServerConfig};
pub use error::OptimizeError;
pub use optimizer::BatchPipeline;
pub use progress::{BatchReport, Reporter};
pub use workspace::{optimize_upload, RequestWorkspace};
