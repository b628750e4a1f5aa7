//! # Optimizer Module
//!
//! Separa le responsabilità in sottomoduli:
//! - `pipeline`: Orchestratore della batch (reset output, scan, concorrenza, report)
//! - `path_resolver`: Logica di calcolo path centralizzata

pub mod path_resolver;
pub mod pipeline;

pub use path_resolver::{OptimizationTarget, PathResolver};
pub use pipeline::{BatchPipeline, KeepAlive, OutputRoot};
