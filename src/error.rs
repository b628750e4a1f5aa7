//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` enum per categorizzare tutti gli errori possibili
//! - Distingue errori per singolo file (la batch continua) da errori fatali
//! - Fornisce un messaggio "pubblico" senza path interni per le risposte HTTP
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `Validation`: Upload non valido (colpa del client, 400)
//! - `Decode` / `Encode`: Immagine illeggibile o non ricodificabile (per file)
//! - `Transcode`: ffmpeg terminato con exit code non zero (per file)
//! - `Timeout`: Tool esterno bloccato oltre il limite configurato (per file)
//! - `MissingDependency`: Tool esterno mancante (ffmpeg)
//! - `Filesystem` / `Io`: Directory non creabili o non leggibili (fatale)
//! - `Archive`: ZIP malformato in estrazione o creazione (fatale per la richiesta)
//! - `Config`: Parametri di configurazione fuori range
//!
//! ## Esempio:
//! ```rust,ignore
//! if !tool_exists {
//!     return Err(OptimizeError::MissingDependency("ffmpeg".to_string()));
//! }
//! ```

use std::path::Path;

/// Custom error types for asset optimization
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Image encode error: {0}")]
    Encode(String),

    #[error("Audio transcode error: {0}")]
    Transcode(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Dependency missing: {0}")]
    MissingDependency(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OptimizeError {
    /// Wraps an I/O failure on `path` as a `Filesystem` error with context
    pub fn filesystem(action: &str, path: &Path, err: std::io::Error) -> Self {
        Self::Filesystem(format!("{} {}: {}", action, path.display(), err))
    }

    /// Whether the error was caused by the client's upload rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Message safe to return to an HTTP caller.
    ///
    /// Filesystem and I/O errors carry scratch paths in their context, so
    /// they collapse to a generic message.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Archive(e) => format!("Invalid or unreadable ZIP archive: {}", e),
            Self::Filesystem(_) | Self::Io(_) => {
                "Filesystem error while processing the upload".to_string()
            }
            Self::Config(msg) => format!("Server misconfiguration: {}", msg),
            Self::MissingDependency(tool) => format!("Server is missing a required tool: {}", tool),
            Self::Timeout(_) => "Processing timed out".to_string(),
            Self::Decode(_) | Self::Encode(_) | Self::Transcode(_) => {
                "Asset processing failed".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validation_is_client_error() {
        assert!(OptimizeError::Validation("bad".into()).is_client_error());
        assert!(!OptimizeError::Decode("bad".into()).is_client_error());
        assert!(!OptimizeError::Archive(zip::result::ZipError::FileNotFound).is_client_error());
    }

    #[test]
    fn test_public_message_hides_paths() {
        let err = OptimizeError::filesystem(
            "Failed to create",
            Path::new("/tmp/asset-optimizer-abc123/optimized"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("asset-optimizer-abc123"));
        assert!(!err.public_message().contains("asset-optimizer-abc123"));

        let io = OptimizeError::Io(std::io::Error::new(std::io::ErrorKind::Other, "/tmp/x"));
        assert!(!io.public_message().contains("/tmp/x"));
    }
}
