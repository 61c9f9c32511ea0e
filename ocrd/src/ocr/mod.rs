//! Text recognition abstraction layer
//!
//! This module defines the `TextRecognizer` trait which abstracts the OCR engine behind the
//! extraction endpoint. The production implementation drives the `tesseract` binary; tests use a
//! scripted recognizer.

use async_trait::async_trait;
use std::{path::Path, path::PathBuf, sync::Arc, time::Duration};

use crate::config::OcrConfig;

pub mod tesseract;

pub use tesseract::TesseractCli;

/// Create the recognizer described by configuration.
pub fn create_recognizer(config: &OcrConfig) -> Arc<dyn TextRecognizer> {
    Arc::new(TesseractCli::from(config.clone()))
}

/// Result type for recognition operations
pub type Result<T> = std::result::Result<T, RecognitionError>;

/// Errors that can occur while extracting text.
///
/// Only [`RecognitionError::Engine`] means the engine looked at the image and gave up. Every
/// other variant is an infrastructure problem on this host.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    /// The engine ran and rejected the input (corrupt or unsupported image, etc.)
    #[error("{message}")]
    Engine { message: String },

    /// The engine's data directory or a language file in it is missing or unreadable
    #[error("Tesseract data '{}' is not accessible: {source}", path.display())]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine process could not be started
    #[error("Failed to run OCR engine '{}': {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine did not finish within the configured timeout
    #[error("OCR engine timed out after {}", format_timeout(.0))]
    Timeout(Duration),
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}

/// Abstract OCR engine interface
///
/// Implementations must be safe to call concurrently: every call recognizes one image and shares
/// no per-call state with other calls.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize the text in the image stored at `image`.
    async fn recognize(&self, image: &Path) -> Result<String>;

    /// Check that the engine is usable. Called once at startup.
    async fn verify(&self) -> Result<()> {
        Ok(())
    }
}
