//! Staging of uploaded images on local disk.
//!
//! The engine reads images from a path, so each upload is streamed into its own temporary file.
//! A [`StagedImage`] owns that file and deletes it when dropped, on success and failure alike.

use axum::{extract::multipart::Field, http::StatusCode};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::errors::{Error, Result};

const STAGING_PREFIX: &str = "ocr";
const MAX_EXTENSION_LEN: usize = 8;

/// An uploaded image persisted to a request-owned temporary file.
#[derive(Debug)]
pub struct StagedImage {
    file: NamedTempFile,
    original_name: Option<String>,
    size: u64,
}

impl StagedImage {
    /// Stream a multipart field into a new temporary file under `dir`.
    ///
    /// Fails with [`Error::PayloadTooLarge`] as soon as more than `max_size` bytes arrive.
    pub async fn from_field(mut field: Field<'_>, dir: &Path, max_size: u64) -> Result<Self> {
        let original_name = field.file_name().map(str::to_string);

        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(&staging_suffix(original_name.as_deref()))
            .tempfile_in(dir)
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create temporary file in '{}': {e}", dir.display()),
                )
            })?;
        let mut writer = tokio::fs::File::from_std(file.as_file().try_clone()?);

        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large(max_size)
            } else {
                Error::BadRequest {
                    message: format!("Failed to read image part: {}", e.body_text()),
                }
            }
        })? {
            size += chunk.len() as u64;
            if size > max_size {
                tracing::warn!(
                    file_name = ?original_name,
                    size = size,
                    max_size = max_size,
                    "Upload size limit exceeded, aborting"
                );
                return Err(too_large(max_size));
            }

            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;

        tracing::debug!(
            file_name = ?original_name,
            path = %file.path().display(),
            size = size,
            "Staged uploaded image"
        );

        Ok(Self {
            file,
            original_name,
            size,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn too_large(max_size: u64) -> Error {
    Error::PayloadTooLarge {
        message: format!(
            "Image exceeds maximum allowed size of {} bytes ({} MB)",
            max_size,
            max_size / (1024 * 1024)
        ),
    }
}

/// Temporary file suffix derived from the client's filename.
///
/// Only a short ASCII alphanumeric extension is kept; anything else in the client-supplied name
/// never reaches the filesystem.
fn staging_suffix(original_name: Option<&str>) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}
