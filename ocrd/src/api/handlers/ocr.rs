use crate::AppState;
use crate::errors::{Error, Result};
use crate::staging::StagedImage;
use axum::{
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use std::time::Instant;

/// Name of the multipart part carrying the image.
pub const IMAGE_FIELD: &str = "image";

#[utoipa::path(
    post,
    path = "/ocr/extract",
    tag = "ocr",
    summary = "Extract text from an image",
    description = "Upload one image in the `image` part of a multipart form. The recognized text is returned as plain text.",
    request_body(
        content_type = "multipart/form-data",
        description = "Multipart form with a single binary `image` part"
    ),
    responses(
        (status = 200, description = "Recognized text", body = String, content_type = "text/plain"),
        (status = 400, description = "Missing `image` part, malformed multipart body, or `OCR Error: <message>` when the engine rejects the image", body = String, content_type = "text/plain"),
        (status = 413, description = "Image exceeds the configured upload limit"),
        (status = 429, description = "Recognition capacity exhausted, retry later"),
        (status = 500, description = "`Server Error: <message>` for staging, engine launch, or configuration failures", body = String, content_type = "text/plain")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn extract_text(State(state): State<AppState>, mut multipart: Multipart) -> Result<String> {
    let staging_dir = state.config.uploads.staging_dir();
    let max_upload_size = state.config.uploads.max_upload_size;

    let mut image: Option<StagedImage> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, max_upload_size))? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some(IMAGE_FIELD) if image.is_none() => {
                image = Some(StagedImage::from_field(field, &staging_dir, max_upload_size).await?);
            }
            name => {
                tracing::debug!(field = ?name, "Ignoring multipart field");
            }
        }
    }

    let image = image.ok_or_else(|| Error::BadRequest {
        message: format!("Required part '{IMAGE_FIELD}' is not present."),
    })?;

    let _permit = match &state.limiter {
        Some(limiter) => Some(limiter.acquire().await?),
        None => None,
    };

    tracing::info!(
        file_name = ?image.original_name(),
        size = image.size(),
        "Starting text extraction"
    );

    let started = Instant::now();
    let result = state.recognizer.recognize(image.path()).await;
    let elapsed = started.elapsed();

    let outcome = match &result {
        Ok(_) => "success",
        Err(crate::ocr::RecognitionError::Engine { .. }) => "engine_error",
        Err(_) => "server_error",
    };
    metrics::counter!("ocrd_recognitions_total", "outcome" => outcome).increment(1);
    metrics::histogram!("ocrd_recognition_duration_seconds").record(elapsed.as_secs_f64());

    let text = result?;

    tracing::info!(
        file_name = ?image.original_name(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        chars = text.len(),
        "Text extraction complete"
    );

    Ok(text)
}

fn multipart_error(e: MultipartError, max_upload_size: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: format!("Request exceeds maximum allowed upload size of {max_upload_size} bytes"),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}
