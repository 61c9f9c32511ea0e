use crate::ocr::RecognitionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Prefix for engine failures returned to the client.
pub const OCR_ERROR_PREFIX: &str = "OCR Error: ";
/// Prefix for every other server-side failure returned to the client.
pub const SERVER_ERROR_PREFIX: &str = "Server Error: ";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data, e.g. a missing `image` part
    #[error("{message}")]
    BadRequest { message: String },

    /// Upload exceeds the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Recognition capacity exhausted
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Configuration is inconsistent or refers to missing files
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Failure reported by, or while driving, the OCR engine
    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    /// Filesystem failure while staging the upload
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Recognition(RecognitionError::Engine { .. }) => StatusCode::BAD_REQUEST,
            Error::Recognition(_) | Error::InvalidConfig { .. } | Error::Io(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Body returned to the client.
    ///
    /// Engine and server failures carry the underlying message behind a fixed prefix; client
    /// errors return their message unchanged.
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::PayloadTooLarge { message } | Error::TooManyRequests { message } => {
                message.clone()
            }
            Error::Recognition(RecognitionError::Engine { message }) => format!("{OCR_ERROR_PREFIX}{message}"),
            Error::Other(err) => format!("{SERVER_ERROR_PREFIX}{err:#}"),
            _ => format!("{SERVER_ERROR_PREFIX}{self}"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Recognition(RecognitionError::Engine { .. }) => {
                tracing::warn!("OCR engine error: {}", self);
            }
            Error::Recognition(_) | Error::InvalidConfig { .. } | Error::Io(_) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::info!("Recognition capacity exhausted: {}", self);
            }
            Error::BadRequest { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
