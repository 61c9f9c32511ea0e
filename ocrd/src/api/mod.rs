//! API layer for HTTP request handling.
//!
//! # API Structure
//!
//! - **Extraction** (`POST /ocr/extract`): multipart upload of one `image` part, plain-text response
//! - **Probes** (`GET /healthz`): liveness check
//!
//! # OpenAPI Documentation
//!
//! Endpoints are documented with `utoipa` annotations. The document is served at
//! `/openapi.json` and rendered at `/docs` when the server is running.

pub mod handlers;
