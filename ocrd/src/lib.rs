//! # ocrd: image-to-text extraction service
//!
//! `ocrd` exposes a single HTTP endpoint that accepts an uploaded image and returns the text an
//! OCR engine recognizes in it. Recognition is delegated to Tesseract; this crate handles the
//! upload, the staging of the image on disk, the engine invocation, and the mapping of the outcome
//! to an HTTP response.
//!
//! ## Request Flow
//!
//! A client sends `POST /ocr/extract` with a multipart body carrying one `image` part. The
//! handler ([`api::handlers::ocr`]) streams the part into a request-owned temporary file
//! ([`staging::StagedImage`]), takes a slot from the [`limits::RecognitionLimiter`], and asks the
//! configured [`ocr::TextRecognizer`] for the text. The staged file is removed before the response
//! is written, whatever the outcome.
//!
//! Outcomes map to responses as follows:
//!
//! - recognized text → `200` with the text as a plain body
//! - the engine rejected the image → `400` with `OCR Error: <message>`
//! - anything else (staging I/O, engine launch, missing tessdata, timeout) → `500` with
//!   `Server Error: <message>`
//!
//! No state survives a request. Each recognition runs its own `tesseract` process.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use ocrd::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = ocrd::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     ocrd::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

#[cfg(test)]
pub mod test_utils;

pub mod api;
pub mod config;
pub mod errors;
pub mod limits;
pub mod ocr;
mod openapi;
pub mod staging;
pub mod telemetry;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{self, HeaderValue};
use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use config::CorsOrigin;
use limits::RecognitionLimiter;
use ocr::TextRecognizer;
use openapi::ApiDoc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Room for multipart boundaries and part headers on top of the image itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Application state shared across all request handlers.
///
/// - `config`: Application configuration loaded from environment/files
/// - `recognizer`: OCR engine used by the extraction endpoint
/// - `limiter`: Bounds concurrent recognitions; `None` means unlimited
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub limiter: Option<Arc<RecognitionLimiter>>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Origin(origin) = origin {
                origins.push(origin.trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `POST /ocr/extract` with a body limit derived from `uploads.max_upload_size`
/// - `GET /healthz`, `GET /openapi.json` and the `/docs` UI
/// - `GET /internal/metrics` when metrics are enabled
/// - CORS and tracing layers
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = state.config.uploads.max_upload_size.saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let router = Router::new()
        .route(
            "/ocr/extract",
            post(api::handlers::ocr::extract_text).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns the router and configuration.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] checks that the OCR engine runs and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, in-flight requests finish and
///    telemetry is flushed
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application using the engine described by `config.ocr`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting OCR service with configuration: {:#?}", config);

        let recognizer = ocr::create_recognizer(&config.ocr);
        recognizer.verify().await.context("OCR engine check failed")?;

        Self::with_recognizer(config, recognizer)
    }

    /// Create a new application around an already constructed recognizer.
    pub fn with_recognizer(config: Config, recognizer: Arc<dyn TextRecognizer>) -> anyhow::Result<Self> {
        let limiter = RecognitionLimiter::new(&config.limits).map(Arc::new);

        let app_state = AppState::builder()
            .config(config.clone())
            .recognizer(recognizer)
            .maybe_limiter(limiter)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "OCR service listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
