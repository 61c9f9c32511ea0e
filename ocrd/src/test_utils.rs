//! Test utilities for handler tests.

use crate::config::{Config, LimitsConfig};
use crate::ocr::{RecognitionError, Result, TextRecognizer};
use async_trait::async_trait;
use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Recognizer that interprets the staged bytes instead of running an engine.
///
/// - `TEXT:<text>` recognizes `<text>`
/// - `SLOW:<text>` recognizes `<text>` after the configured delay
/// - anything else fails like an engine handed an unreadable image
///
/// Every staged path is recorded so tests can check that it was cleaned up.
pub struct ScriptedRecognizer {
    delay: Duration,
    seen: Mutex<Vec<PathBuf>>,
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self::with_delay(Duration::from_millis(50))
    }
}

impl ScriptedRecognizer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Paths of every image this recognizer was asked to read.
    pub fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    async fn recognize(&self, image: &Path) -> Result<String> {
        self.seen.lock().unwrap().push(image.to_path_buf());

        let bytes = tokio::fs::read(image).await.expect("staged image must exist during recognition");

        if let Some(text) = bytes.strip_prefix(b"TEXT:") {
            return Ok(String::from_utf8_lossy(text).into_owned());
        }
        if let Some(text) = bytes.strip_prefix(b"SLOW:") {
            tokio::time::sleep(self.delay).await;
            return Ok(String::from_utf8_lossy(text).into_owned());
        }

        Err(RecognitionError::Engine {
            message: "Error in pixReadStream: Unknown format: no pix returned".to_string(),
        })
    }
}

/// Config pointing at a scratch tessdata directory with an `eng.traineddata` file.
pub fn create_test_config(tessdata: &TempDir) -> Config {
    std::fs::write(tessdata.path().join("eng.traineddata"), b"").expect("Failed to write traineddata");

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        limits: LimitsConfig {
            max_concurrent_recognitions: 16,
            max_waiting_recognitions: 0,
            max_wait: Duration::from_secs(5),
        },
        ..Default::default()
    };
    config.ocr.tessdata_dir = tessdata.path().to_path_buf();
    config
}

pub fn create_test_app_with(config: Config, recognizer: Arc<ScriptedRecognizer>) -> TestServer {
    crate::Application::with_recognizer(config, recognizer)
        .expect("Failed to create application")
        .into_test_server()
}

/// Test server backed by a [`ScriptedRecognizer`]. Keep the returned directory alive for the
/// duration of the test.
pub async fn create_test_app() -> (TestServer, Arc<ScriptedRecognizer>, TempDir) {
    let tessdata = tempfile::tempdir().expect("Failed to create tessdata dir");
    let config = create_test_config(&tessdata);
    let recognizer = Arc::new(ScriptedRecognizer::default());

    (create_test_app_with(config, recognizer.clone()), recognizer, tessdata)
}

/// Multipart form with a single `image` part.
pub fn image_form(bytes: &[u8], file_name: &str) -> MultipartForm {
    MultipartForm::new().add_part(
        "image",
        Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_type("application/octet-stream"),
    )
}
