//! Tesseract command-line engine.
//!
//! Every recognition spawns one `tesseract <image> stdout` process. The child is killed if the
//! request future is dropped or the timeout fires, so no engine process outlives its request.

use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::{Duration, Instant},
};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{RecognitionError, Result, TextRecognizer};
use crate::config::OcrConfig;

/// Runs the `tesseract` binary once per image.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    program: PathBuf,
    tessdata_dir: PathBuf,
    language: String,
    languages: Vec<String>,
    timeout: Duration,
    psm: Option<u8>,
    oem: Option<u8>,
    dpi: Option<u32>,
}

impl From<OcrConfig> for TesseractCli {
    fn from(config: OcrConfig) -> Self {
        let languages = config.languages().map(str::to_string).collect();
        Self {
            program: config.tesseract_path,
            tessdata_dir: config.tessdata_dir,
            language: config.language,
            languages,
            timeout: config.timeout,
            psm: config.psm,
            oem: config.oem,
            dpi: config.dpi,
        }
    }
}

impl TesseractCli {
    fn recognize_command(&self, image: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(image)
            .arg("stdout")
            .arg("--tessdata-dir")
            .arg(&self.tessdata_dir)
            .arg("-l")
            .arg(&self.language);

        if let Some(psm) = self.psm {
            command.arg("--psm").arg(psm.to_string());
        }
        if let Some(oem) = self.oem {
            command.arg("--oem").arg(oem.to_string());
        }
        if let Some(dpi) = self.dpi {
            command.arg("--dpi").arg(dpi.to_string());
        }

        command
    }

    async fn run(&self, mut command: Command) -> Result<Output> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| RecognitionError::Launch {
                program: self.program.clone(),
                source,
            }),
            Err(_) => Err(RecognitionError::Timeout(self.timeout)),
        }
    }

    /// Engine data must be present before launch; tesseract itself reports a missing language as
    /// an ordinary failed run.
    async fn check_engine_data(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.tessdata_dir)
            .await
            .map_err(|source| RecognitionError::DataDirectory {
                path: self.tessdata_dir.clone(),
                source,
            })?;

        if !metadata.is_dir() {
            return Err(RecognitionError::DataDirectory {
                path: self.tessdata_dir.clone(),
                source: std::io::Error::other("not a directory"),
            });
        }

        for lang in &self.languages {
            let traineddata = self.tessdata_dir.join(format!("{lang}.traineddata"));
            match tokio::fs::metadata(&traineddata).await {
                Ok(metadata) if metadata.is_file() => {}
                Ok(_) => {
                    return Err(RecognitionError::DataDirectory {
                        path: traineddata,
                        source: std::io::Error::other("not a file"),
                    });
                }
                Err(source) => return Err(RecognitionError::DataDirectory { path: traineddata, source }),
            }
        }

        Ok(())
    }
}

/// Failure description for an engine run that exited unsuccessfully.
fn engine_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("OCR engine exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    #[instrument(skip_all, fields(image = %image.display(), language = %self.language))]
    async fn recognize(&self, image: &Path) -> Result<String> {
        self.check_engine_data().await?;

        let started = Instant::now();
        let output = self.run(self.recognize_command(image)).await?;

        if !output.status.success() {
            return Err(RecognitionError::Engine {
                message: engine_message(&output),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "OCR engine diagnostics");
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            chars = text.len(),
            "OCR engine finished"
        );
        Ok(text)
    }

    async fn verify(&self) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("--version");
        let output = self.run(command).await?;

        if !output.status.success() {
            return Err(RecognitionError::Launch {
                program: self.program.clone(),
                source: std::io::Error::other(engine_message(&output)),
            });
        }

        // Older releases print the banner on stderr
        let banner = [&output.stdout, &output.stderr]
            .into_iter()
            .flat_map(|stream| String::from_utf8_lossy(stream).lines().map(str::to_string).collect::<Vec<_>>())
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();

        info!(program = %self.program.display(), version = %banner.trim(), "OCR engine available");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // The "image" handed to the engine is a shell script and the engine is /bin/sh, so the script
    // sees the remaining tesseract arguments as "$@". This avoids executing freshly written files.
    fn sh_engine(tessdata: &TempDir, timeout: Duration) -> TesseractCli {
        std::fs::write(tessdata.path().join("eng.traineddata"), b"").unwrap();
        TesseractCli::from(OcrConfig {
            tesseract_path: PathBuf::from("/bin/sh"),
            tessdata_dir: tessdata.path().to_path_buf(),
            timeout,
            ..OcrConfig::default()
        })
    }

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("image.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_recognize_returns_stdout_and_passes_arguments() {
        let tessdata = tempfile::tempdir().unwrap();
        let mut engine = sh_engine(&tessdata, Duration::from_secs(5));
        engine.psm = Some(6);

        let image = script(&tessdata, "echo \"$@\"\n");
        let text = engine.recognize(&image).await.unwrap();

        let expected = format!("stdout --tessdata-dir {} -l eng --psm 6\n", tessdata.path().display());
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_engine_error_with_stderr() {
        let tessdata = tempfile::tempdir().unwrap();
        let engine = sh_engine(&tessdata, Duration::from_secs(5));

        let image = script(&tessdata, "echo 'Error in pixReadStream: Unknown format' >&2\nexit 1\n");
        let err = engine.recognize(&image).await.unwrap_err();

        match err {
            RecognitionError::Engine { message } => assert_eq!(message, "Error in pixReadStream: Unknown format"),
            other => panic!("Expected engine error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_reports_status() {
        let tessdata = tempfile::tempdir().unwrap();
        let engine = sh_engine(&tessdata, Duration::from_secs(5));

        let image = script(&tessdata, "exit 3\n");
        let err = engine.recognize(&image).await.unwrap_err();

        match err {
            RecognitionError::Engine { message } => assert!(message.contains('3'), "unexpected message: {message}"),
            other => panic!("Expected engine error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let tessdata = tempfile::tempdir().unwrap();
        let engine = sh_engine(&tessdata, Duration::from_millis(200));

        let image = script(&tessdata, "exec sleep 5\n");
        let started = Instant::now();
        let err = engine.recognize(&image).await.unwrap_err();

        assert!(matches!(err, RecognitionError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_tessdata_dir_is_reported_before_launch() {
        let tessdata = tempfile::tempdir().unwrap();
        let mut engine = sh_engine(&tessdata, Duration::from_secs(5));
        engine.tessdata_dir = tessdata.path().join("gone");

        let image = script(&tessdata, "echo should-not-run\n");
        let err = engine.recognize(&image).await.unwrap_err();

        assert!(matches!(err, RecognitionError::DataDirectory { .. }));
    }

    #[tokio::test]
    async fn test_missing_language_data_is_reported_before_launch() {
        let tessdata = tempfile::tempdir().unwrap();
        let engine = sh_engine(&tessdata, Duration::from_secs(5));
        std::fs::remove_file(tessdata.path().join("eng.traineddata")).unwrap();

        let image = script(&tessdata, "echo \"Failed loading language 'eng'\" >&2\nexit 1\n");
        let err = engine.recognize(&image).await.unwrap_err();

        match &err {
            RecognitionError::DataDirectory { path, .. } => assert!(path.ends_with("eng.traineddata")),
            other => panic!("Expected data directory error, got {other:?}"),
        }
        assert_eq!(
            crate::errors::Error::from(err).status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_every_joined_language_is_checked() {
        let tessdata = tempfile::tempdir().unwrap();
        let mut engine = sh_engine(&tessdata, Duration::from_secs(5));
        engine.language = "eng+deu".to_string();
        engine.languages = vec!["eng".to_string(), "deu".to_string()];

        let image = script(&tessdata, "echo ok\n");
        let err = engine.recognize(&image).await.unwrap_err();
        match err {
            RecognitionError::DataDirectory { path, .. } => assert!(path.ends_with("deu.traineddata")),
            other => panic!("Expected data directory error, got {other:?}"),
        }

        std::fs::write(tessdata.path().join("deu.traineddata"), b"").unwrap();
        assert_eq!(engine.recognize(&image).await.unwrap(), "ok\n");
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let tessdata = tempfile::tempdir().unwrap();
        let mut engine = sh_engine(&tessdata, Duration::from_secs(5));
        engine.program = tessdata.path().join("no-such-tesseract");

        let image = script(&tessdata, "");
        let err = engine.recognize(&image).await.unwrap_err();
        assert!(matches!(err, RecognitionError::Launch { .. }));

        let err = engine.verify().await.unwrap_err();
        assert!(matches!(err, RecognitionError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_verify_checks_exit_status() {
        let tessdata = tempfile::tempdir().unwrap();
        let mut engine = sh_engine(&tessdata, Duration::from_secs(5));

        engine.program = PathBuf::from("true");
        assert!(engine.verify().await.is_ok());

        engine.program = PathBuf::from("false");
        assert!(matches!(engine.verify().await, Err(RecognitionError::Launch { .. })));
    }
}
