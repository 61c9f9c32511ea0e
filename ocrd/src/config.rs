//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `OCRD_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `OCRD_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `OCRD_OCR__LANGUAGE=deu` sets the `ocr.language` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use ocrd::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **OCR engine**: `ocr.tesseract_path`, `ocr.tessdata_dir`, `ocr.language`, `ocr.timeout`
//! - **Uploads**: `uploads.temp_dir`, `uploads.max_upload_size`
//! - **Limits**: `limits.max_concurrent_recognitions` and friends - engine concurrency control
//! - **CORS**: `cors.allowed_origins`, `cors.allow_credentials`, `cors.max_age`
//! - **Features**: `enable_metrics`, `enable_otel_export` - Optional feature toggles
//!
//! The tessdata directory and the traineddata files for the configured language are checked when
//! the configuration is loaded, so a misconfigured host fails at startup instead of on the first
//! request.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! OCRD_PORT=9000
//!
//! # Point at a system tessdata directory
//! OCRD_OCR__TESSDATA_DIR=/usr/share/tesseract-ocr/5/tessdata
//!
//! # Recognize English and German
//! OCRD_OCR__LANGUAGE=eng+deu
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "OCRD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// OCR engine configuration
    pub ocr: OcrConfig,
    /// Upload staging configuration
    pub uploads: UploadsConfig,
    /// Resource limits for protecting engine capacity
    pub limits: LimitsConfig,
    /// CORS settings for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Tesseract invocation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// Path or name of the `tesseract` executable
    pub tesseract_path: PathBuf,
    /// Directory containing `<lang>.traineddata` files
    pub tessdata_dir: PathBuf,
    /// Recognition language, `+`-joined for several (e.g. `eng+deu`)
    pub language: String,
    /// Maximum time a single recognition may run before the engine is killed
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Page segmentation mode passed as `--psm`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psm: Option<u8>,
    /// OCR engine mode passed as `--oem`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oem: Option<u8>,
    /// Input resolution hint passed as `--dpi`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
}

impl OcrConfig {
    /// Languages named by `language`, split on `+`.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.language.split('+').map(str::trim).filter(|lang| !lang.is_empty())
    }
}

/// Where and how uploaded images are staged before recognition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Directory for staged uploads. Defaults to the system temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    /// Maximum size in bytes of a single uploaded image (default: 20MB)
    pub max_upload_size: u64,
}

impl UploadsConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Resource limits configuration.
///
/// Controls how many engine processes may run at once. Each recognition spawns one process, so
/// this bounds CPU and memory use under load.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum number of concurrent recognitions. Set to 0 for unlimited.
    pub max_concurrent_recognitions: usize,
    /// Maximum number of requests waiting for a recognition slot. Set to 0 for unlimited.
    pub max_waiting_recognitions: usize,
    /// How long a request may wait for a slot before receiving 429. Zero rejects immediately.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific origin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin (e.g., `https://app.example.com`)
    Origin(String),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ocr: OcrConfig::default(),
            uploads: UploadsConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            tessdata_dir: PathBuf::from("tessdata"),
            language: "eng".to_string(),
            timeout: Duration::from_secs(60),
            psm: None,
            oem: None,
            dpi: None,
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_upload_size: 20 * 1024 * 1024, // 20MB
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recognitions: 4,
            max_waiting_recognitions: 32,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required files
    pub fn validate(&self) -> Result<(), Error> {
        if self.ocr.languages().next().is_none() {
            return Err(Error::InvalidConfig {
                message: "ocr.language cannot be empty (e.g. 'eng')".to_string(),
            });
        }

        if !self.ocr.tessdata_dir.is_dir() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "ocr.tessdata_dir '{}' does not exist or is not a directory. \
                     Set OCRD_OCR__TESSDATA_DIR or add ocr.tessdata_dir to the config file.",
                    self.ocr.tessdata_dir.display()
                ),
            });
        }

        for lang in self.ocr.languages() {
            let traineddata = self.ocr.tessdata_dir.join(format!("{lang}.traineddata"));
            if !traineddata.is_file() {
                return Err(Error::InvalidConfig {
                    message: format!("Language data for '{lang}' not found at '{}'", traineddata.display()),
                });
            }
        }

        if self.ocr.timeout.is_zero() {
            return Err(Error::InvalidConfig {
                message: "ocr.timeout must be greater than zero".to_string(),
            });
        }

        if self.uploads.max_upload_size == 0 {
            return Err(Error::InvalidConfig {
                message: "uploads.max_upload_size cannot be 0".to_string(),
            });
        }

        if let Some(dir) = &self.uploads.temp_dir
            && !dir.is_dir()
        {
            return Err(Error::InvalidConfig {
                message: format!("uploads.temp_dir '{}' does not exist or is not a directory", dir.display()),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::InvalidConfig {
                message: "CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(Error::InvalidConfig {
                message: "CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins.".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can override specific values. OCRD_CONFIG names the file itself.
            .merge(Env::prefixed("OCRD_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args() -> Args {
        Args {
            config: "test.yaml".to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_with_tessdata_present() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "ocr:\n  tessdata_dir: .\n")?;
            jail.create_file("eng.traineddata", "")?;

            let config = Config::load(&args())?;

            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.port, 8080);
            assert_eq!(config.ocr.language, "eng");
            assert_eq!(config.ocr.tesseract_path, PathBuf::from("tesseract"));
            assert_eq!(config.ocr.timeout, Duration::from_secs(60));
            assert_eq!(config.cors.allowed_origins, vec![CorsOrigin::Wildcard]);
            assert!(!config.cors.allow_credentials);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
ocr:
  tessdata_dir: .
  language: eng+deu
  timeout: 5s
  psm: 6
uploads:
  max_upload_size: 1024
limits:
  max_concurrent_recognitions: 2
  max_waiting_recognitions: 0
  max_wait: 250ms
cors:
  allowed_origins:
    - https://ocr.example.com
  allow_credentials: true
"#,
            )?;
            jail.create_file("eng.traineddata", "")?;
            jail.create_file("deu.traineddata", "")?;

            let config = Config::load(&args())?;

            assert_eq!(config.port, 9000);
            assert_eq!(config.ocr.languages().collect::<Vec<_>>(), vec!["eng", "deu"]);
            assert_eq!(config.ocr.timeout, Duration::from_secs(5));
            assert_eq!(config.ocr.psm, Some(6));
            assert_eq!(config.uploads.max_upload_size, 1024);
            assert_eq!(config.limits.max_concurrent_recognitions, 2);
            assert_eq!(config.limits.max_wait, Duration::from_millis(250));
            assert_eq!(
                config.cors.allowed_origins,
                vec![CorsOrigin::Origin("https://ocr.example.com".to_string())]
            );

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "ocr:\n  tessdata_dir: .\n")?;
            jail.create_file("eng.traineddata", "")?;
            jail.create_file("fra.traineddata", "")?;

            jail.set_env("OCRD_HOST", "127.0.0.1");
            jail.set_env("OCRD_PORT", "8081");
            jail.set_env("OCRD_OCR__LANGUAGE", "fra");

            let config = Config::load(&args())?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8081);
            assert_eq!(config.ocr.language, "fra");

            Ok(())
        });
    }

    #[test]
    fn test_missing_tessdata_dir_fails_fast() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "ocr:\n  tessdata_dir: does-not-exist\n")?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("does-not-exist"), "unexpected error: {err}");

            Ok(())
        });
    }

    #[test]
    fn test_missing_language_data_fails_fast() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "ocr:\n  tessdata_dir: .\n  language: jpn\n")?;
            jail.create_file("eng.traineddata", "")?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("jpn"), "unexpected error: {err}");

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "ocr:\n  tessdata_dir: .\n  langauge: eng\n")?;
            jail.create_file("eng.traineddata", "")?;

            assert!(Config::load(&args()).is_err());

            Ok(())
        });
    }

    #[test]
    fn test_wildcard_with_credentials_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                "ocr:\n  tessdata_dir: .\ncors:\n  allowed_origins: ['*']\n  allow_credentials: true\n",
            )?;
            jail.create_file("eng.traineddata", "")?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("wildcard"));

            Ok(())
        });
    }

    #[test]
    fn test_zero_upload_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"").unwrap();

        let mut config = Config::default();
        config.ocr.tessdata_dir = dir.path().to_path_buf();
        assert!(config.validate().is_ok());

        config.uploads.max_upload_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }
}
