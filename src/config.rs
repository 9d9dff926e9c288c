//! Server configuration loaded from environment variables.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Names of the external converter programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterPrograms {
    /// Single-shot image converter (ImageMagick).
    pub image: String,
    /// Media transcoder used for audio and video.
    pub media: String,
    /// Headless office converter.
    pub office: String,
}

impl Default for ConverterPrograms {
    fn default() -> Self {
        Self {
            image: "convert".to_string(),
            media: "ffmpeg".to_string(),
            office: "soffice".to_string(),
        }
    }
}

/// Runtime configuration threaded into the conversion router.
///
/// Environment variables:
/// - `CONVERT_HOST` / `CONVERT_PORT`: bind address (default 0.0.0.0:8000)
/// - `CONVERT_BASE_DIR`: storage root holding `uploads/` and `outputs/`
/// - `CONVERT_MAX_UPLOAD_MB`: upload size limit in MiB (default 100)
/// - `CONVERT_TIMEOUT_SECS`: per-conversion timeout (default 180)
/// - `CONVERT_CONCURRENCY`: concurrent converter processes (default 4)
/// - `CONVERT_RETENTION_SECS`: enables the storage reaper when set
/// - `CONVERT_IMAGE_CONVERTER`, `CONVERT_MEDIA_TRANSCODER`, `CONVERT_OFFICE_CONVERTER`
/// - `CONVERT_LOG_JSON`: JSON log output (default false)
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: enables OTLP span export when set
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub conversion_timeout: Duration,
    pub max_concurrent_conversions: usize,
    pub retention: Option<Duration>,
    pub programs: ConverterPrograms,
    pub log_json: bool,
    pub otel_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_dir: std::env::temp_dir().join("freefileconverters"),
            max_upload_bytes: 100 * MIB,
            conversion_timeout: Duration::from_secs(180),
            max_concurrent_conversions: 4,
            retention: None,
            programs: ConverterPrograms::default(),
            log_json: false,
            otel_endpoint: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Unset or blank variables fall back to defaults; values that fail to
    /// parse are reported as errors instead of being silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();

        let max_upload_mb: u64 = parse_or(&get, "CONVERT_MAX_UPLOAD_MB", 100)?;
        let timeout_secs: u64 = parse_or(&get, "CONVERT_TIMEOUT_SECS", 180)?;
        let concurrency: usize = parse_or(&get, "CONVERT_CONCURRENCY", 4)?;
        if concurrency == 0 {
            anyhow::bail!("CONVERT_CONCURRENCY must be at least 1");
        }
        let retention = get("CONVERT_RETENTION_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("Invalid CONVERT_RETENTION_SECS: {}", v))
            })
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            host: get("CONVERT_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "CONVERT_PORT", defaults.port)?,
            base_dir: get("CONVERT_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            max_upload_bytes: max_upload_mb.saturating_mul(MIB),
            conversion_timeout: Duration::from_secs(timeout_secs),
            max_concurrent_conversions: concurrency,
            retention,
            programs: ConverterPrograms {
                image: get("CONVERT_IMAGE_CONVERTER").unwrap_or(defaults.programs.image),
                media: get("CONVERT_MEDIA_TRANSCODER").unwrap_or(defaults.programs.media),
                office: get("CONVERT_OFFICE_CONVERTER").unwrap_or(defaults.programs.office),
            },
            log_json: parse_or(&get, "CONVERT_LOG_JSON", false)?,
            otel_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    /// Directory receiving raw uploads.
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join("uploads")
    }

    /// Directory receiving converter output.
    pub fn outputs_dir(&self) -> PathBuf {
        self.base_dir.join("outputs")
    }

    /// `host:port` string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Creates the uploads and outputs directories if they are missing.
    pub fn ensure_storage(&self) -> Result<()> {
        for dir in [self.uploads_dir(), self.outputs_dir()] {
            create_dir(&dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create storage directory {}", dir.display()))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {}: {}", key, raw)),
        None => Ok(default),
    }
}
