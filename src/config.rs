//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Background processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Directory holding status snapshots and result artifacts.
    pub results_dir: PathBuf,
    /// Number of concurrent worker loops.
    pub max_workers: usize,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: usize,
    /// Model recorded on table extraction jobs that don't name one.
    pub default_model: String,
    /// Hard per-job limit on the analyzer call. `None` leaves timeouts to the analyzer.
    pub analysis_timeout: Option<Duration>,
    /// How long terminal tasks are retained before the sweep removes them.
    pub retention: Duration,
    /// Retention sweep interval.
    pub cleanup_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("./results"),
            max_workers: 3,
            max_upload_bytes: 50 * 1024 * 1024,
            default_model: "gpt-4o".to_string(),
            analysis_timeout: None,
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl ProcessorConfig {
    /// Build from `DOC_ANALYSIS_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let results_dir = std::env::var("DOC_ANALYSIS_RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.results_dir);

        let max_workers = non_zero(
            "DOC_ANALYSIS_MAX_WORKERS",
            parse_env("DOC_ANALYSIS_MAX_WORKERS")?.unwrap_or(defaults.max_workers),
        )?;

        let max_upload_bytes =
            parse_env("DOC_ANALYSIS_MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes);

        let default_model = std::env::var("DOC_ANALYSIS_DEFAULT_MODEL")
            .or_else(|_| std::env::var("OPENAI_MODEL"))
            .unwrap_or(defaults.default_model);

        let analysis_timeout =
            parse_env::<u64>("DOC_ANALYSIS_TIMEOUT_SECS")?.map(Duration::from_secs);

        let retention = parse_env::<u64>("DOC_ANALYSIS_RETENTION_HOURS")?
            .map(hours)
            .unwrap_or(defaults.retention);

        let cleanup_interval = parse_env::<u64>("DOC_ANALYSIS_CLEANUP_INTERVAL_SECS")?
            .map(|secs| non_zero("DOC_ANALYSIS_CLEANUP_INTERVAL_SECS", secs))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cleanup_interval);

        Ok(Self {
            results_dir,
            max_workers,
            max_upload_bytes,
            default_model,
            analysis_timeout,
            retention,
            cleanup_interval,
        })
    }
}

/// HTTP server and analyzer endpoint configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Collaborator endpoint for `image_analysis` jobs.
    pub image_endpoint: Option<String>,
    /// Collaborator endpoint for `table_extraction` jobs.
    pub table_endpoint: Option<String>,
    /// Bearer token sent to the collaborator endpoints.
    pub analyzer_token: Option<SecretString>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_env("DOC_ANALYSIS_PORT")?.unwrap_or(8000),
            image_endpoint: std::env::var("DOC_ANALYSIS_IMAGE_ENDPOINT").ok(),
            table_endpoint: std::env::var("DOC_ANALYSIS_TABLE_ENDPOINT").ok(),
            analyzer_token: std::env::var("DOC_ANALYSIS_ANALYZER_TOKEN")
                .ok()
                .map(SecretString::from),
        })
    }
}

/// Read and parse an optional environment variable. Unset is `Ok(None)`,
/// set-but-unparseable is an error.
fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Whole hours as a `Duration`, saturating on absurd values.
pub fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

/// Reject zero for settings that must be at least 1.
fn non_zero<T: PartialEq + From<u8>>(key: &str, value: T) -> Result<T, ConfigError> {
    if value == T::from(0) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}
