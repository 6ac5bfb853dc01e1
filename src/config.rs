//! Configuration types for http-dl

use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Download behavior configuration (concurrency, progress throttling, scratch area)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent downloads (default: number of CPU cores)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Minimum spacing between persisted progress updates of one task (default: 200ms)
    ///
    /// Progress arrives far more often than it is useful to store; within each window
    /// only the latest value is written.
    #[serde(default = "default_progress_throttle", with = "millis_serde")]
    pub progress_throttle: Duration,

    /// Scratch directory for in-flight downloads (default: "./temp")
    ///
    /// Everything in here is deleted by the lifecycle guard on shutdown.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            progress_throttle: default_progress_throttle(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./http-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout (None = no limit, the default for large files)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
        }
    }
}

/// Main configuration for [`crate::Downloader`]
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — concurrency, throttling, scratch directory
/// - [`persistence`](PersistenceConfig) — task store location
/// - [`http`](HttpConfig) — HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Task store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Upper bound for shutdown cleanup and for waiting on in-flight tasks (default: 30s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            persistence: PersistenceConfig::default(),
            http: HttpConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file '{}': {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }
        if self.download.progress_throttle.is_zero() {
            return Err(Error::Config {
                message: "progress_throttle must be greater than zero".to_string(),
                key: Some("progress_throttle".to_string()),
            });
        }
        Ok(())
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }
}

fn default_max_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_progress_throttle() -> Duration {
    Duration::from_millis(200)
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./http-dl.db")
}

fn default_user_agent() -> String {
    format!("http-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper (whole seconds)
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// Millisecond Duration serialization helper, for sub-second intervals
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
