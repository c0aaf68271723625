use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_core::{BackoffPolicy, FlushPolicy};
use beacon_engine::MonitorSettings;
use beacon_logging::beacon_info;
use serde::Deserialize;
use thiserror::Error;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "beacon.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_ms: millis(policy.initial),
            factor: policy.factor,
            max_ms: millis(policy.max),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Settings read from a RON file; command-line flags override them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: String,
    /// Page opened at startup.
    pub route: String,
    pub connect_timeout_secs: u64,
    pub backoff: BackoffConfig,
    pub flush_window_ms: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let settings = MonitorSettings::default();
        Self {
            server: settings.server,
            route: "/".to_string(),
            connect_timeout_secs: settings.connect_timeout.as_secs(),
            backoff: BackoffConfig::default(),
            flush_window_ms: millis(settings.flush.window),
            log_file: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ron::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        beacon_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Loads `explicit` if given. Otherwise loads `fallback` when it
    /// exists, and uses the defaults when it does not.
    pub fn discover(explicit: Option<&Path>, fallback: &Path) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match Self::load(fallback) {
                Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    Ok(Self::default())
                }
                other => other,
            },
        }
    }

    pub fn to_settings(&self) -> MonitorSettings {
        MonitorSettings {
            server: self.server.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(self.backoff.initial_ms),
                factor: self.backoff.factor,
                max: Duration::from_millis(self.backoff.max_ms),
            },
            flush: FlushPolicy {
                window: Duration::from_millis(self.flush_window_ms),
            },
        }
    }
}
