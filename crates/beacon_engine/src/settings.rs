use std::time::Duration;

use beacon_core::{BackoffPolicy, FlushPolicy};
use url::Url;

use crate::{FailureKind, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Base URL of the CI server; channel targets and log paths resolve
    /// against it.
    pub server: String,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub flush: FlushPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            server: "http://localhost:8080/".to_string(),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            flush: FlushPolicy::default(),
        }
    }
}

impl MonitorSettings {
    /// Resolves a target such as `/jobs?page=1` or `log/build/3` below the
    /// server base, keeping any path prefix the base carries.
    pub fn resolve(&self, target: &str) -> Result<Url, TransportError> {
        let invalid = |err: url::ParseError| TransportError::new(FailureKind::InvalidUrl, err.to_string());
        let mut base = Url::parse(&self.server).map_err(invalid)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(target.trim_start_matches('/')).map_err(invalid)
    }
}
