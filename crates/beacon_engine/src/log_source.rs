use async_trait::async_trait;
use beacon_logging::beacon_debug;
use futures_util::StreamExt;
use url::Url;

use crate::{ChunkStream, FailureKind, MonitorSettings, TransportError};

/// Fetches a run's console output as a finite stream of raw chunks.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn open(&self, url: Url) -> Result<ChunkStream, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestLogSource {
    client: reqwest::Client,
}

impl ReqwestLogSource {
    pub fn new(settings: &MonitorSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LogSource for ReqwestLogSource {
    async fn open(&self, url: Url) -> Result<ChunkStream, TransportError> {
        beacon_debug!("fetching log {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from_reqwest))
            .boxed())
    }
}
