use async_trait::async_trait;
use beacon_core::EventStreamDecoder;
use beacon_logging::beacon_debug;
use futures_util::{stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use crate::{FailureKind, FrameStream, MonitorSettings, TransportError};

const EVENT_STREAM: &str = "text/event-stream";

/// Opens push-update connections.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Connects to `url` and returns its frames. Resolves once the server
    /// has accepted the subscription.
    async fn connect(&self, url: Url) -> Result<FrameStream, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestEventTransport {
    client: reqwest::Client,
}

impl ReqwestEventTransport {
    pub fn new(settings: &MonitorSettings) -> Result<Self, TransportError> {
        // No overall timeout: the response body is open-ended.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventTransport for ReqwestEventTransport {
    async fn connect(&self, url: Url) -> Result<FrameStream, TransportError> {
        beacon_debug!("connecting to {}", url);
        let response = self
            .client
            .get(url)
            .header(ACCEPT, EVENT_STREAM)
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

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let essence = content_type.split(';').next().unwrap_or(content_type).trim();
        if !essence.eq_ignore_ascii_case(EVENT_STREAM) {
            return Err(TransportError::new(
                FailureKind::UnexpectedContentType {
                    content_type: content_type.to_string(),
                },
                "not an event stream",
            ));
        }

        let mut decoder = EventStreamDecoder::new();
        let frames = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(err) => vec![Err(TransportError::from_reqwest(err))],
            })
            .flat_map(stream::iter);
        Ok(frames.boxed())
    }
}
