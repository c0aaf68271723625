use std::fmt;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Decoded event-stream frames of one connection; ends when the server
/// closes it.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Raw body chunks of a log fetch.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::new(FailureKind::Timeout, err.to_string());
        }
        if err.is_builder() {
            return Self::new(FailureKind::InvalidUrl, err.to_string());
        }
        Self::new(FailureKind::Network, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    UnexpectedContentType { content_type: String },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::UnexpectedContentType { content_type } => {
                write!(f, "unexpected content type {content_type}")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
