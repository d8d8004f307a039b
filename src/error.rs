use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rejected locally before any request was sent.
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("{message} (status {status})")]
    Service {
        status: StatusCode,
        message: String,
        code: Option<String>,
        details: Option<Map<String, Value>>,
        /// Seconds to wait before retrying, set for rate-limited responses.
        retry_after: Option<u64>,
    },
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Error::Service {
                status: StatusCode::TOO_MANY_REQUESTS,
                ..
            }
        )
    }

    /// Machine-readable error code supplied by the service, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Service { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
