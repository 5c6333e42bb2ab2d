//! Error taxonomy.

use sanskara_core::ValidationError;
use std::fmt;
use std::time::Duration;

/// Failure to open or use the socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),
    #[error("connection failed: {0}")]
    ConnectionError(String),
    #[error("send failed: {0}")]
    SendFailure(String),
}

/// Classification of a non-success HTTP status from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    SessionExpired,
    NotFound,
    RateLimited,
    Server,
    InvalidRequest,
}

impl HttpErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => HttpErrorKind::SessionExpired,
            404 => HttpErrorKind::NotFound,
            429 => HttpErrorKind::RateLimited,
            s if s >= 500 => HttpErrorKind::Server,
            _ => HttpErrorKind::InvalidRequest,
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpErrorKind::SessionExpired => "session expired",
            HttpErrorKind::NotFound => "session not found or no messages available",
            HttpErrorKind::RateLimited => "too many requests",
            HttpErrorKind::Server => "server error",
            HttpErrorKind::InvalidRequest => "invalid request",
        };
        f.write_str(s)
    }
}

/// Failure to load a page of history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("history API returned {status}: {kind}")]
    Status { status: u16, kind: HttpErrorKind },
    #[error("history response could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
}

impl HistoryError {
    pub fn status(status: u16) -> Self {
        HistoryError::Status {
            status,
            kind: HttpErrorKind::from_status(status),
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HistoryError::Request(_) => true,
            HistoryError::Status { kind, .. } => {
                matches!(kind, HttpErrorKind::RateLimited | HttpErrorKind::Server)
            }
            HistoryError::Decode(_) => false,
        }
    }
}

/// Errors from the session coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("service not initialized")]
    NotInitialized,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
