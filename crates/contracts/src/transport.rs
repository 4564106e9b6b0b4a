//! Transport trait - the external "perform network call" capability
//!
//! The dispatcher never implements real transport; it is injected.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ApiResponse, RequestDescriptor, SecretHandle};

/// Classification of a failed transport call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Request timed out (408 or client-side timeout)
    Timeout,
    /// Secondary rate limit (429)
    RateLimited,
    /// Credential quota exhausted (403 mentioning the rate limit)
    QuotaExceeded,
    /// 5xx-equivalent
    Server,
    /// Connection reset / refused
    Connection,
    /// Other 4xx
    Client,
}

impl TransportErrorKind {
    /// Whether a call failing with this kind may be retried
    pub fn is_retryable(self) -> bool {
        !matches!(self, TransportErrorKind::Client)
    }

    /// Lower-case name
    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::RateLimited => "rate_limited",
            TransportErrorKind::QuotaExceeded => "quota_exceeded",
            TransportErrorKind::Server => "server",
            TransportErrorKind::Connection => "connection",
            TransportErrorKind::Client => "client",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a transport call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} transport error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    /// Create an error of the given kind without a status
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP-equivalent error status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = match status {
            408 => TransportErrorKind::Timeout,
            429 => TransportErrorKind::RateLimited,
            403 if message.to_ascii_lowercase().contains("rate limit") => {
                TransportErrorKind::QuotaExceeded
            }
            500..=599 => TransportErrorKind::Server,
            _ => TransportErrorKind::Client,
        };
        Self {
            kind,
            status: Some(status),
            message,
        }
    }

    /// Timeout shorthand
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    /// Connection failure shorthand
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, message)
    }
}

/// Failure classification used by retry loops
pub trait Retryable {
    /// Whether the failed operation may be attempted again
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Remote API transport capability
///
/// Implementations perform exactly one call; retry, credential choice and
/// caching are decided by the dispatcher.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Execute one request with the given credential
    ///
    /// # Errors
    /// Network-level failures. HTTP error statuses may be returned either as
    /// `Err` or as an `ApiResponse` with a 4xx/5xx status; the dispatcher
    /// classifies both the same way.
    async fn execute(
        &self,
        secret: &SecretHandle,
        request: &RequestDescriptor,
    ) -> Result<ApiResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(TransportError::from_status(408, "").kind, TransportErrorKind::Timeout);
        assert_eq!(TransportError::from_status(429, "").kind, TransportErrorKind::RateLimited);
        assert_eq!(
            TransportError::from_status(403, "API rate limit exceeded").kind,
            TransportErrorKind::QuotaExceeded
        );
        assert_eq!(TransportError::from_status(403, "forbidden").kind, TransportErrorKind::Client);
        assert_eq!(TransportError::from_status(502, "").kind, TransportErrorKind::Server);
        assert_eq!(TransportError::from_status(404, "").kind, TransportErrorKind::Client);
    }

    #[test]
    fn test_retryability() {
        assert!(TransportError::timeout("slow").is_retryable());
        assert!(TransportError::connection("reset").is_retryable());
        assert!(TransportError::from_status(503, "").is_retryable());
        assert!(!TransportError::from_status(422, "").is_retryable());
    }

    #[test]
    fn test_display_includes_status() {
        let err = TransportError::from_status(503, "unavailable");
        assert_eq!(err.to_string(), "server transport error (503): unavailable");
        let err = TransportError::timeout("deadline");
        assert_eq!(err.to_string(), "timeout transport error: deadline");
    }
}
