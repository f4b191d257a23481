//! Error types for the request pipeline.
//!
//! Covers argument validation, header/URL encoding, response framing,
//! transport-level I/O failures, cancellation, and the typed failure that
//! service clients raise for rejected status codes.

use std::io;
use thiserror::Error;

use crate::transport::TransportId;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type for every operation of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required argument was missing or empty.
    #[error("Invalid argument: {message}")]
    Argument {
        /// Description of the offending argument.
        message: String,
    },

    /// A header name or value could not be encoded.
    #[error("Encoding error: {message}")]
    Encoding {
        /// Description of the encoding failure.
        message: String,
    },

    /// A URL could not be parsed.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// The response could not be framed (status line, header block, body length).
    #[error("Bad response: {message}")]
    Protocol {
        /// Description of the framing problem.
        message: String,
    },

    /// A call context was handed to a transport that did not create it.
    #[error("Call context created by transport {found} cannot be processed by transport {expected}")]
    TransportMismatch {
        /// The transport asked to process the context.
        expected: TransportId,
        /// The transport that created the context.
        found: TransportId,
    },

    /// Connecting to, or exchanging data with, the remote host failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// The peer closed the connection before a complete response arrived.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// TLS negotiation failed.
    #[error("TLS error: {message}")]
    Tls {
        /// Error message.
        message: String,
    },

    /// An operation exceeded a configured timeout.
    #[error("Timeout: {message}")]
    Timeout {
        /// Error message.
        message: String,
    },

    /// The call was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid pipeline or transport configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// A response body could not be deserialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The service answered with a status the caller treats as a failure.
    #[error("Request failed with status {status}")]
    RequestFailed {
        /// HTTP status code of the response.
        status: u16,
        /// Response headers, for diagnostics.
        headers: Vec<(String, String)>,
        /// Response body decoded lossily, if any.
        body: Option<String>,
    },
}

impl PipelineError {
    /// Returns true for transport failures that may succeed on a new attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Connection { .. }
                | PipelineError::ConnectionClosed
                | PipelineError::Timeout { .. }
        )
    }

    /// Returns true if the call was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Returns the status code of a failed response, if this error wraps one.
    pub fn status(&self) -> Option<u16> {
        match self {
            PipelineError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Creates an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        PipelineError::Argument {
            message: message.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        PipelineError::Encoding {
            message: message.into(),
        }
    }

    /// Creates a URL parse error.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a response framing error.
    pub fn protocol(message: impl Into<String>) -> Self {
        PipelineError::Protocol {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        PipelineError::Connection {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        PipelineError::Tls {
            message: message.into(),
        }
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => PipelineError::Timeout {
                message: err.to_string(),
            },
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => PipelineError::ConnectionClosed,
            _ => PipelineError::Connection {
                message: err.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_connect() {
            PipelineError::Connection {
                message: err.to_string(),
            }
        } else if err.is_builder() {
            PipelineError::Configuration {
                message: err.to_string(),
            }
        } else {
            PipelineError::Protocol {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(err: url::ParseError) -> Self {
        PipelineError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(PipelineError::connection("reset").is_retryable());
        assert!(PipelineError::ConnectionClosed.is_retryable());
        assert!(PipelineError::Timeout {
            message: "slow".to_string()
        }
        .is_retryable());

        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::protocol("bad status line").is_retryable());
        assert!(!PipelineError::argument("empty key").is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let err: PipelineError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, PipelineError::ConnectionClosed));

        let err: PipelineError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, PipelineError::Timeout { .. }));

        let err: PipelineError = io::Error::new(io::ErrorKind::ConnectionRefused, "no").into();
        assert!(matches!(err, PipelineError::Connection { .. }));
    }

    #[test]
    fn test_request_failed_status() {
        let err = PipelineError::RequestFailed {
            status: 404,
            headers: vec![],
            body: None,
        };

        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "Request failed with status 404");
        assert_eq!(PipelineError::Cancelled.status(), None);
    }

    #[test]
    fn test_transport_mismatch_message() {
        let err = PipelineError::TransportMismatch {
            expected: TransportId::from_raw(1),
            found: TransportId::from_raw(2),
        };

        let message = err.to_string();
        assert!(message.contains("transport #2"));
        assert!(message.contains("transport #1"));
    }
}
