//! Error types for control-channel operations.

use kea_common::ErrorType;
use thiserror::Error;

/// Result type alias using [`ControlError`].
pub type Result<T> = std::result::Result<T, ControlError>;

/// Failures reaching a Kea endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The endpoint refused the connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Credentials were rejected or the socket is not accessible.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The socket path or URL does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => Self::AuthError(err.to_string()),
            ErrorKind::ConnectionRefused => Self::ConnectionRefused(err.to_string()),
            ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Kea answered, but not with what was asked for.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A response carried a non-zero `result`.
    #[error("Kea returned result {code}: {text}")]
    NonZeroResult { code: i64, text: String },

    /// The response body is not valid JSON or not a command response.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The response is valid JSON but not in the expected shape.
    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Errors returned by control-channel clients and endpoints.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The endpoint descriptor could not be built.
    #[error("Invalid endpoint '{target}': {reason}")]
    InvalidEndpoint { target: String, reason: String },
}

impl ControlError {
    /// Create an invalid endpoint error.
    pub fn invalid_endpoint(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error for logs and liveness tracking.
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Transport(TransportError::Timeout(_)) => ErrorType::Timeout,
            Self::Transport(TransportError::ConnectionRefused(_)) => ErrorType::ConnectionRefused,
            Self::Transport(TransportError::AuthError(_)) => ErrorType::AuthFailed,
            Self::Transport(TransportError::NotFound(_)) => ErrorType::NotFound,
            Self::Transport(TransportError::Io(_)) => ErrorType::Other,
            Self::Protocol(ProtocolError::MalformedResponse(_)) => ErrorType::ParseError,
            Self::Protocol(_) => ErrorType::ProtocolError,
            Self::InvalidEndpoint { .. } => ErrorType::Other,
        }
    }
}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_errors_are_classified() {
        let err: TransportError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(matches!(err, TransportError::NotFound(_)));

        let err: TransportError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, TransportError::AuthError(_)));

        let err: TransportError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));

        let err: TransportError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn test_error_type() {
        let err = ControlError::from(TransportError::Timeout("10s".into()));
        assert_eq!(err.error_type(), ErrorType::Timeout);

        let err = ControlError::from(ProtocolError::NonZeroResult {
            code: 1,
            text: "unsupported".into(),
        });
        assert_eq!(err.error_type(), ErrorType::ProtocolError);
        assert_eq!(err.to_string(), "Kea returned result 1: unsupported");

        let err = ControlError::from(ProtocolError::MalformedResponse("eof".into()));
        assert_eq!(err.error_type(), ErrorType::ParseError);
    }
}
