//! Endpoint health types.

use serde::{Deserialize, Serialize};

/// Endpoint availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Endpoint answered the last scrape.
    Online,
    /// Endpoint failed the last scrape.
    Offline,
    /// Endpoint has not been scraped yet.
    #[default]
    Unknown,
}

impl EndpointStatus {
    /// Value of the `up` health sample for this status.
    pub fn as_up_value(&self) -> f64 {
        match self {
            EndpointStatus::Online => 1.0,
            EndpointStatus::Offline | EndpointStatus::Unknown => 0.0,
        }
    }
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointStatus::Online => write!(f, "online"),
            EndpointStatus::Offline => write!(f, "offline"),
            EndpointStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Request timed out.
    Timeout,
    /// Authentication or permission failure.
    AuthFailed,
    /// Connection refused.
    ConnectionRefused,
    /// Endpoint path or URL does not exist.
    NotFound,
    /// Kea answered with a non-zero result or an unexpected shape.
    ProtocolError,
    /// Response could not be decoded.
    ParseError,
    /// Other/unknown error.
    #[default]
    Other,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::Timeout => "timeout",
            ErrorType::AuthFailed => "auth_failed",
            ErrorType::ConnectionRefused => "connection_refused",
            ErrorType::NotFound => "not_found",
            ErrorType::ProtocolError => "protocol_error",
            ErrorType::ParseError => "parse_error",
            ErrorType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Liveness of a single endpoint as seen by the scrape loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointLiveness {
    /// Sanitized endpoint identity.
    pub endpoint: String,
    /// Current status.
    pub status: EndpointStatus,
    /// Consecutive failed scrapes.
    pub consecutive_failures: u32,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl EndpointLiveness {
    /// Create liveness for a never-scraped endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Record a successful scrape.
    pub fn record_success(&mut self) {
        self.status = EndpointStatus::Online;
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Record a failed scrape.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.status = EndpointStatus::Offline;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.into());
    }
}
