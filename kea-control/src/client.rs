//! Transport-agnostic client built from an [`Endpoint`].

use async_trait::async_trait;

use crate::channel::{CommandRequest, CommandResponse, ControlChannel};
use crate::error::ControlError;
use crate::http::{HttpClient, TlsIdentity};
use crate::socket::SocketClient;
use crate::target::{Endpoint, TransportKind};

/// Either an HTTP or a socket control channel.
pub enum ControlClient {
    Http(HttpClient),
    Socket(SocketClient),
}

impl ControlClient {
    /// Build the client matching the endpoint's transport.
    ///
    /// The TLS identity only applies to HTTP endpoints.
    pub fn from_endpoint(
        endpoint: &Endpoint,
        tls: Option<&TlsIdentity>,
    ) -> Result<Self, ControlError> {
        match endpoint.kind {
            TransportKind::Http => Ok(Self::Http(HttpClient::new(endpoint, tls)?)),
            TransportKind::Socket => Ok(Self::Socket(SocketClient::new(endpoint)?)),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http(_) => TransportKind::Http,
            Self::Socket(_) => TransportKind::Socket,
        }
    }
}

#[async_trait]
impl ControlChannel for ControlClient {
    fn identity(&self) -> &str {
        match self {
            Self::Http(c) => c.identity(),
            Self::Socket(c) => c.identity(),
        }
    }

    async fn connect(&self) -> Result<(), ControlError> {
        match self {
            Self::Http(c) => c.connect().await,
            Self::Socket(c) => c.connect().await,
        }
    }

    async fn exchange(
        &self,
        request: &CommandRequest,
    ) -> Result<Vec<CommandResponse>, ControlError> {
        match self {
            Self::Http(c) => c.exchange(request).await,
            Self::Socket(c) => c.exchange(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_client_matches_transport() {
        let timeout = Duration::from_secs(5);

        let http = Endpoint::parse("http://u:p@127.0.0.1:8000", timeout).unwrap();
        let client = ControlClient::from_endpoint(&http, None).unwrap();
        assert_eq!(client.kind(), TransportKind::Http);
        assert_eq!(client.identity(), "http://127.0.0.1:8000");

        let socket = Endpoint::parse("/run/kea/kea6-ctrl-socket", timeout).unwrap();
        let client = ControlClient::from_endpoint(&socket, None).unwrap();
        assert_eq!(client.kind(), TransportKind::Socket);
        assert_eq!(client.identity(), "/run/kea/kea6-ctrl-socket");
    }
}
