//! UNIX domain socket control channel.

use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::channel::{CommandRequest, CommandResponse, ControlChannel, decode_responses};
use crate::error::{ControlError, TransportError};
use crate::target::{Endpoint, TransportKind};

const READ_CHUNK: usize = 8192;

/// Control channel over a daemon's local control socket.
///
/// Each command opens a fresh connection; Kea closes the socket after
/// answering.
pub struct SocketClient {
    path: PathBuf,
    identity: String,
    timeout: Duration,
}

impl SocketClient {
    pub fn new(endpoint: &Endpoint) -> Result<Self, ControlError> {
        if endpoint.kind != TransportKind::Socket {
            return Err(ControlError::invalid_endpoint(
                &endpoint.identity,
                "not a socket endpoint",
            ));
        }

        Ok(Self {
            path: PathBuf::from(&endpoint.address),
            identity: endpoint.identity.clone(),
            timeout: endpoint.timeout,
        })
    }

    async fn round_trip(&self, request: &CommandRequest) -> Result<Vec<u8>, ControlError> {
        let mut stream = UnixStream::connect(&self.path).await?;

        let payload = serde_json::to_vec(&request.without_services())
            .map_err(|e| TransportError::Io(e.into()))?;
        stream.write_all(&payload).await?;

        let mut body = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
            if looks_complete(&body) && serde_json::from_slice::<serde_json::Value>(&body).is_ok()
            {
                break;
            }
        }
        Ok(body)
    }
}

/// Cheap pre-check before attempting a full parse of a partial body.
fn looks_complete(body: &[u8]) -> bool {
    matches!(
        body.iter().rev().find(|b| !b.is_ascii_whitespace()),
        Some(b'}') | Some(b']')
    )
}

#[async_trait]
impl ControlChannel for SocketClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn connect(&self) -> Result<(), ControlError> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.file_type().is_socket() {
            return Err(TransportError::NotFound(format!(
                "{} is not a socket",
                self.path.display()
            ))
            .into());
        }
        Ok(())
    }

    async fn exchange(
        &self,
        request: &CommandRequest,
    ) -> Result<Vec<CommandResponse>, ControlError> {
        trace!(endpoint = %self.identity, command = %request.command, "Sending socket command");

        let body = timeout(self.timeout, self.round_trip(request))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!("no response within {:?}", self.timeout))
            })??;

        debug!(
            endpoint = %self.identity,
            command = %request.command,
            bytes = body.len(),
            "Received socket response"
        );
        Ok(decode_responses(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_complete() {
        assert!(looks_complete(b"{\"result\": 0}\n"));
        assert!(looks_complete(b"[]"));
        assert!(!looks_complete(b"{\"result\": "));
        assert!(!looks_complete(b""));
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let endpoint = Endpoint::parse("http://localhost:8000", Duration::from_secs(1)).unwrap();
        assert!(SocketClient::new(&endpoint).is_err());
    }
}
