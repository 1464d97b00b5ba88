//! HTTP(S) control channel for the Kea Control Agent and daemon listeners.

use std::path::Path;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, trace};

use crate::channel::{CommandRequest, CommandResponse, ControlChannel, decode_responses};
use crate::error::{ControlError, ProtocolError, TransportError};
use crate::target::{Credentials, Endpoint, TransportKind};

/// Client certificate and key used for mutual TLS.
#[derive(Clone)]
pub struct TlsIdentity {
    pem: Vec<u8>,
}

impl TlsIdentity {
    /// Load a PEM certificate and PEM private key.
    pub fn load(cert: &Path, key: &Path) -> Result<Self, ControlError> {
        let mut pem = std::fs::read(cert).map_err(|e| {
            ControlError::invalid_endpoint(cert.display().to_string(), e.to_string())
        })?;
        pem.push(b'\n');
        pem.extend(std::fs::read(key).map_err(|e| {
            ControlError::invalid_endpoint(key.display().to_string(), e.to_string())
        })?);
        Ok(Self { pem })
    }
}

/// Control channel speaking JSON over HTTP POST.
pub struct HttpClient {
    url: reqwest::Url,
    identity: String,
    credentials: Option<Credentials>,
    client: reqwest::Client,
}

impl HttpClient {
    /// Build a client for an HTTP endpoint.
    pub fn new(endpoint: &Endpoint, tls: Option<&TlsIdentity>) -> Result<Self, ControlError> {
        if endpoint.kind != TransportKind::Http {
            return Err(ControlError::invalid_endpoint(
                &endpoint.identity,
                "not an HTTP endpoint",
            ));
        }

        let url = reqwest::Url::parse(&endpoint.address)
            .map_err(|e| ControlError::invalid_endpoint(&endpoint.identity, e.to_string()))?;

        let mut builder = reqwest::Client::builder().timeout(endpoint.timeout);
        if let Some(tls) = tls {
            let identity = reqwest::Identity::from_pem(&tls.pem)
                .map_err(|e| ControlError::invalid_endpoint(&endpoint.identity, e.to_string()))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| ControlError::invalid_endpoint(&endpoint.identity, e.to_string()))?;

        Ok(Self {
            url,
            identity: endpoint.identity.clone(),
            credentials: endpoint.credentials.clone(),
            client,
        })
    }
}

fn classify(err: reqwest::Error) -> ControlError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string()).into()
    } else if err.is_connect() {
        TransportError::ConnectionRefused(err.to_string()).into()
    } else if err.is_decode() || err.is_body() {
        ProtocolError::MalformedResponse(err.to_string()).into()
    } else {
        TransportError::Io(std::io::Error::other(err)).into()
    }
}

#[async_trait]
impl ControlChannel for HttpClient {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn exchange(
        &self,
        request: &CommandRequest,
    ) -> Result<Vec<CommandResponse>, ControlError> {
        trace!(endpoint = %self.identity, command = %request.command, "Sending HTTP command");

        let mut builder = self.client.post(self.url.clone()).json(request);
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TransportError::AuthError(format!("HTTP {status}")).into());
            }
            StatusCode::NOT_FOUND => {
                return Err(TransportError::NotFound(format!("HTTP {status}")).into());
            }
            s if !s.is_success() => {
                return Err(ProtocolError::MalformedResponse(format!("HTTP {status}")).into());
            }
            _ => {}
        }

        let body = response.bytes().await.map_err(classify)?;
        debug!(
            endpoint = %self.identity,
            command = %request.command,
            bytes = body.len(),
            "Received HTTP response"
        );
        Ok(decode_responses(&body)?)
    }
}
