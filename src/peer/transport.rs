use async_trait::async_trait;
use reqwest::{Certificate, Client};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::rpc::{PeerRequest, PEER_RPC_PATH};
use super::service::PeerService;
use super::PeerError;
use crate::auth::{self, CredentialsProvider};
use crate::config::{PeerEndpoint, TlsConfig};
use crate::error::ErrorEnvelope;
use crate::version::{peer_rpc_version, ProtocolVersion, PEER_RPC_VERSION_HEADER};

/// One RPC channel to a single node
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Identity reported in broadcast results
    fn host(&self) -> &str;

    async fn call(&self, request: &PeerRequest) -> Result<Value, PeerError>;
}

/// Signed JSON-over-HTTP(S) transport to a remote node
pub struct HttpTransport {
    host: String,
    url: Url,
    client: Client,
    credentials: Arc<dyn CredentialsProvider>,
}

impl HttpTransport {
    pub fn new(
        endpoint: &PeerEndpoint,
        tls: &TlsConfig,
        credentials: Arc<dyn CredentialsProvider>,
        timeout: Duration,
    ) -> Result<Self, PeerError> {
        let scheme = if tls.enabled { "https" } else { "http" };
        let mut builder = Client::builder().timeout(timeout).use_rustls_tls();

        if let Some(ca_file) = &tls.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                PeerError::NotEstablished(format!("cannot read CA file {}: {e}", ca_file.display()))
            })?;
            let certs = Certificate::from_pem_bundle(&pem)
                .map_err(|e| PeerError::NotEstablished(format!("invalid CA bundle: {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        // Dial the override address while keeping the declared name for TLS
        let authority = match endpoint.addr {
            Some(addr) => {
                builder = builder.resolve(endpoint.name(), addr);
                format!("{}:{}", endpoint.name(), addr.port())
            }
            None => endpoint.host.clone(),
        };

        let url = Url::parse(&format!("{scheme}://{authority}{PEER_RPC_PATH}"))
            .map_err(|e| PeerError::NotEstablished(format!("invalid peer address {}: {e}", endpoint.host)))?;
        let client = builder
            .build()
            .map_err(|e| PeerError::NotEstablished(e.to_string()))?;

        Ok(Self {
            host: endpoint.host.clone(),
            url,
            client,
            credentials,
        })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn call(&self, request: &PeerRequest) -> Result<Value, PeerError> {
        let local_version = peer_rpc_version();
        let token = auth::sign_now(&self.credentials.credentials());

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(token)
            .header(PEER_RPC_VERSION_HEADER, local_version.to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| PeerError::Transport(e.to_string()))?;

        if let Some(remote) = response
            .headers()
            .get(PEER_RPC_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let compatible = remote
                .parse::<ProtocolVersion>()
                .map(|v| local_version.is_compatible_with(&v))
                .unwrap_or(false);
            if !compatible {
                return Err(PeerError::VersionMismatch {
                    local: local_version.to_string(),
                    remote: remote.to_string(),
                });
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorEnvelope>(body.trim()) {
                Ok(envelope) => PeerError::Remote {
                    status: status.as_u16(),
                    code: envelope.code,
                    message: envelope.message,
                },
                Err(_) => PeerError::Remote {
                    status: status.as_u16(),
                    code: status.canonical_reason().unwrap_or("Unknown").to_string(),
                    message: body,
                },
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PeerError::Decode(e.to_string()))
    }
}

/// In-process transport for the node's own share of a broadcast
pub struct LocalTransport {
    host: String,
    service: Arc<PeerService>,
}

impl LocalTransport {
    pub fn new(host: impl Into<String>, service: Arc<PeerService>) -> Self {
        Self {
            host: host.into(),
            service,
        }
    }
}

#[async_trait]
impl PeerTransport for LocalTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn call(&self, request: &PeerRequest) -> Result<Value, PeerError> {
        self.service.handle(request).await.map_err(PeerError::from)
    }
}
