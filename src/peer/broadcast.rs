//! Fan-out of one command to every node of the cluster
//!
//! Each broadcast yields exactly one [`BroadcastResult`] per peer plus one for
//! the local node (always last). Peer calls run concurrently. A failing peer
//! is logged and reported in its own entry; it never short-circuits the
//! others.

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::rpc::{PeerRequest, ProfilingData, ServerInfoData, ServiceSignal};
use super::transport::{HttpTransport, PeerTransport};
use super::PeerError;
use crate::auth::CredentialsProvider;
use crate::config::{PeerEndpoint, TlsConfig};
use crate::profiling::ProfilerKind;
use crate::stats::{CpuLoad, MemUsage};
use crate::storage::DrivePerf;

/// A remote node and its transport, or the reason it has none
pub struct PeerHandle {
    pub host: String,
    transport: Result<Arc<dyn PeerTransport>, PeerError>,
}

impl PeerHandle {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            host: transport.host().to_string(),
            transport: Ok(transport),
        }
    }

    pub fn unavailable(host: impl Into<String>, err: PeerError) -> Self {
        Self {
            host: host.into(),
            transport: Err(err),
        }
    }

    async fn call(&self, request: &PeerRequest) -> Result<Value, PeerError> {
        match &self.transport {
            Ok(transport) => transport.call(request).await,
            Err(err) => Err(err.clone()),
        }
    }
}

/// Outcome of one node's share of a broadcast
#[derive(Debug, Clone)]
pub struct BroadcastResult<T> {
    pub host: String,
    pub result: Result<T, PeerError>,
}

impl<T> BroadcastResult<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    fn map<U>(self, f: impl FnOnce(T) -> Result<U, PeerError>) -> BroadcastResult<U> {
        BroadcastResult {
            host: self.host,
            result: self.result.and_then(f),
        }
    }
}

/// Wire form: `{"host": .., "data": ..}` or `{"host": .., "error": ..}`
impl<T: Serialize> Serialize for BroadcastResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a, T> {
            host: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            data: Option<&'a T>,
        }

        let (error, data) = match &self.result {
            Ok(data) => (None, Some(data)),
            Err(err) => (Some(err.to_string()), None),
        };
        Wire {
            host: &self.host,
            error,
            data,
        }
        .serialize(serializer)
    }
}

pub struct PeerBroadcaster {
    peers: Vec<PeerHandle>,
    local: Arc<dyn PeerTransport>,
}

impl PeerBroadcaster {
    pub fn new(peers: Vec<PeerHandle>, local: Arc<dyn PeerTransport>) -> Self {
        Self { peers, local }
    }

    /// Build HTTP transports for every configured peer. A peer whose
    /// transport cannot be built is kept and reports that error.
    pub fn connect(
        endpoints: &[PeerEndpoint],
        tls: &TlsConfig,
        credentials: Arc<dyn CredentialsProvider>,
        timeout: Duration,
        local: Arc<dyn PeerTransport>,
    ) -> Self {
        let peers = endpoints
            .iter()
            .map(|endpoint| {
                match HttpTransport::new(endpoint, tls, credentials.clone(), timeout) {
                    Ok(transport) => PeerHandle::new(Arc::new(transport)),
                    Err(err) => {
                        warn!(peer_address = %endpoint.host, error = %err, "failed to set up peer transport");
                        PeerHandle::unavailable(endpoint.host.clone(), err)
                    }
                }
            })
            .collect();
        Self::new(peers, local)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn local_host(&self) -> &str {
        self.local.host()
    }

    /// Send `request` to every peer and the local node
    pub async fn call_all(&self, request: &PeerRequest) -> Vec<BroadcastResult<Value>> {
        let remote = self.peers.iter().map(|peer| async move {
            BroadcastResult {
                host: peer.host.clone(),
                result: peer.call(request).await,
            }
        });

        // Peers are called before the local node so a local reload cannot
        // change the credentials the peer calls are signed with
        let mut results = join_all(remote).await;
        results.push(BroadcastResult {
            host: self.local.host().to_string(),
            result: self.local.call(request).await,
        });

        log_failures(request.method(), &results);
        results
    }

    async fn call_typed<T: DeserializeOwned>(&self, request: &PeerRequest) -> Vec<BroadcastResult<T>> {
        self.call_all(request)
            .await
            .into_iter()
            .map(|r| {
                r.map(|value| {
                    serde_json::from_value(value).map_err(|e| PeerError::Decode(e.to_string()))
                })
            })
            .collect()
    }

    async fn call_ack(&self, request: &PeerRequest) -> Vec<BroadcastResult<()>> {
        self.call_all(request)
            .await
            .into_iter()
            .map(|r| r.map(|_| Ok(())))
            .collect()
    }

    pub async fn signal_service(&self, signal: ServiceSignal) -> Vec<BroadcastResult<()>> {
        self.call_ack(&PeerRequest::SignalService { signal }).await
    }

    pub async fn load_users(&self) -> Vec<BroadcastResult<()>> {
        self.call_ack(&PeerRequest::LoadUsers).await
    }

    pub async fn load_policies(&self) -> Vec<BroadcastResult<()>> {
        self.call_ack(&PeerRequest::LoadPolicies).await
    }

    pub async fn load_credentials(&self) -> Vec<BroadcastResult<()>> {
        self.call_ack(&PeerRequest::LoadCredentials).await
    }

    pub async fn start_profiling(&self, profiler: ProfilerKind) -> Vec<BroadcastResult<()>> {
        self.call_ack(&PeerRequest::StartProfiling { profiler }).await
    }

    pub async fn download_profiling_data(&self) -> Vec<BroadcastResult<ProfilingData>> {
        self.call_typed(&PeerRequest::DownloadProfilingData).await
    }

    pub async fn server_info(&self) -> Vec<BroadcastResult<ServerInfoData>> {
        self.call_typed(&PeerRequest::ServerInfo).await
    }

    pub async fn drive_perf_info(&self) -> Vec<BroadcastResult<Vec<DrivePerf>>> {
        self.call_typed(&PeerRequest::DrivePerfInfo).await
    }

    pub async fn cpu_load_info(&self) -> Vec<BroadcastResult<CpuLoad>> {
        self.call_typed(&PeerRequest::CpuLoadInfo).await
    }

    pub async fn mem_usage_info(&self) -> Vec<BroadcastResult<MemUsage>> {
        self.call_typed(&PeerRequest::MemUsageInfo).await
    }
}

fn log_failures<T>(method: &str, results: &[BroadcastResult<T>]) {
    for r in results {
        if let Err(err) = &r.result {
            warn!(peer_address = %r.host, method, error = %err, "peer call failed");
        }
    }
}
