//! Peer RPC wire types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::profiling::ProfilerKind;
use crate::stats::{ConnStats, MethodStats};
use crate::storage::StorageInfo;

/// Path every node serves peer RPC on
pub const PEER_RPC_PATH: &str = "/peer/v1/rpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSignal {
    Restart,
    Stop,
}

impl fmt::Display for ServiceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSignal::Restart => f.write_str("restart"),
            ServiceSignal::Stop => f.write_str("stop"),
        }
    }
}

/// One command sent to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "camelCase")]
pub enum PeerRequest {
    SignalService { signal: ServiceSignal },
    LoadUsers,
    LoadPolicies,
    LoadCredentials,
    StartProfiling { profiler: ProfilerKind },
    DownloadProfilingData,
    ServerInfo,
    DrivePerfInfo,
    CpuLoadInfo,
    MemUsageInfo,
}

impl PeerRequest {
    /// Method name used in logs
    pub fn method(&self) -> &'static str {
        match self {
            PeerRequest::SignalService { .. } => "signalService",
            PeerRequest::LoadUsers => "loadUsers",
            PeerRequest::LoadPolicies => "loadPolicies",
            PeerRequest::LoadCredentials => "loadCredentials",
            PeerRequest::StartProfiling { .. } => "startProfiling",
            PeerRequest::DownloadProfilingData => "downloadProfilingData",
            PeerRequest::ServerInfo => "serverInfo",
            PeerRequest::DrivePerfInfo => "drivePerfInfo",
            PeerRequest::CpuLoadInfo => "cpuLoadInfo",
            PeerRequest::MemUsageInfo => "memUsageInfo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProperties {
    pub uptime_secs: u64,
    pub version: String,
    pub commit_id: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoData {
    pub storage: StorageInfo,
    pub conn_stats: ConnStats,
    pub http_stats: BTreeMap<String, MethodStats>,
    pub properties: ServerProperties,
}

/// A node's profiling report, base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingData {
    pub data: String,
}
