use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::rpc::{PeerRequest, ProfilingData};
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::node::Node;
use crate::stats;

/// Answers peer requests against this node's state
pub struct PeerService {
    node: Arc<Node>,
}

impl PeerService {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub async fn handle(&self, request: &PeerRequest) -> ApiResult<Value> {
        match request {
            PeerRequest::SignalService { signal } => {
                self.node.signal(*signal);
                Ok(Value::Null)
            }
            PeerRequest::LoadUsers => {
                self.node.iam().reload_users().map_err(ApiError::internal)?;
                Ok(Value::Null)
            }
            PeerRequest::LoadPolicies => {
                self.node.iam().reload_policies().map_err(ApiError::internal)?;
                Ok(Value::Null)
            }
            PeerRequest::LoadCredentials => {
                self.node
                    .iam()
                    .reload_credentials()
                    .map_err(ApiError::internal)?;
                Ok(Value::Null)
            }
            PeerRequest::StartProfiling { profiler } => {
                self.node.profiler().start(*profiler);
                Ok(Value::Null)
            }
            PeerRequest::DownloadProfilingData => {
                let report = self
                    .node
                    .profiler()
                    .take_report()
                    .ok_or_else(|| ApiError::new(ApiErrorCode::AdminProfilerNotEnabled))?;
                to_value(ProfilingData {
                    data: base64::engine::general_purpose::STANDARD.encode(report),
                })
            }
            PeerRequest::ServerInfo => to_value(self.node.server_info().await?),
            PeerRequest::DrivePerfInfo => {
                let layer = self.node.object_layer()?;
                to_value(layer.drive_performance().await.map_err(ApiError::internal)?)
            }
            PeerRequest::CpuLoadInfo => to_value(stats::cpu_load().map_err(ApiError::internal)?),
            PeerRequest::MemUsageInfo => to_value(stats::mem_usage().map_err(ApiError::internal)?),
        }
    }
}

fn to_value(value: impl Serialize) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(ApiError::internal)
}
