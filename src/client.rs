//! Typed client for the admin API
//!
//! Used by the command line tool and by integration tests.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{sign_now, Credentials};
use crate::error::ErrorEnvelope;
use crate::heal::{HealOpts, HealStartSuccess, HealStopSuccess, HealTaskStatus};
use crate::peer::rpc::ServerInfoData;
use crate::peer::ServiceSignal;
use crate::profiling::ProfilerKind;
use crate::server::api::ServiceStatus;
use crate::stats::{CpuLoad, MemUsage};
use crate::storage::{AccountStatus, DrivePerf, UserInfo};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{} ({status}): {}", .envelope.code, .envelope.message)]
    Api {
        status: u16,
        envelope: ErrorEnvelope,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The admin error code, if the server answered with an envelope
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { envelope, .. } => Some(&envelope.code),
            _ => None,
        }
    }
}

/// One node's entry in a cluster-wide answer
#[derive(Debug, Clone, Deserialize)]
pub struct NodeResult<T> {
    pub host: String,
    pub error: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfType {
    Drive,
    Cpu,
    Mem,
}

impl PerfType {
    fn as_str(&self) -> &'static str {
        match self {
            PerfType::Drive => "drive",
            PerfType::Cpu => "cpu",
            PerfType::Mem => "mem",
        }
    }
}

pub struct AdminClient {
    base: String,
    credentials: Credentials,
    client: Client,
}

impl AdminClient {
    pub fn new(endpoint: &str, credentials: Credentials) -> Result<Self, ClientError> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            credentials,
            client,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, bytes::Bytes), ClientError> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base, path))
            .bearer_auth(sign_now(&self.credentials))
            .query(query);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        Ok((status, bytes))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<T, ClientError> {
        let (status, bytes) = self.send(method, path, query, body).await?;
        parse_response(status, &bytes)
    }

    async fn call_empty(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<(), ClientError> {
        let (status, bytes) = self.send(method, path, query, body).await?;
        check_status(status, &bytes)
    }

    pub async fn version(&self) -> Result<String, ClientError> {
        let value: Value = self.call(Method::GET, "/admin/version", &[], None).await?;
        value["version"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("missing version".to_string()))
    }

    /// Start healing `bucket`/`prefix` (both empty for the whole cluster)
    pub async fn heal_start(
        &self,
        bucket: &str,
        prefix: &str,
        opts: &HealOpts,
        force_start: bool,
    ) -> Result<HealStartSuccess, ClientError> {
        let body = serde_json::to_vec(opts).map_err(|e| ClientError::Decode(e.to_string()))?;
        let query: &[(&str, &str)] = if force_start { &[("forceStart", "")] } else { &[] };
        self.call(Method::POST, &heal_path(bucket, prefix), query, Some(body))
            .await
    }

    pub async fn heal_status(
        &self,
        bucket: &str,
        prefix: &str,
        client_token: &str,
    ) -> Result<HealTaskStatus, ClientError> {
        self.call(
            Method::POST,
            &heal_path(bucket, prefix),
            &[("clientToken", client_token)],
            None,
        )
        .await
    }

    pub async fn heal_stop(&self, bucket: &str, prefix: &str) -> Result<HealStopSuccess, ClientError> {
        self.call(Method::POST, &heal_path(bucket, prefix), &[("forceStop", "")], None)
            .await
    }

    pub async fn service_status(&self) -> Result<ServiceStatus, ClientError> {
        self.call(Method::GET, "/admin/v1/service", &[], None).await
    }

    pub async fn service_signal(&self, signal: ServiceSignal) -> Result<Vec<NodeResult<Value>>, ClientError> {
        let body = json!({ "action": signal }).to_string().into_bytes();
        self.call(Method::POST, "/admin/v1/service", &[], Some(body))
            .await
    }

    pub async fn server_info(&self) -> Result<Vec<NodeResult<ServerInfoData>>, ClientError> {
        self.call(Method::GET, "/admin/v1/info", &[], None).await
    }

    pub async fn drive_performance(&self) -> Result<Vec<NodeResult<Vec<DrivePerf>>>, ClientError> {
        self.performance(PerfType::Drive).await
    }

    pub async fn cpu_load(&self) -> Result<Vec<NodeResult<CpuLoad>>, ClientError> {
        self.performance(PerfType::Cpu).await
    }

    pub async fn mem_usage(&self) -> Result<Vec<NodeResult<MemUsage>>, ClientError> {
        self.performance(PerfType::Mem).await
    }

    async fn performance<T: DeserializeOwned>(&self, perf: PerfType) -> Result<T, ClientError> {
        self.call(
            Method::GET,
            "/admin/v1/performance",
            &[("perfType", perf.as_str())],
            None,
        )
        .await
    }

    pub async fn start_profiling(&self, kind: ProfilerKind) -> Result<Vec<NodeResult<Value>>, ClientError> {
        let kind = kind.to_string();
        self.call(
            Method::POST,
            "/admin/v1/profiling/start",
            &[("profilerType", kind.as_str())],
            None,
        )
        .await
    }

    /// Zip archive with one report per node
    pub async fn download_profiling(&self) -> Result<Vec<u8>, ClientError> {
        let (status, bytes) = self
            .send(Method::GET, "/admin/v1/profiling/download", &[], None)
            .await?;
        check_status(status, &bytes)?;
        Ok(bytes.to_vec())
    }

    pub async fn add_user(
        &self,
        access_key: &str,
        secret_key: &str,
        status: AccountStatus,
    ) -> Result<(), ClientError> {
        let body = json!({ "secretKey": secret_key, "status": status })
            .to_string()
            .into_bytes();
        self.call_empty(
            Method::PUT,
            "/admin/v1/add-user",
            &[("accessKey", access_key)],
            Some(body),
        )
        .await
    }

    pub async fn remove_user(&self, access_key: &str) -> Result<(), ClientError> {
        self.call_empty(
            Method::DELETE,
            "/admin/v1/remove-user",
            &[("accessKey", access_key)],
            None,
        )
        .await
    }

    pub async fn set_user_status(&self, access_key: &str, status: AccountStatus) -> Result<(), ClientError> {
        let status = match status {
            AccountStatus::Enabled => "enabled",
            AccountStatus::Disabled => "disabled",
        };
        self.call_empty(
            Method::PUT,
            "/admin/v1/set-user-status",
            &[("accessKey", access_key), ("status", status)],
            None,
        )
        .await
    }

    pub async fn list_users(&self) -> Result<BTreeMap<String, UserInfo>, ClientError> {
        self.call(Method::GET, "/admin/v1/list-users", &[], None).await
    }

    pub async fn add_canned_policy(&self, name: &str, policy: &Value) -> Result<(), ClientError> {
        self.call_empty(
            Method::PUT,
            "/admin/v1/add-canned-policy",
            &[("name", name)],
            Some(policy.to_string().into_bytes()),
        )
        .await
    }

    pub async fn remove_canned_policy(&self, name: &str) -> Result<(), ClientError> {
        self.call_empty(
            Method::DELETE,
            "/admin/v1/remove-canned-policy",
            &[("name", name)],
            None,
        )
        .await
    }

    pub async fn list_canned_policies(&self) -> Result<BTreeMap<String, Value>, ClientError> {
        self.call(Method::GET, "/admin/v1/list-canned-policies", &[], None)
            .await
    }

    pub async fn set_user_policy(&self, access_key: &str, policy: &str) -> Result<(), ClientError> {
        self.call_empty(
            Method::PUT,
            "/admin/v1/set-user-policy",
            &[("accessKey", access_key), ("policyName", policy)],
            None,
        )
        .await
    }

    /// Replace the admin credentials; later calls on this client use them
    pub async fn set_credentials(&mut self, credentials: Credentials) -> Result<(), ClientError> {
        let body = serde_json::to_vec(&credentials).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.call_empty(Method::POST, "/admin/v1/config/credential", &[], Some(body))
            .await?;
        self.credentials = credentials;
        Ok(())
    }
}

fn heal_path(bucket: &str, prefix: &str) -> String {
    match (bucket, prefix) {
        ("", _) => "/admin/v1/heal/".to_string(),
        (bucket, "") => format!("/admin/v1/heal/{bucket}"),
        (bucket, prefix) => format!("/admin/v1/heal/{bucket}/{prefix}"),
    }
}

/// Errors reported after keep-alive filler arrive with a 200 status, so
/// an envelope is recognised by shape as well as by status.
fn parse_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, ClientError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ClientError::Decode(e.to_string()))?
        .trim();
    check_status(status, text.as_bytes())?;
    serde_json::from_str(text).map_err(|e| ClientError::Decode(format!("{e}: {text}")))
}

fn check_status(status: StatusCode, body: &[u8]) -> Result<(), ClientError> {
    let text = String::from_utf8_lossy(body);
    let envelope = serde_json::from_str::<ErrorEnvelope>(text.trim()).ok();
    match envelope {
        Some(envelope) => Err(ClientError::Api {
            status: status.as_u16(),
            envelope,
        }),
        None if !status.is_success() => Err(ClientError::Decode(format!("{status}: {text}"))),
        None => Ok(()),
    }
}

/// Print-friendly summary of how many nodes answered
pub fn summarize<T>(results: &[NodeResult<T>]) -> (usize, usize) {
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    (results.len() - failed, failed)
}
