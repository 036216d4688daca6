//! Node-local state shared by the admin and peer endpoints

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::peer::rpc::{ServerInfoData, ServerProperties};
use crate::peer::ServiceSignal;
use crate::profiling::Profiler;
use crate::stats::HttpStats;
use crate::storage::{IamStore, ObjectLayer};
use crate::version::{COMMIT_ID, SERVER_VERSION};

pub struct Node {
    name: String,
    region: String,
    object_layer: Option<Arc<dyn ObjectLayer>>,
    iam: Arc<IamStore>,
    profiler: Profiler,
    stats: Arc<HttpStats>,
    signals: watch::Sender<Option<ServiceSignal>>,
    boot_time: Instant,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        object_layer: Option<Arc<dyn ObjectLayer>>,
        iam: Arc<IamStore>,
    ) -> Self {
        let (signals, _) = watch::channel(None);
        Self {
            name: name.into(),
            region: region.into(),
            object_layer,
            iam,
            profiler: Profiler::new(),
            stats: Arc::new(HttpStats::new()),
            signals,
            boot_time: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// The object layer, once storage is initialized
    pub fn object_layer(&self) -> ApiResult<Arc<dyn ObjectLayer>> {
        self.object_layer.clone().ok_or_else(ApiError::not_initialized)
    }

    pub fn iam(&self) -> &Arc<IamStore> {
        &self.iam
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn stats(&self) -> &Arc<HttpStats> {
        &self.stats
    }

    pub fn uptime_secs(&self) -> u64 {
        self.boot_time.elapsed().as_secs()
    }

    /// Ask the serve loop to restart or stop this node
    pub fn signal(&self, signal: ServiceSignal) {
        info!(node = %self.name, %signal, "service signal received");
        self.signals.send_replace(Some(signal));
    }

    pub fn subscribe_signals(&self) -> watch::Receiver<Option<ServiceSignal>> {
        self.signals.subscribe()
    }

    pub async fn server_info(&self) -> ApiResult<ServerInfoData> {
        let layer = self.object_layer()?;
        Ok(ServerInfoData {
            storage: layer.storage_info().await,
            conn_stats: self.stats.conn_stats(),
            http_stats: self.stats.methods(),
            properties: ServerProperties {
                uptime_secs: self.uptime_secs(),
                version: SERVER_VERSION.to_string(),
                commit_id: COMMIT_ID.to_string(),
                region: self.region.clone(),
            },
        })
    }
}
