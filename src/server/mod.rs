//! Admin server: the admin API and the peer RPC endpoint on one listener

pub mod api;
pub mod context;
pub mod heal;
pub mod keepalive;

use anyhow::{Context, Result};
use axum::{middleware, Router};
use colored::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::Credentials;
use crate::config::AdminConfig;
use crate::heal::HealSessionRegistry;
use crate::node::Node;
use crate::peer::{server::peer_router, LocalTransport, PeerBroadcaster, PeerService, ServiceSignal};
use crate::storage::{IamStore, MemoryObjectLayer, ObjectLayer};

/// Shared state of every admin handler
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub registry: Arc<HealSessionRegistry>,
    pub peers: Arc<PeerBroadcaster>,
    pub keepalive: Duration,
}

pub struct AdminServer {
    config: AdminConfig,
    state: AppState,
    service: Arc<PeerService>,
    janitor: JoinHandle<()>,
}

impl AdminServer {
    /// Wire up node state, peers and the heal registry. Must be called
    /// inside a tokio runtime.
    pub fn new(config: AdminConfig, object_layer: Option<Arc<dyn ObjectLayer>>) -> Result<Self> {
        let bootstrap = Credentials::new(config.access_key.clone(), config.secret_key.clone());
        let iam = match &config.state_dir {
            Some(dir) => IamStore::open(dir, bootstrap)?,
            None => IamStore::in_memory(bootstrap),
        };
        let iam = Arc::new(iam);

        let node = Arc::new(Node::new(
            config.node_name.clone(),
            config.region.clone(),
            object_layer,
            iam.clone(),
        ));
        let service = Arc::new(PeerService::new(node.clone()));
        let local = Arc::new(LocalTransport::new(config.node_name.clone(), service.clone()));
        let peers = Arc::new(PeerBroadcaster::connect(
            &config.peers,
            &config.tls,
            iam,
            config.peer_timeout(),
            local,
        ));

        let registry = Arc::new(HealSessionRegistry::new(&config.heal));
        let janitor = registry.spawn_janitor(config.heal.janitor_interval());

        Ok(Self {
            state: AppState {
                node,
                registry,
                peers,
                keepalive: config.keepalive_interval(),
            },
            service,
            janitor,
            config,
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.state.node
    }

    pub fn registry(&self) -> &Arc<HealSessionRegistry> {
        &self.state.registry
    }

    pub fn router(&self) -> Router {
        admin_and_peer_router(self.state.clone(), self.service.clone())
    }

    /// Serve until a service signal or ctrl-c arrives
    pub async fn run(self, listener: TcpListener) -> Result<ServiceSignal> {
        let addr = listener.local_addr()?;
        println!(
            "{} Admin server running at {}",
            "✓".green(),
            format!("http://{}", addr).bright_blue()
        );
        info!(node = %self.config.node_name, %addr, peers = self.state.peers.peer_count(), "admin server started");

        let mut signals = self.state.node.subscribe_signals();
        let (signal_tx, signal_rx) = tokio::sync::oneshot::channel();
        let shutdown = async move {
            let signal = tokio::select! {
                changed = signals.wait_for(Option::is_some) => {
                    changed.ok().and_then(|s| *s).unwrap_or(ServiceSignal::Stop)
                }
                _ = tokio::signal::ctrl_c() => ServiceSignal::Stop,
            };
            let _ = signal_tx.send(signal);
        };

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("Admin server failed")?;

        self.state.registry.shutdown();
        self.janitor.abort();

        let signal = signal_rx.await.unwrap_or(ServiceSignal::Stop);
        info!(%signal, "admin server shut down");
        Ok(signal)
    }
}

fn admin_and_peer_router(state: AppState, service: Arc<PeerService>) -> Router {
    let stats = state.node.stats().clone();
    Router::new()
        .merge(api::admin_router(state))
        .merge(peer_router(service))
        .layer(middleware::from_fn_with_state(stats, context::request_context))
        .layer(TraceLayer::new_for_http())
}

/// Load the configuration and serve; a restart signal reloads it
pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    loop {
        let config = AdminConfig::load(config_path.as_deref())?;
        let layer: Arc<dyn ObjectLayer> = Arc::new(MemoryObjectLayer::new(config.disk_count));
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

        let server = AdminServer::new(config, Some(layer))?;
        match server.run(listener).await? {
            ServiceSignal::Restart => {
                warn!("restarting admin server");
                println!("{} Restarting", "↻".yellow());
            }
            ServiceSignal::Stop => return Ok(()),
        }
    }
}
