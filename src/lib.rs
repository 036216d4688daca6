//! # dx-admin - Administrative control plane for a distributed object store
//!
//! Runs next to every node of an erasure-coded cluster and exposes:
//!
//! - **Heal orchestration**: one heal sequence per scope, polled by a client
//!   token, force-restarted or force-stopped on demand
//! - **Keep-alive responses**: long admin operations stream whitespace filler
//!   so proxies keep the connection open
//! - **Peer broadcast**: reloads, service signals, profiling and telemetry
//!   fanned out to every node with per-node results
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dx_admin::{AdminConfig, AdminServer, MemoryObjectLayer, ObjectLayer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AdminConfig::load(None)?;
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//!     let layer: Arc<dyn ObjectLayer> = Arc::new(MemoryObjectLayer::new(config.disk_count));
//!     let server = AdminServer::new(config, Some(layer))?;
//!     server.run(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod heal;
pub mod node;
pub mod peer;
pub mod profiling;
pub mod server;
pub mod stats;
pub mod storage;
pub mod version;

// Re-export main types for library consumers
pub use client::{AdminClient, ClientError};
pub use config::AdminConfig;
pub use error::{ApiError, ApiErrorCode, ApiResult};
pub use heal::{HealOpts, HealSessionRegistry, HealState, HealTaskStatus};
pub use peer::{PeerBroadcaster, ServiceSignal};
pub use server::AdminServer;
pub use storage::{MemoryObjectLayer, ObjectLayer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
