//! Storage collaborators consumed by the admin plane
//!
//! The erasure-coded object layer is external to this crate; it is reached
//! through [`ObjectLayer`]. [`MemoryObjectLayer`] is an in-process stand-in
//! with per-drive shard state, used by the default server and by tests.

pub mod iam;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::heal::{HealOpts, HealResultItem};

pub use iam::{AccountStatus, IamStore, UserInfo};
pub use memory::MemoryObjectLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Unknown,
    Fs,
    Erasure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub online_disks: usize,
    pub offline_disks: usize,
    pub standard_sc_parity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub used: u64,
    pub backend: BackendInfo,
}

impl StorageInfo {
    /// Disks known to the backend, reachable or not
    pub fn total_disks(&self) -> usize {
        self.backend.online_disks + self.backend.offline_disks
    }
}

/// Measured throughput of one drive, in bytes per second
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePerf {
    pub path: String,
    pub read_throughput: f64,
    pub write_throughput: f64,
}

/// The object layer as seen by the admin plane
#[async_trait]
pub trait ObjectLayer: Send + Sync {
    async fn storage_info(&self) -> StorageInfo;

    async fn drive_performance(&self) -> Result<Vec<DrivePerf>>;

    /// Repair the on-disk format metadata of every drive
    async fn heal_format(&self, dry_run: bool) -> Result<HealResultItem>;

    async fn list_buckets(&self) -> Result<Vec<String>>;

    async fn heal_bucket(&self, bucket: &str, dry_run: bool) -> Result<HealResultItem>;

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    async fn heal_object(&self, bucket: &str, object: &str, opts: &HealOpts)
        -> Result<HealResultItem>;
}
