use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::{BackendInfo, BackendType, DrivePerf, ObjectLayer, StorageInfo};
use crate::heal::{DriveState, HealDriveInfo, HealItemType, HealOpts, HealResultItem};

/// Nominal throughput reported for every online drive
const NOMINAL_THROUGHPUT: f64 = 512.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
struct ObjectRecord {
    size: u64,
    shards: Vec<DriveState>,
}

#[derive(Debug, Default)]
struct BucketRecord {
    missing_on: BTreeSet<usize>,
    objects: BTreeMap<String, ObjectRecord>,
}

#[derive(Debug, Default)]
struct LayerState {
    offline: BTreeSet<usize>,
    unformatted: BTreeSet<usize>,
    buckets: BTreeMap<String, BucketRecord>,
}

/// In-memory erasure set: every object has one shard per drive
pub struct MemoryObjectLayer {
    endpoints: Vec<String>,
    parity: usize,
    heal_delay: Duration,
    state: RwLock<LayerState>,
}

impl MemoryObjectLayer {
    pub fn new(disk_count: usize) -> Self {
        let disk_count = disk_count.max(1);
        Self {
            endpoints: (1..=disk_count).map(|i| format!("/mnt/disk{i}")).collect(),
            parity: disk_count / 2,
            heal_delay: Duration::ZERO,
            state: RwLock::new(LayerState::default()),
        }
    }

    /// Sleep this long inside every heal call (simulates slow repairs)
    pub fn with_heal_delay(mut self, delay: Duration) -> Self {
        self.heal_delay = delay;
        self
    }

    pub fn disk_count(&self) -> usize {
        self.endpoints.len()
    }

    fn data_blocks(&self) -> usize {
        self.endpoints.len() - self.parity
    }

    pub fn make_bucket(&self, bucket: &str) {
        self.state.write().buckets.entry(bucket.to_string()).or_default();
    }

    pub fn put_object(&self, bucket: &str, object: &str, size: u64) {
        let mut state = self.state.write();
        let shards = (0..self.endpoints.len())
            .map(|i| {
                if state.offline.contains(&i) {
                    DriveState::Offline
                } else {
                    DriveState::Ok
                }
            })
            .collect();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(object.to_string(), ObjectRecord { size, shards });
    }

    pub fn set_drive_offline(&self, disk: usize, offline: bool) {
        let mut state = self.state.write();
        if offline {
            state.offline.insert(disk);
        } else {
            state.offline.remove(&disk);
        }
    }

    /// Mark one shard of an object as damaged
    pub fn damage_shard(&self, bucket: &str, object: &str, disk: usize, state: DriveState) {
        let mut guard = self.state.write();
        if let Some(record) = guard
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.get_mut(object))
        {
            if let Some(shard) = record.shards.get_mut(disk) {
                *shard = state;
            }
        }
    }

    pub fn drop_bucket_on(&self, bucket: &str, disk: usize) {
        if let Some(record) = self.state.write().buckets.get_mut(bucket) {
            record.missing_on.insert(disk);
        }
    }

    pub fn unformat_drive(&self, disk: usize) {
        self.state.write().unformatted.insert(disk);
    }

    pub fn object_shards(&self, bucket: &str, object: &str) -> Option<Vec<DriveState>> {
        self.state
            .read()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(object))
            .map(|o| o.shards.clone())
    }

    fn drives(&self, states: impl Iterator<Item = DriveState>) -> Vec<HealDriveInfo> {
        self.endpoints
            .iter()
            .zip(states)
            .map(|(endpoint, state)| HealDriveInfo {
                endpoint: endpoint.clone(),
                state,
            })
            .collect()
    }

    fn base_item(&self, item_type: HealItemType, bucket: &str, object: &str) -> HealResultItem {
        let mut item = HealResultItem::new(item_type, bucket, object);
        item.disk_count = self.endpoints.len();
        item.parity_blocks = self.parity;
        item.data_blocks = self.data_blocks();
        item
    }

    async fn pause(&self) {
        if !self.heal_delay.is_zero() {
            tokio::time::sleep(self.heal_delay).await;
        }
    }
}

#[async_trait]
impl ObjectLayer for MemoryObjectLayer {
    async fn storage_info(&self) -> StorageInfo {
        let state = self.state.read();
        let used = state
            .buckets
            .values()
            .flat_map(|b| b.objects.values())
            .map(|o| o.size)
            .sum();
        let offline = state.offline.len();
        StorageInfo {
            used,
            backend: BackendInfo {
                backend_type: BackendType::Erasure,
                online_disks: self.endpoints.len() - offline,
                offline_disks: offline,
                standard_sc_parity: self.parity,
            },
        }
    }

    async fn drive_performance(&self) -> Result<Vec<DrivePerf>> {
        let state = self.state.read();
        Ok(self
            .endpoints
            .iter()
            .enumerate()
            .filter(|(i, _)| !state.offline.contains(i))
            .map(|(_, path)| DrivePerf {
                path: path.clone(),
                read_throughput: NOMINAL_THROUGHPUT,
                write_throughput: NOMINAL_THROUGHPUT,
            })
            .collect())
    }

    async fn heal_format(&self, dry_run: bool) -> Result<HealResultItem> {
        self.pause().await;
        let mut state = self.state.write();
        let status = |i: usize, unformatted: &BTreeSet<usize>, offline: &BTreeSet<usize>| {
            if offline.contains(&i) {
                DriveState::Offline
            } else if unformatted.contains(&i) {
                DriveState::Missing
            } else {
                DriveState::Ok
            }
        };

        let n = self.endpoints.len();
        let before = self.drives((0..n).map(|i| status(i, &state.unformatted, &state.offline)));
        if !dry_run {
            let offline = state.offline.clone();
            state.unformatted.retain(|i| offline.contains(i));
        }
        let after = self.drives((0..n).map(|i| status(i, &state.unformatted, &state.offline)));

        let mut item = self.base_item(HealItemType::Metadata, "", "");
        item.detail = "disk-format".to_string();
        item.before = before;
        item.after = after;
        Ok(item)
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        Ok(self.state.read().buckets.keys().cloned().collect())
    }

    async fn heal_bucket(&self, bucket: &str, dry_run: bool) -> Result<HealResultItem> {
        self.pause().await;
        let mut guard = self.state.write();
        let state = &mut *guard;
        let record = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("bucket not found: {bucket}"))?;

        let n = self.endpoints.len();
        let status = |i: usize, missing: &BTreeSet<usize>| {
            if state.offline.contains(&i) {
                DriveState::Offline
            } else if missing.contains(&i) {
                DriveState::Missing
            } else {
                DriveState::Ok
            }
        };

        let before = self.drives((0..n).map(|i| status(i, &record.missing_on)));
        if !dry_run {
            record.missing_on.retain(|i| state.offline.contains(i));
        }
        let after = self.drives((0..n).map(|i| status(i, &record.missing_on)));

        let mut item = self.base_item(HealItemType::Bucket, bucket, "");
        item.before = before;
        item.after = after;
        Ok(item)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        let record = state
            .buckets
            .get(bucket)
            .ok_or_else(|| anyhow!("bucket not found: {bucket}"))?;
        Ok(record
            .objects
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn heal_object(
        &self,
        bucket: &str,
        object: &str,
        opts: &HealOpts,
    ) -> Result<HealResultItem> {
        self.pause().await;
        let mut guard = self.state.write();
        let state = &mut *guard;
        let record = state
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.get_mut(object))
            .ok_or_else(|| anyhow!("object not found: {bucket}/{object}"))?;

        for (i, shard) in record.shards.iter_mut().enumerate() {
            if state.offline.contains(&i) {
                *shard = DriveState::Offline;
            } else if *shard == DriveState::Offline {
                *shard = DriveState::Missing;
            }
        }

        let healthy = record.shards.iter().filter(|s| **s == DriveState::Ok).count();
        if healthy < self.data_blocks() {
            bail!(
                "{bucket}/{object} is unrecoverable: {healthy} healthy shards, {} required",
                self.data_blocks()
            );
        }

        let before = self.drives(record.shards.iter().copied());
        if !opts.dry_run {
            for shard in record.shards.iter_mut() {
                if matches!(shard, DriveState::Missing | DriveState::Corrupt) {
                    *shard = DriveState::Ok;
                }
            }
        }
        let after = self.drives(record.shards.iter().copied());

        let mut item = self.base_item(HealItemType::Object, bucket, object);
        item.object_size = record.size;
        item.before = before;
        item.after = after;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heal_object_restores_shards() {
        let layer = MemoryObjectLayer::new(4);
        layer.put_object("photos", "a.jpg", 1024);
        layer.damage_shard("photos", "a.jpg", 1, DriveState::Corrupt);

        let item = layer
            .heal_object("photos", "a.jpg", &HealOpts::default())
            .await
            .unwrap();
        assert_eq!(item.before[1].state, DriveState::Corrupt);
        assert_eq!(item.after[1].state, DriveState::Ok);
        assert_eq!(item.healed_drives(), 1);
        assert_eq!(item.object_size, 1024);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let layer = MemoryObjectLayer::new(4);
        layer.put_object("photos", "a.jpg", 10);
        layer.damage_shard("photos", "a.jpg", 0, DriveState::Missing);

        let opts = HealOpts {
            dry_run: true,
            ..Default::default()
        };
        let item = layer.heal_object("photos", "a.jpg", &opts).await.unwrap();
        assert_eq!(item.healed_drives(), 0);
        assert_eq!(
            layer.object_shards("photos", "a.jpg").unwrap()[0],
            DriveState::Missing
        );
    }

    #[tokio::test]
    async fn test_unrecoverable_object_errors() {
        let layer = MemoryObjectLayer::new(4);
        layer.put_object("photos", "a.jpg", 10);
        for disk in 0..3 {
            layer.damage_shard("photos", "a.jpg", disk, DriveState::Corrupt);
        }
        assert!(layer
            .heal_object("photos", "a.jpg", &HealOpts::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_offline_drives_counted() {
        let layer = MemoryObjectLayer::new(6);
        layer.set_drive_offline(2, true);
        let info = layer.storage_info().await;
        assert_eq!(info.backend.online_disks, 5);
        assert_eq!(info.total_disks(), 6);
        assert_eq!(layer.drive_performance().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_heal_bucket_and_format() {
        let layer = MemoryObjectLayer::new(4);
        layer.make_bucket("logs");
        layer.drop_bucket_on("logs", 3);
        layer.unformat_drive(0);

        let item = layer.heal_bucket("logs", false).await.unwrap();
        assert_eq!(item.before[3].state, DriveState::Missing);
        assert_eq!(item.after[3].state, DriveState::Ok);

        let item = layer.heal_format(false).await.unwrap();
        assert_eq!(item.item_type, HealItemType::Metadata);
        assert_eq!(item.healed_drives(), 1);
    }
}
