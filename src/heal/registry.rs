//! Process-wide table of heal sequences, keyed by canonical scope path
//!
//! Every install, replacement and stop goes through one lock, so at most one
//! non-terminal sequence exists per scope. The lock is never held while a
//! sequence executes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::sequence::{HealSequence, SequenceLimits};
use super::types::{HealScope, HealStartSuccess, HealStopSuccess, HealTaskStatus};
use crate::config::HealConfig;
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::storage::ObjectLayer;

pub struct HealSessionRegistry {
    sequences: Mutex<HashMap<String, Arc<HealSequence>>>,
    retention: Duration,
    limits: SequenceLimits,
}

impl Default for HealSessionRegistry {
    fn default() -> Self {
        Self::new(&HealConfig::default())
    }
}

impl HealSessionRegistry {
    pub fn new(config: &HealConfig) -> Self {
        Self {
            sequences: Mutex::new(HashMap::new()),
            retention: config.retention(),
            limits: SequenceLimits::from(config),
        }
    }

    /// Limits new sequences should be built with
    pub fn limits(&self) -> SequenceLimits {
        self.limits
    }

    pub fn get_sequence(&self, path: &str) -> Option<Arc<HealSequence>> {
        self.sequences.lock().get(path).cloned()
    }

    /// Install `sequence` for its scope and start executing it
    pub fn launch(
        &self,
        sequence: HealSequence,
        layer: Arc<dyn ObjectLayer>,
    ) -> ApiResult<HealStartSuccess> {
        let sequence = Arc::new(sequence);
        let path = sequence.path().to_string();

        {
            let mut sequences = self.sequences.lock();
            let now = Instant::now();
            sequences.retain(|_, s| !s.is_expired(now, self.retention));

            if let Some(existing) = sequences.get(&path) {
                if !existing.has_ended() {
                    if !sequence.force_started() {
                        return Err(ApiError::with_detail(
                            ApiErrorCode::HealAlreadyRunning,
                            format!(
                                "The heal was started by IP {} at {}, token is {}",
                                existing.client_address(),
                                existing.start_time().to_rfc2822(),
                                existing.client_token()
                            ),
                        ));
                    }
                    existing.stop();
                }
            }

            let overlapping = sequences.values().find(|s| {
                s.path() != path && !s.has_ended() && HealScope::overlaps(s.path(), &path)
            });
            if let Some(other) = overlapping {
                return Err(ApiError::with_detail(
                    ApiErrorCode::HealOverlappingPaths,
                    format!(
                        "The provided heal sequence path overlaps with an existing heal path: {}",
                        other.scope()
                    ),
                ));
            }

            sequences.insert(path, sequence.clone());
        }

        info!(
            scope = %sequence.scope(),
            client_token = %sequence.client_token(),
            client_address = %sequence.client_address(),
            force = sequence.force_started(),
            "launching heal sequence"
        );
        tokio::spawn(sequence.clone().run(layer));

        Ok(HealStartSuccess {
            client_token: sequence.client_token().to_string(),
            client_address: sequence.client_address().to_string(),
            start_time: sequence.start_time(),
        })
    }

    /// Stop whatever runs on the sequence's scope and wait for its executor
    /// to return before launching, so one scope never has two executors
    pub async fn force_launch(
        &self,
        sequence: HealSequence,
        layer: Arc<dyn ObjectLayer>,
    ) -> ApiResult<HealStartSuccess> {
        if let Some(previous) = self.get_sequence(sequence.path()) {
            previous.stop();
            previous.wait_idle().await;
        }
        self.launch(sequence, layer)
    }

    /// Stop the running sequence for `path`
    pub fn stop(&self, path: &str) -> ApiResult<HealStopSuccess> {
        let sequences = self.sequences.lock();
        let sequence = sequences
            .get(path)
            .filter(|s| s.stop())
            .ok_or_else(|| ApiError::new(ApiErrorCode::HealNoSuchProcess))?;

        Ok(HealStopSuccess {
            client_token: sequence.client_token().to_string(),
            client_address: sequence.client_address().to_string(),
            start_time: sequence.start_time(),
        })
    }

    /// Deliver undelivered items to the holder of `token`
    pub fn pop_status(&self, path: &str, token: &str) -> ApiResult<HealTaskStatus> {
        let sequence = self
            .get_sequence(path)
            .filter(|s| s.client_token() == token)
            .ok_or_else(|| ApiError::new(ApiErrorCode::HealNoSuchProcess))?;
        Ok(sequence.pop_status())
    }

    /// Drop sequences that ended more than the retention window ago
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut sequences = self.sequences.lock();
        let before = sequences.len();
        sequences.retain(|_, s| !s.is_expired(now, self.retention));
        let evicted = before - sequences.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired heal sequences");
        }
        evicted
    }

    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.evict_expired(Instant::now());
                    }
                    None => break,
                }
            }
        })
    }

    /// Stop every running sequence
    pub fn shutdown(&self) {
        let sequences = self.sequences.lock();
        let stopped = sequences.values().filter(|s| s.stop()).count();
        if stopped > 0 {
            info!(stopped, "stopped running heal sequences");
        }
    }

    pub fn len(&self) -> usize {
        self.sequences.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heal::{HealOpts, HealState};
    use crate::storage::MemoryObjectLayer;

    fn slow_layer() -> Arc<dyn ObjectLayer> {
        let layer = MemoryObjectLayer::new(4).with_heal_delay(Duration::from_millis(200));
        layer.put_object("mybucket", "dir/a", 1);
        layer.put_object("mybucket", "dir/b", 1);
        Arc::new(layer)
    }

    fn seq(bucket: &str, prefix: &str, force: bool) -> HealSequence {
        HealSequence::new(
            HealScope::parse(bucket, prefix).unwrap(),
            "10.0.0.1",
            HealOpts {
                recursive: true,
                dry_run: false,
            },
            4,
            force,
        )
    }

    #[tokio::test]
    async fn test_duplicate_launch_rejected() {
        let registry = HealSessionRegistry::default();
        let layer = slow_layer();

        let first = registry.launch(seq("mybucket", "", false), layer.clone()).unwrap();
        let err = registry.launch(seq("mybucket", "", false), layer).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::HealAlreadyRunning);
        assert!(err.message().contains(&first.client_token));
        assert!(err.message().contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_force_start_replaces() {
        let registry = HealSessionRegistry::default();
        let layer = slow_layer();

        let first = registry.launch(seq("mybucket", "", false), layer.clone()).unwrap();
        let old = registry.get_sequence("mybucket/").unwrap();
        let second = registry.launch(seq("mybucket", "", true), layer).unwrap();

        assert_ne!(first.client_token, second.client_token);
        assert_eq!(old.state(), HealState::Stopped);
        let err = registry.pop_status("mybucket/", &first.client_token).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::HealNoSuchProcess);
        assert!(registry.pop_status("mybucket/", &second.client_token).is_ok());
    }

    #[tokio::test]
    async fn test_force_launch_waits_for_previous_executor() {
        let registry = HealSessionRegistry::default();
        let layer = slow_layer();

        registry.launch(seq("mybucket", "", false), layer.clone()).unwrap();
        let old = registry.get_sequence("mybucket/").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The old executor is inside a 200ms bucket heal
        let started = Instant::now();
        let second = registry.force_launch(seq("mybucket", "", true), layer).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(old.state(), HealState::Stopped);
        tokio::time::timeout(Duration::from_millis(10), old.wait_idle())
            .await
            .unwrap();
        assert_eq!(
            registry.get_sequence("mybucket/").unwrap().client_token(),
            second.client_token
        );
    }

    #[tokio::test]
    async fn test_overlapping_scopes_rejected() {
        let registry = HealSessionRegistry::default();
        let layer = slow_layer();

        registry.launch(seq("mybucket", "", false), layer.clone()).unwrap();
        let err = registry.launch(seq("mybucket", "dir/", false), layer.clone()).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::HealOverlappingPaths);

        let err = registry.launch(seq("", "", false), layer).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::HealOverlappingPaths);
    }

    #[tokio::test]
    async fn test_stop_semantics() {
        let registry = HealSessionRegistry::default();
        let layer = slow_layer();

        let err = registry.stop("mybucket/").unwrap_err();
        assert_eq!(err.code, ApiErrorCode::HealNoSuchProcess);

        let started = registry.launch(seq("mybucket", "", false), layer.clone()).unwrap();
        let stopped = registry.stop("mybucket/").unwrap();
        assert_eq!(started.client_token, stopped.client_token);
        assert!(registry.stop("mybucket/").is_err());

        // scope is free again, and the stopped sequence is still queryable
        let status = registry.pop_status("mybucket/", &started.client_token).unwrap();
        assert_eq!(status.summary, HealState::Stopped);
        assert!(registry.launch(seq("mybucket", "", false), layer).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_launches_single_winner() {
        let registry = Arc::new(HealSessionRegistry::default());
        let layer = slow_layer();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let layer = layer.clone();
                tokio::spawn(async move { registry.launch(seq("mybucket", "", false), layer) })
            })
            .collect();

        let mut created = 0;
        let mut already_running = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) if e.code == ApiErrorCode::HealAlreadyRunning => already_running += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(already_running, 15);
    }

    #[tokio::test]
    async fn test_eviction_and_shutdown() {
        let registry = HealSessionRegistry::new(&HealConfig {
            retention_secs: 0,
            ..Default::default()
        });
        let layer = slow_layer();

        registry.launch(seq("mybucket", "", false), layer).unwrap();
        assert_eq!(registry.evict_expired(Instant::now()), 0);

        registry.shutdown();
        assert_eq!(registry.evict_expired(Instant::now()), 1);
        assert!(registry.is_empty());
    }
}
