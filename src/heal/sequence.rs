//! One heal job: its state machine and its bounded result log
//!
//! The producer (`run`) appends items while the sequence is Running; the
//! client drains them through `pop_status`. Terminal states never change.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{HealOpts, HealResultItem, HealScope, HealState, HealTaskStatus};
use crate::config::HealConfig;
use crate::storage::ObjectLayer;

/// Failure detail when the result buffer stays full for too long
pub const CLIENT_TIMEOUT_DETAIL: &str = "heal client did not consume results in time";

/// Buffering limits applied to a sequence's result log
#[derive(Debug, Clone, Copy)]
pub struct SequenceLimits {
    pub max_unconsumed: usize,
    pub client_timeout: Duration,
}

impl Default for SequenceLimits {
    fn default() -> Self {
        Self::from(&HealConfig::default())
    }
}

impl From<&HealConfig> for SequenceLimits {
    fn from(config: &HealConfig) -> Self {
        Self {
            max_unconsumed: config.max_unconsumed_items.max(1),
            client_timeout: config.client_timeout(),
        }
    }
}

struct SequenceInner {
    state: HealState,
    failure_detail: String,
    end_time: Option<Instant>,
    items: VecDeque<HealResultItem>,
    next_index: usize,
}

pub struct HealSequence {
    scope: HealScope,
    path: String,
    client_token: String,
    client_address: String,
    start_time: DateTime<Utc>,
    force_started: bool,
    settings: HealOpts,
    num_disks: usize,
    limits: SequenceLimits,
    inner: Mutex<SequenceInner>,
    consumed: Notify,
    stop_tx: watch::Sender<bool>,
    idle_tx: watch::Sender<bool>,
}

impl HealSequence {
    pub fn new(
        scope: HealScope,
        client_address: impl Into<String>,
        settings: HealOpts,
        num_disks: usize,
        force_started: bool,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (idle_tx, _) = watch::channel(false);
        Self {
            path: scope.path(),
            scope,
            client_token: Uuid::new_v4().to_string(),
            client_address: client_address.into(),
            start_time: Utc::now(),
            force_started,
            settings,
            num_disks,
            limits: SequenceLimits::default(),
            inner: Mutex::new(SequenceInner {
                state: HealState::Running,
                failure_detail: String::new(),
                end_time: None,
                items: VecDeque::new(),
                next_index: 1,
            }),
            consumed: Notify::new(),
            stop_tx,
            idle_tx,
        }
    }

    pub fn with_limits(mut self, limits: SequenceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn scope(&self) -> &HealScope {
        &self.scope
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn client_token(&self) -> &str {
        &self.client_token
    }

    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn force_started(&self) -> bool {
        self.force_started
    }

    pub fn settings(&self) -> HealOpts {
        self.settings
    }

    pub fn state(&self) -> HealState {
        self.inner.lock().state
    }

    pub fn failure_detail(&self) -> String {
        self.inner.lock().failure_detail.clone()
    }

    pub fn has_ended(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether undelivered items are buffered
    pub fn has_items(&self) -> bool {
        !self.inner.lock().items.is_empty()
    }

    /// Terminal for at least `retention`
    pub fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.end_time {
            Some(end) if inner.state.is_terminal() => now.saturating_duration_since(end) >= retention,
            _ => false,
        }
    }

    /// Drain every undelivered item into a status report
    pub fn pop_status(&self) -> HealTaskStatus {
        let status = {
            let mut inner = self.inner.lock();
            HealTaskStatus {
                summary: inner.state,
                failure_detail: inner.failure_detail.clone(),
                start_time: self.start_time,
                num_disks: self.num_disks,
                settings: self.settings,
                items: inner.items.drain(..).collect(),
            }
        };
        self.consumed.notify_one();
        status
    }

    /// Move a running sequence to Stopped; false if it had already ended
    pub fn stop(&self) -> bool {
        if self.transition(HealState::Stopped, String::new()) {
            self.stop_tx.send_replace(true);
            info!(scope = %self.scope, client_token = %self.client_token, "heal sequence stopped");
            true
        } else {
            false
        }
    }

    fn fail(&self, detail: String) {
        if self.transition(HealState::Failed, detail.clone()) {
            self.stop_tx.send_replace(true);
            warn!(scope = %self.scope, client_token = %self.client_token, %detail, "heal sequence failed");
        }
    }

    fn transition(&self, to: HealState, detail: String) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = to;
        inner.failure_detail = detail;
        inner.end_time = Some(Instant::now());
        true
    }

    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Append one item, waiting for the client when the log is full.
    /// Returns false once the sequence must stop producing.
    async fn push_item(&self, mut item: HealResultItem) -> bool {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.state.is_terminal() {
                    return false;
                }
                if inner.items.len() < self.limits.max_unconsumed {
                    item.result_index = inner.next_index;
                    inner.next_index += 1;
                    inner.items.push_back(item);
                    return true;
                }
            }

            debug!(scope = %self.scope, "heal result buffer full, waiting for client");
            tokio::select! {
                _ = self.consumed.notified() => {}
                _ = stop_rx.wait_for(|stopped| *stopped) => return false,
                _ = tokio::time::sleep(self.limits.client_timeout) => {
                    self.fail(CLIENT_TIMEOUT_DETAIL.to_string());
                    return false;
                }
            }
        }
    }

    /// Execute the heal plan, then settle the terminal state
    pub async fn run(self: Arc<Self>, layer: Arc<dyn ObjectLayer>) {
        info!(scope = %self.scope, client_token = %self.client_token, "heal sequence started");
        match self.execute(layer.as_ref()).await {
            Ok(()) => {
                if self.transition(HealState::Finished, String::new()) {
                    info!(scope = %self.scope, client_token = %self.client_token, "heal sequence finished");
                }
            }
            Err(e) => self.fail(format!("{e:#}")),
        }
        self.idle_tx.send_replace(true);
    }

    /// Resolves once `run` has returned
    pub async fn wait_idle(&self) {
        let mut idle = self.idle_tx.subscribe();
        let _ = idle.wait_for(|done| *done).await;
    }

    async fn execute(&self, layer: &dyn ObjectLayer) -> Result<()> {
        let dry_run = self.settings.dry_run;

        if self.scope.bucket().is_empty() {
            let item = layer
                .heal_format(dry_run)
                .await
                .context("disk format heal failed")?;
            if !self.push_item(item).await {
                return Ok(());
            }

            let buckets = layer.list_buckets().await.context("listing buckets failed")?;
            for bucket in buckets {
                if !self.heal_bucket(layer, &bucket, "").await? {
                    return Ok(());
                }
            }
            return Ok(());
        }

        self.heal_bucket(layer, self.scope.bucket(), self.scope.prefix())
            .await
            .map(|_| ())
    }

    /// Heal a bucket and the objects selected by `prefix`
    async fn heal_bucket(&self, layer: &dyn ObjectLayer, bucket: &str, prefix: &str) -> Result<bool> {
        if self.stop_requested() {
            return Ok(false);
        }
        let item = layer
            .heal_bucket(bucket, self.settings.dry_run)
            .await
            .with_context(|| format!("heal of bucket {bucket} failed"))?;
        if !self.push_item(item).await {
            return Ok(false);
        }

        let objects = if self.settings.recursive {
            layer
                .list_objects(bucket, prefix)
                .await
                .with_context(|| format!("listing {bucket}/{prefix} failed"))?
        } else if !prefix.is_empty() {
            vec![prefix.to_string()]
        } else {
            Vec::new()
        };

        for object in objects {
            if self.stop_requested() {
                return Ok(false);
            }
            let item = layer
                .heal_object(bucket, &object, &self.settings)
                .await
                .with_context(|| format!("heal of object {bucket}/{object} failed"))?;
            if !self.push_item(item).await {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
