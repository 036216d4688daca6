use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{ApiError, ApiErrorCode};

/// Options supplied in the body of a heal start request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealOpts {
    /// Heal every object under the prefix instead of just the named one
    pub recursive: bool,

    /// Report what would be healed without writing anything
    pub dry_run: bool,
}

/// The unit of mutual exclusion for heal sequences
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HealScope {
    bucket: String,
    prefix: String,
}

impl HealScope {
    /// Validate and build a scope from request parameters
    pub fn parse(bucket: &str, prefix: &str) -> Result<Self, ApiError> {
        if bucket.is_empty() {
            if !prefix.is_empty() {
                return Err(ApiErrorCode::HealMissingBucket.into());
            }
        } else if !is_valid_bucket_name(bucket) {
            return Err(ApiErrorCode::InvalidBucketName.into());
        }

        if !is_valid_object_prefix(prefix) {
            return Err(ApiErrorCode::InvalidObjectName.into());
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Whole-cluster scope
    pub fn cluster() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Canonical path: `""` for the cluster, otherwise `bucket/prefix`
    pub fn path(&self) -> String {
        if self.bucket.is_empty() {
            String::new()
        } else {
            format!("{}/{}", self.bucket, self.prefix)
        }
    }

    /// Two scopes overlap when one path is a prefix of the other
    pub fn overlaps(a: &str, b: &str) -> bool {
        a.starts_with(b) || b.starts_with(a)
    }
}

impl fmt::Display for HealScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() {
            write!(f, "<cluster>")
        } else {
            write!(f, "{}", self.path())
        }
    }
}

fn bucket_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").expect("static regex compiles")
    })
}

/// DNS-style bucket names: 3-63 chars, lowercase, no `..`, not an IP address
pub fn is_valid_bucket_name(bucket: &str) -> bool {
    bucket_name_regex().is_match(bucket)
        && !bucket.contains("..")
        && !bucket.contains(".-")
        && !bucket.contains("-.")
        && bucket.parse::<std::net::Ipv4Addr>().is_err()
}

/// Object prefixes may be empty; otherwise no leading slash, no `//`, no NUL
pub fn is_valid_object_prefix(prefix: &str) -> bool {
    prefix.len() <= 1024
        && !prefix.starts_with('/')
        && !prefix.contains("//")
        && !prefix.contains('\0')
        && !prefix.contains('\\')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealItemType {
    Metadata,
    Bucket,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveState {
    Ok,
    Offline,
    Corrupt,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealDriveInfo {
    pub endpoint: String,
    pub state: DriveState,
}

/// One record produced by a heal sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealResultItem {
    /// Position in the sequence's result log, starting at 1
    pub result_index: usize,
    #[serde(rename = "type")]
    pub item_type: HealItemType,
    pub bucket: String,
    pub object: String,
    pub detail: String,
    pub parity_blocks: usize,
    pub data_blocks: usize,
    pub disk_count: usize,
    pub before: Vec<HealDriveInfo>,
    pub after: Vec<HealDriveInfo>,
    pub object_size: u64,
}

impl HealResultItem {
    pub fn new(item_type: HealItemType, bucket: &str, object: &str) -> Self {
        Self {
            result_index: 0,
            item_type,
            bucket: bucket.to_string(),
            object: object.to_string(),
            detail: String::new(),
            parity_blocks: 0,
            data_blocks: 0,
            disk_count: 0,
            before: Vec::new(),
            after: Vec::new(),
            object_size: 0,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Drives that went from a bad state to `Ok`
    pub fn healed_drives(&self) -> usize {
        self.before
            .iter()
            .zip(&self.after)
            .filter(|(b, a)| b.state != DriveState::Ok && a.state == DriveState::Ok)
            .count()
    }
}

/// Lifecycle state of a heal sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealState {
    Running,
    Finished,
    Stopped,
    Failed,
}

impl HealState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HealState::Running)
    }
}

impl fmt::Display for HealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealState::Running => "running",
            HealState::Finished => "finished",
            HealState::Stopped => "stopped",
            HealState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Returned when a heal sequence is launched (or re-attached to)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealStartSuccess {
    pub client_token: String,
    pub client_address: String,
    pub start_time: DateTime<Utc>,
}

/// Returned when a heal sequence is force-stopped
pub type HealStopSuccess = HealStartSuccess;

/// Status document handed to a polling client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealTaskStatus {
    pub summary: HealState,
    pub failure_detail: String,
    pub start_time: DateTime<Utc>,
    pub num_disks: usize,
    pub settings: HealOpts,
    pub items: Vec<HealResultItem>,
}
