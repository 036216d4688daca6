//! Protocol and build versioning
//!
//! Peers exchange their RPC protocol version on every call; a call is only
//! served when both sides speak the same major protocol version.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Admin API version reported by `GET /admin/version`
pub const ADMIN_API_VERSION: &str = "1";

/// Server release, reported in server info and service status
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit the binary was built from
pub const COMMIT_ID: &str = match option_env!("DX_ADMIN_COMMIT_ID") {
    Some(id) => id,
    None => "DEVELOPMENT",
};

/// Header carrying the caller's (or responder's) peer RPC version
pub const PEER_RPC_VERSION_HEADER: &str = "x-peer-rpc-version";

/// Peer RPC protocol version spoken by this build
pub fn peer_rpc_version() -> ProtocolVersion {
    ProtocolVersion::new(1, 0, 0)
}

/// Semantic protocol version (major.minor.patch[-pre])
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
}

impl ProtocolVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Check if a remote speaking `other` can be served (same major version)
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major && self.major > 0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for ProtocolVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);

        let (version, pre_release) = match s.split_once('-') {
            Some((v, p)) => (v, Some(p.to_string())),
            None => (s, None),
        };

        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("Invalid protocol version: {}", s));
        }

        let major = parts[0].parse().context("Failed to parse major version")?;
        let minor = parts[1].parse().context("Failed to parse minor version")?;
        let patch = parts[2].parse().context("Failed to parse patch version")?;

        Ok(Self {
            major,
            minor,
            patch,
            pre_release,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = "1.2.3".parse::<ProtocolVersion>().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));

        let v = "v2.0.0-rc.1".parse::<ProtocolVersion>().unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.pre_release, Some("rc.1".to_string()));

        assert!("1.2".parse::<ProtocolVersion>().is_err());
        assert!("one.two.three".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_peer_compatibility() {
        let local = peer_rpc_version();
        assert!(local.is_compatible_with(&ProtocolVersion::new(1, 4, 0)));
        assert!(!local.is_compatible_with(&ProtocolVersion::new(2, 0, 0)));
        assert!(!ProtocolVersion::new(0, 1, 0).is_compatible_with(&ProtocolVersion::new(0, 1, 0)));
    }
}
