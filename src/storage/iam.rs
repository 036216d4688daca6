//! Users, canned policies and admin credentials
//!
//! State lives in memory behind a lock and is mirrored to `iam.json` in the
//! state directory when one is configured. Each section can be reloaded from
//! disk independently, which is what peer reload requests trigger.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::auth::{Credentials, CredentialsProvider};
use crate::error::{ApiError, ApiErrorCode};

const IAM_FILE: &str = "iam.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Enabled,
    Disabled,
}

impl std::str::FromStr for AccountStatus {
    type Err = IamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(AccountStatus::Enabled),
            "disabled" => Ok(AccountStatus::Disabled),
            other => Err(IamError::InvalidStatus(other.to_string())),
        }
    }
}

/// Public view of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    secret_key: String,
    #[serde(flatten)]
    info: UserInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IamSnapshot {
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    users: BTreeMap<String, UserRecord>,
    #[serde(default)]
    policies: BTreeMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum IamError {
    #[error("user {0} does not exist")]
    NoSuchUser(String),

    #[error("canned policy {0} does not exist")]
    NoSuchPolicy(String),

    #[error("invalid account status: {0}")]
    InvalidStatus(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("failed to persist IAM state: {0:#}")]
    Persist(#[from] anyhow::Error),
}

impl From<IamError> for ApiError {
    fn from(err: IamError) -> Self {
        let code = match &err {
            IamError::NoSuchUser(_) => ApiErrorCode::AdminNoSuchUser,
            IamError::NoSuchPolicy(_) => ApiErrorCode::AdminNoSuchPolicy,
            IamError::InvalidStatus(_) | IamError::Invalid(_) => ApiErrorCode::InvalidRequest,
            IamError::Persist(_) => ApiErrorCode::InternalError,
        };
        ApiError::with_detail(code, err.to_string())
    }
}

pub struct IamStore {
    path: Option<PathBuf>,
    bootstrap: Credentials,
    state: RwLock<IamSnapshot>,
}

impl IamStore {
    /// Store that never touches disk
    pub fn in_memory(credentials: Credentials) -> Self {
        Self {
            path: None,
            bootstrap: credentials,
            state: RwLock::new(IamSnapshot::default()),
        }
    }

    /// Open (or create) the store in `state_dir`
    pub fn open(state_dir: &Path, credentials: Credentials) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;
        let path = state_dir.join(IAM_FILE);
        let snapshot = read_snapshot(&path)?;
        Ok(Self {
            path: Some(path),
            bootstrap: credentials,
            state: RwLock::new(snapshot),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Record new admin credentials. A persistent store only writes them to
    /// disk; they take effect on `reload_credentials`, so requests signed
    /// with the old keys still verify until every node has been told.
    pub fn stage_credentials(&self, credentials: Credentials) -> Result<(), IamError> {
        if self.path.is_none() {
            self.state.write().credentials = Some(credentials);
            return Ok(());
        }
        let mut staged = self.state.read().clone();
        staged.credentials = Some(credentials);
        self.persist(&staged)
    }

    pub fn add_user(&self, access_key: &str, secret_key: &str, status: AccountStatus) -> Result<(), IamError> {
        if access_key.len() < 3 || secret_key.len() < 8 {
            return Err(IamError::Invalid(
                "access key needs 3+ characters and secret key 8+".to_string(),
            ));
        }
        self.update(|state| {
            let policy_name = state
                .users
                .get(access_key)
                .and_then(|u| u.info.policy_name.clone());
            state.users.insert(
                access_key.to_string(),
                UserRecord {
                    secret_key: secret_key.to_string(),
                    info: UserInfo {
                        status,
                        policy_name,
                    },
                },
            );
            Ok(())
        })
    }

    pub fn remove_user(&self, access_key: &str) -> Result<(), IamError> {
        self.update(|state| match state.users.remove(access_key) {
            Some(_) => Ok(()),
            None => Err(IamError::NoSuchUser(access_key.to_string())),
        })
    }

    pub fn set_user_status(&self, access_key: &str, status: AccountStatus) -> Result<(), IamError> {
        self.update(|state| {
            let user = state
                .users
                .get_mut(access_key)
                .ok_or_else(|| IamError::NoSuchUser(access_key.to_string()))?;
            user.info.status = status;
            Ok(())
        })
    }

    pub fn list_users(&self) -> BTreeMap<String, UserInfo> {
        self.state
            .read()
            .users
            .iter()
            .map(|(k, u)| (k.clone(), u.info.clone()))
            .collect()
    }

    pub fn add_policy(&self, name: &str, policy: Value) -> Result<(), IamError> {
        if name.is_empty() || name.contains(',') {
            return Err(IamError::Invalid(format!("bad policy name {name:?}")));
        }
        if !policy.is_object() {
            return Err(IamError::Invalid("policy must be a JSON object".to_string()));
        }
        self.update(|state| {
            state.policies.insert(name.to_string(), policy);
            Ok(())
        })
    }

    /// Remove a policy and detach it from every user
    pub fn remove_policy(&self, name: &str) -> Result<(), IamError> {
        self.update(|state| {
            if state.policies.remove(name).is_none() {
                return Err(IamError::NoSuchPolicy(name.to_string()));
            }
            for user in state.users.values_mut() {
                if user.info.policy_name.as_deref() == Some(name) {
                    user.info.policy_name = None;
                }
            }
            Ok(())
        })
    }

    pub fn list_policies(&self) -> BTreeMap<String, Value> {
        self.state.read().policies.clone()
    }

    pub fn set_user_policy(&self, access_key: &str, policy: &str) -> Result<(), IamError> {
        self.update(|state| {
            if !state.policies.contains_key(policy) {
                return Err(IamError::NoSuchPolicy(policy.to_string()));
            }
            let user = state
                .users
                .get_mut(access_key)
                .ok_or_else(|| IamError::NoSuchUser(access_key.to_string()))?;
            user.info.policy_name = Some(policy.to_string());
            Ok(())
        })
    }

    /// Re-read the user table from disk
    pub fn reload_users(&self) -> Result<()> {
        self.reload(|state, disk| state.users = disk.users)
    }

    pub fn reload_policies(&self) -> Result<()> {
        self.reload(|state, disk| state.policies = disk.policies)
    }

    pub fn reload_credentials(&self) -> Result<()> {
        self.reload(|state, disk| state.credentials = disk.credentials)
    }

    fn reload(&self, apply: impl FnOnce(&mut IamSnapshot, IamSnapshot)) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let disk = read_snapshot(path)?;
        apply(&mut self.state.write(), disk);
        Ok(())
    }

    /// Apply `change` to a copy of the state, persist the copy, then swap it
    /// in. A failed write leaves memory as it was.
    fn update(&self, change: impl FnOnce(&mut IamSnapshot) -> Result<(), IamError>) -> Result<(), IamError> {
        let mut state = self.state.write();
        let mut next = state.clone();
        change(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn persist(&self, state: &IamSnapshot) -> Result<(), IamError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state).context("Failed to encode IAM state")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, path))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

impl CredentialsProvider for IamStore {
    fn credentials(&self) -> Credentials {
        self.state
            .read()
            .credentials
            .clone()
            .unwrap_or_else(|| self.bootstrap.clone())
    }
}

fn read_snapshot(path: &Path) -> Result<IamSnapshot> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IamSnapshot::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn creds() -> Credentials {
        Credentials::new("admin", "adminsecret")
    }

    #[test]
    fn test_users_and_policies() {
        let store = IamStore::in_memory(creds());
        store.add_user("alice", "alicesecret", AccountStatus::Enabled).unwrap();
        store.add_policy("readonly", json!({"Statement": []})).unwrap();
        store.set_user_policy("alice", "readonly").unwrap();

        let users = store.list_users();
        assert_eq!(users["alice"].policy_name.as_deref(), Some("readonly"));

        store.remove_policy("readonly").unwrap();
        assert_eq!(store.list_users()["alice"].policy_name, None);

        assert!(matches!(
            store.set_user_status("bob", AccountStatus::Disabled),
            Err(IamError::NoSuchUser(_))
        ));
        assert!(matches!(
            store.set_user_policy("alice", "missing"),
            Err(IamError::NoSuchPolicy(_))
        ));
    }

    #[test]
    fn test_credentials_fall_back_to_bootstrap() {
        let store = IamStore::in_memory(creds());
        assert_eq!(store.credentials(), creds());

        let next = Credentials::new("root", "rootsecret");
        store.stage_credentials(next.clone()).unwrap();
        assert_eq!(store.credentials(), next);
    }

    #[test]
    fn test_staged_credentials_apply_on_reload() {
        let dir = TempDir::new().unwrap();
        let store = IamStore::open(dir.path(), creds()).unwrap();

        let next = Credentials::new("root", "rootsecret");
        store.stage_credentials(next.clone()).unwrap();
        assert_eq!(store.credentials(), creds());

        store.reload_credentials().unwrap();
        assert_eq!(store.credentials(), next);
    }

    #[test]
    fn test_reload_sees_other_writer() {
        let dir = TempDir::new().unwrap();
        let a = IamStore::open(dir.path(), creds()).unwrap();
        let b = IamStore::open(dir.path(), creds()).unwrap();

        a.add_user("carol", "carolsecret", AccountStatus::Enabled).unwrap();
        assert!(b.list_users().is_empty());

        b.reload_users().unwrap();
        assert_eq!(b.list_users()["carol"].status, AccountStatus::Enabled);
    }

    #[test]
    fn test_failed_write_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let store = IamStore::open(dir.path(), creds()).unwrap();
        store.add_user("alice", "alicesecret", AccountStatus::Enabled).unwrap();
        store.add_policy("readonly", json!({})).unwrap();

        // A directory where the temp file should go makes every write fail
        std::fs::create_dir(dir.path().join("iam.json.tmp")).unwrap();

        let err = store
            .add_user("dave", "davesecret", AccountStatus::Enabled)
            .unwrap_err();
        assert!(matches!(err, IamError::Persist(_)));
        assert!(store.remove_user("alice").is_err());
        assert!(store.remove_policy("readonly").is_err());

        let users = store.list_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users["alice"].status, AccountStatus::Enabled);
        assert!(store.list_policies().contains_key("readonly"));
    }

    #[test]
    fn test_error_codes() {
        let err: ApiError = IamError::NoSuchUser("x".into()).into();
        assert_eq!(err.code, ApiErrorCode::AdminNoSuchUser);
        assert_eq!("disabled".parse::<AccountStatus>().unwrap(), AccountStatus::Disabled);
        assert!("paused".parse::<AccountStatus>().is_err());
    }
}
