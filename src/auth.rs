//! Request signing for admin clients and peer RPC
//!
//! A bearer token is `<access-key>:<unix-seconds>:<hex HMAC-SHA256>` where the
//! MAC covers `<access-key>:<unix-seconds>` keyed by the secret key.

use axum::http::{header, HeaderMap};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::error::{ApiError, ApiErrorCode};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock difference between signer and verifier
pub const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Validate key lengths the way the admin credential endpoint requires
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.access_key.len() < 3 || self.access_key.contains(':') {
            return Err(ApiError::with_detail(
                ApiErrorCode::InvalidRequest,
                "access key must be at least 3 characters and must not contain ':'",
            ));
        }
        if self.secret_key.len() < 8 {
            return Err(ApiError::with_detail(
                ApiErrorCode::InvalidRequest,
                "secret key must be at least 8 characters",
            ));
        }
        Ok(())
    }
}

/// Source of the currently active admin credentials
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Credentials;
}

impl CredentialsProvider for Credentials {
    fn credentials(&self) -> Credentials {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,

    #[error("malformed authorization token")]
    Malformed,

    #[error("unknown access key")]
    UnknownAccessKey,

    #[error("signature does not match")]
    SignatureMismatch,

    #[error("request time too skewed ({0}s)")]
    TimeSkewed(u64),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match err {
            AuthError::Missing | AuthError::UnknownAccessKey => ApiErrorCode::AccessDenied,
            AuthError::Malformed | AuthError::SignatureMismatch => {
                ApiErrorCode::SignatureDoesNotMatch
            }
            AuthError::TimeSkewed(_) => ApiErrorCode::RequestTimeTooSkewed,
        };
        ApiError::new(code)
    }
}

fn mac_for(credentials: &Credentials, timestamp: i64) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(credentials.secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(credentials.access_key.as_bytes());
    mac.update(b":");
    mac.update(timestamp.to_string().as_bytes());
    mac
}

/// Sign a token valid around `timestamp` (unix seconds)
pub fn sign_token(credentials: &Credentials, timestamp: i64) -> String {
    let signature = hex::encode(mac_for(credentials, timestamp).finalize().into_bytes());
    format!("{}:{}:{}", credentials.access_key, timestamp, signature)
}

/// Sign a token for the current time
pub fn sign_now(credentials: &Credentials) -> String {
    sign_token(credentials, chrono::Utc::now().timestamp())
}

/// Verify a token against the active credentials at time `now`
pub fn verify_token(credentials: &Credentials, token: &str, now: i64) -> Result<(), AuthError> {
    let mut parts = token.splitn(3, ':');
    let (access_key, timestamp, signature) = match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(t), Some(s)) => (a, t, s),
        _ => return Err(AuthError::Malformed),
    };

    if access_key != credentials.access_key {
        return Err(AuthError::UnknownAccessKey);
    }

    let timestamp: i64 = timestamp.parse().map_err(|_| AuthError::Malformed)?;
    let skew = now.abs_diff(timestamp);
    if skew > MAX_CLOCK_SKEW_SECS.unsigned_abs() {
        return Err(AuthError::TimeSkewed(skew));
    }

    let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;
    mac_for(credentials, timestamp)
        .verify_slice(&signature)
        .map_err(|_| AuthError::SignatureMismatch)
}

/// Verify the `Authorization: Bearer` header of a request
pub fn verify_headers(headers: &HeaderMap, credentials: &Credentials) -> Result<(), AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Malformed)?;
    let token = value.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
    verify_token(credentials, token.trim(), chrono::Utc::now().timestamp())
}
