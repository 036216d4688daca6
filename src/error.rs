//! Admin API Error Handling
//!
//! Every admin failure is an [`ApiError`]: a stable [`ApiErrorCode`] plus an
//! optional human-readable detail. Codes are grouped into an
//! [`ErrorCategory`] so callers can tell contract violations from failures
//! worth retrying.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host identifier reported in every error envelope
pub const HOST_ID: &str = "dx-admin";

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A required dependency is not ready yet
    NotInitialized,

    /// Heal state-machine contract violations
    HealState,

    /// Local input validation failures
    MalformedRequest,

    /// Authentication or signature failures
    Auth,

    /// Anything else
    Internal,
}

impl ErrorCategory {
    /// Check if a client may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::NotInitialized | ErrorCategory::Internal)
    }
}

/// Stable admin API error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    ServerNotInitialized,
    AccessDenied,
    SignatureDoesNotMatch,
    RequestTimeTooSkewed,
    RequestBodyParse,
    MalformedPostRequest,
    InvalidBucketName,
    InvalidObjectName,
    InvalidRequest,
    MethodNotAllowed,
    HealNotImplemented,
    HealMissingBucket,
    HealAlreadyRunning,
    HealNoSuchProcess,
    HealOverlappingPaths,
    AdminProfilerNotEnabled,
    AdminConfigTooLarge,
    AdminNoSuchUser,
    AdminNoSuchPolicy,
    InternalError,
}

impl ApiErrorCode {
    /// Wire code as reported in the `Code` field of the envelope
    pub fn code(&self) -> &'static str {
        match self {
            ApiErrorCode::ServerNotInitialized => "XAdminServerNotInitialized",
            ApiErrorCode::AccessDenied => "AccessDenied",
            ApiErrorCode::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            ApiErrorCode::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            ApiErrorCode::RequestBodyParse => "XAdminRequestBodyParse",
            ApiErrorCode::MalformedPostRequest => "MalformedPOSTRequest",
            ApiErrorCode::InvalidBucketName => "InvalidBucketName",
            ApiErrorCode::InvalidObjectName => "XAdminInvalidObjectName",
            ApiErrorCode::InvalidRequest => "InvalidRequest",
            ApiErrorCode::MethodNotAllowed => "MethodNotAllowed",
            ApiErrorCode::HealNotImplemented => "XAdminHealNotImplemented",
            ApiErrorCode::HealMissingBucket => "XAdminHealMissingBucket",
            ApiErrorCode::HealAlreadyRunning => "XAdminHealAlreadyRunning",
            ApiErrorCode::HealNoSuchProcess => "XAdminHealNoSuchProcess",
            ApiErrorCode::HealOverlappingPaths => "XAdminHealOverlappingPaths",
            ApiErrorCode::AdminProfilerNotEnabled => "XAdminAdminProfilerNotEnabled",
            ApiErrorCode::AdminConfigTooLarge => "XAdminAdminConfigTooLarge",
            ApiErrorCode::AdminNoSuchUser => "XAdminAdminNoSuchUser",
            ApiErrorCode::AdminNoSuchPolicy => "XAdminAdminNoSuchPolicy",
            ApiErrorCode::InternalError => "InternalError",
        }
    }

    /// Default message when no detail is attached
    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorCode::ServerNotInitialized => {
                "Server not initialized, please try again."
            }
            ApiErrorCode::AccessDenied => "Access Denied.",
            ApiErrorCode::SignatureDoesNotMatch => {
                "The request signature we calculated does not match the signature you provided."
            }
            ApiErrorCode::RequestTimeTooSkewed => {
                "The difference between the request time and the server's time is too large."
            }
            ApiErrorCode::RequestBodyParse => "The request body failed to parse.",
            ApiErrorCode::MalformedPostRequest => {
                "The body of your POST request is not well-formed."
            }
            ApiErrorCode::InvalidBucketName => "The specified bucket is not valid.",
            ApiErrorCode::InvalidObjectName => "Object name contains unsupported characters.",
            ApiErrorCode::InvalidRequest => "Invalid Request",
            ApiErrorCode::MethodNotAllowed => {
                "The specified method is not allowed against this resource."
            }
            ApiErrorCode::HealNotImplemented => {
                "This server does not implement heal functionality."
            }
            ApiErrorCode::HealMissingBucket => "A heal start request with a non-empty object-prefix parameter requires a bucket to be specified.",
            ApiErrorCode::HealAlreadyRunning => "",
            ApiErrorCode::HealNoSuchProcess => "No such heal process is running on the server",
            ApiErrorCode::HealOverlappingPaths => "",
            ApiErrorCode::AdminProfilerNotEnabled => "Unable to perform the requested operation because profiling is not enabled",
            ApiErrorCode::AdminConfigTooLarge => "Request body is too large",
            ApiErrorCode::AdminNoSuchUser => "The specified user does not exist.",
            ApiErrorCode::AdminNoSuchPolicy => "The canned policy does not exist.",
            ApiErrorCode::InternalError => {
                "We encountered an internal error, please try again."
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::ServerNotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::AccessDenied
            | ApiErrorCode::SignatureDoesNotMatch
            | ApiErrorCode::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            ApiErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorCode::HealNotImplemented => StatusCode::NOT_IMPLEMENTED,
            ApiErrorCode::HealNoSuchProcess
            | ApiErrorCode::AdminNoSuchUser
            | ApiErrorCode::AdminNoSuchPolicy => StatusCode::NOT_FOUND,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiErrorCode::ServerNotInitialized => ErrorCategory::NotInitialized,
            ApiErrorCode::HealAlreadyRunning
            | ApiErrorCode::HealNoSuchProcess
            | ApiErrorCode::HealOverlappingPaths => ErrorCategory::HealState,
            ApiErrorCode::AccessDenied
            | ApiErrorCode::SignatureDoesNotMatch
            | ApiErrorCode::RequestTimeTooSkewed => ErrorCategory::Auth,
            ApiErrorCode::InternalError => ErrorCategory::Internal,
            _ => ErrorCategory::MalformedRequest,
        }
    }
}

/// An admin API failure
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .code.code(), self.message())]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode) -> Self {
        Self { code, detail: None }
    }

    pub fn with_detail(code: ApiErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }

    pub fn not_initialized() -> Self {
        Self::new(ApiErrorCode::ServerNotInitialized)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::with_detail(ApiErrorCode::InternalError, err.to_string())
    }

    pub fn message(&self) -> &str {
        match &self.detail {
            Some(detail) if !detail.is_empty() => detail,
            _ => self.code.description(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Build the JSON error envelope for a given request
    pub fn envelope(&self, resource: &str, request_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code.code().to_string(),
            message: self.message().to_string(),
            resource: resource.to_string(),
            request_id: request_id.to_string(),
            host_id: HOST_ID.to_string(),
        }
    }

    /// Render as a complete, buffered HTTP response
    pub fn render(&self, resource: &str, request_id: &str) -> Response {
        (self.code.status(), Json(self.envelope(resource, request_id))).into_response()
    }
}

impl From<ApiErrorCode> for ApiError {
    fn from(code: ApiErrorCode) -> Self {
        ApiError::new(code)
    }
}

/// Handlers may return `ApiError` directly; the request-context middleware
/// finds it in the response extensions and renders the full envelope.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.code.status().into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// JSON error body returned to admin clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub resource: String,
    pub request_id: String,
    pub host_id: String,
}

/// Result type for admin operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        assert_eq!(
            ApiErrorCode::HealAlreadyRunning.category(),
            ErrorCategory::HealState
        );
        assert_eq!(
            ApiErrorCode::RequestBodyParse.category(),
            ErrorCategory::MalformedRequest
        );
        assert_eq!(
            ApiErrorCode::ServerNotInitialized.category(),
            ErrorCategory::NotInitialized
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCategory::NotInitialized.is_retryable());
        assert!(!ErrorCategory::MalformedRequest.is_retryable());
        assert!(!ErrorCategory::HealState.is_retryable());
        assert!(ApiError::internal("disk full").category().is_retryable());
    }

    #[test]
    fn test_detail_overrides_description() {
        let err = ApiError::new(ApiErrorCode::HealNoSuchProcess);
        assert_eq!(err.message(), ApiErrorCode::HealNoSuchProcess.description());

        let err = ApiError::with_detail(ApiErrorCode::HealAlreadyRunning, "token is abc");
        assert_eq!(err.message(), "token is abc");
        assert_eq!(err.code.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "XAdminHealAlreadyRunning: token is abc");
    }

    #[test]
    fn test_envelope_shape() {
        let env = ApiError::new(ApiErrorCode::HealNoSuchProcess).envelope("/admin/v1/heal/b", "req-1");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["Code"], "XAdminHealNoSuchProcess");
        assert_eq!(json["Resource"], "/admin/v1/heal/b");
        assert_eq!(json["RequestId"], "req-1");
    }
}
