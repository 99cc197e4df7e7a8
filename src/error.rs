// src/error.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Every failure the gateway can surface. Each variant maps to a distinct
/// `kind` in the HTTP error body so callers never see a generic failure.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway is not configured: {0}")]
    Configuration(String),

    /// Vendor unreachable or the request timed out in flight.
    #[error("signing vendor unreachable: {message}")]
    Network { message: String, timeout: bool, connect: bool },

    #[error("signing vendor rejected the request ({status}): {body}")]
    VendorRejection { status: u16, body: String },

    #[error("signing vendor failed ({status}): {body}")]
    VendorFailure { status: u16, body: String },

    #[error("signing vendor returned an unusable response: {0}")]
    InvalidResponse(String),

    /// The widget reported an error indicator on completion.
    #[error("signing declined: {code}")]
    SigningDeclined { code: String, message: Option<String> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid document reference: {0}")]
    InvalidDocument(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The document exists but the server could not read it.
    #[error("document could not be read: {0}")]
    DocumentUnreadable(String),

    #[error("unknown widget environment: {0}")]
    InvalidEnvironment(String),

    #[error("signing session {0} did not reach a final state in time")]
    VerificationTimeout(String),

    #[error("verification of {0} was cancelled")]
    Cancelled(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Network { .. } => "network_error",
            Self::VendorRejection { .. } => "vendor_rejection",
            Self::VendorFailure { .. } => "vendor_failure",
            Self::InvalidResponse(_) => "invalid_vendor_response",
            Self::SigningDeclined { .. } => "signing_declined",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidDocument(_) => "invalid_document",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::DocumentUnreadable(_) => "document_unreadable",
            Self::InvalidEnvironment(_) => "invalid_environment",
            Self::VerificationTimeout(_) => "verification_timeout",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Only transient transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::DocumentUnreadable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Network { timeout: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Network { .. } => StatusCode::BAD_GATEWAY,
            Self::VendorRejection { status: 404, .. } => StatusCode::NOT_FOUND,
            Self::VendorRejection { .. } => StatusCode::BAD_GATEWAY,
            Self::VendorFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            Self::SigningDeclined { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidRequest(_) | Self::InvalidDocument(_) | Self::InvalidEnvironment(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            Self::VerificationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // nginx's "client closed request"
            Self::Cancelled(_) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
        }
    }

    fn code(&self) -> Option<String> {
        match self {
            Self::SigningDeclined { code, .. } => Some(code.clone()),
            Self::VendorRejection { status, .. } | Self::VendorFailure { status, .. } => {
                Some(status.to_string())
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::InvalidResponse(e.to_string());
        }
        Self::Network {
            message: e.to_string(),
            timeout: e.is_timeout(),
            connect: e.is_connect(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), "{self}");
        } else {
            warn!(kind = self.kind(), "{self}");
        }
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
