// src/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize, Default)]
pub struct InitReq {
    #[serde(default, alias = "documentId")]
    pub document_id: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default, alias = "idempotencyKey")]
    pub idempotency_key: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    #[serde(alias = "id", alias = "sessionReference")]
    pub session_reference: Option<String>,
    /// Wait for a final state for at most this long (capped server-side).
    pub wait_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct WidgetConfigQuery {
    pub environment: Option<String>,
}

/// Vendor-held session state, as observed by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Pending,
    Completed,
    Failed,
    Expired,
    Other(String),
}

impl SessionState {
    pub fn from_vendor(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" | "requested" => Self::Created,
            "pending" | "in_progress" | "partially_signed" => Self::Pending,
            "completed" | "signed" => Self::Completed,
            "failed" | "declined" | "rejected" => Self::Failed,
            "expired" => Self::Expired,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SessionState {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningStatus {
    Success,
    Pending,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct SigningResult {
    pub status: SigningStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub raw_response: Value,
}

impl SigningResult {
    pub fn from_state(session_reference: &str, state: SessionState, raw_response: Value) -> Self {
        let (status, error_code) = match &state {
            SessionState::Completed => (SigningStatus::Success, None),
            SessionState::Failed | SessionState::Expired => {
                (SigningStatus::Error, Some(state.as_str().to_string()))
            }
            _ => (SigningStatus::Pending, None),
        };
        Self {
            status,
            session_reference: Some(session_reference.to_string()),
            state: Some(state),
            error_code,
            raw_response,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SigningSessionHandle {
    pub session_reference: String,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub raw_response: Value,
}

/// Which document and user a vendor session was started for.
#[derive(Clone, Debug, Serialize)]
pub struct SessionBinding {
    pub session_reference: String,
    pub document_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
