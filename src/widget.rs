// src/widget.rs
//! Configuration handed to the vendor's embedded signing widget, and the
//! interpretation of what the widget reports back when it finishes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::types::{SigningResult, SigningStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl FromStr for Environment {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(GatewayError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub primary_color: String,
    pub secondary_color: String,
}

impl Theme {
    pub const DEFAULT_PRIMARY: &'static str = "#AB3498";
    pub const DEFAULT_SECONDARY: &'static str = "#000000";
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Branding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

/// What the front end passes to the widget constructor. Contains no
/// credentials.
#[derive(Clone, Debug, Serialize)]
pub struct WidgetConfig {
    pub environment: Environment,
    pub callback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

pub fn build_widget_config(
    environment: Environment,
    branding: &Branding,
    callback: &str,
) -> Result<WidgetConfig, GatewayError> {
    if let Some(theme) = &branding.theme {
        for color in [&theme.primary_color, &theme.secondary_color] {
            if !is_hex_color(color) {
                return Err(GatewayError::InvalidRequest(format!("invalid theme colour {color}")));
            }
        }
    }
    if let Some(logo) = &branding.logo {
        if logo.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("logo url is empty".into()));
        }
    }
    Ok(WidgetConfig {
        environment,
        callback: callback.to_string(),
        logo: branding.logo.clone(),
        theme: branding.theme.clone(),
    })
}

fn is_hex_color(s: &str) -> bool {
    s.strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Outcome of a widget run. The vendor marks failures by including an
/// `error_code` key in the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SigningOutcome {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_reference: Option<String>,
    },
    Error {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl SigningOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub fn on_signing_complete(payload: &Value) -> SigningOutcome {
    let session_reference = ["digio_doc_id", "session_reference", "id"]
        .iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str))
        .map(str::to_owned);

    match payload.get("error_code") {
        Some(code) => {
            let code = match code {
                Value::String(s) => s.clone(),
                Value::Null => "unknown".to_string(),
                other => other.to_string(),
            };
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned);
            warn!(code = %code, session = ?session_reference, "signing declined by widget");
            SigningOutcome::Error { code, message }
        }
        None => {
            info!(session = ?session_reference, "signing completed by widget");
            SigningOutcome::Success { session_reference }
        }
    }
}

/// Result for the caller. Declined runs become `SigningDeclined`.
pub fn outcome_into_result(outcome: SigningOutcome, raw: Value) -> Result<SigningResult, GatewayError> {
    match outcome {
        // the widget's word is not vendor state; that comes from verification
        SigningOutcome::Success { session_reference } => Ok(SigningResult {
            status: SigningStatus::Success,
            session_reference,
            state: None,
            error_code: None,
            raw_response: raw,
        }),
        SigningOutcome::Error { code, message } => {
            Err(GatewayError::SigningDeclined { code, message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn environment_is_a_closed_set() {
        assert_eq!("sandbox".parse::<Environment>().unwrap(), Environment::Sandbox);
        assert_eq!("PRODUCTION".parse::<Environment>().unwrap(), Environment::Production);
        assert!(matches!(
            "staging".parse::<Environment>(),
            Err(GatewayError::InvalidEnvironment(_))
        ));
    }

    #[test]
    fn config_carries_branding_and_callback() {
        let branding = Branding {
            logo: Some("https://example.com/logo.png".into()),
            theme: Some(Theme {
                primary_color: "#AB3498".into(),
                secondary_color: "#000".into(),
            }),
        };
        let config = build_widget_config(Environment::Sandbox, &branding, "/esign/callback").unwrap();
        let v = serde_json::to_value(&config).unwrap();
        assert_eq!(
            v,
            json!({
                "environment": "sandbox",
                "callback": "/esign/callback",
                "logo": "https://example.com/logo.png",
                "theme": { "primaryColor": "#AB3498", "secondaryColor": "#000" }
            })
        );
    }

    #[test]
    fn bad_colours_are_rejected() {
        let branding = Branding {
            logo: None,
            theme: Some(Theme {
                primary_color: "red".into(),
                secondary_color: "#000000".into(),
            }),
        };
        assert!(build_widget_config(Environment::Production, &branding, "/cb").is_err());
    }

    #[test]
    fn error_indicator_means_declined() {
        let payload = json!({ "digio_doc_id": "abc123", "error_code": "CANCELLED", "message": "User cancelled" });
        let outcome = on_signing_complete(&payload);
        assert_eq!(
            outcome,
            SigningOutcome::Error {
                code: "CANCELLED".into(),
                message: Some("User cancelled".into())
            }
        );
        assert!(!outcome.is_success());
        assert!(matches!(
            outcome_into_result(outcome, payload),
            Err(GatewayError::SigningDeclined { code, .. }) if code == "CANCELLED"
        ));
    }

    #[test]
    fn error_indicator_counts_even_when_null() {
        let outcome = on_signing_complete(&json!({ "error_code": null }));
        assert!(matches!(outcome, SigningOutcome::Error { code, .. } if code == "unknown"));
    }

    #[test]
    fn no_error_indicator_means_success() {
        let payload = json!({ "digio_doc_id": "abc123", "message": "Signed Successfully" });
        let outcome = on_signing_complete(&payload);
        assert_eq!(
            outcome,
            SigningOutcome::Success { session_reference: Some("abc123".into()) }
        );
        let result = outcome_into_result(outcome, payload).unwrap();
        assert_eq!(result.status, SigningStatus::Success);
        assert!(result.state.is_none());
        assert!(serde_json::to_value(&result).unwrap().get("state").is_none());
    }
}
