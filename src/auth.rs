// src/auth.rs
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{GatewayError, GatewayResult};

/// Vendor credential pair. Only ever read from server-side configuration.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub id: String,
    secret: SecretString,
}

impl Credentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Both halves must be present; a blank id or secret counts as missing.
    pub fn from_parts(id: Option<&str>, secret: Option<&str>) -> GatewayResult<Self> {
        let id = id.map(str::trim).filter(|s| !s.is_empty());
        let secret = secret.filter(|s| !s.trim().is_empty());
        match (id, secret) {
            (Some(id), Some(secret)) => Ok(Self::new(id, secret)),
            (None, _) => Err(GatewayError::Configuration("credential id is not set".into())),
            (_, None) => Err(GatewayError::Configuration("credential secret is not set".into())),
        }
    }

    /// `Authorization` value, flagged sensitive so it is masked in
    /// `Debug` output and by tracing layers.
    pub fn authorization(&self) -> GatewayResult<HeaderValue> {
        let raw = basic_auth_value(&self.id, self.secret.expose_secret());
        let mut value = HeaderValue::from_str(&raw)
            .map_err(|_| GatewayError::Configuration("credentials contain invalid characters".into()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// `Basic base64("<id>:<secret>")`
pub fn basic_auth_value(id: &str, secret: &str) -> String {
    format!("Basic {}", B64.encode(format!("{id}:{secret}")))
}
