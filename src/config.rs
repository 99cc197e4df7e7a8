// src/config.rs
//! Runtime configuration, read from flags or the environment (`.env` is
//! loaded first by `main`).

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches, Parser};

use crate::auth::Credentials;
use crate::error::{GatewayError, GatewayResult};
use crate::vendor::RetryPolicy;
use crate::widget::{Branding, Environment, Theme};

#[derive(Parser, Clone)]
#[command(name = "esign-gateway")]
#[command(about = "Credential-holding proxy in front of a hosted eSign provider")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Base URL of the signing vendor's API
    #[arg(long, env = "VENDOR_BASE_URL", default_value = "https://ext.digio.in:444")]
    pub vendor_base_url: String,

    /// Vendor client id (Basic-Auth user)
    #[arg(long, env = "CREDENTIAL_ID", hide_env_values = true)]
    pub credential_id: Option<String>,

    /// Vendor client secret (Basic-Auth password)
    #[arg(long, env = "CREDENTIAL_SECRET", hide_env_values = true)]
    pub credential_secret: Option<String>,

    /// Directory documents are loaded from
    #[arg(long, env = "DOCUMENT_DIR", default_value = "documents")]
    pub document_dir: PathBuf,

    /// Document used when an initiation names none
    #[arg(long, env = "DEFAULT_DOCUMENT_REF")]
    pub default_document_ref: Option<String>,

    /// Widget environment handed to the front end
    #[arg(long, env = "ESIGN_ENVIRONMENT", default_value = "sandbox")]
    pub environment: Environment,

    /// Where the widget reports completion
    #[arg(long, env = "CALLBACK_URL", default_value = "/esign/callback")]
    pub callback_url: String,

    #[arg(long, env = "LOGO_URL")]
    pub logo_url: Option<String>,

    #[arg(long, env = "THEME_PRIMARY_COLOR")]
    pub theme_primary_color: Option<String>,

    #[arg(long, env = "THEME_SECONDARY_COLOR")]
    pub theme_secondary_color: Option<String>,

    /// Per-call timeout for vendor requests
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Attempts for transient network failures (1 = no retry)
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    pub retry_attempts: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "200")]
    pub retry_base_delay_ms: u64,

    /// Interval between status queries while waiting on a session
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Upper bound on any verification wait
    #[arg(long, env = "MAX_WAIT_MS", default_value = "60000")]
    pub max_wait_ms: u64,

    /// How long session bindings are remembered
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "86400")]
    pub session_ttl_secs: u64,

    #[arg(long, env = "SIGNER_REASON", default_value = "Terms and conditions acceptance")]
    pub signer_reason: String,

    #[arg(long, env = "EXPIRE_IN_DAYS", default_value = "10")]
    pub expire_in_days: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Credentials are resolved lazily so the widget endpoints keep working
    /// on a gateway that has none.
    pub fn credentials(&self) -> GatewayResult<Credentials> {
        Credentials::from_parts(
            self.credential_id.as_deref(),
            self.credential_secret.as_deref(),
        )
    }

    pub fn branding(&self) -> Branding {
        let theme = match (&self.theme_primary_color, &self.theme_secondary_color) {
            (None, None) => None,
            (primary, secondary) => Some(Theme {
                primary_color: primary.clone().unwrap_or_else(|| Theme::DEFAULT_PRIMARY.into()),
                secondary_color: secondary
                    .clone()
                    .unwrap_or_else(|| Theme::DEFAULT_SECONDARY.into()),
            }),
        };
        Branding {
            logo: self.logo_url.clone(),
            theme,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        // chrono caps durations at i64::MAX milliseconds
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    /// The declared defaults, ignoring flags and the process environment.
    pub fn defaults() -> GatewayResult<Self> {
        let matches = Self::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(["esign-gateway"])
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        Self::from_arg_matches(&matches).map_err(|e| GatewayError::Configuration(e.to_string()))
    }

    /// Defaults with the given vendor endpoint and credentials; used by
    /// tests and embedders that do not go through the CLI.
    pub fn for_vendor(
        vendor_base_url: &str,
        id: &str,
        secret: &str,
        document_dir: PathBuf,
    ) -> GatewayResult<Self> {
        let mut config = Self::defaults()?;
        config.vendor_base_url = vendor_base_url.to_string();
        config.credential_id = Some(id.to_string());
        config.credential_secret = Some(secret.to_string());
        config.document_dir = document_dir;
        Ok(config)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen", &self.listen)
            .field("vendor_base_url", &self.vendor_base_url)
            .field("credential_id", &self.credential_id)
            .field("credential_secret", &self.credential_secret.as_ref().map(|_| "[REDACTED]"))
            .field("document_dir", &self.document_dir)
            .field("default_document_ref", &self.default_document_ref)
            .field("environment", &self.environment)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}
