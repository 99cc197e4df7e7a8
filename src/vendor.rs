// src/vendor.rs
//! HTTP client for the hosted signing vendor.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::Credentials;
use crate::document::LoadedDocument;
use crate::error::{GatewayError, GatewayResult};
use crate::types::SessionState;

const UPLOAD_PATH: &str = "/v2/client/document/uploadpdf";
const DOCUMENT_PATH: &str = "/v2/client/document";

/// Bounded exponential backoff for transient network failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// base * 2^(attempt-1), plus up to 50% jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.saturating_sub(1).min(10));
        let jitter_ms = (exp.as_millis() as u64) / 2;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    /// `should_retry` narrows which errors are retried further than
    /// `GatewayError::is_retryable`.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        should_retry: impl Fn(&GatewayError) -> bool,
        mut op: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && should_retry(&e) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(%what, attempt, delay_ms = delay.as_millis() as u64, "retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Serialize)]
struct Signer<'a> {
    identifier: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct UploadReq<'a> {
    file_name: &'a str,
    file_data: &'a str,
    signers: Vec<Signer<'a>>,
    expire_in_days: u32,
    notify_signers: bool,
}

#[derive(Deserialize)]
struct DocumentRes {
    id: Option<String>,
    #[serde(default)]
    agreement_status: Option<String>,
}

/// A session as the vendor reported it.
#[derive(Debug)]
pub struct VendorSession {
    pub id: String,
    pub state: SessionState,
    pub raw: Value,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub reason: String,
    pub expire_in_days: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reason: "Terms and conditions acceptance".into(),
            expire_in_days: 10,
        }
    }
}

#[derive(Clone)]
pub struct VendorClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl VendorClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a signing session for `document`. Retried only on connect
    /// failures, where the upload never reached the vendor.
    pub async fn create_session(
        &self,
        credentials: &Credentials,
        document: &LoadedDocument,
        signer: &str,
        options: &SessionOptions,
    ) -> GatewayResult<VendorSession> {
        let auth = credentials.authorization()?;
        let url = format!("{}{UPLOAD_PATH}", self.base_url);
        let body = UploadReq {
            file_name: &document.file_name,
            file_data: &document.base64,
            signers: vec![Signer {
                identifier: signer,
                reason: &options.reason,
            }],
            expire_in_days: options.expire_in_days,
            notify_signers: false,
        };

        let res = self
            .retry
            .run(
                "create_session",
                |e| matches!(e, GatewayError::Network { connect: true, .. }),
                || async {
                    self.http
                        .post(&url)
                        .header(AUTHORIZATION, auth.clone())
                        .json(&body)
                        .send()
                        .await
                        .map_err(GatewayError::from)
                },
            )
            .await?;

        let session = read_session(res).await?;
        info!(session = %session.id, state = %session.state, "vendor session created");
        Ok(session)
    }

    /// Fetches the current state of `reference`. Safe to repeat, so every
    /// network failure is retried.
    pub async fn fetch_status(
        &self,
        credentials: &Credentials,
        reference: &str,
    ) -> GatewayResult<VendorSession> {
        let auth = credentials.authorization()?;
        let mut url = reqwest::Url::parse(&format!("{}{DOCUMENT_PATH}/", self.base_url))
            .map_err(|e| GatewayError::Configuration(format!("vendor base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Configuration("vendor base url cannot be a base".into()))?
            .pop_if_empty()
            .push(reference);

        let res = self
            .retry
            .run("fetch_status", |_| true, || async {
                self.http
                    .get(url.clone())
                    .header(AUTHORIZATION, auth.clone())
                    .send()
                    .await
                    .map_err(GatewayError::from)
            })
            .await?;

        let mut session = read_session(res).await?;
        if session.id.is_empty() {
            session.id = reference.to_string();
        }
        debug!(session = %session.id, state = %session.state, "vendor status");
        Ok(session)
    }
}

/// Splits vendor replies into 4xx rejections, 5xx failures and parsed
/// sessions. The response body is kept verbatim for relaying.
async fn read_session(res: Response) -> GatewayResult<VendorSession> {
    let status = res.status();
    let text = res.text().await.map_err(GatewayError::from)?;
    if status.is_client_error() {
        return Err(GatewayError::VendorRejection {
            status: status.as_u16(),
            body: text,
        });
    }
    if !status.is_success() {
        return Err(GatewayError::VendorFailure {
            status: status.as_u16(),
            body: text,
        });
    }

    let raw: Value = serde_json::from_str(&text)
        .map_err(|e| GatewayError::InvalidResponse(format!("body is not json: {e}")))?;
    let parsed: DocumentRes = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
    let state = parsed
        .agreement_status
        .as_deref()
        .map(SessionState::from_vendor)
        .unwrap_or(SessionState::Created);

    Ok(VendorSession {
        id: parsed.id.unwrap_or_default(),
        state,
        raw,
    })
}
