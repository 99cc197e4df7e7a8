// src/gateway.rs
//! The credential-holding side of the signing flow: start a vendor session
//! for a document, then relay the vendor's view of it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::auth::Credentials;
use crate::config::Config;
use crate::document::DocumentStore;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{SessionBinding, SigningResult, SigningSessionHandle};
use crate::vendor::{SessionOptions, VendorClient};

/// Identifier passed to the vendor when the caller names no user.
const ANONYMOUS_SIGNER: &str = "anonymous";

pub struct EsignGateway {
    credentials: GatewayResult<Credentials>,
    vendor: VendorClient,
    documents: DocumentStore,
    options: SessionOptions,
    poll_interval: Duration,
    session_ttl: chrono::Duration,
    bindings: DashMap<String, SessionBinding>,
    idempotent: DashMap<String, Arc<OnceCell<SigningSessionHandle>>>,
}

impl EsignGateway {
    pub fn from_config(config: &Config) -> GatewayResult<Self> {
        let vendor = VendorClient::new(
            &config.vendor_base_url,
            config.request_timeout(),
            config.retry_policy(),
        )?;
        Ok(Self {
            credentials: config.credentials(),
            vendor,
            documents: DocumentStore::new(&config.document_dir, config.default_document_ref.clone()),
            options: SessionOptions {
                reason: config.signer_reason.clone(),
                expire_in_days: config.expire_in_days,
            },
            poll_interval: config.poll_interval(),
            session_ttl: config.session_ttl(),
            bindings: DashMap::new(),
            idempotent: DashMap::new(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_ok()
    }

    fn credentials(&self) -> GatewayResult<&Credentials> {
        self.credentials.as_ref().map_err(|e| match e {
            GatewayError::Configuration(msg) => GatewayError::Configuration(msg.clone()),
            other => GatewayError::Configuration(other.to_string()),
        })
    }

    #[instrument(skip(self), fields(vendor = %self.vendor.base_url()))]
    pub async fn initiate_signing(
        &self,
        document_ref: Option<&str>,
        user_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> GatewayResult<SigningSessionHandle> {
        let credentials = self.credentials()?;
        self.evict_expired();

        let document_id = self.documents.resolve_ref(document_ref)?;
        let Some(key) = idempotency_key.map(str::trim).filter(|k| !k.is_empty()) else {
            return self.create_session(credentials, &document_id, user_id).await;
        };

        // The cell is reserved before any vendor call, so concurrent callers
        // with the same key wait on a single creation.
        let cell = self.idempotent.entry(key.to_string()).or_default().clone();
        let handle = cell
            .get_or_try_init(|| self.create_session(credentials, &document_id, user_id))
            .await?;

        if handle.document_id != document_id || handle.user_id.as_deref() != user_id {
            return Err(GatewayError::InvalidRequest(format!(
                "idempotency key {key} was used for a different document or user"
            )));
        }
        debug!(session = %handle.session_reference, "idempotent initiation");
        Ok(handle.clone())
    }

    async fn create_session(
        &self,
        credentials: &Credentials,
        document_id: &str,
        user_id: Option<&str>,
    ) -> GatewayResult<SigningSessionHandle> {
        let document = self.documents.load(document_id).await?;
        let signer = user_id.unwrap_or(ANONYMOUS_SIGNER);
        let session = self
            .vendor
            .create_session(credentials, &document, signer, &self.options)
            .await?;
        if session.id.is_empty() {
            return Err(GatewayError::InvalidResponse("vendor returned no session id".into()));
        }
        let handle = SigningSessionHandle {
            session_reference: session.id,
            document_id: document_id.to_string(),
            user_id: user_id.map(str::to_owned),
            state: session.state,
            created_at: Utc::now(),
            raw_response: session.raw,
        };

        self.bindings.insert(
            handle.session_reference.clone(),
            SessionBinding {
                session_reference: handle.session_reference.clone(),
                document_id: handle.document_id.clone(),
                user_id: handle.user_id.clone(),
                created_at: handle.created_at,
            },
        );
        info!(session = %handle.session_reference, document = document_id, "signing session started");
        Ok(handle)
    }

    #[instrument(skip(self))]
    pub async fn verify_signing(&self, session_reference: &str) -> GatewayResult<SigningResult> {
        let session_reference = session_reference.trim();
        if session_reference.is_empty() {
            return Err(GatewayError::InvalidRequest("session_reference is required".into()));
        }
        let credentials = self.credentials()?;
        let session = self.vendor.fetch_status(credentials, session_reference).await?;
        Ok(SigningResult::from_state(session_reference, session.state, session.raw))
    }

    /// Polls until the session reaches a final state, `timeout` elapses, or
    /// `cancel` fires. Each poll is a plain `verify_signing`.
    pub async fn await_signing(
        &self,
        session_reference: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> GatewayResult<SigningResult> {
        let poll = async {
            loop {
                let result = self.verify_signing(session_reference).await?;
                if result.state.as_ref().is_some_and(|s| s.is_terminal()) {
                    return Ok::<_, GatewayError>(result);
                }
                debug!(session = session_reference, state = ?result.state, "not final yet");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::Cancelled(session_reference.to_string())),
            res = tokio::time::timeout(timeout, poll) => match res {
                Ok(result) => result,
                Err(_) => Err(GatewayError::VerificationTimeout(session_reference.to_string())),
            },
        }
    }

    pub fn session_binding(&self, session_reference: &str) -> Option<SessionBinding> {
        self.bindings.get(session_reference).map(|b| b.clone())
    }

    fn evict_expired(&self) {
        let cutoff = Utc::now() - self.session_ttl;
        self.bindings.retain(|_, b| b.created_at > cutoff);
        // empty cells still held elsewhere belong to an in-flight creation
        self.idempotent.retain(|_, cell| match cell.get() {
            Some(h) => h.created_at > cutoff,
            None => Arc::strong_count(cell) > 1,
        });
    }
}

pub type SharedGateway = Arc<EsignGateway>;

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::{SessionState, SigningStatus};

    fn gateway(uri: &str, dir: &Path) -> EsignGateway {
        let mut config = Config::for_vendor(uri, "id", "secret", dir.to_path_buf()).unwrap();
        config.retry_base_delay_ms = 1;
        config.poll_interval_ms = 10;
        EsignGateway::from_config(&config).unwrap()
    }

    fn docs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("terms.pdf"), b"%PDF-1.4").unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_credentials_fail_every_vendor_operation() {
        let dir = docs();
        let mut config = Config::for_vendor("http://127.0.0.1:9", "id", "secret", dir.path().into()).unwrap();
        config.credential_secret = None;
        let gw = EsignGateway::from_config(&config).unwrap();

        assert!(!gw.has_credentials());
        assert!(matches!(
            gw.initiate_signing(Some("terms.pdf"), None, None).await,
            Err(GatewayError::Configuration(_))
        ));
        assert!(matches!(
            gw.verify_signing("abc123").await,
            Err(GatewayError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn initiation_binds_session_to_document_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc123" })))
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());

        let handle = gw.initiate_signing(Some("terms.pdf"), Some("u-1"), None).await.unwrap();
        assert_eq!(handle.session_reference, "abc123");
        assert_eq!(handle.state, SessionState::Created);

        let binding = gw.session_binding("abc123").unwrap();
        assert_eq!(binding.document_id, "terms.pdf");
        assert_eq!(binding.user_id.as_deref(), Some("u-1"));
        assert!(gw.session_binding("other").is_none());
    }

    #[tokio::test]
    async fn idempotency_key_reuses_the_first_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc123" })))
            .expect(1)
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());

        let a = gw.initiate_signing(Some("terms.pdf"), None, Some("k1")).await.unwrap();
        let b = gw.initiate_signing(Some("terms.pdf"), None, Some("k1")).await.unwrap();
        assert_eq!(a.session_reference, b.session_reference);
    }

    #[tokio::test]
    async fn concurrent_initiations_with_one_key_create_one_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "abc123" }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());

        let (a, b) = tokio::join!(
            gw.initiate_signing(Some("terms.pdf"), None, Some("k1")),
            gw.initiate_signing(Some("terms.pdf"), None, Some("k1")),
        );
        assert_eq!(a.unwrap().session_reference, "abc123");
        assert_eq!(b.unwrap().session_reference, "abc123");
    }

    #[tokio::test]
    async fn reused_key_must_match_document_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc123" })))
            .expect(1)
            .mount(&server)
            .await;
        let dir = docs();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-a").unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF-b").unwrap();
        let gw = gateway(&server.uri(), dir.path());

        gw.initiate_signing(Some("a.pdf"), Some("alice"), Some("k1")).await.unwrap();
        assert!(matches!(
            gw.initiate_signing(Some("b.pdf"), Some("bob"), Some("k1")).await,
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            gw.initiate_signing(Some("a.pdf"), Some("bob"), Some("k1")).await,
            Err(GatewayError::InvalidRequest(_))
        ));
        let replay = gw.initiate_signing(Some("a.pdf"), Some("alice"), Some("k1")).await.unwrap();
        assert_eq!(replay.session_reference, "abc123");
    }

    #[tokio::test]
    async fn failed_creation_leaves_key_reusable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "abc123" })))
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());

        assert!(matches!(
            gw.initiate_signing(Some("terms.pdf"), None, Some("k1")).await,
            Err(GatewayError::VendorFailure { status: 500, .. })
        ));
        let handle = gw.initiate_signing(Some("terms.pdf"), None, Some("k1")).await.unwrap();
        assert_eq!(handle.session_reference, "abc123");
    }

    #[tokio::test]
    async fn session_id_is_required() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());
        assert!(matches!(
            gw.initiate_signing(Some("terms.pdf"), None, None).await,
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn blank_reference_never_reaches_vendor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());
        assert!(matches!(
            gw.verify_signing("  ").await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn await_returns_once_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/client/document/abc123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "abc123", "agreement_status": "pending" })),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/client/document/abc123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "abc123", "agreement_status": "completed" })),
            )
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());

        let result = gw
            .await_signing("abc123", Duration::from_secs(5), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, SigningStatus::Success);
    }

    #[tokio::test]
    async fn await_is_bounded_and_cancellable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "abc123", "agreement_status": "pending" })),
            )
            .mount(&server)
            .await;
        let dir = docs();
        let gw = gateway(&server.uri(), dir.path());

        assert!(matches!(
            gw.await_signing("abc123", Duration::from_millis(50), CancellationToken::new())
                .await,
            Err(GatewayError::VerificationTimeout(_))
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            gw.await_signing("abc123", Duration::from_secs(5), cancel).await,
            Err(GatewayError::Cancelled(_))
        ));
    }
}
