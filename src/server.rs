// src/server.rs
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{EsignGateway, SharedGateway};
use crate::types::{InitReq, SessionBinding, SigningResult, SigningSessionHandle, VerifyQuery, WidgetConfigQuery};
use crate::widget::{self, Branding, Environment, WidgetConfig};

#[derive(Clone)]
pub struct AppState {
    pub gateway: SharedGateway,
    pub environment: Environment,
    pub branding: Branding,
    pub callback_url: String,
    pub max_wait: Duration,
    /// Cancelled on shutdown; pending verification waits end with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn from_config(config: &Config) -> GatewayResult<Self> {
        Ok(Self {
            gateway: Arc::new(EsignGateway::from_config(config)?),
            environment: config.environment,
            branding: config.branding(),
            callback_url: config.callback_url.clone(),
            max_wait: config.max_wait(),
            shutdown: CancellationToken::new(),
        })
    }
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    // waits may legitimately run up to max_wait plus one vendor round trip
    let timeout = state.max_wait + request_timeout * 2;
    Router::new()
        .route("/esign/init", post(init_signing))
        .route("/esign/verify", get(verify_signing))
        .route("/esign/widget-config", get(widget_config))
        .route("/esign/callback", post(signing_callback))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout))
                .layer(CorsLayer::permissive()),
        )
}

pub async fn serve(listener: TcpListener, state: AppState, request_timeout: Duration) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state, request_timeout);
    info!("esign gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ---------- API HANDLERS ---------- //

async fn init_signing(
    State(state): State<AppState>,
    body: Result<Json<InitReq>, JsonRejection>,
) -> Result<Json<SigningSessionHandle>, GatewayError> {
    // a bodiless POST falls back to the default document
    let req = match body {
        Ok(Json(r)) => r,
        Err(JsonRejection::MissingJsonContentType(_)) => InitReq::default(),
        Err(e) => return Err(GatewayError::InvalidRequest(e.body_text())),
    };
    let handle = state
        .gateway
        .initiate_signing(
            req.document_id.as_deref(),
            req.user_id.as_deref(),
            req.idempotency_key.as_deref(),
        )
        .await?;
    Ok(Json(handle))
}

#[derive(Serialize)]
struct VerifyRes {
    #[serde(flatten)]
    result: SigningResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    binding: Option<SessionBinding>,
}

async fn verify_signing(
    State(state): State<AppState>,
    query: Result<Query<VerifyQuery>, QueryRejection>,
) -> Result<Json<VerifyRes>, GatewayError> {
    let Query(q) = query.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let reference = q
        .session_reference
        .ok_or_else(|| GatewayError::InvalidRequest("session_reference is required".into()))?;

    let result = match q.wait_ms {
        Some(ms) if ms > 0 => {
            let wait = Duration::from_millis(ms).min(state.max_wait);
            // dropping this handler (client gone) drops the poll with it
            state
                .gateway
                .await_signing(&reference, wait, state.shutdown.child_token())
                .await?
        }
        _ => state.gateway.verify_signing(&reference).await?,
    };

    Ok(Json(VerifyRes {
        binding: state.gateway.session_binding(reference.trim()),
        result,
    }))
}

async fn widget_config(
    State(state): State<AppState>,
    query: Result<Query<WidgetConfigQuery>, QueryRejection>,
) -> Result<Json<WidgetConfig>, GatewayError> {
    let Query(q) = query.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let environment = match q.environment.as_deref() {
        Some(env) => env.parse()?,
        None => state.environment,
    };
    Ok(Json(widget::build_widget_config(
        environment,
        &state.branding,
        &state.callback_url,
    )?))
}

async fn signing_callback(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SigningResult>, GatewayError> {
    let Json(payload) = body.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    if !payload.is_object() {
        return Err(GatewayError::InvalidRequest("callback payload must be an object".into()));
    }
    let outcome = widget::on_signing_complete(&payload);
    Ok(Json(widget::outcome_into_result(outcome, payload)?))
}

async fn health() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
