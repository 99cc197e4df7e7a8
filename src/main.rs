// src/main.rs
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use esign_gateway::{serve, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("esign_gateway={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::from_config(&config)?;
    if !state.gateway.has_credentials() {
        warn!("CREDENTIAL_ID/CREDENTIAL_SECRET not set; vendor calls will fail with configuration_error");
    }
    info!(
        vendor = %config.vendor_base_url,
        environment = %config.environment,
        documents = %config.document_dir.display(),
        "starting esign gateway"
    );

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(config.listen).await?;
    serve(listener, state, config.request_timeout()).await
}
