//! esign-gateway: keeps eSign vendor credentials on the server, forwards
//! session creation and status queries to the vendor, and serves the
//! configuration the vendor's signing widget is started with.

pub mod auth;
pub mod config;
pub mod document;
pub mod error;
pub mod gateway;
pub mod server;
pub mod types;
pub mod vendor;
pub mod widget;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use gateway::EsignGateway;
pub use server::{router, serve, AppState};
