//! Drill · adaptive vocabulary quiz backend
//!
//! - Axum HTTP + WebSocket API; one quiz session per WebSocket connection
//! - Levels, word pages, answer verdicts and session records come from the word service
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   DRILL_CONFIG_PATH   : path to TOML engine config
//!   DRILL_API_BASE_URL  : word service base URL (overrides config)
//!   DRILL_API_TOKEN     : bearer token for the word service
//!   DRILL_SCORING_MODE  : "client" or "server"
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod scoring;
mod seeds;
mod remote;
mod catalog;
mod buffer;
mod pipeline;
mod session;
mod state;
mod protocol;
mod routes;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::load_engine_config_from_env;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = load_engine_config_from_env().map_err(|e| {
    error!(target: "drill_backend", error = %e, "Invalid engine config");
    e
  })?;

  // Shared state: word service client and the lazily loaded level catalog.
  let state = Arc::new(AppState::new(config)?);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "drill_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "drill_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "drill_backend", error = %e, "Failed to listen for shutdown signal");
  }
}
