//! HTTP endpoint handlers. These are thin wrappers over the shared level catalog;
//! sessions themselves live on WebSocket connections.

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument, warn};

use crate::error::DrillError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, levels_loaded: state.catalog.cached().is_some() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_levels(State(state): State<Arc<AppState>>) -> Result<Json<Vec<LevelOut>>, (StatusCode, Json<ErrorOut>)> {
  match state.catalog.load().await {
    Ok(levels) => {
      info!(target: "drill", count = levels.len(), "HTTP levels served");
      Ok(Json(levels.iter().map(|l| level_out(l)).collect()))
    }
    Err(e) => {
      warn!(target: "drill", error = %e, "HTTP levels unavailable");
      Err((status_for(&e), Json(ErrorOut { code: e.code(), message: e.to_string() })))
    }
  }
}

fn status_for(e: &DrillError) -> StatusCode {
  match e {
    DrillError::UnknownLevel(_) => StatusCode::NOT_FOUND,
    DrillError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  }
}
