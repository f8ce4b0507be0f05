//! WebSocket upgrade + session loop. Each connection owns one `SessionLifecycle`
//! and multiplexes client messages with engine events in a single task, so every
//! state change is applied in order and followed by a fresh snapshot.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::DrillError;
use crate::protocol::{level_out, to_snapshot, ClientWsMessage, ServerWsMessage};
use crate::remote::RemoteApi;
use crate::session::{SessionLifecycle, Update};
use crate::state::AppState;

type Session = SessionLifecycle<RemoteApi>;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "drill_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state, Uuid::new_v4()))
}

#[instrument(level = "info", skip(socket, state, conn_id), fields(%conn_id))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, conn_id: Uuid) {
  info!(target: "drill_backend", "WebSocket connected");
  let (tx, mut events) = mpsc::unbounded_channel();
  let mut session = SessionLifecycle::new(state.backend.clone(), state.config.clone(), tx);

  loop {
    let replies = tokio::select! {
      msg = socket.recv() => match msg {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "drill_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &mut session, &state).await
          }
          Err(e) => vec![ServerWsMessage::Error { code: "invalid_message", message: format!("Invalid JSON: {}", e) }],
        },
        Some(Ok(Message::Ping(payload))) => {
          let _ = socket.send(Message::Pong(payload)).await;
          continue;
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => continue,
        Some(Err(e)) => {
          warn!(target: "drill_backend", error = %e, "WS receive error");
          break;
        }
      },
      Some(event) = events.recv() => on_engine_event(&mut session, event),
    };

    for reply in replies {
      let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "code": "internal", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = socket.send(Message::Text(out)).await {
        error!(target: "drill_backend", error = %e, "WS send error");
        info!(target: "drill_backend", "WebSocket disconnected");
        return;
      }
    }
  }
  // Dropping the session aborts its timer; in-flight calls report into a closed channel.
  info!(target: "drill_backend", status = %session.status(), score = session.state().score, "WebSocket disconnected");
}

fn snapshot(session: &Session) -> ServerWsMessage {
  ServerWsMessage::State { session: to_snapshot(session) }
}

fn failure(session: &Session, e: &DrillError) -> Vec<ServerWsMessage> {
  if e.is_fatal() {
    warn!(target: "drill", code = e.code(), "Session cannot continue until reset");
  }
  vec![ServerWsMessage::from(e), snapshot(session)]
}

fn on_engine_event(session: &mut Session, event: crate::session::EngineEvent) -> Vec<ServerWsMessage> {
  match session.handle(event) {
    Ok(Update::Ignored) => vec![],
    Ok(Update::Changed) => vec![snapshot(session)],
    Ok(Update::Tick(elapsed)) => vec![ServerWsMessage::Tick { elapsed_ms: elapsed.as_millis() as u64 }],
    Ok(Update::Answered { feedback, stalled }) => {
      let mut out = vec![ServerWsMessage::Verdict { feedback }];
      if stalled {
        out.push(ServerWsMessage::from(&DrillError::NoMoreWords));
      }
      out.push(snapshot(session));
      out
    }
    Err(e) => failure(session, &e),
  }
}

#[instrument(level = "info", skip(session, state))]
async fn handle_client_ws(msg: ClientWsMessage, session: &mut Session, state: &AppState) -> Vec<ServerWsMessage> {
  let result = match msg {
    ClientWsMessage::Ping => return vec![ServerWsMessage::Pong],

    ClientWsMessage::Levels => match state.catalog.load().await {
      Ok(levels) => {
        // Opening the list only moves an idle session into selection.
        if let Err(e) = session.begin_selection(&levels) {
          debug!(target: "drill", error = %e, "Levels requested outside selection");
        }
        info!(target: "drill", count = levels.len(), "WS levels served");
        return vec![
          ServerWsMessage::Levels { levels: levels.iter().map(|l| level_out(l)).collect() },
          snapshot(session),
        ];
      }
      Err(e) => Err(e),
    },

    ClientWsMessage::SelectLevel { user_id, level_id } => match state.catalog.select(level_id).await {
      Ok(level) => session.select_level(user_id, level),
      Err(e) => Err(e),
    },

    ClientWsMessage::SubmitAnswer { answer } => session.submit_answer(&answer),

    ClientWsMessage::RetryFetch => session.retry_fetch(),

    ClientWsMessage::Reset => {
      session.reset();
      Ok(())
    }
  };

  match result {
    Ok(()) => vec![snapshot(session)],
    Err(e) => {
      info!(target: "drill", code = e.code(), error = %e, "WS request rejected");
      failure(session, &e)
    }
  }
}
