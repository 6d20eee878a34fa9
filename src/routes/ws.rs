//! WebSocket upgrade + per-connection loop: the push side of the sync channel.
//!
//! A connection subscribes to one match; committed state changes are forwarded
//! from that match's broadcast channel. Delivery is best effort — a client
//! that misses events reconciles through the HTTP view. Presence is a side
//! signal layered on subscribe/disconnect and never gates gameplay.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument};

use crate::engine;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::{AppState, MatchHandle};

struct Subscription {
  match_code: String,
  participant_id: String,
  handle: Arc<MatchHandle>,
  forward: tokio::task::JoinHandle<()>,
}

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "stackduel_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "stackduel_backend", "WebSocket connected");

  // Push events are funneled through a per-connection channel so the forward
  // task never touches the socket directly.
  let (tx, mut rx) = mpsc::unbounded_channel::<String>();
  let mut subscription: Option<Subscription> = None;

  loop {
    tokio::select! {
      // Outbound: forward queued push payloads to the socket.
      Some(payload) = rx.recv() => {
        if socket.send(Message::Text(payload)).await.is_err() {
          break;
        }
      }
      // Inbound: client messages.
      maybe_msg = socket.recv() => {
        match maybe_msg {
          Some(Ok(Message::Text(txt))) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(incoming) => {
                debug!(target: "stackduel_backend", "WS received: {:?}", &incoming);
                handle_client_ws(incoming, &state, &tx, &mut subscription).await
              }
              Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }),
            };

            if let Some(reply) = reply {
              let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
                serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
              });
              if let Err(e) = socket.send(Message::Text(out)).await {
                error!(target: "stackduel_backend", error = %e, "WS send error");
                break;
              }
            }
          }
          Some(Ok(Message::Ping(payload))) => { let _ = socket.send(Message::Pong(payload)).await; }
          Some(Ok(Message::Close(_))) | None => break,
          _ => {}
        }
      }
    }
  }

  if let Some(sub) = subscription.take() {
    drop_subscription(sub).await;
  }
  info!(target: "stackduel_backend", "WebSocket disconnected");
}

/// Detach from the match channel and flip presence if this was the last
/// socket for that participant.
async fn drop_subscription(sub: Subscription) {
  sub.forward.abort();
  if sub.handle.unregister_presence(&sub.participant_id).await {
    push_presence(&sub.handle, &sub.match_code, &sub.participant_id, false);
  }
}

fn push_presence(handle: &MatchHandle, match_code: &str, participant_id: &str, online: bool) {
  let msg = ServerWsMessage::Presence {
    match_code: match_code.to_string(),
    participant_id: participant_id.to_string(),
    online,
  };
  if let Ok(payload) = serde_json::to_string(&msg) {
    handle.push(payload);
  }
}

#[instrument(level = "debug", skip_all)]
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &Arc<AppState>,
  tx: &mpsc::UnboundedSender<String>,
  subscription: &mut Option<Subscription>,
) -> Option<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => Some(ServerWsMessage::Pong),

    ClientWsMessage::Subscribe { match_code, participant_id } => {
      let handle = match state.handle(&match_code).await {
        Some(h) => h,
        None => {
          return Some(ServerWsMessage::Error { message: format!("no match with code {}", match_code) });
        }
      };
      {
        let m = handle.record.lock().await;
        if !m.is_participant(&participant_id) {
          return Some(ServerWsMessage::Error { message: "not a participant of this match".into() });
        }
      }

      if let Some(old) = subscription.take() {
        drop_subscription(old).await;
      }

      // Forward this match's push events into the connection channel.
      let mut events = handle.subscribe();
      let forward_tx = tx.clone();
      let forward = tokio::spawn(async move {
        loop {
          match events.recv().await {
            Ok(payload) => {
              if forward_tx.send(payload).is_err() {
                break;
              }
            }
            // A lagged receiver skips ahead; the poll path heals any gap.
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
          }
        }
      });

      if handle.register_presence(&participant_id).await {
        push_presence(&handle, &match_code, &participant_id, true);
      }
      info!(target: "match_engine", %match_code, %participant_id, "WS subscribed");

      *subscription = Some(Subscription {
        match_code: match_code.clone(),
        participant_id,
        handle,
        forward,
      });
      Some(ServerWsMessage::Subscribed { match_code })
    }

    ClientWsMessage::SelectionUpdate { match_code, participant_id, item_ids } => {
      match engine::update_selection(state, &match_code, &participant_id, &item_ids).await {
        Ok(()) => None, // silent ack; drafts are high-frequency
        Err(e) => Some(ServerWsMessage::Error { message: e.to_string() }),
      }
    }
  }
}
