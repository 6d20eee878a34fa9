//! HTTP endpoint handlers. These are thin wrappers that forward to the match
//! engine. Each handler is instrumented; failures map to status + JSON via
//! `EngineError`'s `IntoResponse`.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, Json};
use tracing::{info, instrument};

use crate::engine;
use crate::error::EngineError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> Json<HealthOut> { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body), fields(%body.initiator_id, %body.opponent_id))]
pub async fn http_create_match(
  State(state): State<Arc<AppState>>,
  Json(body): Json<CreateMatchIn>,
) -> Result<Json<MatchView>, EngineError> {
  let match_type = body.match_type.as_deref().unwrap_or("speed_build");
  let view = engine::create_match(&state, &body.initiator_id, &body.opponent_id, match_type).await?;
  info!(target: "match_engine", code = %view.code, "HTTP match created");
  Ok(Json(view))
}

#[instrument(level = "debug", skip(state), fields(%code, %q.participant_id))]
pub async fn http_get_match(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Query(q): Query<ViewQuery>,
) -> Result<Json<MatchView>, EngineError> {
  let view = engine::view(&state, &code, &q.participant_id).await?;
  Ok(Json(view))
}

#[instrument(level = "info", skip(state, body), fields(%code, %body.participant_id))]
pub async fn http_accept(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Json(body): Json<ParticipantIn>,
) -> Result<Json<MatchView>, EngineError> {
  let view = engine::accept(&state, &code, &body.participant_id).await?;
  Ok(Json(view))
}

#[instrument(level = "info", skip(state, body), fields(%code, %body.participant_id))]
pub async fn http_decline(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Json(body): Json<ParticipantIn>,
) -> Result<Json<MatchView>, EngineError> {
  let view = engine::decline(&state, &code, &body.participant_id).await?;
  Ok(Json(view))
}

#[instrument(level = "info", skip(state, body), fields(%code, %body.participant_id))]
pub async fn http_start(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Json(body): Json<ParticipantIn>,
) -> Result<Json<MatchView>, EngineError> {
  let view = engine::start_match(&state, &code, &body.participant_id).await?;
  Ok(Json(view))
}

/// HTTP fallback for clients without a socket; the WS `selection_update`
/// message does the same thing.
#[instrument(level = "debug", skip(state, body), fields(%code, %body.participant_id, items = body.item_ids.len()))]
pub async fn http_selection(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Json(body): Json<SelectionIn>,
) -> Result<Json<HealthOut>, EngineError> {
  engine::update_selection(&state, &code, &body.participant_id, &body.item_ids).await?;
  Ok(Json(HealthOut { ok: true }))
}

#[instrument(level = "info", skip(state, body), fields(%code, %body.participant_id, items = body.item_ids.len()))]
pub async fn http_submit(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Json(body): Json<SubmitIn>,
) -> Result<Json<SubmitOut>, EngineError> {
  let out = engine::submit(
    &state,
    &code,
    &body.participant_id,
    &body.item_ids,
    body.time_remaining_secs,
  )
  .await?;
  info!(target: "match_engine", %code, status = ?out.status, "HTTP submission processed");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(%code, %body.participant_id))]
pub async fn http_rematch(
  State(state): State<Arc<AppState>>,
  Path(code): Path<String>,
  Json(body): Json<ParticipantIn>,
) -> Result<Json<RematchOut>, EngineError> {
  let view = engine::create_rematch(&state, &code, &body.participant_id).await?;
  info!(target: "match_engine", source = %code, rematch = %view.code, "HTTP rematch created");
  Ok(Json(RematchOut { match_code: view.code }))
}
