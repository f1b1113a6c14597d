//! Axum router and all HTTP handlers for the Coordinator API.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so `tests/` can compose the
//! router directly without a bound listener.
//!
//! There is no command crate for missions, sorties, or specialists — this module is the
//! command boundary for them: every state-machine check (`can_transition_to`,
//! `can_complete`, ownership) happens here, immediately before the one event
//! that records the decision. State machines are enforced at the command
//! boundary, not the projection layer: an invalid transition never gets far
//! enough to produce an event.

use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Duration as ChronoDuration;
use fleet_model::{
    CheckpointId, CoreError, EventId, LockId, MailboxId, MessageId, MessagePriority, MissionId, MissionStatus,
    NewCheckpoint, NewEvent, Priority, SortieId, SortieStatus, SpecialistId, SpecialistStatus, StreamType,
};
use fleet_projections::queries;
use serde::Serialize;
use serde_json::json;

use crate::api_types::*;
use crate::error_response::{ApiError, ApiResult};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/missions", post(create_mission).get(list_missions))
        .route("/api/v1/missions/:id", get(get_mission))
        .route("/api/v1/missions/:id/start", post(start_mission))
        .route("/api/v1/missions/:id/complete", post(complete_mission))
        .route("/api/v1/missions/:id/cancel", post(cancel_mission))
        .route("/api/v1/sorties", post(create_sortie).get(list_sorties))
        .route("/api/v1/sorties/:id", get(get_sortie))
        .route("/api/v1/sorties/:id/assign", post(assign_sortie))
        .route("/api/v1/sorties/:id/start", post(start_sortie))
        .route("/api/v1/sorties/:id/complete", post(complete_sortie))
        .route("/api/v1/sorties/:id/cancel", post(cancel_sortie))
        .route("/api/v1/sorties/:id/fail", post(fail_sortie))
        .route("/api/v1/sorties/:id/progress", post(progress_sortie))
        .route("/api/v1/sorties/:id/block", post(block_sortie))
        .route("/api/v1/sorties/:id/unblock", post(unblock_sortie))
        .route("/api/v1/specialists", post(register_specialist).get(list_specialists))
        .route("/api/v1/specialists/:id", get(get_specialist))
        .route("/api/v1/specialists/:id/heartbeat", post(heartbeat_specialist))
        .route("/api/v1/specialists/:id/status", post(set_specialist_status))
        .route("/api/v1/locks/acquire", post(acquire_lock))
        .route("/api/v1/locks/:id/release", post(release_lock))
        .route("/api/v1/locks/:id/force_release", post(force_release_lock))
        .route("/api/v1/locks/:id/extend", post(extend_lock))
        .route("/api/v1/locks", get(list_locks))
        .route("/api/v1/messages", post(send_message))
        .route("/api/v1/messages/:id/read", post(mark_message_read))
        .route("/api/v1/messages/:id/ack", post(ack_message))
        .route("/api/v1/mailboxes/:id/messages", get(list_mailbox_messages))
        .route("/api/v1/events", get(list_events))
        .route("/api/v1/events/internal", post(append_event_internal))
        .route("/api/v1/missions/:id/checkpoints", post(create_checkpoint).get(list_checkpoints))
        .route("/api/v1/checkpoints/:id", get(get_checkpoint))
        .route("/api/v1/checkpoints/:id/restore", post(restore_checkpoint))
        .route("/api/v1/checkpoints", delete(prune_checkpoints))
        .route("/api/v1/cursors/advance", post(advance_cursor))
        .route("/api/v1/cursors/:id", get(get_cursor))
        .route("/api/v1/recovery/stale", get(stale_missions))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Every write endpoint accepts an optional `x-causation-id` header, threaded
/// into the event it appends.
fn causation_id(headers: &HeaderMap) -> ApiResult<Option<EventId>> {
    match headers.get("x-causation-id") {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| CoreError::validation("x-causation-id header is not valid UTF-8"))?;
            Ok(Some(EventId::parse(raw)?))
        }
    }
}

fn with_causation(mut event: NewEvent, causation_id: Option<EventId>) -> NewEvent {
    if let Some(id) = causation_id {
        event = event.caused_by(id);
    }
    event
}

/// Round-trips a unit-ish enum through its `snake_case` wire form via its
/// own `Serialize` impl, so the event payload and HTTP query strings always
/// agree with `fleet-projections`' parsers without duplicating match arms.
fn wire_str<T: Serialize>(value: T) -> ApiResult<String> {
    match serde_json::to_value(value).map_err(|e| CoreError::internal(format!("serialize enum: {e}")))? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(CoreError::internal(format!("expected string enum encoding, got {other}")).into()),
    }
}

fn parse_wire<T: serde::de::DeserializeOwned>(raw: &str, field: &str) -> ApiResult<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| CoreError::validation(format!("{field} {raw:?} is not recognized")).into())
}

fn not_found(kind: &str, id: &str) -> ApiError {
    CoreError::not_found(format!("{kind} {id} not found")).into()
}

// ---------------------------------------------------------------------------
// Health / stats
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let start = Instant::now();
    let report = state.store.health().await?;
    let latency_ms = start.elapsed().as_millis();
    let status = if !report.ok {
        "unhealthy"
    } else if report.degraded {
        "degraded"
    } else {
        "ok"
    };
    Ok(Json(HealthResponse {
        status,
        store: if report.has_core_tables { "ready" } else { "uninitialized" },
        wal_size_bytes: report.wal_size_bytes,
        latency_ms,
    }))
}

pub(crate) async fn stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let pool = state.store.pool();
    let missions_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM missions")
        .fetch_one(pool)
        .await
        .map_err(|e| CoreError::internal(format!("stats missions_total: {e}")))?;
    let missions_in_progress: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM missions WHERE status = 'in_progress'")
        .fetch_one(pool)
        .await
        .map_err(|e| CoreError::internal(format!("stats missions_in_progress: {e}")))?;
    let sorties_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sorties")
        .fetch_one(pool)
        .await
        .map_err(|e| CoreError::internal(format!("stats sorties_total: {e}")))?;
    let active_locks = queries::list_active_locks(pool).await?.len() as i64;
    let specialists_total = queries::list_specialists(pool).await?.len() as i64;
    let events_total = fleet_eventlog::count(pool, None).await?;

    Ok(Json(StatsResponse {
        missions_total,
        missions_in_progress,
        sorties_total,
        active_locks,
        events_total,
        specialists_total,
    }))
}

// ---------------------------------------------------------------------------
// Missions
// ---------------------------------------------------------------------------

pub(crate) async fn create_mission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateMissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let mission_id = MissionId::generate();
    let event = with_causation(
        NewEvent::new(
            "mission_created",
            StreamType::Mission,
            mission_id.as_str(),
            json!({
                "title": body.title,
                "description": body.description,
                "priority": wire_str(body.priority)?,
                "metadata": body.metadata,
            }),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let mission = queries::get_mission(state.store.pool(), &mission_id)
        .await?
        .ok_or_else(|| CoreError::internal("mission vanished immediately after creation"))?;
    Ok((StatusCode::CREATED, Json(mission)))
}

pub(crate) async fn get_mission(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let mission_id = MissionId::parse(id.clone())?;
    let mission = queries::get_mission(state.store.pool(), &mission_id)
        .await?
        .ok_or_else(|| not_found("mission", &id))?;
    Ok(Json(mission))
}

pub(crate) async fn list_missions(
    State(state): State<AppState>,
    Query(q): Query<ListMissionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = q.status.as_deref().map(|s| parse_wire::<MissionStatus>(s, "status")).transpose()?;
    let priority = q.priority.as_deref().map(|s| parse_wire::<Priority>(s, "priority")).transpose()?;
    let mut missions = queries::list_missions(state.store.pool(), status, q.limit.unwrap_or(50), q.offset.unwrap_or(0)).await?;
    if let Some(priority) = priority {
        missions.retain(|m| m.priority == priority);
    }
    Ok(Json(missions))
}

pub(crate) async fn start_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let mission_id = MissionId::parse(id.clone())?;
    let mission = queries::get_mission(state.store.pool(), &mission_id).await?.ok_or_else(|| not_found("mission", &id))?;
    if !mission.status.can_transition_to(MissionStatus::InProgress) {
        return Err(CoreError::conflict(format!(
            "mission {id} cannot start from status {:?}",
            mission.status
        ))
        .into());
    }
    let event = with_causation(
        NewEvent::new("mission_started", StreamType::Mission, mission_id.as_str(), json!({})),
        cid,
    );
    state.ledger.append(event).await?;
    let mission = queries::get_mission(state.store.pool(), &mission_id).await?.ok_or_else(|| not_found("mission", &id))?;
    Ok(Json(mission))
}

pub(crate) async fn complete_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CompleteMissionRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let mission_id = MissionId::parse(id.clone())?;
    let mission = queries::get_mission(state.store.pool(), &mission_id).await?.ok_or_else(|| not_found("mission", &id))?;
    if !mission.status.can_transition_to(MissionStatus::Completed) {
        return Err(CoreError::conflict(format!(
            "mission {id} cannot complete from status {:?}",
            mission.status
        ))
        .into());
    }
    let sorties = queries::list_sorties_by_mission(state.store.pool(), &mission_id).await?;
    if let Some(open) = sorties.iter().find(|s| !s.status.is_terminal()) {
        return Err(CoreError::precondition_failed(format!(
            "sortie {} is not terminal (status {:?}); mission {id} cannot complete",
            open.id, open.status
        ))
        .into());
    }
    let event = with_causation(
        NewEvent::new(
            "mission_completed",
            StreamType::Mission,
            mission_id.as_str(),
            json!({"result": body.result}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let mission = queries::get_mission(state.store.pool(), &mission_id).await?.ok_or_else(|| not_found("mission", &id))?;
    Ok(Json(mission))
}

pub(crate) async fn cancel_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let mission_id = MissionId::parse(id.clone())?;
    let mission = queries::get_mission(state.store.pool(), &mission_id).await?.ok_or_else(|| not_found("mission", &id))?;
    if !mission.status.can_transition_to(MissionStatus::Cancelled) {
        return Err(CoreError::conflict(format!(
            "mission {id} cannot cancel from status {:?}",
            mission.status
        ))
        .into());
    }
    let event = with_causation(
        NewEvent::new("mission_cancelled", StreamType::Mission, mission_id.as_str(), json!({})),
        cid,
    );
    state.ledger.append(event).await?;
    let mission = queries::get_mission(state.store.pool(), &mission_id).await?.ok_or_else(|| not_found("mission", &id))?;
    Ok(Json(mission))
}

// ---------------------------------------------------------------------------
// Sorties
// ---------------------------------------------------------------------------

pub(crate) async fn create_sortie(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSortieRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let mission_id = body.mission_id.as_deref().map(|m| MissionId::parse(m)).transpose()?;
    let sortie_id = SortieId::generate();
    let event = with_causation(
        NewEvent::new(
            "sortie_created",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({
                "mission_id": mission_id.as_ref().map(|m| m.as_str()),
                "title": body.title,
                "description": body.description,
                "priority": wire_str(body.priority)?,
                "files": body.files,
                "metadata": body.metadata,
            }),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id)
        .await?
        .ok_or_else(|| CoreError::internal("sortie vanished immediately after creation"))?;
    Ok((StatusCode::CREATED, Json(sortie)))
}

pub(crate) async fn get_sortie(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let sortie_id = SortieId::parse(id.clone())?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn list_sorties(
    State(state): State<AppState>,
    Query(q): Query<ListSortiesQuery>,
) -> ApiResult<impl IntoResponse> {
    let sorties = if let Some(mission_id) = q.mission_id {
        queries::list_sorties_by_mission(state.store.pool(), &MissionId::parse(mission_id)?).await?
    } else if let Some(specialist_id) = q.specialist_id {
        queries::list_sorties_by_specialist(state.store.pool(), &SpecialistId::parse(specialist_id)?).await?
    } else {
        return Err(CoreError::validation("list sorties requires mission_id or specialist_id").into());
    };
    Ok(Json(sorties))
}

pub(crate) async fn assign_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AssignSortieRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let specialist_id = SpecialistId::parse(body.specialist_id)?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if sortie.status.is_terminal() {
        return Err(CoreError::conflict(format!("sortie {id} is already terminal ({:?})", sortie.status)).into());
    }
    let event = with_causation(
        NewEvent::new(
            "sortie_assigned",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"specialist_id": specialist_id.as_str()}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn start_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StartSortieRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let specialist_id = SpecialistId::parse(body.specialist_id)?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;

    if sortie.assigned_to.as_ref() != Some(&specialist_id) {
        return Err(CoreError::ownership_error(format!(
            "sortie {id} is not assigned to specialist {specialist_id}"
        ))
        .into());
    }
    if sortie.status != SortieStatus::Assigned {
        return Err(CoreError::conflict(format!("sortie {id} cannot start from status {:?}", sortie.status)).into());
    }

    let event = with_causation(
        NewEvent::new("sortie_started", StreamType::Sortie, sortie_id.as_str(), json!({})),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn complete_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CompleteSortieRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if !sortie.status.can_complete() {
        return Err(CoreError::conflict(format!("sortie {id} cannot complete from status {:?}", sortie.status)).into());
    }
    let event = with_causation(
        NewEvent::new(
            "sortie_completed",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"result": body.result}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn cancel_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if sortie.status.is_terminal() {
        return Err(CoreError::conflict(format!("sortie {id} is already terminal ({:?})", sortie.status)).into());
    }
    let event = with_causation(
        NewEvent::new("sortie_cancelled", StreamType::Sortie, sortie_id.as_str(), json!({"result": serde_json::Value::Null})),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn fail_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CompleteSortieRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if sortie.status.is_terminal() {
        return Err(CoreError::conflict(format!("sortie {id} is already terminal ({:?})", sortie.status)).into());
    }
    let event = with_causation(
        NewEvent::new(
            "sortie_failed",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"result": body.result}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn progress_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SortieProgressRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    fleet_model::validate_progress(body.progress)?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if sortie.status != SortieStatus::InProgress {
        return Err(CoreError::conflict(format!(
            "sortie {id} is not in_progress (status {:?}); progress cannot be recorded",
            sortie.status
        ))
        .into());
    }
    if body.progress < sortie.progress {
        return Err(CoreError::conflict(format!(
            "progress must be non-decreasing within a run: {} < {}",
            body.progress, sortie.progress
        ))
        .into());
    }
    let event = with_causation(
        NewEvent::new(
            "sortie_progress",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"progress": body.progress, "notes": body.notes}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn block_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SortieBlockRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if sortie.status != SortieStatus::InProgress {
        return Err(CoreError::conflict(format!("sortie {id} cannot block from status {:?}", sortie.status)).into());
    }
    let event = with_causation(
        NewEvent::new(
            "sortie_blocked",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"blocked_by": body.blocked_by, "reason": body.reason}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

pub(crate) async fn unblock_sortie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let sortie_id = SortieId::parse(id.clone())?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    if sortie.status != SortieStatus::Blocked {
        return Err(CoreError::conflict(format!("sortie {id} is not blocked (status {:?})", sortie.status)).into());
    }
    let event = with_causation(
        NewEvent::new("sortie_unblocked", StreamType::Sortie, sortie_id.as_str(), json!({})),
        cid,
    );
    state.ledger.append(event).await?;
    let sortie = queries::get_sortie(state.store.pool(), &sortie_id).await?.ok_or_else(|| not_found("sortie", &id))?;
    Ok(Json(sortie))
}

// ---------------------------------------------------------------------------
// Specialists
// ---------------------------------------------------------------------------

pub(crate) async fn register_specialist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterSpecialistRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let specialist_id = SpecialistId::generate();
    let event = with_causation(
        NewEvent::new(
            "specialist_registered",
            StreamType::Specialist,
            specialist_id.as_str(),
            json!({"name": body.name, "capabilities": body.capabilities}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let specialist = queries::get_specialist(state.store.pool(), &specialist_id)
        .await?
        .ok_or_else(|| CoreError::internal("specialist vanished immediately after registration"))?;
    Ok((StatusCode::CREATED, Json(specialist)))
}

pub(crate) async fn get_specialist(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let specialist_id = SpecialistId::parse(id.clone())?;
    let specialist = queries::get_specialist(state.store.pool(), &specialist_id).await?.ok_or_else(|| not_found("specialist", &id))?;
    Ok(Json(specialist))
}

pub(crate) async fn list_specialists(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(queries::list_specialists(state.store.pool()).await?))
}

pub(crate) async fn heartbeat_specialist(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let specialist_id = SpecialistId::parse(id.clone())?;
    queries::get_specialist(state.store.pool(), &specialist_id).await?.ok_or_else(|| not_found("specialist", &id))?;
    let event = with_causation(
        NewEvent::new("specialist_heartbeat", StreamType::Specialist, specialist_id.as_str(), json!({})),
        cid,
    );
    state.ledger.append(event).await?;
    let specialist = queries::get_specialist(state.store.pool(), &specialist_id).await?.ok_or_else(|| not_found("specialist", &id))?;
    Ok(Json(specialist))
}

pub(crate) async fn set_specialist_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SpecialistStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let specialist_id = SpecialistId::parse(id.clone())?;
    queries::get_specialist(state.store.pool(), &specialist_id).await?.ok_or_else(|| not_found("specialist", &id))?;
    let status: SpecialistStatus = parse_wire(&body.status, "status")?;
    let event = with_causation(
        NewEvent::new(
            "specialist_status_changed",
            StreamType::Specialist,
            specialist_id.as_str(),
            json!({"status": wire_str(status)?}),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let specialist = queries::get_specialist(state.store.pool(), &specialist_id).await?.ok_or_else(|| not_found("specialist", &id))?;
    Ok(Json(specialist))
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

pub(crate) async fn acquire_lock(
    State(state): State<AppState>,
    Json(body): Json<AcquireLockRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.timeout_ms <= 0 {
        return Err(CoreError::validation("timeout_ms must be positive").into());
    }
    let specialist_id = SpecialistId::parse(body.specialist_id)?;
    match state.locks.acquire(&body.file, &specialist_id, body.timeout_ms, body.purpose, body.checksum).await? {
        fleet_locks::AcquireOutcome::Acquired(lock) => Ok((StatusCode::CREATED, Json(lock))),
        fleet_locks::AcquireOutcome::Conflict { existing_lock } => Err(CoreError::conflict(format!(
            "path {} is already locked by {}",
            existing_lock.normalized_path, existing_lock.reserved_by
        ))
        .with_details(json!({"existing_lock": existing_lock}))
        .into()),
    }
}

pub(crate) async fn release_lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReleaseLockRequest>,
) -> ApiResult<impl IntoResponse> {
    let lock_id = LockId::parse(id)?;
    let specialist_id = SpecialistId::parse(body.specialist_id)?;
    let lock = state.locks.release(&lock_id, &specialist_id).await?;
    Ok(Json(lock))
}

pub(crate) async fn force_release_lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ForceReleaseLockRequest>,
) -> ApiResult<impl IntoResponse> {
    let lock_id = LockId::parse(id)?;
    let lock = state.locks.force_release(&lock_id, &body.reason).await?;
    Ok(Json(lock))
}

pub(crate) async fn extend_lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExtendLockRequest>,
) -> ApiResult<impl IntoResponse> {
    let lock_id = LockId::parse(id)?;
    let specialist_id = SpecialistId::parse(body.specialist_id)?;
    if body.additional_ms <= 0 {
        return Err(CoreError::validation("additional_ms must be positive").into());
    }
    let lock = state.locks.extend(&lock_id, &specialist_id, body.additional_ms).await?;
    Ok(Json(lock))
}

pub(crate) async fn list_locks(
    State(state): State<AppState>,
    Query(q): Query<ListLocksQuery>,
) -> ApiResult<impl IntoResponse> {
    let locks = if let Some(file) = q.file {
        state.locks.get_by_file(&file).await?
    } else if let Some(specialist_id) = q.specialist_id {
        state.locks.get_by_specialist(&SpecialistId::parse(specialist_id)?).await?
    } else if q.active.as_deref() == Some("1") || q.active.is_none() {
        state.locks.get_active().await?
    } else {
        queries::list_active_locks(state.store.pool()).await?
    };
    Ok(Json(locks))
}

// ---------------------------------------------------------------------------
// Mailbox / messages
// ---------------------------------------------------------------------------

pub(crate) async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    let owner_id = SpecialistId::parse(body.mailbox_owner_id)?;
    let sender_id = body.sender_id.map(SpecialistId::parse).transpose()?;
    let message = state
        .mailbox
        .send(
            &owner_id,
            sender_id.as_ref(),
            body.thread_id.as_deref(),
            &body.message_type,
            body.content,
            body.priority,
            cid,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub(crate) async fn mark_message_read(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let message_id = MessageId::parse(id)?;
    Ok(Json(state.mailbox.mark_read(&message_id).await?))
}

pub(crate) async fn ack_message(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let message_id = MessageId::parse(id)?;
    Ok(Json(state.mailbox.acknowledge(&message_id).await?))
}

pub(crate) async fn list_mailbox_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ListMessagesQuery>,
) -> ApiResult<impl IntoResponse> {
    let mailbox_id = MailboxId::parse(id)?;
    let status = q.status.as_deref().map(|s| parse_wire(s, "status")).transpose()?;
    Ok(Json(state.mailbox.get_by_mailbox(&mailbox_id, status).await?))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub(crate) async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<ListEventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let pool = state.store.pool();
    let events = match (q.stream_type.as_deref(), q.stream_id.as_deref()) {
        (Some(stream_type), Some(stream_id)) => {
            let stream_type: StreamType = parse_wire(stream_type, "stream_type")?;
            fleet_eventlog::get_by_stream(pool, stream_type, stream_id, q.after_sequence).await?
        }
        _ => fleet_eventlog::get_after_sequence(pool, q.after_sequence.unwrap_or(0), q.limit).await?,
    };
    Ok(Json(events))
}

/// `event append (restricted)`: the Coordinator API does not
/// authenticate callers itself, so this gate only
/// checks for the internal marker that middleware is expected to set —
/// it is a placeholder for that external layer: read a flag, 403 if unset.
pub(crate) async fn append_event_internal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AppendEventRequest>,
) -> ApiResult<impl IntoResponse> {
    let is_internal = headers.get("x-fleet-internal").and_then(|v| v.to_str().ok()) == Some("1");
    if !is_internal {
        return Err(CoreError::ownership_error("event append is restricted to internal callers").into());
    }
    let cid = causation_id(&headers)?;
    let stream_type: StreamType = parse_wire(&body.stream_type, "stream_type")?;
    let mut event = NewEvent::new(body.event_type, stream_type, body.stream_id, body.data);
    if let Some(correlation_id) = body.correlation_id {
        event.correlation_id = Some(EventId::parse(correlation_id)?);
    }
    let event = with_causation(event, cid);
    Ok((StatusCode::CREATED, Json(state.ledger.append(event).await?)))
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

pub(crate) async fn create_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateCheckpointRequest>,
) -> ApiResult<impl IntoResponse> {
    let mission_id = MissionId::parse(id)?;
    let created_by = SpecialistId::parse(body.created_by)?;
    let checkpoint = state
        .checkpoints
        .create(NewCheckpoint {
            mission_id,
            trigger: body.trigger,
            trigger_details: body.trigger_details,
            created_by,
            progress_percent: body.progress_percent,
            ttl_hours: body.ttl_hours,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(checkpoint)))
}

pub(crate) async fn list_checkpoints(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let mission_id = MissionId::parse(id)?;
    Ok(Json(state.checkpoints.list_by_mission(&mission_id).await?))
}

pub(crate) async fn get_checkpoint(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let checkpoint_id = CheckpointId::parse(id.clone())?;
    let checkpoint = state.checkpoints.get_by_id(&checkpoint_id).await?.ok_or_else(|| not_found("checkpoint", &id))?;
    Ok(Json(checkpoint))
}

pub(crate) async fn restore_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<RestoreCheckpointQuery>,
) -> ApiResult<impl IntoResponse> {
    let checkpoint_id = CheckpointId::parse(id)?;
    let report = state.recovery.restore(&checkpoint_id, q.dry_run.unwrap_or(false)).await?;
    Ok(Json(RestoreReportDto::from(report)))
}

pub(crate) async fn prune_checkpoints(
    State(state): State<AppState>,
    Query(q): Query<PruneCheckpointsQuery>,
) -> ApiResult<impl IntoResponse> {
    let pruned = state
        .checkpoints
        .prune(
            q.older_than_days.unwrap_or(30),
            q.keep_per_mission.unwrap_or(1),
            q.include_completed.unwrap_or(false),
        )
        .await?;
    Ok(Json(json!({"pruned": pruned})))
}

/// [`fleet_recovery::RestoreReport`] has no `Serialize` impl of its own
/// (it is an internal engine result, not a wire type) — this mirrors it
/// field-for-field for the HTTP response.
#[derive(Debug, Serialize)]
struct RestoreReportDto {
    checkpoint_id: String,
    dry_run: bool,
    success: bool,
    restored_sorties: usize,
    restored_locks: usize,
    restored_messages: usize,
    conflicts: usize,
    error: Option<String>,
}

impl From<fleet_recovery::RestoreReport> for RestoreReportDto {
    fn from(report: fleet_recovery::RestoreReport) -> Self {
        Self {
            checkpoint_id: report.checkpoint_id.into_string(),
            dry_run: report.dry_run,
            success: report.success,
            restored_sorties: report.restored.sorties,
            restored_locks: report.restored.locks,
            restored_messages: report.restored.messages,
            conflicts: report.conflicts.len(),
            error: report.error,
        }
    }
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

pub(crate) async fn advance_cursor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AdvanceCursorRequest>,
) -> ApiResult<impl IntoResponse> {
    let cid = causation_id(&headers)?;
    if let Some(existing) = queries::get_cursor(state.store.pool(), &body.id).await? {
        existing.validate_advance(body.position)?;
    }
    let event = with_causation(
        NewEvent::new(
            "cursor_advanced",
            StreamType::Fleet,
            body.id.clone(),
            json!({
                "target_stream_type": body.target_stream_type,
                "target_stream_id": body.target_stream_id,
                "position": body.position,
                "consumer_id": body.consumer_id,
            }),
        ),
        cid,
    );
    state.ledger.append(event).await?;
    let cursor = queries::get_cursor(state.store.pool(), &body.id)
        .await?
        .ok_or_else(|| CoreError::internal("cursor vanished immediately after advance"))?;
    Ok(Json(cursor))
}

pub(crate) async fn get_cursor(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let cursor = queries::get_cursor(state.store.pool(), &id).await?.ok_or_else(|| not_found("cursor", &id))?;
    Ok(Json(cursor))
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

pub(crate) async fn stale_missions(
    State(state): State<AppState>,
    Query(q): Query<StaleMissionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let threshold = ChronoDuration::seconds(q.activity_threshold_secs.unwrap_or(300));
    let candidates = state.recovery.detect(threshold).await?;
    let dto: Vec<_> = candidates
        .into_iter()
        .map(|c| {
            json!({
                "mission_id": c.mission_id.as_str(),
                "latest_checkpoint_id": c.latest_checkpoint_id.map(|id| id.into_string()),
                "age_ms": c.age_ms,
                "confidence": c.confidence,
            })
        })
        .collect();
    Ok(Json(dto))
}
