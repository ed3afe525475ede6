use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    ConflictQuery, ScheduleError, ScheduleSlot, Scope, SlotChange, SlotDraft, SlotFilter, SlotId,
    SlotService, SyncOrchestrator, SyncOutcome, SyncStatus, SyncTrigger, WriteOutcome,
};

/// Shared handler state. Writes go through the orchestrator when one is attached,
/// so they are queued while offline.
#[derive(Clone)]
pub struct AppState {
    service: SlotService,
    scope: Scope,
    orchestrator: Option<Arc<SyncOrchestrator>>,
}

impl AppState {
    pub fn new(service: SlotService, scope: Scope) -> Self {
        Self {
            service,
            scope,
            orchestrator: None,
        }
    }

    pub fn with_orchestrator(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            service: orchestrator.service().clone(),
            scope: orchestrator.session().scope(),
            orchestrator: Some(orchestrator),
        }
    }

    fn orchestrator(&self) -> Result<&Arc<SyncOrchestrator>, ApiError> {
        self.orchestrator
            .as_ref()
            .ok_or_else(|| ApiError::Unavailable("sync is not enabled for this server".into()))
    }

    async fn submit(&self, change: SlotChange) -> Result<WriteOutcome, ScheduleError> {
        match &self.orchestrator {
            Some(orchestrator) => orchestrator.submit(change).await,
            None => self.service.apply(&change).await.map(WriteOutcome::Applied),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<ScheduleSlot>,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Conflict(String, Vec<ScheduleSlot>),
    Invalid(String),
    Unauthorized(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        ApiError::Invalid(message.into())
    }
}

impl From<ScheduleError> for ApiError {
    fn from(value: ScheduleError) -> Self {
        let message = value.to_string();
        match value {
            ScheduleError::Validation(_) => ApiError::Invalid(message),
            ScheduleError::Conflict { conflicts } => ApiError::Conflict(message, conflicts),
            ScheduleError::NotFound(_) => ApiError::NotFound(message),
            ScheduleError::Auth(_) => ApiError::Unauthorized(message),
            ScheduleError::Network(_) => ApiError::Unavailable(message),
            ScheduleError::Storage(_) => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message, conflicts) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message, Vec::new()),
            ApiError::Conflict(message, conflicts) => {
                (StatusCode::CONFLICT, "conflict", message, conflicts)
            }
            ApiError::Invalid(message) => {
                (StatusCode::BAD_REQUEST, "invalid_request", message, Vec::new())
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", message, Vec::new())
            }
            ApiError::Unavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", message, Vec::new())
            }
            ApiError::Internal(message) => {
                tracing::error!(%message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message, Vec::new())
            }
        };
        let body = Json(ErrorBody {
            error,
            message,
            conflicts,
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlotQuery {
    class_id: Option<String>,
    teacher_id: Option<String>,
    classroom_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConflictCheckBody {
    acceptable: bool,
    conflicts: Vec<ScheduleSlot>,
}

#[derive(Debug, Serialize)]
struct SyncStatusBody {
    status: SyncStatus,
    last_sync_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    pending_changes: usize,
    online: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/slots", get(list_slots).post(create_slot))
        .route("/slots/:id", put(update_slot).delete(delete_slot))
        .route("/conflicts/check", post(check_conflicts))
        .route("/sync", post(trigger_sync))
        .route("/sync/status", get(sync_status))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP API listening");
    axum::serve(listener, app).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Vec<ScheduleSlot>>, ApiError> {
    let mut filter = SlotFilter::scoped(&state.scope);
    filter.class_id = query.class_id;
    filter.teacher_id = query.teacher_id;
    filter.classroom_id = query.classroom_id;
    let slots = state.service.list(&filter).await?;
    Ok(Json(slots))
}

fn ensure_in_scope(state: &AppState, draft: &SlotDraft) -> Result<(), ApiError> {
    if draft.scope() != state.scope {
        return Err(ApiError::invalid(format!(
            "slot belongs to school '{}' year '{}', expected school '{}' year '{}'",
            draft.school_id,
            draft.academic_year_id,
            state.scope.school_id,
            state.scope.academic_year_id
        )));
    }
    Ok(())
}

fn queued(change_id: uuid::Uuid) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "queued": true, "change_id": change_id })),
    )
        .into_response()
}

async fn create_slot(
    State(state): State<AppState>,
    Json(draft): Json<SlotDraft>,
) -> Result<Response, ApiError> {
    ensure_in_scope(&state, &draft)?;
    match state.submit(SlotChange::Create { draft }).await? {
        WriteOutcome::Applied(Some(slot)) => Ok((StatusCode::CREATED, Json(slot)).into_response()),
        WriteOutcome::Applied(None) => Err(ApiError::Internal("create returned no slot".into())),
        WriteOutcome::Queued(id) => Ok(queued(id)),
    }
}

async fn update_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<SlotId>,
    Json(draft): Json<SlotDraft>,
) -> Result<Response, ApiError> {
    ensure_in_scope(&state, &draft)?;
    match state
        .submit(SlotChange::Update { id: slot_id, draft })
        .await?
    {
        WriteOutcome::Applied(Some(slot)) => Ok(Json(slot).into_response()),
        WriteOutcome::Applied(None) => Err(ApiError::Internal("update returned no slot".into())),
        WriteOutcome::Queued(id) => Ok(queued(id)),
    }
}

async fn delete_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<SlotId>,
) -> Result<Response, ApiError> {
    match state.submit(SlotChange::Remove { id: slot_id }).await? {
        WriteOutcome::Applied(_) => Ok(StatusCode::NO_CONTENT.into_response()),
        WriteOutcome::Queued(id) => Ok(queued(id)),
    }
}

async fn check_conflicts(
    State(state): State<AppState>,
    Json(query): Json<ConflictQuery>,
) -> Result<Json<ConflictCheckBody>, ApiError> {
    if query.start_time >= query.end_time {
        return Err(ApiError::invalid("start_time must be before end_time"));
    }
    let conflicts = state.service.check_conflicts(&query).await?;
    Ok(Json(ConflictCheckBody {
        acceptable: conflicts.is_empty(),
        conflicts,
    }))
}

async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncOutcome>, ApiError> {
    let orchestrator = state.orchestrator()?;
    let outcome = orchestrator.sync(SyncTrigger::Manual).await?;
    Ok(Json(outcome))
}

async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncStatusBody>, ApiError> {
    let orchestrator = state.orchestrator()?;
    let sync_state = orchestrator.state();
    Ok(Json(SyncStatusBody {
        status: sync_state.status,
        last_sync_time: sync_state.last_sync_time,
        last_error: sync_state.last_error,
        pending_changes: sync_state.pending_changes.len(),
        online: orchestrator.is_online(),
    }))
}
