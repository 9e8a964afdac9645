//! JSON API for the turn engine and nurse escalation queue.
//!
//! - `POST /api/v1/turns`: run one patient turn
//! - `POST /api/v1/escalations/{id}/assign`: claim a task for an operator
//! - `POST /api/v1/escalations/{id}/resolve`: close a task with an outcome
//! - `GET  /api/v1/escalations/breached`: unresolved tasks past their deadline
//!
//! Error bodies echo the request's `x-correlation-id`, or a generated one.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use carepath_agent::escalation::SlaView;
use carepath_agent::runtime::{TurnEngine, TurnOutcome, TurnRequest};
use carepath_core::domain::escalation::{
    AssignmentOutcome, EscalationTask, EscalationTaskId, ResolutionOutcome,
};
use carepath_core::domain::interaction::InteractionId;
use carepath_core::domain::protocol::{EpisodeId, PatientId};
use carepath_core::errors::{ApplicationError, InterfaceError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<TurnEngine>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub patient_id: String,
    pub episode_id: String,
    pub text: String,
    pub condition_code: Option<String>,
    pub interaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub outcome: Option<String>,
    #[serde(default)]
    pub notes: String,
    pub resolver: String,
}

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub task: EscalationTask,
    /// `assigned`, or `already_assigned` when someone else holds the task.
    pub result: &'static str,
    pub assignee: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %self.0.correlation_id(),
                error = %self.0,
                "request rejected"
            );
        }

        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>, correlation_id: &str) -> ApiError {
    ApiError(InterfaceError::BadRequest {
        message: message.into(),
        correlation_id: correlation_id.to_string(),
    })
}

fn mapped(correlation_id: &str) -> impl FnOnce(ApplicationError) -> ApiError + '_ {
    move |error| ApiError(error.into_interface(correlation_id))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn router(engine: Arc<TurnEngine>) -> Router {
    Router::new()
        .route("/api/v1/turns", post(handle_turn))
        .route("/api/v1/escalations/breached", get(list_breached))
        .route("/api/v1/escalations/{id}/assign", post(assign_escalation))
        .route("/api/v1/escalations/{id}/resolve", post(resolve_escalation))
        .with_state(ApiState { engine })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_turn(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let correlation_id = correlation_id(&headers);
    for (field, value) in
        [("patient_id", &body.patient_id), ("episode_id", &body.episode_id), ("text", &body.text)]
    {
        if value.trim().is_empty() {
            return Err(bad_request(format!("`{field}` is required"), &correlation_id));
        }
    }

    let request = TurnRequest {
        patient_id: PatientId(body.patient_id.trim().to_string()),
        episode_id: EpisodeId(body.episode_id.trim().to_string()),
        text: body.text,
        condition_code: body.condition_code,
        interaction_id: body.interaction_id.map(InteractionId),
        correlation_id: Some(correlation_id.clone()),
    };

    let outcome = state.engine.handle_turn(request).await.map_err(mapped(&correlation_id))?;
    Ok(Json(outcome))
}

async fn assign_escalation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AssignBody>,
) -> Result<Json<AssignResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    if body.operator.trim().is_empty() {
        return Err(bad_request("`operator` is required", &correlation_id));
    }

    let (task, outcome) = state
        .engine
        .escalations()
        .assign(&EscalationTaskId(id), &body.operator, Utc::now())
        .await
        .map_err(mapped(&correlation_id))?;

    let (result, assignee) = match outcome {
        AssignmentOutcome::Assigned => ("assigned", task.assigned_to.clone()),
        AssignmentOutcome::AlreadyAssigned { assignee } => ("already_assigned", Some(assignee)),
    };
    Ok(Json(AssignResponse { task, result, assignee }))
}

async fn resolve_escalation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ResolveBody>,
) -> Result<Json<EscalationTask>, ApiError> {
    let correlation_id = correlation_id(&headers);
    if body.resolver.trim().is_empty() {
        return Err(bad_request("`resolver` is required", &correlation_id));
    }
    let outcome = match body.outcome.as_deref() {
        None => None,
        Some(label) => match ResolutionOutcome::parse(label) {
            Some(outcome) => Some(outcome),
            None => {
                return Err(bad_request(format!("unknown resolution outcome `{label}`"), &correlation_id))
            }
        },
    };

    let task = state
        .engine
        .escalations()
        .resolve(&EscalationTaskId(id), outcome, &body.notes, &body.resolver, Utc::now())
        .await
        .map_err(mapped(&correlation_id))?;
    Ok(Json(task))
}

async fn list_breached(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SlaView>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let now = Utc::now();
    let breached = state.engine.escalations().list_breached(now).await.map_err(mapped(&correlation_id))?;
    Ok(Json(breached.iter().map(|task| SlaView::of(task, now)).collect()))
}
