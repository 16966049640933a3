//! Axum route handlers for the chat API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::advisor::controller::SessionOutcome;
use crate::advisor::schema::AdviceResult;
use crate::advisor::session::ConversationSession;
use crate::advisor::store::SharedSession;
use crate::errors::AppError;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

/// `SessionOutcome` as it goes over the wire.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeView {
    Done { result: AdviceResult },
    Clarify { question: String },
    Error { kind: String, message: String },
}

impl From<SessionOutcome> for OutcomeView {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Done(result) => OutcomeView::Done { result },
            SessionOutcome::Clarify(question) => OutcomeView::Clarify { question },
            SessionOutcome::Error(kind) => OutcomeView::Error {
                kind: kind.code().to_string(),
                message: kind.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub outcome: OutcomeView,
    pub session: ConversationSession,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<ConversationSession>) {
    let session = state.sessions.create().await;
    info!(session_id = %session.id(), "session created");
    (StatusCode::CREATED, Json(session))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationSession>, AppError> {
    let shared = find_session(&state, id).await?;
    let session = shared.lock().await;
    Ok(Json(session.clone()))
}

/// POST /api/v1/sessions/:id/messages
///
/// Runs one controller turn. Transport, malformed and schema failures come back
/// as a 200 with an `error` outcome because they are the session's new state.
/// Input refused before the model is called is an HTTP error: 400 for empty
/// text, 409 for a closed session or the turn limit.
pub async fn handle_submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    let shared = find_session(&state, id).await?;
    // Held across the LLM call: one outstanding submit per session.
    let mut session = shared.lock().await;

    let outcome = state.controller.submit(&mut session, &request.text).await;
    if let SessionOutcome::Error(kind) = &outcome {
        if kind.is_rejection() {
            return Err(AppError::from_rejection(kind));
        }
    }

    Ok(Json(SubmitResponse {
        outcome: outcome.into(),
        session: session.clone(),
    }))
}

/// POST /api/v1/sessions/:id/reset
pub async fn handle_reset_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationSession>, AppError> {
    let shared = find_session(&state, id).await?;
    let mut session = shared.lock().await;
    state.controller.reset(&mut session);
    Ok(Json(session.clone()))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.sessions.remove(id).await {
        return Err(AppError::NotFound(format!("Session {id} not found")));
    }
    info!(session_id = %id, "session deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SharedSession, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}
