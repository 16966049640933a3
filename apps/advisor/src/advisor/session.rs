//! Conversation session: the state one user's dialogue carries between
//! `submit` calls. Only the controller mutates it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::advisor::schema::{AdviceResult, ResponseError};
use crate::llm_client::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
            Role::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    AwaitingInput,
    AwaitingClarificationReply,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Completed and failed sessions accept no further input until reset.
    pub fn is_closed(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::AwaitingInput => "awaiting input",
            SessionStatus::AwaitingClarificationReply => "awaiting a clarification reply",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why a `submit` call did not produce advice or a question.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("model output is not valid JSON: {detail}")]
    MalformedResponse { detail: String },

    #[error("model output does not match the expected schema: {detail}")]
    SchemaViolation { detail: String },

    #[error("session reached its limit of {max} user turns")]
    TurnLimitExceeded { max: usize },

    #[error("session is {status} and must be reset before accepting input")]
    SessionClosed { status: SessionStatus },

    #[error("user text must not be empty when the session has no prior turns")]
    EmptyInput,
}

impl ErrorKind {
    /// Stable machine-readable name, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Transport(_) => "transport_error",
            ErrorKind::MalformedResponse { .. } => "malformed_response",
            ErrorKind::SchemaViolation { .. } => "schema_violation",
            ErrorKind::TurnLimitExceeded { .. } => "turn_limit_exceeded",
            ErrorKind::SessionClosed { .. } => "session_closed",
            ErrorKind::EmptyInput => "empty_input",
        }
    }

    /// Whether this error moves the session to `Failed`. Rejected input
    /// leaves the session as it was.
    pub fn ends_session(&self) -> bool {
        !matches!(
            self,
            ErrorKind::SessionClosed { .. } | ErrorKind::EmptyInput
        )
    }

    /// Whether `submit` refused the input before calling the model. The turn
    /// limit is refused up front but still fails the session.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ErrorKind::TurnLimitExceeded { .. }
                | ErrorKind::SessionClosed { .. }
                | ErrorKind::EmptyInput
        )
    }
}

impl From<ResponseError> for ErrorKind {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Malformed(detail) => ErrorKind::MalformedResponse { detail },
            ResponseError::Schema(detail) => ErrorKind::SchemaViolation { detail },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    turns: Vec<Turn>,
    status: SessionStatus,
    pending_question: Option<String>,
    result: Option<AdviceResult>,
    error: Option<ErrorKind>,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            turns: Vec::new(),
            status: SessionStatus::AwaitingInput,
            pending_question: None,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The open clarification question, while one is outstanding.
    pub fn pending_question(&self) -> Option<&str> {
        self.pending_question.as_deref()
    }

    pub fn result(&self) -> Option<&AdviceResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        self.error.as_ref()
    }

    pub fn user_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::User).count()
    }

    /// Clears turns and outcome but keeps the session id.
    pub(crate) fn reset(&mut self) {
        let id = self.id;
        *self = Self::new();
        self.id = id;
    }

    pub(crate) fn record_user(&mut self, text: &str) {
        self.push(Role::User, text);
    }

    pub(crate) fn await_clarification(&mut self, question: String) {
        self.push(Role::Assistant, &question);
        self.status = SessionStatus::AwaitingClarificationReply;
        self.pending_question = Some(question);
    }

    pub(crate) fn complete(&mut self, result: AdviceResult, raw_reply: &str) {
        self.push(Role::Assistant, raw_reply);
        self.status = SessionStatus::Completed;
        self.pending_question = None;
        self.result = Some(result);
    }

    pub(crate) fn fail(&mut self, error: ErrorKind) {
        self.push(Role::System, &error.to_string());
        self.status = SessionStatus::Failed;
        self.pending_question = None;
        self.error = Some(error);
    }

    fn push(&mut self, role: Role, text: &str) {
        self.turns.push(Turn {
            role,
            text: text.to_string(),
            at: Utc::now(),
        });
    }
}
