//! Conversation Controller — one `submit` per user turn.
//!
//! Flow: precondition checks → build prompts → one LLM call (with timeout) →
//!       classify reply → transition the session → return the outcome.
//!
//! The session is not touched until the LLM call has resolved, so dropping an
//! in-flight `submit` leaves it exactly as it was before the call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::advisor::prompts::{build, system_template};
use crate::advisor::schema::{parse_model_response, AdviceResult, MalformedPolicy, ModelResponse};
use crate::advisor::session::{ConversationSession, ErrorKind, Role};
use crate::llm_client::{LlmCollaborator, TransportError};

/// Default ceiling on a single LLM round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Which part of the session is sent to the model as "the conversation".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationMode {
    /// Only the text of the current `submit` call.
    #[default]
    LatestMessage,
    /// Every user and assistant turn so far, one `role: text` line each.
    Transcript,
}

impl FromStr for ConversationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "latest_message" => Ok(Self::LatestMessage),
            "transcript" => Ok(Self::Transcript),
            other => Err(format!(
                "unknown conversation mode '{other}' (expected 'latest' or 'transcript')"
            )),
        }
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestMessage => f.write_str("latest"),
            Self::Transcript => f.write_str("transcript"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub system_template: String,
    pub malformed_policy: MalformedPolicy,
    pub conversation_mode: ConversationMode,
    /// Maximum user turns per session. `None` lets the clarification loop run
    /// for as long as the caller keeps submitting.
    pub max_turns: Option<usize>,
    /// Ceiling on one `complete` call, transport retries included.
    pub request_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            system_template: system_template(&[]),
            malformed_policy: MalformedPolicy::default(),
            conversation_mode: ConversationMode::default(),
            max_turns: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Result of one `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Done(AdviceResult),
    Clarify(String),
    Error(ErrorKind),
}

pub struct ConversationController {
    llm: Arc<dyn LlmCollaborator>,
    options: ControllerOptions,
}

impl ConversationController {
    pub fn new(llm: Arc<dyn LlmCollaborator>, options: ControllerOptions) -> Self {
        Self { llm, options }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Answers one user turn. Exactly one LLM call is made unless the input is
    /// rejected up front; nothing is retried here.
    pub async fn submit(
        &self,
        session: &mut ConversationSession,
        user_text: &str,
    ) -> SessionOutcome {
        if let Err(kind) = self.check_preconditions(session) {
            return self.reject(session, kind);
        }
        if user_text.trim().is_empty() && session.turns().is_empty() {
            return self.reject(session, ErrorKind::EmptyInput);
        }

        let conversation = self.conversation_text(session, user_text);
        let prompts = build(&self.options.system_template, &conversation);
        debug!(
            session_id = %session.id(),
            mode = %self.options.conversation_mode,
            user_prompt_len = prompts.user.len(),
            "submitting turn to LLM"
        );

        let reply = tokio::time::timeout(
            self.options.request_timeout,
            self.llm.complete(&prompts.system, &prompts.user),
        )
        .await
        .unwrap_or_else(|_| Err(TransportError::timed_out(self.options.request_timeout)));

        session.record_user(user_text);

        let raw = match reply {
            Ok(raw) => raw,
            Err(err) => return self.fail(session, ErrorKind::Transport(err)),
        };

        match parse_model_response(&raw, self.options.malformed_policy) {
            Ok(ModelResponse::Clarify(request)) => {
                info!(session_id = %session.id(), "model asked for clarification");
                session.await_clarification(request.question.clone());
                SessionOutcome::Clarify(request.question)
            }
            Ok(ModelResponse::Advice(result)) => {
                info!(
                    session_id = %session.id(),
                    interests = result.interests.len(),
                    career_paths = result.mapping.len(),
                    "advice completed"
                );
                session.complete(result.clone(), raw.trim());
                SessionOutcome::Done(result)
            }
            Err(err) => self.fail(session, err.into()),
        }
    }

    /// Returns the session to a fresh state, keeping its id.
    pub fn reset(&self, session: &mut ConversationSession) {
        debug!(session_id = %session.id(), "session reset");
        session.reset();
    }

    fn check_preconditions(&self, session: &ConversationSession) -> Result<(), ErrorKind> {
        if session.status().is_closed() {
            return Err(ErrorKind::SessionClosed {
                status: session.status(),
            });
        }
        if let Some(max) = self.options.max_turns {
            if session.user_turn_count() >= max {
                return Err(ErrorKind::TurnLimitExceeded { max });
            }
        }
        Ok(())
    }

    fn conversation_text(&self, session: &ConversationSession, user_text: &str) -> String {
        match self.options.conversation_mode {
            ConversationMode::LatestMessage => user_text.to_string(),
            ConversationMode::Transcript => {
                let mut lines: Vec<String> = session
                    .turns()
                    .iter()
                    .filter(|t| t.role != Role::System)
                    .map(|t| format!("{}: {}", t.role, t.text))
                    .collect();
                lines.push(format!("{}: {user_text}", Role::User));
                lines.join("\n")
            }
        }
    }

    fn reject(&self, session: &mut ConversationSession, kind: ErrorKind) -> SessionOutcome {
        if kind.ends_session() {
            return self.fail(session, kind);
        }
        warn!(session_id = %session.id(), error = %kind, "submit rejected");
        SessionOutcome::Error(kind)
    }

    fn fail(&self, session: &mut ConversationSession, kind: ErrorKind) -> SessionOutcome {
        warn!(session_id = %session.id(), code = kind.code(), error = %kind, "session failed");
        session.fail(kind.clone());
        SessionOutcome::Error(kind)
    }
}
