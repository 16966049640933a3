use std::sync::Arc;

use crate::advisor::controller::ConversationController;
use crate::advisor::store::SessionStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    /// One controller serves every session; it holds no per-session state.
    pub controller: Arc<ConversationController>,
}
