//! Shared application state.

use crate::events::EventBus;
use crate::plugin::registry::SourceRegistry;

/// State handed to every actix handler via `web::Data`.
pub struct AppState {
    /// Registered sources and the active-source arbiter.
    pub sources: SourceRegistry,
    /// Event bus for WebSocket subscribers.
    pub events: EventBus,
}

impl AppState {
    pub fn new(sources: SourceRegistry, events: EventBus) -> Self {
        Self { sources, events }
    }
}
