//! Plugin lifecycle state machine.
//!
//! `inactive -> ready_to_connect -> connected` and back, with the connected server
//! tracked alongside the state.

use source_hub_types::{PluginState, ServerDescriptor};

/// Result of a state change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed (or a connected server was re-confirmed); observers must be told.
    Applied { from: PluginState, to: PluginState },
    /// Requested state equals the current one; nothing to publish.
    Unchanged,
    /// Not an allowed transition; state untouched.
    Rejected { from: PluginState, to: PluginState },
}

impl Transition {
    #[cfg(test)]
    pub fn is_applied(self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    #[cfg(test)]
    pub fn is_rejected(self) -> bool {
        matches!(self, Transition::Rejected { .. })
    }
}

#[derive(Debug, Default)]
pub struct StateMachine {
    state: PluginState,
    server: Option<ServerDescriptor>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Server recorded on entering `connected`.
    pub fn server(&self) -> Option<&ServerDescriptor> {
        self.server.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state != PluginState::Inactive
    }

    /// Request a transition to `next`.
    ///
    /// `server` is recorded when entering (or re-entering) `connected` and ignored
    /// otherwise. Leaving `connected` always clears the recorded server.
    pub fn set_state(&mut self, next: PluginState, server: Option<ServerDescriptor>) -> Transition {
        let from = self.state;
        if from == next && next != PluginState::Connected {
            return Transition::Unchanged;
        }
        let reconfirm = from == PluginState::Connected && next == PluginState::Connected;
        if !reconfirm && !from.can_transition_to(next) {
            tracing::warn!(from = %from, to = %next, "invalid plugin state transition");
            return Transition::Rejected { from, to: next };
        }

        self.state = next;
        if next == PluginState::Connected {
            if server.is_some() {
                self.server = server;
            }
        } else {
            self.server = None;
        }
        tracing::info!(from = %from, to = %next, "plugin state changed");
        Transition::Applied { from, to: next }
    }
}
