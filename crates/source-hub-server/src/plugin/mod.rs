//! Audio-source plugin contract.
//!
//! Every source (snapclient today) is driven through [`AudioSourcePlugin`], so the
//! registry and HTTP layer never see plugin internals.

pub mod registry;
pub mod state_machine;

use async_trait::async_trait;
use serde::Deserialize;
use source_hub_types::{CommandResponse, PluginStatus};
use utoipa::ToSchema;

/// Commands accepted by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum PluginCommand {
    /// Run one discovery pass and return the servers found.
    Discover,
    /// Connect to a server by host.
    Connect { host: String },
    /// User-initiated disconnect; blacklists the current host.
    Disconnect,
    /// Restart the client process against the current host.
    Restart,
    /// Play a short tone on the output device; requires a running client.
    TestAudio,
}

impl PluginCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PluginCommand::Discover => "discover",
            PluginCommand::Connect { .. } => "connect",
            PluginCommand::Disconnect => "disconnect",
            PluginCommand::Restart => "restart",
            PluginCommand::TestAudio => "test_audio",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin worker is gone (mailbox closed or reply dropped).
    #[error("plugin {0} unavailable")]
    Unavailable(String),
    #[error("plugin {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },
}

/// Lifecycle and command surface of one audio source.
#[async_trait]
pub trait AudioSourcePlugin: Send + Sync {
    /// Stable source name used in routes and events.
    fn name(&self) -> &str;

    /// Start background tasks and move to `ready_to_connect`.
    async fn start(&self) -> Result<(), PluginError>;

    /// Stop the client process and all background tasks.
    async fn stop(&self) -> Result<(), PluginError>;

    /// Current status snapshot.
    async fn status(&self) -> Result<PluginStatus, PluginError>;

    /// Execute a command.
    async fn command(&self, command: PluginCommand) -> Result<CommandResponse, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let cmd: PluginCommand = serde_json::from_str(r#"{"command":"discover"}"#).unwrap();
        assert_eq!(cmd, PluginCommand::Discover);

        let cmd: PluginCommand =
            serde_json::from_str(r#"{"command":"connect","data":{"host":"192.168.1.50"}}"#)
                .unwrap();
        assert_eq!(
            cmd,
            PluginCommand::Connect {
                host: "192.168.1.50".to_string()
            }
        );
        assert_eq!(cmd.name(), "connect");
    }

    #[test]
    fn test_audio_uses_snake_case_tag() {
        let cmd: PluginCommand = serde_json::from_str(r#"{"command":"test_audio"}"#).unwrap();
        assert_eq!(cmd, PluginCommand::TestAudio);
        assert_eq!(cmd.name(), "test_audio");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = serde_json::from_str::<PluginCommand>(r#"{"command":"accept_request"}"#);
        assert!(err.is_err());
    }
}
