//! Wire types shared by the source hub server and its clients.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Default snapserver stream port.
pub const DEFAULT_SNAPCAST_PORT: u16 = 1704;

/// Operational state of one audio-source plugin.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Plugin is stopped; no process and no background tasks.
    #[default]
    Inactive,
    /// Plugin is running and waiting for a peer.
    ReadyToConnect,
    /// The client process is connected to a peer.
    Connected,
}

impl PluginState {
    pub const ALL: [PluginState; 3] = [
        PluginState::Inactive,
        PluginState::ReadyToConnect,
        PluginState::Connected,
    ];

    /// States reachable from `self` in one transition.
    pub fn allowed_next(self) -> &'static [PluginState] {
        match self {
            PluginState::Inactive => &[PluginState::ReadyToConnect],
            PluginState::ReadyToConnect => &[PluginState::Connected, PluginState::Inactive],
            PluginState::Connected => &[PluginState::ReadyToConnect, PluginState::Inactive],
        }
    }

    pub fn can_transition_to(self, next: PluginState) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PluginState::Inactive => "inactive",
            PluginState::ReadyToConnect => "ready_to_connect",
            PluginState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapserver found on the network or requested by host.
///
/// Identity is the `host` alone: two descriptors with the same host compare equal
/// regardless of name or port.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ServerDescriptor {
    /// Address used to reach the server (unique key).
    pub host: String,
    /// Display name.
    pub name: String,
    /// Stream port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_SNAPCAST_PORT
}

impl ServerDescriptor {
    pub fn new(host: impl Into<String>, name: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
            port,
        }
    }

    /// Descriptor for a host that was never discovered.
    pub fn synthesized(host: &str) -> Self {
        Self::new(host, format!("Snapserver ({host})"), DEFAULT_SNAPCAST_PORT)
    }
}

impl PartialEq for ServerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
    }
}

impl Eq for ServerDescriptor {}

impl Hash for ServerDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
    }
}

/// Full status snapshot of a plugin, published on every state change.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    /// Plugin/source name.
    pub source: String,
    /// Current state (corrected when the process is verified dead).
    pub plugin_state: PluginState,
    /// `true` while the plugin is started.
    pub is_active: bool,
    /// `true` when connected and the client process is alive.
    pub connected: bool,
    /// Connected server address.
    pub host: Option<String>,
    /// Connected server display name.
    pub device_name: Option<String>,
    /// Result of the last discovery pass.
    pub discovered_servers: Vec<ServerDescriptor>,
    /// Hosts refused until the plugin restarts.
    pub blacklisted_servers: Vec<String>,
    /// Whether auto-connect is currently enabled.
    pub auto_connect: bool,
    /// `true` when the client process is verified running.
    pub process_running: bool,
    /// Client process id.
    pub pid: Option<u32>,
    /// `true` while the snapserver control port link is up.
    pub control_linked: bool,
}

/// Result of a plugin command.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when a connect was refused because the host is blacklisted.
    #[serde(default, skip_serializing_if = "is_false")]
    pub blacklisted: bool,
    /// Set when the plugin is not started.
    #[serde(default, skip_serializing_if = "is_false")]
    pub inactive: bool,
    /// State the plugin was in when the command conflicted with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_conflict: Option<PluginState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ServerDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_servers: Option<Vec<String>>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Request body for `connect`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HostRequest {
    pub host: String,
}
