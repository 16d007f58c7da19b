//! Connection decisions for the snapclient plugin.
//!
//! Owns the client process, the current server, the blacklist, and the
//! auto-connect policy.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use source_hub_types::ServerDescriptor;

use super::process::{ClientProcess, ProcessError, StopOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("server {0} is blacklisted")]
    Blacklisted(String),
    #[error("no current server")]
    NoServer,
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// What an auto-connect pass did.
#[derive(Debug)]
pub enum AutoConnectOutcome {
    Disabled,
    AlreadyConnected,
    GuardActive,
    NoCandidate,
    Connected(ServerDescriptor),
    Failed {
        server: ServerDescriptor,
        error: ConnectError,
    },
}

pub struct ConnectionReconciler {
    process: Box<dyn ClientProcess>,
    current_server: Option<ServerDescriptor>,
    blacklist: BTreeSet<String>,
    auto_connect: bool,
    auto_connect_default: bool,
    guard_window: Duration,
    guard_until: Option<Instant>,
}

impl ConnectionReconciler {
    pub fn new(process: Box<dyn ClientProcess>, auto_connect: bool, guard_window: Duration) -> Self {
        Self {
            process,
            current_server: None,
            blacklist: BTreeSet::new(),
            auto_connect,
            auto_connect_default: auto_connect,
            guard_window,
            guard_until: None,
        }
    }

    /// Forget session state: blacklist, current server, guard, auto-connect override.
    pub fn reset(&mut self) {
        self.current_server = None;
        self.blacklist.clear();
        self.auto_connect = self.auto_connect_default;
        self.guard_until = None;
    }

    pub fn process(&self) -> &dyn ClientProcess {
        &*self.process
    }

    pub fn process_mut(&mut self) -> &mut dyn ClientProcess {
        self.process.as_mut()
    }

    pub fn current_server(&self) -> Option<&ServerDescriptor> {
        self.current_server.as_ref()
    }

    pub fn clear_current_server(&mut self) {
        self.current_server = None;
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    /// Turn auto-connect off until the next `reset`.
    pub fn suspend_auto_connect(&mut self) {
        if self.auto_connect {
            tracing::info!("auto-connect suspended until the plugin restarts");
        }
        self.auto_connect = false;
    }

    pub fn is_blacklisted(&self, host: &str) -> bool {
        self.blacklist.contains(host)
    }

    pub fn blacklisted(&self) -> Vec<String> {
        self.blacklist.iter().cloned().collect()
    }

    /// Whether the reconnect guard is still armed. Clears it once elapsed.
    pub fn guard_active(&mut self) -> bool {
        self.guard_active_at(Instant::now())
    }

    fn guard_active_at(&mut self, now: Instant) -> bool {
        match self.guard_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.guard_until = None;
                false
            }
            None => false,
        }
    }

    fn arm_guard(&mut self) {
        self.guard_until = Some(Instant::now() + self.guard_window);
    }

    /// First server not on the blacklist.
    pub fn select_candidate<'a>(&self, servers: &'a [ServerDescriptor]) -> Option<&'a ServerDescriptor> {
        servers.iter().find(|server| !self.is_blacklisted(&server.host))
    }

    pub async fn handle_discovered_servers(&mut self, servers: &[ServerDescriptor]) -> AutoConnectOutcome {
        if !self.auto_connect {
            return AutoConnectOutcome::Disabled;
        }
        if self.current_server.is_some() {
            return AutoConnectOutcome::AlreadyConnected;
        }
        if self.guard_active() {
            return AutoConnectOutcome::GuardActive;
        }
        let Some(candidate) = self.select_candidate(servers).cloned() else {
            return AutoConnectOutcome::NoCandidate;
        };
        tracing::info!(host = %candidate.host, name = %candidate.name, "auto-connecting to snapserver");
        match self.connect(candidate.clone()).await {
            Ok(_) => AutoConnectOutcome::Connected(candidate),
            Err(error) => AutoConnectOutcome::Failed {
                server: candidate,
                error,
            },
        }
    }

    /// Start the client against `server`. Arms the reconnect guard.
    pub async fn connect(&mut self, server: ServerDescriptor) -> Result<u32, ConnectError> {
        if self.is_blacklisted(&server.host) {
            return Err(ConnectError::Blacklisted(server.host));
        }
        self.arm_guard();
        match self.process.start(&server.host, server.port).await {
            Ok(pid) => {
                self.current_server = Some(server);
                Ok(pid)
            }
            Err(e) => {
                self.current_server = None;
                Err(e.into())
            }
        }
    }

    /// Stop the client without touching the blacklist.
    pub async fn disconnect(&mut self) -> StopOutcome {
        let outcome = self.process.stop().await;
        self.current_server = None;
        outcome
    }

    /// User-initiated disconnect: blacklists the current host and disables auto-connect.
    pub async fn disconnect_by_user(&mut self) -> (Option<ServerDescriptor>, StopOutcome) {
        let server = self.current_server.clone();
        if let Some(server) = server.as_ref() {
            tracing::info!(host = %server.host, "blacklisting snapserver after user disconnect");
            self.blacklist.insert(server.host.clone());
        }
        self.auto_connect = false;
        let outcome = self.disconnect().await;
        (server, outcome)
    }

    /// Restart the client against the current server.
    pub async fn restart(&mut self) -> Result<u32, ConnectError> {
        let server = self.current_server.clone().ok_or(ConnectError::NoServer)?;
        self.process.stop().await;
        self.current_server = None;
        self.connect(server).await
    }
}
