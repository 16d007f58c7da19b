//! Snapclient plugin core.
//!
//! Single-owner state for one snapclient source: the state machine, the connection
//! reconciler, and the last discovery result. Every state change goes through
//! [`SnapclientCore::transition_to`], which publishes the resulting status.

use std::time::Duration;

use source_hub_types::{CommandResponse, PluginState, PluginStatus, ServerDescriptor};

use super::connection::{AutoConnectOutcome, ConnectError, ConnectionReconciler};
use super::control::{ControlEvent, ControlLink};
use super::discovery::ServerBrowser;
use super::monitor::probe_server;
use super::process::ClientProcess;
use super::tone::TonePlayer;
use crate::config::SnapclientSettings;
use crate::events::EventBus;
use crate::plugin::state_machine::{StateMachine, Transition};
use crate::plugin::{PluginCommand, PluginError};

const STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SnapclientError {
    #[error("state transition {from} -> {to} rejected")]
    InvalidTransition { from: PluginState, to: PluginState },
}

pub struct SnapclientCore {
    name: String,
    settings: SnapclientSettings,
    machine: StateMachine,
    reconciler: ConnectionReconciler,
    browser: Box<dyn ServerBrowser>,
    discovered: Vec<ServerDescriptor>,
    control_link: Option<String>,
    tone: TonePlayer,
    events: EventBus,
    stop_grace: Duration,
}

impl SnapclientCore {
    pub fn new(
        name: impl Into<String>,
        settings: SnapclientSettings,
        process: Box<dyn ClientProcess>,
        browser: Box<dyn ServerBrowser>,
        events: EventBus,
    ) -> Self {
        let reconciler =
            ConnectionReconciler::new(process, settings.auto_connect, settings.reconnect_guard);
        let tone = TonePlayer::new(settings.test_tone_command.clone(), settings.alsa_device.clone());
        Self {
            name: name.into(),
            settings,
            machine: StateMachine::new(),
            reconciler,
            browser,
            discovered: Vec::new(),
            control_link: None,
            tone,
            events,
            stop_grace: STOP_GRACE,
        }
    }

    /// Pause after a full stop so OS-level teardown settles before a restart.
    #[cfg(test)]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SnapclientSettings {
        &self.settings
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    pub fn is_active(&self) -> bool {
        self.machine.is_active()
    }

    pub fn state(&self) -> PluginState {
        self.machine.state()
    }

    /// Host of the server the state machine is connected to.
    pub fn connected_host(&self) -> Option<String> {
        if self.machine.state() != PluginState::Connected {
            return None;
        }
        self.machine.server().map(|s| s.host.clone())
    }

    /// The only path that changes plugin state; applied transitions are published.
    pub async fn transition_to(
        &mut self,
        next: PluginState,
        server: Option<ServerDescriptor>,
    ) -> Result<Transition, SnapclientError> {
        let transition = self.machine.set_state(next, server);
        if matches!(transition, Transition::Applied { .. }) && next != PluginState::Connected {
            self.control_link = None;
        }
        match transition {
            Transition::Applied { .. } => self.publish_status().await,
            Transition::Unchanged => {}
            Transition::Rejected { from, to } => {
                return Err(SnapclientError::InvalidTransition { from, to });
            }
        }
        Ok(transition)
    }

    async fn publish_status(&mut self) {
        let status = self.status().await;
        self.events.plugin_status(status);
    }

    /// Status snapshot, corrected for a dead process without touching the state machine.
    pub async fn status(&mut self) -> PluginStatus {
        let running = self.reconciler.process_mut().is_running().await;
        let state = self.machine.state();
        let connected = state == PluginState::Connected && running;
        let plugin_state = if state == PluginState::Connected && !running {
            PluginState::ReadyToConnect
        } else {
            state
        };
        let server = if connected { self.machine.server() } else { None };
        PluginStatus {
            source: self.name.clone(),
            plugin_state,
            is_active: self.machine.is_active(),
            connected,
            host: server.map(|s| s.host.clone()),
            device_name: server.map(|s| s.name.clone()),
            discovered_servers: self.discovered.clone(),
            blacklisted_servers: self.reconciler.blacklisted(),
            auto_connect: self.reconciler.auto_connect(),
            process_running: running,
            pid: if running { self.reconciler.process().pid() } else { None },
            control_linked: connected
                && server.is_some_and(|s| self.control_link.as_deref() == Some(s.host.as_str())),
        }
    }

    pub async fn start(&mut self) -> Result<(), PluginError> {
        if self.machine.is_active() {
            return Ok(());
        }
        tracing::info!(source = %self.name, "starting snapclient plugin");
        if !self.reconciler.process().check_executable() {
            return Err(PluginError::StartFailed {
                name: self.name.clone(),
                reason: format!(
                    "executable {} is missing or not executable",
                    self.settings.executable_path.display()
                ),
            });
        }
        self.reconciler.reset();
        self.discovered.clear();
        self.transition_to(PluginState::ReadyToConnect, None)
            .await
            .map_err(|e| PluginError::StartFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        if self.settings.auto_discover {
            if let Err(e) = self.run_discovery(true).await {
                tracing::warn!(source = %self.name, error = %e, "initial discovery failed");
            }
        }
        Ok(())
    }

    /// Stop the client process and forget session state. Background loops must already
    /// be stopped by the owner.
    pub async fn stop(&mut self) {
        tracing::info!(source = %self.name, "stopping snapclient plugin");
        let outcome = self.reconciler.disconnect().await;
        tracing::debug!(outcome = ?outcome, "snapclient process stopped");
        self.reconciler.reset();
        self.discovered.clear();
        self.control_link = None;
        if self.machine.is_active() {
            if let Err(e) = self.transition_to(PluginState::Inactive, None).await {
                tracing::error!(source = %self.name, error = %e, "failed to deactivate");
            }
        }
    }

    /// Reconcile process liveness against the state machine.
    pub async fn monitor_tick(&mut self) -> Result<(), SnapclientError> {
        if !self.machine.is_active() {
            return Ok(());
        }
        if self.reconcile_dead_process().await? {
            return Ok(());
        }
        let running = self.reconciler.process_mut().is_running().await;
        let state = self.machine.state();
        if state != PluginState::Connected && running {
            tracing::warn!(
                pid = ?self.reconciler.process().pid(),
                state = %state,
                "snapclient running while not connected; stopping it"
            );
            self.reconciler.disconnect().await;
            if self.machine.state() != PluginState::ReadyToConnect {
                self.transition_to(PluginState::ReadyToConnect, None).await?;
            }
        }
        Ok(())
    }

    /// Move a `Connected` plugin whose process died back to `ReadyToConnect`.
    ///
    /// Auto-connect stays off afterwards until the plugin is restarted; the host is
    /// not blacklisted. Returns whether a correction was made.
    async fn reconcile_dead_process(&mut self) -> Result<bool, SnapclientError> {
        if self.machine.state() != PluginState::Connected {
            return Ok(false);
        }
        if self.reconciler.process_mut().is_running().await {
            return Ok(false);
        }
        tracing::warn!(
            host = ?self.machine.server().map(|s| s.host.as_str()),
            "snapclient process died; returning to ready_to_connect"
        );
        self.reconciler.clear_current_server();
        self.reconciler.suspend_auto_connect();
        self.transition_to(PluginState::ReadyToConnect, None).await?;
        Ok(true)
    }

    /// Apply a control-port link change for the currently connected host.
    ///
    /// Losing an established link disconnects the same way a failed health check
    /// does: the host is not blacklisted.
    pub async fn handle_control_event(&mut self, event: ControlEvent) -> Result<(), SnapclientError> {
        if self.connected_host().as_deref() != Some(event.host.as_str()) {
            tracing::debug!(host = %event.host, "control event for a stale host ignored");
            return Ok(());
        }
        match event.link {
            ControlLink::Up => {
                if self.control_link.as_deref() != Some(event.host.as_str()) {
                    self.control_link = Some(event.host);
                    self.publish_status().await;
                }
            }
            ControlLink::Lost(reason) => {
                tracing::warn!(host = %event.host, reason = %reason, "control link lost; disconnecting");
                self.reconciler.disconnect().await;
                self.transition_to(PluginState::ReadyToConnect, None).await?;
            }
        }
        Ok(())
    }

    /// Peer health check while connected; discovery and auto-connect otherwise.
    pub async fn discovery_tick(&mut self) -> Result<(), SnapclientError> {
        if !self.machine.is_active() {
            return Ok(());
        }
        if self.reconciler.guard_active() {
            tracing::debug!("reconnect guard active; skipping discovery");
            return Ok(());
        }
        if self.machine.state() == PluginState::Connected {
            let Some(server) = self.machine.server().cloned() else {
                return Ok(());
            };
            let blacklisted = self.reconciler.is_blacklisted(&server.host);
            let reachable = !blacklisted
                && (!self.settings.health_check
                    || probe_server(&server, self.settings.health_check_timeout).await);
            if !reachable {
                tracing::warn!(
                    host = %server.host,
                    blacklisted,
                    "snapserver unavailable; disconnecting"
                );
                self.reconciler.disconnect().await;
                self.transition_to(PluginState::ReadyToConnect, None).await?;
            }
            return Ok(());
        }
        if self.settings.auto_discover {
            self.run_discovery(true).await?;
        }
        Ok(())
    }

    /// Replace the discovered list with a fresh pass, then optionally auto-connect.
    async fn run_discovery(
        &mut self,
        auto_connect: bool,
    ) -> Result<Vec<ServerDescriptor>, SnapclientError> {
        let found = self.browser.discover().await;
        let servers: Vec<ServerDescriptor> = found
            .into_iter()
            .filter(|server| !self.reconciler.is_blacklisted(&server.host))
            .collect();
        let changed = !same_servers(&servers, &self.discovered);
        self.discovered = servers.clone();
        if changed {
            tracing::info!(count = servers.len(), "discovered snapservers changed");
            self.publish_status().await;
        }

        if auto_connect && self.machine.state() == PluginState::ReadyToConnect {
            match self.reconciler.handle_discovered_servers(&servers).await {
                AutoConnectOutcome::Connected(server) => {
                    self.transition_to(PluginState::Connected, Some(server)).await?;
                }
                AutoConnectOutcome::Failed { server, error } => {
                    tracing::warn!(host = %server.host, error = %error, "auto-connect failed");
                }
                outcome => tracing::debug!(outcome = ?outcome, "auto-connect skipped"),
            }
        }
        Ok(servers)
    }

    pub async fn handle_command(&mut self, command: PluginCommand) -> CommandResponse {
        if !self.machine.is_active() {
            tracing::warn!(command = command.name(), "plugin inactive; command ignored");
            let mut response = CommandResponse::failed("plugin inactive; command ignored");
            response.inactive = true;
            return response;
        }
        tracing::info!(command = command.name(), "handling snapclient command");
        match command {
            PluginCommand::Discover => self.handle_discover().await,
            PluginCommand::Connect { host } => self.handle_connect(&host).await,
            PluginCommand::Disconnect => self.handle_disconnect().await,
            PluginCommand::Restart => self.handle_restart().await,
            PluginCommand::TestAudio => self.handle_test_audio().await,
        }
    }

    async fn handle_discover(&mut self) -> CommandResponse {
        match self.run_discovery(false).await {
            Ok(servers) => {
                let mut response = CommandResponse::ok(format!("{} server(s) found", servers.len()));
                response.servers = Some(servers);
                response
            }
            Err(e) => CommandResponse::failed(e.to_string()),
        }
    }

    async fn handle_connect(&mut self, host: &str) -> CommandResponse {
        let host = host.trim();
        if host.is_empty() {
            return CommandResponse::failed("host is required");
        }
        if self.reconciler.is_blacklisted(host) {
            let mut response = CommandResponse::failed(format!(
                "server {host} was disconnected manually; switch sources to reconnect"
            ));
            response.blacklisted = true;
            return response;
        }
        if let Err(e) = self.reconcile_dead_process().await {
            return CommandResponse::failed(e.to_string());
        }
        let state = self.machine.state();
        if state != PluginState::ReadyToConnect {
            let mut response = CommandResponse::failed(format!("cannot connect while {state}"));
            response.state_conflict = Some(state);
            return response;
        }

        let server = match self.discovered.iter().find(|s| s.host == host) {
            Some(server) => server.clone(),
            None => {
                tracing::info!(host = %host, "connecting to undiscovered host");
                ServerDescriptor::synthesized(host)
            }
        };
        match self.reconciler.connect(server.clone()).await {
            Ok(_) => {
                if let Err(e) = self.transition_to(PluginState::Connected, Some(server.clone())).await {
                    return CommandResponse::failed(e.to_string());
                }
                let mut response = CommandResponse::ok(format!("connected to {}", server.name));
                response.server = Some(server);
                response
            }
            Err(e) => {
                tracing::error!(host = %server.host, error = %e, "connect failed");
                let mut response =
                    CommandResponse::failed(format!("failed to connect to {}: {e}", server.name));
                response.blacklisted = matches!(e, ConnectError::Blacklisted(_));
                response
            }
        }
    }

    async fn handle_disconnect(&mut self) -> CommandResponse {
        if let Err(e) = self.reconcile_dead_process().await {
            return CommandResponse::failed(e.to_string());
        }
        if self.machine.state() != PluginState::Connected && self.reconciler.current_server().is_none() {
            return CommandResponse::ok("already disconnected");
        }
        let (server, _) = self.reconciler.disconnect_by_user().await;
        if let Err(e) = self.transition_to(PluginState::ReadyToConnect, None).await {
            return CommandResponse::failed(e.to_string());
        }
        let name = server.map(|s| s.name).unwrap_or_else(|| "unknown".to_string());
        let mut response = CommandResponse::ok(format!("disconnected from {name}"));
        response.blacklisted_servers = Some(self.reconciler.blacklisted());
        response
    }

    async fn handle_restart(&mut self) -> CommandResponse {
        let Some(server) = self.reconciler.current_server().cloned() else {
            let state = self.machine.state();
            let mut response = CommandResponse::failed("no server to restart against");
            response.state_conflict = Some(state);
            return response;
        };
        match self.reconciler.restart().await {
            Ok(_) => match self.transition_to(PluginState::Connected, Some(server.clone())).await {
                Ok(_) => {
                    let mut response = CommandResponse::ok("snapclient restarted");
                    response.server = Some(server);
                    response
                }
                Err(e) => CommandResponse::failed(e.to_string()),
            },
            Err(e) => {
                tracing::error!(host = %server.host, error = %e, "restart failed");
                if let Err(e) = self.transition_to(PluginState::ReadyToConnect, None).await {
                    tracing::error!(error = %e, "restart fallback failed");
                }
                CommandResponse::failed(format!("restart failed: {e}"))
            }
        }
    }

    async fn handle_test_audio(&mut self) -> CommandResponse {
        if !self.reconciler.process_mut().is_running().await {
            return CommandResponse::failed("snapclient is not running");
        }
        match self.tone.play().await {
            Ok(()) => CommandResponse::ok("test tone played"),
            Err(e) => {
                tracing::warn!(error = %e, "test tone failed");
                CommandResponse::failed(format!("test tone failed: {e}"))
            }
        }
    }
}

fn same_servers(a: &[ServerDescriptor], b: &[ServerDescriptor]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.host == y.host && x.name == y.name && x.port == y.port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HubEvent;
    use crate::snapclient::process::write_script;
    use crate::snapclient::testing::{FakeBrowser, FakeProcess, server};

    fn settings() -> SnapclientSettings {
        SnapclientSettings {
            health_check: false,
            ..SnapclientSettings::default()
        }
    }

    fn core_with(
        settings: SnapclientSettings,
        fake: &FakeProcess,
        browser: &FakeBrowser,
        events: &EventBus,
    ) -> SnapclientCore {
        SnapclientCore::new(
            "snapclient",
            settings,
            Box::new(fake.clone()),
            Box::new(browser.clone()),
            events.clone(),
        )
        .with_stop_grace(Duration::ZERO)
    }

    fn manual_settings() -> SnapclientSettings {
        SnapclientSettings {
            auto_connect: false,
            auto_discover: false,
            ..settings()
        }
    }

    #[actix_web::test]
    async fn start_auto_connects_to_first_discovered_server() {
        let fake = FakeProcess::new();
        let browser = FakeBrowser::with(vec![server("10.0.0.1", "alpha"), server("10.0.0.2", "beta")]);
        let events = EventBus::new();
        let mut core = core_with(settings(), &fake, &browser, &events);

        core.start().await.unwrap();
        assert_eq!(core.state(), PluginState::Connected);
        assert_eq!(fake.events(), vec!["start:10.0.0.1"]);

        let status = core.status().await;
        assert!(status.connected);
        assert_eq!(status.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(status.device_name.as_deref(), Some("alpha"));
        assert_eq!(status.discovered_servers.len(), 2);
    }

    #[actix_web::test]
    async fn start_fails_without_executable() {
        let fake = FakeProcess::new();
        fake.set_executable_ok(false);
        let mut core = core_with(settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        assert!(matches!(core.start().await, Err(PluginError::StartFailed { .. })));
        assert_eq!(core.state(), PluginState::Inactive);
    }

    #[actix_web::test]
    async fn transitions_publish_status() {
        let fake = FakeProcess::new();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &events);

        core.start().await.unwrap();
        match rx.try_recv().unwrap() {
            HubEvent::PluginStatus(status) => {
                assert_eq!(status.plugin_state, PluginState::ReadyToConnect);
                assert!(status.is_active);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Repeating the current state publishes nothing.
        core.transition_to(PluginState::ReadyToConnect, None).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn status_corrects_dead_process_without_mutating_state() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        assert_eq!(core.state(), PluginState::Connected);

        fake.crash();
        let status = core.status().await;
        assert!(!status.connected);
        assert!(!status.process_running);
        assert_eq!(status.plugin_state, PluginState::ReadyToConnect);
        assert!(status.host.is_none());
        assert!(status.pid.is_none());
        assert_eq!(core.state(), PluginState::Connected);
    }

    #[actix_web::test]
    async fn monitor_returns_to_ready_when_process_dies() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;

        fake.crash();
        core.monitor_tick().await.unwrap();
        assert_eq!(core.state(), PluginState::ReadyToConnect);
        assert!(core.reconciler.current_server().is_none());
        // No automatic retry.
        assert_eq!(fake.events(), vec!["start:10.0.0.1"]);
    }

    #[actix_web::test]
    async fn process_death_suspends_auto_connect_until_restart() {
        let fake = FakeProcess::new();
        let browser = FakeBrowser::with(vec![server("10.0.0.1", "alpha")]);
        let settings = SnapclientSettings {
            reconnect_guard: Duration::ZERO,
            ..settings()
        };
        let mut core = core_with(settings, &fake, &browser, &EventBus::new());
        core.start().await.unwrap();
        assert_eq!(core.state(), PluginState::Connected);

        fake.crash();
        core.monitor_tick().await.unwrap();
        core.discovery_tick().await.unwrap();
        assert_eq!(core.state(), PluginState::ReadyToConnect);
        assert_eq!(fake.events(), vec!["start:10.0.0.1"]);
        let status = core.status().await;
        assert!(!status.auto_connect);
        assert!(status.blacklisted_servers.is_empty());

        core.stop().await;
        core.start().await.unwrap();
        assert_eq!(core.state(), PluginState::Connected);
        assert_eq!(fake.events(), vec!["start:10.0.0.1", "stop", "start:10.0.0.1"]);
    }

    #[actix_web::test]
    async fn connect_after_unnoticed_crash_is_accepted() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;

        fake.crash();
        assert_eq!(core.status().await.plugin_state, PluginState::ReadyToConnect);
        let response = core
            .handle_command(PluginCommand::Connect { host: "10.0.0.2".to_string() })
            .await;
        assert!(response.success, "{:?}", response.error);
        assert_eq!(core.state(), PluginState::Connected);
        assert_eq!(core.status().await.host.as_deref(), Some("10.0.0.2"));
    }

    #[actix_web::test]
    async fn disconnect_after_unnoticed_crash_does_not_blacklist() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;

        fake.crash();
        let response = core.handle_command(PluginCommand::Disconnect).await;
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("already disconnected"));
        assert_eq!(core.state(), PluginState::ReadyToConnect);
        assert!(core.reconciler.blacklisted().is_empty());
    }

    #[actix_web::test]
    async fn monitor_stops_stray_process() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();

        fake.spawn_stray();
        core.monitor_tick().await.unwrap();
        assert!(!fake.alive());
        assert_eq!(fake.events(), vec!["stop"]);
        assert_eq!(core.state(), PluginState::ReadyToConnect);
    }

    #[actix_web::test]
    async fn commands_rejected_while_inactive() {
        let fake = FakeProcess::new();
        let mut core = core_with(settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        let response = core.handle_command(PluginCommand::Discover).await;
        assert!(!response.success);
        assert!(response.inactive);
    }

    #[actix_web::test]
    async fn connect_validates_host_blacklist_and_state() {
        let fake = FakeProcess::new();
        let browser = FakeBrowser::with(vec![server("10.0.0.1", "alpha")]);
        let mut core = core_with(manual_settings(), &fake, &browser, &EventBus::new());
        core.start().await.unwrap();

        let empty = core.handle_command(PluginCommand::Connect { host: "  ".to_string() }).await;
        assert!(!empty.success);

        let ok = core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() }).await;
        assert!(ok.success);

        let conflict = core.handle_command(PluginCommand::Connect { host: "10.0.0.2".to_string() }).await;
        assert!(!conflict.success);
        assert_eq!(conflict.state_conflict, Some(PluginState::Connected));

        let dropped = core.handle_command(PluginCommand::Disconnect).await;
        assert!(dropped.success);
        assert_eq!(dropped.blacklisted_servers, Some(vec!["10.0.0.1".to_string()]));

        let refused = core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() }).await;
        assert!(!refused.success);
        assert!(refused.blacklisted);
        assert_eq!(fake.events(), vec!["start:10.0.0.1", "stop"]);
    }

    #[actix_web::test]
    async fn connect_to_undiscovered_host_synthesizes_descriptor() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();

        let response = core
            .handle_command(PluginCommand::Connect { host: "10.0.0.9".to_string() })
            .await;
        let server = response.server.unwrap();
        assert_eq!(server.name, "Snapserver (10.0.0.9)");
        assert_eq!(server.port, 1704);
    }

    #[actix_web::test]
    async fn failed_connect_stays_ready() {
        let fake = FakeProcess::new();
        fake.set_fail_start(true);
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();

        let response = core
            .handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("fake failure"));
        assert_eq!(core.state(), PluginState::ReadyToConnect);
    }

    #[actix_web::test]
    async fn disconnect_is_idempotent() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();

        let first = core.handle_command(PluginCommand::Disconnect).await;
        let second = core.handle_command(PluginCommand::Disconnect).await;
        assert!(first.success && second.success);
        assert_eq!(first.message.as_deref(), Some("already disconnected"));
        assert!(core.reconciler.blacklisted().is_empty());
    }

    #[actix_web::test]
    async fn restart_failure_falls_back_to_ready() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();

        let no_server = core.handle_command(PluginCommand::Restart).await;
        assert!(!no_server.success);

        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        let restarted = core.handle_command(PluginCommand::Restart).await;
        assert!(restarted.success);
        assert_eq!(core.state(), PluginState::Connected);

        fake.set_fail_start(true);
        let failed = core.handle_command(PluginCommand::Restart).await;
        assert!(!failed.success);
        assert_eq!(core.state(), PluginState::ReadyToConnect);
    }

    #[actix_web::test]
    async fn discovery_filters_blacklisted_hosts() {
        let fake = FakeProcess::new();
        let browser = FakeBrowser::with(vec![server("10.0.0.1", "alpha"), server("10.0.0.2", "beta")]);
        let mut core = core_with(manual_settings(), &fake, &browser, &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        core.handle_command(PluginCommand::Disconnect).await;

        let response = core.handle_command(PluginCommand::Discover).await;
        let hosts: Vec<_> = response
            .servers
            .unwrap()
            .into_iter()
            .map(|s| s.host)
            .collect();
        assert_eq!(hosts, vec!["10.0.0.2"]);
        assert_eq!(core.state(), PluginState::ReadyToConnect);
    }

    #[actix_web::test]
    async fn discovery_tick_skipped_while_guard_active() {
        let fake = FakeProcess::new();
        fake.set_fail_start(true);
        let browser = FakeBrowser::with(vec![server("10.0.0.1", "alpha")]);
        let mut core = core_with(settings(), &fake, &browser, &EventBus::new());
        core.start().await.unwrap();
        assert_eq!(browser.calls(), 1);

        core.discovery_tick().await.unwrap();
        assert_eq!(browser.calls(), 1);
        assert_eq!(fake.events(), vec!["start:10.0.0.1"]);
    }

    #[actix_web::test]
    async fn health_check_disconnects_unreachable_peer_without_blacklisting() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let fake = FakeProcess::new();
        let peer = ServerDescriptor::new("127.0.0.1", "local", port);
        let browser = FakeBrowser::with(vec![peer]);
        let settings = SnapclientSettings {
            health_check: true,
            health_check_timeout: Duration::from_millis(300),
            reconnect_guard: Duration::ZERO,
            ..SnapclientSettings::default()
        };
        let mut core = core_with(settings, &fake, &browser, &EventBus::new());
        core.start().await.unwrap();
        assert_eq!(core.state(), PluginState::Connected);

        core.discovery_tick().await.unwrap();
        assert_eq!(core.state(), PluginState::Connected);

        drop(listener);
        browser.set(Vec::new());
        core.discovery_tick().await.unwrap();
        assert_eq!(core.state(), PluginState::ReadyToConnect);
        assert!(!fake.alive());
        assert!(core.reconciler.blacklisted().is_empty());
        assert!(core.reconciler.auto_connect());
    }

    #[actix_web::test]
    async fn stop_clears_session_state() {
        let fake = FakeProcess::new();
        let browser = FakeBrowser::with(vec![server("10.0.0.1", "alpha")]);
        let mut core = core_with(manual_settings(), &fake, &browser, &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        core.handle_command(PluginCommand::Disconnect).await;

        core.stop().await;
        assert_eq!(core.state(), PluginState::Inactive);
        let status = core.status().await;
        assert!(!status.is_active);
        assert!(status.blacklisted_servers.is_empty());
        assert!(status.discovered_servers.is_empty());
        assert!(!fake.alive());
    }

    fn control(watch: u64, host: &str, link: ControlLink) -> ControlEvent {
        ControlEvent {
            watch,
            host: host.to_string(),
            link,
        }
    }

    #[actix_web::test]
    async fn control_link_is_reported_for_connected_host_only() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_control_event(control(1, "10.0.0.1", ControlLink::Up)).await.unwrap();
        assert!(!core.status().await.control_linked);

        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        assert_eq!(core.connected_host().as_deref(), Some("10.0.0.1"));
        core.handle_control_event(control(1, "10.0.0.2", ControlLink::Up)).await.unwrap();
        assert!(!core.status().await.control_linked);
        core.handle_control_event(control(1, "10.0.0.1", ControlLink::Up)).await.unwrap();
        assert!(core.status().await.control_linked);

        core.handle_command(PluginCommand::Disconnect).await;
        assert!(core.connected_host().is_none());
        assert!(!core.status().await.control_linked);
    }

    #[actix_web::test]
    async fn lost_control_link_disconnects_without_blacklisting() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        core.handle_control_event(control(1, "10.0.0.1", ControlLink::Up)).await.unwrap();

        core.handle_control_event(control(1, "10.0.0.9", ControlLink::Lost("eof".to_string())))
            .await
            .unwrap();
        assert_eq!(core.state(), PluginState::Connected);

        core.handle_control_event(control(1, "10.0.0.1", ControlLink::Lost("eof".to_string())))
            .await
            .unwrap();
        assert_eq!(core.state(), PluginState::ReadyToConnect);
        assert!(!fake.alive());
        let status = core.status().await;
        assert!(status.blacklisted_servers.is_empty());
        assert!(!status.control_linked);
    }

    #[actix_web::test]
    async fn test_audio_requires_running_client() {
        let fake = FakeProcess::new();
        let mut core = core_with(manual_settings(), &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        let response = core.handle_command(PluginCommand::TestAudio).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("not running"));
    }

    #[actix_web::test]
    async fn test_audio_reports_player_outcome() {
        let fake = FakeProcess::new();
        let ok = SnapclientSettings {
            test_tone_command: write_script("core-tone-ok", "exit 0"),
            ..manual_settings()
        };
        let mut core = core_with(ok, &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        let response = core.handle_command(PluginCommand::TestAudio).await;
        assert!(response.success);

        let broken = SnapclientSettings {
            test_tone_command: write_script("core-tone-broken", "echo 'no such device' >&2\nexit 1"),
            ..manual_settings()
        };
        let mut core = core_with(broken, &fake, &FakeBrowser::default(), &EventBus::new());
        core.start().await.unwrap();
        core.handle_command(PluginCommand::Connect { host: "10.0.0.1".to_string() })
            .await;
        let response = core.handle_command(PluginCommand::TestAudio).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("no such device"));
    }
}
