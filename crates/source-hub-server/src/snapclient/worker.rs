//! Mailbox worker that owns a [`SnapclientCore`].
//!
//! HTTP handlers and background loops never touch plugin state directly; they send
//! messages and await a oneshot reply.

use async_trait::async_trait;
use source_hub_types::{CommandResponse, PluginStatus};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::control::{ControlEvent, spawn_control_watch};
use super::monitor::{LoopKind, LoopTick, spawn_loop};
use super::plugin::SnapclientCore;
use crate::plugin::{AudioSourcePlugin, PluginCommand, PluginError};

const MAILBOX_CAPACITY: usize = 32;

pub(crate) enum WorkerMessage {
    Start {
        reply: oneshot::Sender<Result<(), PluginError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<PluginStatus>,
    },
    Command {
        command: PluginCommand,
        reply: oneshot::Sender<CommandResponse>,
    },
    Tick(LoopTick),
    Control(ControlEvent),
}

impl From<LoopTick> for WorkerMessage {
    fn from(tick: LoopTick) -> Self {
        WorkerMessage::Tick(tick)
    }
}

impl From<ControlEvent> for WorkerMessage {
    fn from(event: ControlEvent) -> Self {
        WorkerMessage::Control(event)
    }
}

struct Loops {
    token: CancellationToken,
    handles: Vec<actix_web::rt::task::JoinHandle<()>>,
}

struct ControlWatch {
    id: u64,
    host: String,
    token: CancellationToken,
    handle: actix_web::rt::task::JoinHandle<()>,
}

struct Worker {
    core: SnapclientCore,
    mailbox: mpsc::WeakSender<WorkerMessage>,
    loops: Option<Loops>,
    control: Option<ControlWatch>,
    next_watch: u64,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Start { reply } => {
                    let result = self.start().await;
                    let _ = reply.send(result);
                }
                WorkerMessage::Stop { reply } => {
                    self.stop().await;
                    let _ = reply.send(());
                }
                WorkerMessage::Status { reply } => {
                    let _ = reply.send(self.core.status().await);
                }
                WorkerMessage::Command { command, reply } => {
                    let _ = reply.send(self.core.handle_command(command).await);
                }
                WorkerMessage::Tick(tick) => {
                    let result = match tick.kind {
                        LoopKind::Monitor => self.core.monitor_tick().await,
                        LoopKind::Discovery => self.core.discovery_tick().await,
                    };
                    let _ = tick.reply.send(result);
                }
                WorkerMessage::Control(event) => {
                    if self.control.as_ref().is_some_and(|watch| watch.id == event.watch) {
                        if let Err(e) = self.core.handle_control_event(event).await {
                            tracing::warn!(error = %e, "control event handling failed");
                        }
                    }
                }
            }
            self.sync_control_watch().await;
        }
        self.stop().await;
        tracing::info!(source = %self.core.name(), "plugin worker exited");
    }

    async fn start(&mut self) -> Result<(), PluginError> {
        if self.core.is_active() {
            return Ok(());
        }
        self.core.start().await?;
        self.spawn_loops();
        Ok(())
    }

    fn spawn_loops(&mut self) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let settings = self.core.settings();
        let token = CancellationToken::new();
        let mut handles = vec![spawn_loop(
            LoopKind::Monitor,
            settings.monitor_interval,
            settings.monitor_interval,
            token.clone(),
            mailbox.clone(),
        )];
        if settings.auto_discover || settings.health_check {
            handles.push(spawn_loop(
                LoopKind::Discovery,
                settings.polling_interval,
                settings.polling_interval,
                token.clone(),
                mailbox,
            ));
        }
        self.loops = Some(Loops { token, handles });
    }

    /// Keep one control watcher pointed at the connected host, or none.
    async fn sync_control_watch(&mut self) {
        let wanted = if self.core.settings().control_watch {
            self.core.connected_host()
        } else {
            None
        };
        if self.control.as_ref().map(|watch| &watch.host) == wanted.as_ref() {
            return;
        }
        self.cancel_control_watch().await;
        let Some(host) = wanted else {
            return;
        };
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        self.next_watch += 1;
        let token = CancellationToken::new();
        let handle = spawn_control_watch(
            self.next_watch,
            host.clone(),
            self.core.settings().control_port,
            token.clone(),
            mailbox,
        );
        self.control = Some(ControlWatch {
            id: self.next_watch,
            host,
            token,
            handle,
        });
    }

    async fn cancel_control_watch(&mut self) {
        if let Some(watch) = self.control.take() {
            watch.token.cancel();
            if let Err(e) = watch.handle.await {
                tracing::warn!(error = %e, "control watch ended abnormally");
            }
        }
    }

    async fn stop(&mut self) {
        self.cancel_control_watch().await;
        if let Some(loops) = self.loops.take() {
            loops.token.cancel();
            for handle in loops.handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "background loop ended abnormally");
                }
            }
        }
        if !self.core.is_active() {
            return;
        }
        self.core.stop().await;
        let grace = self.core.stop_grace();
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
    }
}

/// Cloneable handle to a running snapclient worker.
#[derive(Clone)]
pub struct SnapclientHandle {
    name: String,
    mailbox: mpsc::Sender<WorkerMessage>,
}

/// Spawn the worker on the current actix system and return its handle.
///
/// The worker exits once the plugin is stopped and every handle is dropped.
pub fn spawn_snapclient_worker(core: SnapclientCore) -> SnapclientHandle {
    let name = core.name().to_string();
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let worker = Worker {
        core,
        mailbox: tx.downgrade(),
        loops: None,
        control: None,
        next_watch: 0,
    };
    actix_web::rt::spawn(worker.run(rx));
    SnapclientHandle { name, mailbox: tx }
}

impl SnapclientHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WorkerMessage + Send,
    ) -> Result<T, PluginError>
    where
        T: Send,
    {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(make(tx))
            .await
            .map_err(|_| PluginError::Unavailable(self.name.clone()))?;
        rx.await.map_err(|_| PluginError::Unavailable(self.name.clone()))
    }
}

#[async_trait]
impl AudioSourcePlugin for SnapclientHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), PluginError> {
        self.request(|reply| WorkerMessage::Start { reply }).await?
    }

    async fn stop(&self) -> Result<(), PluginError> {
        self.request(|reply| WorkerMessage::Stop { reply }).await
    }

    async fn status(&self) -> Result<PluginStatus, PluginError> {
        self.request(|reply| WorkerMessage::Status { reply }).await
    }

    async fn command(&self, command: PluginCommand) -> Result<CommandResponse, PluginError> {
        self.request(|reply| WorkerMessage::Command { command, reply })
            .await
    }
}
