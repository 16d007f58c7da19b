//! Periodic background loops for the snapclient plugin.
//!
//! Loops own no plugin state. Each iteration posts a tick to the worker mailbox
//! and waits for the worker to run it; a failed iteration doubles the next delay.

use std::time::Duration;

use actix_web::rt::task::JoinHandle;
use source_hub_types::ServerDescriptor;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::plugin::SnapclientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Process liveness vs. state reconciliation.
    Monitor,
    /// Peer health check while connected, discovery + auto-connect otherwise.
    Discovery,
}

impl LoopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopKind::Monitor => "monitor",
            LoopKind::Discovery => "discovery",
        }
    }
}

/// One iteration request sent to the worker.
#[derive(Debug)]
pub struct LoopTick {
    pub kind: LoopKind,
    pub reply: oneshot::Sender<Result<(), SnapclientError>>,
}

/// Spawn a loop that ticks `kind` every `interval` after `initial_delay`.
///
/// Every wait selects on `token`, so cancellation never blocks on the worker.
pub(crate) fn spawn_loop<M>(
    kind: LoopKind,
    interval: Duration,
    initial_delay: Duration,
    token: CancellationToken,
    mailbox: mpsc::Sender<M>,
) -> JoinHandle<()>
where
    M: From<LoopTick> + 'static,
{
    actix_web::rt::spawn(async move {
        tracing::debug!(kind = kind.as_str(), interval_ms = interval.as_millis() as u64, "loop started");
        let mut delay = initial_delay;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            let (reply, result) = oneshot::channel();
            let sent = tokio::select! {
                _ = token.cancelled() => break,
                sent = mailbox.send(M::from(LoopTick { kind, reply })) => sent,
            };
            if sent.is_err() {
                tracing::debug!(kind = kind.as_str(), "worker mailbox closed");
                break;
            }
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = result => result,
            };
            delay = match result {
                Ok(Ok(())) => interval,
                Ok(Err(e)) => {
                    tracing::error!(kind = kind.as_str(), error = %e, "loop iteration failed; backing off");
                    interval * 2
                }
                Err(_) => {
                    tracing::debug!(kind = kind.as_str(), "worker dropped tick");
                    break;
                }
            };
        }
        tracing::debug!(kind = kind.as_str(), "loop stopped");
    })
}

/// TCP reachability probe of a snapserver stream port.
pub async fn probe_server(server: &ServerDescriptor, timeout: Duration) -> bool {
    let connect = TcpStream::connect((server.host.as_str(), server.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(host = %server.host, port = server.port, error = %e, "snapserver unreachable");
            false
        }
        Err(_) => {
            tracing::debug!(host = %server.host, port = server.port, "snapserver probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use source_hub_types::PluginState;

    #[actix_web::test]
    async fn probe_detects_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = ServerDescriptor::new("127.0.0.1", "local", port);
        assert!(probe_server(&server, Duration::from_millis(500)).await);

        drop(listener);
        assert!(!probe_server(&server, Duration::from_millis(500)).await);
    }

    #[actix_web::test]
    async fn failed_iteration_doubles_delay() {
        let (tx, mut rx) = mpsc::channel::<LoopTick>(4);
        let token = CancellationToken::new();
        let interval = Duration::from_millis(60);
        let handle = spawn_loop(LoopKind::Monitor, interval, Duration::ZERO, token.clone(), tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, LoopKind::Monitor);
        let failed_at = Instant::now();
        first
            .reply
            .send(Err(SnapclientError::InvalidTransition {
                from: PluginState::Inactive,
                to: PluginState::Connected,
            }))
            .unwrap();

        let second = rx.recv().await.unwrap();
        assert!(failed_at.elapsed() >= interval * 2 - Duration::from_millis(10));
        second.reply.send(Ok(())).unwrap();

        token.cancel();
        handle.await.unwrap();
    }

    #[actix_web::test]
    async fn cancel_while_waiting_for_reply_exits() {
        let (tx, mut rx) = mpsc::channel::<LoopTick>(4);
        let token = CancellationToken::new();
        let handle = spawn_loop(
            LoopKind::Discovery,
            Duration::from_secs(60),
            Duration::ZERO,
            token.clone(),
            tx,
        );

        let pending = rx.recv().await.unwrap();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit on cancel")
            .unwrap();
        drop(pending);
    }

    #[actix_web::test]
    async fn loop_exits_when_mailbox_closes() {
        let (tx, rx) = mpsc::channel::<LoopTick>(4);
        drop(rx);
        let handle = spawn_loop(
            LoopKind::Monitor,
            Duration::from_millis(10),
            Duration::ZERO,
            CancellationToken::new(),
            tx,
        );
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit")
            .unwrap();
    }
}
