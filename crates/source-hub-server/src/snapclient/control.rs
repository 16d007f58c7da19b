//! Snapserver control-port watcher.
//!
//! While connected, holds a JSON-RPC WebSocket to the snapserver control port and
//! reports to the worker when that link comes up or drops. Failed connection attempts
//! are retried quietly and never reported.

use std::time::Duration;

use actix_web::rt::task::JoinHandle;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

type ControlSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLink {
    Up,
    Lost(String),
}

/// Link change reported by one watcher; `watch` identifies the watcher instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub watch: u64,
    pub host: String,
    pub link: ControlLink,
}

pub fn control_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}/jsonrpc")
}

fn rpc_request(id: u64, method: &str, params: Option<serde_json::Value>) -> String {
    let mut request = json!({ "id": id, "jsonrpc": "2.0", "method": method });
    if let Some(params) = params {
        request["params"] = params;
    }
    request.to_string()
}

/// Spawn a watcher for `host:port`; it runs until `token` is cancelled.
pub(crate) fn spawn_control_watch<M>(
    watch: u64,
    host: String,
    port: u16,
    token: CancellationToken,
    mailbox: mpsc::Sender<M>,
) -> JoinHandle<()>
where
    M: From<ControlEvent> + 'static,
{
    actix_web::rt::spawn(async move {
        let url = control_url(&host, port);
        tracing::debug!(url = %url, watch, "control watch started");
        loop {
            let connect = tokio::select! {
                _ = token.cancelled() => break,
                connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())) => connect,
            };
            let mut ws = match connect {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(e)) => {
                    tracing::debug!(url = %url, error = %e, "control port unavailable");
                    if !pause(&token, RETRY_DELAY).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    tracing::debug!(url = %url, "control port connect timed out");
                    if !pause(&token, RETRY_DELAY).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::info!(host = %host, "snapserver control link established");
            let up = ControlEvent {
                watch,
                host: host.clone(),
                link: ControlLink::Up,
            };
            if !notify(&token, &mailbox, up).await {
                let _ = ws.close(None).await;
                break;
            }

            let reason = watch_socket(&mut ws, &token).await;
            let _ = ws.close(None).await;
            let Some(reason) = reason else {
                break;
            };
            tracing::warn!(host = %host, reason = %reason, "snapserver control link lost");
            let lost = ControlEvent {
                watch,
                host: host.clone(),
                link: ControlLink::Lost(reason),
            };
            if !notify(&token, &mailbox, lost).await || !pause(&token, RETRY_DELAY).await {
                break;
            }
        }
        tracing::debug!(host = %host, watch, "control watch stopped");
    })
}

/// Read notifications until the link drops. `None` means cancelled.
async fn watch_socket(ws: &mut ControlSocket, token: &CancellationToken) -> Option<String> {
    let subscriptions = [
        rpc_request(3, "Client.Subscribe", Some(json!({ "event": "on_connect" }))),
        rpc_request(4, "Server.Subscribe", Some(json!({ "event": "on_update" }))),
    ];
    for request in subscriptions {
        if let Err(e) = ws.send(Message::Text(request)).await {
            return Some(format!("subscribe failed: {e}"));
        }
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = keepalive.tick() => {
                if let Err(e) = ws.send(Message::Text(rpc_request(999, "Server.GetStatus", None))).await {
                    return Some(format!("keepalive failed: {e}"));
                }
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => log_notification(&text),
                Some(Ok(Message::Close(_))) | None => return Some("closed by server".to_string()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(e.to_string()),
            },
        }
    }
}

fn log_notification(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match value.get("method").and_then(|m| m.as_str()) {
            Some(method) => tracing::debug!(method, "snapserver notification"),
            None => tracing::trace!(id = ?value.get("id"), "snapserver rpc reply"),
        },
        Err(e) => tracing::debug!(error = %e, "unparseable snapserver message"),
    }
}

async fn notify<M: From<ControlEvent>>(
    token: &CancellationToken,
    mailbox: &mpsc::Sender<M>,
    event: ControlEvent,
) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        sent = mailbox.send(M::from(event)) => sent.is_ok(),
    }
}

async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
