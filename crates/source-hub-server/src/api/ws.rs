//! WebSocket event stream.
//!
//! Forwards every hub event to connected clients and keeps the connection alive
//! with pings and an application-level heartbeat.

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::{EventBus, HubEvent};
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(15);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Heartbeat,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    ConnectionAck { session_id: String },
    HeartbeatAck,
}

/// Hub event queued for one WebSocket session.
#[derive(Message)]
#[rtype(result = "()")]
struct Outbound(HubEvent);

pub struct EventsWs {
    session_id: String,
    events: EventBus,
    last_seen: Instant,
}

impl EventsWs {
    pub fn new(events: EventBus) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            events,
            last_seen: Instant::now(),
        }
    }

    fn send_json<T: Serialize>(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &T) {
        match serde_json::to_string(msg) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::warn!(session = %self.session_id, error = %e, "websocket encode failed"),
        }
    }
}

impl Actor for EventsWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(session = %self.session_id, "websocket connected");
        let ack = ServerMessage::ConnectionAck {
            session_id: self.session_id.clone(),
        };
        self.send_json(ctx, &ack);

        let session = self.session_id.clone();
        let stream = futures_util::stream::unfold(self.events.subscribe(), move |mut rx| {
            let session = session.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((Outbound(event), rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(session = %session, skipped, "websocket subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        ctx.add_message_stream(Box::pin(stream));

        ctx.run_interval(PING_INTERVAL, |act, ctx| {
            if act.last_seen.elapsed() > CLIENT_TIMEOUT {
                tracing::info!(session = %act.session_id, "websocket client timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(session = %self.session_id, "websocket disconnected");
    }
}

impl Handler<Outbound> for EventsWs {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) -> Self::Result {
        self.send_json(ctx, &msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EventsWs {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(_) => {
                ctx.stop();
                return;
            }
        };
        self.last_seen = Instant::now();
        match msg {
            ws::Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Heartbeat) => self.send_json(ctx, &ServerMessage::HeartbeatAck),
                Err(e) => tracing::debug!(session = %self.session_id, error = %e, "ignoring websocket message"),
            },
            ws::Message::Ping(bytes) => ctx.pong(&bytes),
            ws::Message::Pong(_) => {}
            ws::Message::Close(_) => ctx.stop(),
            ws::Message::Binary(_) => {}
            ws::Message::Continuation(_) => ctx.stop(),
            ws::Message::Nop => {}
        }
    }
}

/// Upgrade to a WebSocket that streams hub events.
#[get("/ws")]
pub async fn events_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::start(EventsWs::new(state.events.clone()), &req, stream)
}
