use crate::state::AppState;
use crate::websocket::{ClientEvent, ConnectionId, PresenceRegistry};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

// WebSocket actor: framing, heartbeat and hand-off to the relay worker
struct WsSession {
    connection_id: ConnectionId,
    // Parsed events for this connection's relay worker
    inbound: Option<UnboundedSender<ClientEvent>>,
    // Frames queued by the relay for this connection
    outbound: Option<UnboundedReceiver<String>>,
    presence: PresenceRegistry,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                tracing::warn!(connection_id = %act.connection_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn close_malformed(&mut self, ctx: &mut ws::WebsocketContext<Self>, code: ws::CloseCode, reason: String) {
        tracing::warn!(connection_id = %self.connection_id, %reason, "closing session on malformed frame");
        ctx.close(Some(ws::CloseReason {
            code,
            description: Some(reason),
        }));
        ctx.stop();
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session started");

        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session stopped");

        // Closing the queue ends the relay worker once it drains
        self.inbound.take();

        let presence = self.presence.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            presence.leave(connection_id).await;
        });
    }
}

// Frames from the relay
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        let queued = self
                            .inbound
                            .as_ref()
                            .map(|tx| tx.send(event).is_ok())
                            .unwrap_or(false);
                        if !queued {
                            ctx.stop();
                        }
                    }
                    Err(e) => self.close_malformed(ctx, ws::CloseCode::Policy, e.to_string()),
                }
            }
            Ok(ws::Message::Binary(_)) => {
                self.close_malformed(ctx, ws::CloseCode::Unsupported, "binary frames are not supported".into());
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.connection_id, ?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

// HTTP handler
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let relay = state.relay.clone();
    let (conn, outbound) = relay.connect();
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();

    let session = WsSession {
        connection_id: conn.id(),
        inbound: Some(inbound_tx),
        outbound: Some(outbound),
        presence: relay.presence().clone(),
        hb: Instant::now(),
        heartbeat_interval: state.config.ws.heartbeat_interval,
        client_timeout: state.config.ws.client_timeout,
    };

    let resp = ws::start(session, &req, stream)?;

    // One worker per connection keeps its events ordered without blocking others
    actix::spawn(relay.serve(conn, inbound_rx));

    Ok(resp)
}
