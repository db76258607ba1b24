use actix_web::{dev::ServerHandle, web, App, HttpServer};
use async_trait::async_trait;
use chat_relay_service::{
    models::message::{Message, NewMessage},
    routes,
    services::{MessageStore, StoreError, StoreResult},
    state::AppState,
    websocket::{ClientEvent, Connection, Relay, ServerEvent},
};
use std::net::{SocketAddr, TcpListener};
use tokio::sync::mpsc::UnboundedReceiver;

/// Store whose backend is permanently unreachable
#[allow(dead_code)]
pub struct DownStore;

#[async_trait]
impl MessageStore for DownStore {
    async fn append(&self, _message: NewMessage) -> StoreResult<Message> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn recent(&self, _limit: usize) -> StoreResult<Vec<Message>> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn mark_read(&self, _id: &str, _identity: &str) -> StoreResult<Message> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn backend(&self) -> &'static str {
        "down"
    }
}

/// Decode every frame queued so far.
#[allow(dead_code)]
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        events.push(serde_json::from_str(&frame).expect("relay emitted invalid frame"));
    }
    events
}

#[allow(dead_code)]
pub async fn join(relay: &Relay, identity: &str) -> (Connection, UnboundedReceiver<String>) {
    let (mut conn, rx) = relay.connect();
    relay
        .handle(&mut conn, ClientEvent::Join(identity.to_string()))
        .await
        .expect("join failed");
    (conn, rx)
}

/// Serve the full route table on an ephemeral local port.
#[allow(dead_code)]
pub fn start_server(state: AppState) -> std::io::Result<(SocketAddr, ServerHandle)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .workers(1)
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_web::rt::spawn(server);
    Ok((addr, handle))
}
