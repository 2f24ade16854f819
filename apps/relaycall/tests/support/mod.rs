//! In-process signaling relay: every text frame is forwarded to the other
//! sockets that joined with the same `room` query parameter.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

type SharedState = Arc<Mutex<RelayState>>;

#[derive(Default)]
struct RelayState {
    next_client: usize,
    clients: Vec<Client>,
    rooms: Vec<String>,
    received: Vec<String>,
}

struct Client {
    id: usize,
    room: String,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

pub struct Relay {
    addr: SocketAddr,
    state: SharedState,
}

impl Relay {
    pub async fn spawn() -> Self {
        let state = SharedState::default();
        let router = Router::new()
            .route("/", get(ws_handler))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay listener");
        let addr = listener.local_addr().expect("relay addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Room of every socket accepted so far, in accept order.
    pub fn rooms(&self) -> Vec<String> {
        self.state.lock().rooms.clone()
    }

    /// Every text frame received from any client, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    pub fn clients(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub async fn wait_for_clients(&self, count: usize) {
        while self.clients() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_received(&self, count: usize) {
        while self.received().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Accepts TCP connections and never answers the websocket handshake.
pub async fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind silent listener");
    let addr = listener.local_addr().expect("silent addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    format!("ws://{addr}/")
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let room = query
        .as_deref()
        .and_then(|query| query.split('&').find_map(|pair| pair.strip_prefix("room=")))
        .unwrap_or_default()
        .to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, room))
}

async fn handle_socket(socket: WebSocket, state: SharedState, room: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let id = {
        let mut guard = state.lock();
        guard.next_client += 1;
        let id = guard.next_client;
        guard.rooms.push(room.clone());
        guard.clients.push(Client {
            id,
            room: room.clone(),
            outbound: tx,
        });
        id
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            WsMessage::Text(text) => {
                let mut guard = state.lock();
                guard.received.push(text.clone());
                for client in guard
                    .clients
                    .iter()
                    .filter(|client| client.id != id && client.room == room)
                {
                    let _ = client.outbound.send(WsMessage::Text(text.clone()));
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.lock().clients.retain(|client| client.id != id);
    send_task.abort();
}
