use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::models::AppState;
use crate::notify::Notification;

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // Subscribe before the handshake completes so nothing published after it is missed.
    let events = state.hub.subscribe();
    ws.on_upgrade(move |socket| forward(socket, events))
}

/// Push every hub notification to one client until either side goes away.
async fn forward(mut socket: WebSocket, mut events: broadcast::Receiver<Notification>) {
    debug!("WebSocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode notification");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, notifications dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("WebSocket client disconnected");
}
