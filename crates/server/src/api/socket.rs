use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use common::ClientEvent;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Every session gets every event. A session that falls behind the
/// broadcast buffer is resynced with the cached library.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut events = state.relay.subscribe();
    let relay = state.relay.clone();

    let greeting = ClientEvent::LibraryPush(relay.snapshot());
    if !send_event(&mut ws_sender, &greeting).await {
        return;
    }

    let mut outgoing = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client lagged by {} events, resending library", skipped);
                    ClientEvent::LibraryPush(relay.snapshot())
                }
                Err(RecvError::Closed) => break,
            };
            if !send_event(&mut ws_sender, &event).await {
                break;
            }
        }
    });

    let mut incoming = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!("WebSocket error: {}", err);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut outgoing => incoming.abort(),
        _ = &mut incoming => outgoing.abort(),
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ClientEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(err) => {
            warn!("Failed to encode client event: {}", err);
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}
