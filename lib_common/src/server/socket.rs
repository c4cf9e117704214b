//! # Subscriber Channel
//!
//! Server side of `/ws`. Each upgraded socket gets a connection-scoped id, a
//! welcome frame, and a queue registered with the [`Dispatcher`]. The channel
//! is one-directional: inbound frames are logged and otherwise ignored.
//!
//! The socket task owns both directions, so a slow or dead peer only ever
//! blocks its own task. Whatever ends the loop, the client is removed from
//! the dispatcher on the way out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};

use crate::core::dispatcher::{Dispatcher, ServerMessage};
use crate::core::error::GreenError;
use crate::server::AppState;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher))
}

async fn handle_socket(mut socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let client_id = format!("client-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed));
    // Registered before the welcome goes out: anything broadcast after the
    // peer sees the welcome is guaranteed to reach it.
    let mut frames = dispatcher.add_client(&client_id);
    log::info!(
        "Subscriber {} connected ({} open)",
        client_id,
        dispatcher.client_count()
    );

    if let Err(e) = send_frame(&mut socket, &ServerMessage::welcome_now()).await {
        log::warn!("Subscriber {} dropped before welcome: {}", client_id, e);
        dispatcher.remove_client(&client_id);
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    log::debug!("Subscriber {} sent: {}", client_id, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("Subscriber {} read error: {}", client_id, e);
                    break;
                }
            },
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = send_frame(&mut socket, &frame).await {
                        log::warn!("Subscriber {} write error: {}", client_id, e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    dispatcher.remove_client(&client_id);
    log::info!("Subscriber {} disconnected", client_id);
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerMessage) -> Result<(), GreenError> {
    let text = frame.to_json()?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| GreenError::Transport(e.to_string()))
}
