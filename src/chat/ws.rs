use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use crate::{events::ClientEvent, fabric::Subscription, ChatCoordinator};

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    State(chat): State<Arc<ChatCoordinator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve_connection(chat, stream))
}

/// Runs one connection from upgrade to close: inbound frames are fed to the
/// coordinator in order while a writer task drains the connection's events.
async fn serve_connection(chat: Arc<ChatCoordinator>, stream: WebSocket) {
    let mut participant = chat.connect();
    let conn = participant.id();
    let Subscription { mut all, mut direct } = chat.fabric().attach(conn);
    let (mut sender, mut receiver) = stream.split();

    let mut writer = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = direct.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                event = all.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%conn, skipped, "connection lagging, broadcasts dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    error!(%conn, error = %err, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let Some(Ok(frame)) = frame else {
                    break;
                };
                match frame {
                    Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => chat.handle(&mut participant, event).await,
                        Err(err) => debug!(%conn, error = %err, "ignoring malformed frame"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    chat.fabric().detach(conn);
    chat.disconnect(participant);
}
