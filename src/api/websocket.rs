use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use log::debug;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::messaging::Subscription;

/// Upgrade handler: every client gets its own bus subscription covering
/// all topics. Reconnects are the client's business.
pub async fn ws_handler(State(app): State<Arc<App>>, ws: WebSocketUpgrade) -> Response {
    let subscription = app.bus.subscribe();
    ws.on_upgrade(move |socket| relay(socket, subscription))
}

async fn relay(mut socket: WebSocket, mut subscription: Subscription) {
    debug!("WebSocket client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        let frame = json!({
                            "event": event.event_type.to_string(),
                            "data": event.payload,
                        });
                        if socket.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Clients only listen; drain pings and ignore the rest
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let dropped = subscription.dropped();
    if dropped > 0 {
        debug!("WebSocket client disconnected ({} events dropped)", dropped);
    } else {
        debug!("WebSocket client disconnected");
    }
}
