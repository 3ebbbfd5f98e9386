//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::relay::{RelayHandle, Subscription};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{error_code, ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let socket_id = Uuid::new_v4();
    debug!(socket_id = %socket_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    let subscription = match state.relay.connect(socket_id).await {
        Ok(sub) => sub,
        Err(e) => {
            error!(socket_id = %socket_id, error = %e, "Failed to register with relay");
            return;
        }
    };

    let limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    run_session(socket_id, &state.relay, limiter, ws_sink, ws_stream, subscription).await;

    // Nothing is attributed to a connection, so there is nothing else to undo
    state.relay.disconnect(socket_id).await;

    debug!(socket_id = %socket_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    socket_id: Uuid,
    relay: &RelayHandle,
    limiter: ConnectionRateLimiter,
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    subscription: Subscription,
) {
    // Replies meant for this connection only (rejections)
    let (direct_tx, direct_rx) = mpsc::channel::<ServerMsg>(16);

    let writer_handle = tokio::spawn(run_writer(socket_id, ws_sink, subscription, direct_rx));

    // Reader loop: WebSocket -> relay hub
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if client_msg.is_throttled() && !limiter.check() {
                            warn!(
                                socket_id = %socket_id,
                                event = client_msg.event_name(),
                                "Rate limited message"
                            );
                            let _ = direct_tx.try_send(ServerMsg::Error {
                                code: error_code::RATE_LIMITED.to_string(),
                                message: "Too many messages, slow down".to_string(),
                            });
                            continue;
                        }
                        if relay.submit(socket_id, client_msg).await.is_err() {
                            error!(socket_id = %socket_id, "Relay hub closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(socket_id = %socket_id, error = %e, "Rejected malformed message");
                        let _ = direct_tx.try_send(ServerMsg::Error {
                            code: error_code::MALFORMED.to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(socket_id = %socket_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(socket_id = %socket_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(socket_id = %socket_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(socket_id = %socket_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(socket_id = %socket_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Writer task: bootstrap selection, then relay fan-out and direct replies.
/// Lag is never fatal; the hub resends the current selection instead.
async fn run_writer(
    socket_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
) {
    let initial = ServerMsg::RocketSelection(std::mem::take(&mut subscription.initial));

    if let Err(e) = send_msg(&mut ws_sink, &initial).await {
        debug!(socket_id = %socket_id, error = %e, "Failed to send initial selection");
        return;
    }

    loop {
        tokio::select! {
            received = subscription.next_for(socket_id) => match received {
                Some(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(socket_id = %socket_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                None => {
                    debug!(socket_id = %socket_id, "Relay feed closed");
                    break;
                }
            },
            Some(msg) = direct_rx.recv() => {
                if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                    debug!(socket_id = %socket_id, error = %e, "WebSocket send failed");
                    break;
                }
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
