//! Relay connection task with transport-level reconnect

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::ws::protocol::{ClientMsg, ServerMsg};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the connection task reports to its owner
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Connected,
    Message(ServerMsg),
    Disconnected,
}

/// Receiving ends of the owner's outbound queues
pub(crate) struct Outbox {
    /// State-carrying messages, sent before anything in `game`
    pub control: mpsc::UnboundedReceiver<ClientMsg>,
    pub game: mpsc::Receiver<ClientMsg>,
}

impl Outbox {
    /// Throw away everything queued so far, returning how much was dropped
    fn discard(&mut self) -> usize {
        let mut dropped = 0;
        while self.control.try_recv().is_ok() {
            dropped += 1;
        }
        while self.game.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

enum SessionEnd {
    /// The owner went away
    Shutdown,
    /// The socket dropped, try again
    Lost,
}

/// Spawn the connection task.
///
/// It keeps one relay connection open, reconnecting after `reconnect_delay`
/// whenever it drops. Anything queued in the outbox while disconnected is
/// discarded on the next connect. The task ends once the owner drops its
/// channel ends.
pub(crate) fn spawn(
    relay_url: String,
    reconnect_delay: Duration,
    outbox: Outbox,
    events_tx: mpsc::Sender<ConnectionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run(relay_url, reconnect_delay, outbox, events_tx))
}

async fn run(
    relay_url: String,
    reconnect_delay: Duration,
    mut outbox: Outbox,
    events_tx: mpsc::Sender<ConnectionEvent>,
) {
    loop {
        match connect_async(relay_url.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %relay_url, "Connected to relay");

                let dropped = outbox.discard();
                if dropped > 0 {
                    warn!(dropped, "Discarded messages sent while disconnected");
                }

                if events_tx.send(ConnectionEvent::Connected).await.is_err() {
                    return;
                }

                match pump(socket, &mut outbox, &events_tx).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost => {
                        warn!(url = %relay_url, "Lost relay connection");
                        if events_tx.send(ConnectionEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(url = %relay_url, error = %e, "Relay connect failed");
            }
        }

        if events_tx.is_closed() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Shuttle messages between the socket and the owner until either side ends
async fn pump(
    socket: RelaySocket,
    outbox: &mut Outbox,
    events_tx: &mpsc::Sender<ConnectionEvent>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            biased;

            outgoing = outbox.control.recv() => match outgoing {
                Some(msg) => {
                    if let Err(e) = send_client_msg(&mut sink, &msg).await {
                        debug!(error = %e, "Relay send failed");
                        return SessionEnd::Lost;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            },
            outgoing = outbox.game.recv() => match outgoing {
                Some(msg) => {
                    if let Err(e) = send_client_msg(&mut sink, &msg).await {
                        debug!(error = %e, "Relay send failed");
                        return SessionEnd::Lost;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMsg>(&text) {
                    Ok(msg) => {
                        if events_tx.send(ConnectionEvent::Message(msg)).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Ignoring unreadable relay message");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Relay socket error");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

/// Encode and send one message to the relay
async fn send_client_msg(
    sink: &mut SplitSink<RelaySocket, Message>,
    msg: &ClientMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
