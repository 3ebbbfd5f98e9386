//! Relay hub: the single owner of the shared selection and the fan-out loop

use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, RaceLaunch, ServerMsg};

use super::Selection;

/// Commands sent from connection sessions to the hub task
pub enum RelayCommand {
    /// A connection opened; reply with its bootstrap selection and feed
    Connect {
        socket_id: Uuid,
        reply: oneshot::Sender<Subscription>,
    },
    /// A connection closed
    Disconnect { socket_id: Uuid },
    /// A validated message from a connection
    Inbound { socket_id: Uuid, msg: ClientMsg },
    /// Snapshot for the health endpoint
    Status { reply: oneshot::Sender<RelayStatus> },
}

/// A fanned-out message, tagged with the connection it came from
#[derive(Debug, Clone)]
pub struct Outbound {
    pub origin: Uuid,
    pub msg: ServerMsg,
}

impl Outbound {
    /// Whether this message should be delivered to `socket_id`
    pub fn is_for(&self, socket_id: Uuid) -> bool {
        self.origin != socket_id
    }
}

/// What a new connection gets from the hub
pub struct Subscription {
    /// Selection at the moment the connection registered
    pub initial: Selection,
    /// Every fan-out from this point on
    pub feed: broadcast::Receiver<Outbound>,
    /// Latest selection, used to catch up after falling behind the feed
    pub current: watch::Receiver<Selection>,
}

impl Subscription {
    /// Next fan-out meant for `socket_id`, or `None` once the hub is gone.
    ///
    /// If the feed overran this receiver, the skipped messages are replaced
    /// by the current selection so the connection still converges.
    pub async fn next_for(&mut self, socket_id: Uuid) -> Option<ServerMsg> {
        loop {
            match self.feed.recv().await {
                Ok(outbound) if outbound.is_for(socket_id) => return Some(outbound.msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        socket_id = %socket_id,
                        lagged_count = n,
                        "Client lagged, resending current selection"
                    );
                    let current = self.current.borrow_and_update().clone();
                    return Some(ServerMsg::RocketSelection(current));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Point-in-time view of the hub state
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub connections: usize,
    pub selection: Selection,
    /// Bumped on every accepted selection write. Last write still wins.
    pub selection_version: u64,
}

/// The hub has stopped and no longer accepts commands
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("relay hub is not running")]
pub struct RelayClosed;

/// Cloneable handle used by sessions and routes to reach the hub
#[derive(Clone)]
pub struct RelayHandle {
    command_tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Register a connection and get its bootstrap selection and feed
    pub async fn connect(&self, socket_id: Uuid) -> Result<Subscription, RelayClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Connect { socket_id, reply }).await?;
        rx.await.map_err(|_| RelayClosed)
    }

    pub async fn disconnect(&self, socket_id: Uuid) {
        let _ = self.send(RelayCommand::Disconnect { socket_id }).await;
    }

    /// Hand a message from `socket_id` to the hub
    pub async fn submit(&self, socket_id: Uuid, msg: ClientMsg) -> Result<(), RelayClosed> {
        self.send(RelayCommand::Inbound { socket_id, msg }).await
    }

    pub async fn status(&self) -> Result<RelayStatus, RelayClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Status { reply }).await?;
        rx.await.map_err(|_| RelayClosed)
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), RelayClosed> {
        self.command_tx.send(cmd).await.map_err(|_| RelayClosed)
    }
}

/// The relay hub (owned by its task)
///
/// All relay state lives here and is only touched from [`RelayHub::run`],
/// one command at a time, so every handler is atomic with respect to the
/// others.
pub struct RelayHub {
    selection: Selection,
    version: u64,
    connections: HashSet<Uuid>,
    command_rx: mpsc::Receiver<RelayCommand>,
    outbound_tx: broadcast::Sender<Outbound>,
    selection_tx: watch::Sender<Selection>,
}

impl RelayHub {
    /// Create a hub and the handle used to reach it
    pub fn new(channel_capacity: usize) -> (Self, RelayHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (outbound_tx, _) = broadcast::channel(channel_capacity.max(1));
        let (selection_tx, _) = watch::channel(Selection::new());

        let hub = Self {
            selection: Selection::new(),
            version: 0,
            connections: HashSet::new(),
            command_rx,
            outbound_tx,
            selection_tx,
        };

        (hub, RelayHandle { command_tx })
    }

    /// Process commands until every handle is dropped
    pub async fn run(mut self) {
        info!("Relay hub started");

        while let Some(cmd) = self.command_rx.recv().await {
            self.handle(cmd);
        }

        info!("Relay hub stopped");
    }

    fn handle(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Connect { socket_id, reply } => {
                self.connections.insert(socket_id);
                // Subscribing and snapshotting in one step means the new
                // connection sees every change after its bootstrap value.
                let subscription = Subscription {
                    initial: self.selection.clone(),
                    feed: self.outbound_tx.subscribe(),
                    current: self.selection_tx.subscribe(),
                };
                if reply.send(subscription).is_err() {
                    self.connections.remove(&socket_id);
                    return;
                }
                info!(
                    socket_id = %socket_id,
                    connections = self.connections.len(),
                    "Client connected"
                );
            }
            RelayCommand::Disconnect { socket_id } => {
                self.connections.remove(&socket_id);
                info!(
                    socket_id = %socket_id,
                    connections = self.connections.len(),
                    "Client disconnected"
                );
            }
            RelayCommand::Inbound { socket_id, msg } => {
                self.handle_inbound(socket_id, msg);
            }
            RelayCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_inbound(&mut self, socket_id: Uuid, msg: ClientMsg) {
        debug!(socket_id = %socket_id, event = msg.event_name(), "Relaying message");

        let out = match msg {
            ClientMsg::RocketSelection(selection) | ClientMsg::SyncRocketSelection(selection) => {
                self.selection = selection.clone();
                self.version += 1;
                self.selection_tx.send_replace(selection.clone());
                info!(
                    socket_id = %socket_id,
                    selection = %self.selection,
                    version = self.version,
                    "Selection replaced"
                );
                ServerMsg::RocketSelection(selection)
            }
            ClientMsg::LaunchRace(rocket_ids) => {
                info!(socket_id = %socket_id, rockets = %rocket_ids, "Race launched");
                ServerMsg::RaceLaunched(RaceLaunch {
                    rocket_ids,
                    initiator_socket_id: socket_id,
                })
            }
            ClientMsg::RaceInvitation(rocket_ids) => ServerMsg::RaceInvitation(rocket_ids),
            ClientMsg::RocketCollision(report) => ServerMsg::GameCollision(report),
            ClientMsg::RocketMove(position) => ServerMsg::RocketMove(position),
        };

        // No receivers is fine: the sender may be the only viewer
        let _ = self.outbound_tx.send(Outbound {
            origin: socket_id,
            msg: out,
        });
    }

    fn status(&self) -> RelayStatus {
        RelayStatus {
            connections: self.connections.len(),
            selection: self.selection.clone(),
            selection_version: self.version,
        }
    }
}
