//! Client side of the relay: one race viewer's sync adapter
//!
//! A [`SyncClient`] keeps three copies of the selection consistent: its own
//! in-memory copy, a durable local file, and the relay's. Local changes go
//! memory, then file, then relay. Relay changes overwrite memory and file
//! unconditionally (last write wins).

mod connection;
pub mod graphql;
pub mod race;
pub mod storage;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::relay::{Selection, SelectionError};
use crate::ws::protocol::{ClientMsg, CollisionReport, RaceLaunch, RocketPosition, ServerMsg};

use self::connection::{ConnectionEvent, Outbox};
use self::storage::SelectionStore;

pub use self::graphql::{ApiError, RaceApi};
pub use self::race::{launch_race, LaunchError};

/// Who started the race being shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initiator {
    /// This viewer
    Local,
    /// Another connection, by relay socket id
    Remote(Uuid),
}

/// What this viewer is showing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RaceView {
    #[default]
    Selecting,
    Racing {
        rocket_ids: Selection,
        started_by: Initiator,
    },
}

/// One applied relay event, reported by [`SyncClient::next_update`]
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    Connected,
    Disconnected,
    /// The relay's selection was adopted at connect
    Bootstrapped(Selection),
    /// The local selection was re-announced instead of adopting the relay's
    Resynced(Selection),
    /// Another viewer changed the selection
    SelectionChanged(Selection),
    RaceLaunched {
        rocket_ids: Selection,
        initiator: Uuid,
    },
    Invitation(Selection),
    Collision(CollisionReport),
    RocketMoved(RocketPosition),
    /// The relay rejected something this viewer sent
    Rejected { code: String, message: String },
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid selection: {0}")]
    Selection(#[from] SelectionError),

    #[error("Failed to persist selection: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Failed to encode selection: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-viewer sync adapter
pub struct SyncClient {
    selection: Selection,
    store: SelectionStore,
    view: RaceView,
    /// Selection and launch announcements; never dropped while connected
    control_tx: mpsc::UnboundedSender<ClientMsg>,
    /// Game-view traffic; dropped when the connection falls behind
    game_tx: mpsc::Sender<ClientMsg>,
    events_rx: mpsc::Receiver<ConnectionEvent>,
    /// A stored selection existed at startup and has not been announced yet
    resync_pending: bool,
    /// The next `rocket-selection` is the relay's connect-time value
    awaiting_bootstrap: bool,
    connection: JoinHandle<()>,
}

impl SyncClient {
    /// Load the durable selection and start the relay connection
    pub async fn start(config: &ClientConfig) -> Self {
        let store = SelectionStore::new(config.store_path.clone());
        let stored = store.load().await;
        let resync_pending = stored.is_some();
        if let Some(selection) = &stored {
            info!(selection = %selection, "Loaded stored selection");
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let connection = connection::spawn(
            config.relay_url.clone(),
            config.reconnect_delay,
            Outbox {
                control: control_rx,
                game: game_rx,
            },
            events_tx,
        );

        Self {
            selection: stored.unwrap_or_default(),
            store,
            view: RaceView::default(),
            control_tx,
            game_tx,
            events_rx,
            resync_pending,
            awaiting_bootstrap: false,
            connection,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn view(&self) -> &RaceView {
        &self.view
    }

    /// Toggle a rocket in or out of the selection, persist it, then tell the
    /// relay
    pub async fn toggle(&mut self, rocket_id: &str) -> Result<&Selection, ClientError> {
        self.selection.toggle(rocket_id)?;
        self.store.save(&self.selection).await?;
        self.announce(ClientMsg::RocketSelection(self.selection.clone()));
        Ok(&self.selection)
    }

    /// Wait for the next relay event and apply it.
    ///
    /// Returns `None` once the connection task has stopped.
    pub async fn next_update(&mut self) -> Option<SyncUpdate> {
        let event = self.events_rx.recv().await?;

        let update = match event {
            ConnectionEvent::Connected => {
                self.awaiting_bootstrap = true;
                SyncUpdate::Connected
            }
            ConnectionEvent::Disconnected => SyncUpdate::Disconnected,
            ConnectionEvent::Message(msg) => self.apply(msg).await,
        };
        Some(update)
    }

    async fn apply(&mut self, msg: ServerMsg) -> SyncUpdate {
        match msg {
            ServerMsg::RocketSelection(selection) if self.awaiting_bootstrap => {
                self.awaiting_bootstrap = false;
                self.bootstrap(selection).await
            }
            ServerMsg::RocketSelection(selection) => {
                self.adopt(selection.clone()).await;
                SyncUpdate::SelectionChanged(selection)
            }
            ServerMsg::RaceLaunched(RaceLaunch {
                rocket_ids,
                initiator_socket_id,
            }) => {
                info!(initiator = %initiator_socket_id, rockets = %rocket_ids, "Race launched remotely");
                self.view = RaceView::Racing {
                    rocket_ids: rocket_ids.clone(),
                    started_by: Initiator::Remote(initiator_socket_id),
                };
                SyncUpdate::RaceLaunched {
                    rocket_ids,
                    initiator: initiator_socket_id,
                }
            }
            ServerMsg::RaceInvitation(selection) => SyncUpdate::Invitation(selection),
            ServerMsg::GameCollision(report) => SyncUpdate::Collision(report),
            ServerMsg::RocketMove(position) => SyncUpdate::RocketMoved(position),
            ServerMsg::Error { code, message } => {
                warn!(code = %code, message = %message, "Relay rejected a message");
                SyncUpdate::Rejected { code, message }
            }
        }
    }

    /// Handle the relay's connect-time selection.
    ///
    /// Only the first bootstrap after loading a stored selection re-announces
    /// it. Every later bootstrap is a relay value like any other and
    /// overwrites local state.
    async fn bootstrap(&mut self, relay_selection: Selection) -> SyncUpdate {
        if std::mem::take(&mut self.resync_pending) {
            debug!(selection = %self.selection, "Re-announcing stored selection");
            self.announce(ClientMsg::SyncRocketSelection(self.selection.clone()));
            return SyncUpdate::Resynced(self.selection.clone());
        }

        self.adopt(relay_selection.clone()).await;
        SyncUpdate::Bootstrapped(relay_selection)
    }

    /// Overwrite local state with a relay value
    async fn adopt(&mut self, selection: Selection) {
        self.selection = selection;
        if let Err(e) = self.store.save(&self.selection).await {
            warn!(error = %e, "Failed to persist relay selection");
        }
    }

    /// Announce a race this viewer started and switch to the race view
    pub(crate) fn announce_launch(&mut self) {
        self.announce(ClientMsg::LaunchRace(self.selection.clone()));
        self.view = RaceView::Racing {
            rocket_ids: self.selection.clone(),
            started_by: Initiator::Local,
        };
    }

    /// Go back to picking rockets ("another race?")
    pub fn reset_view(&mut self) {
        self.view = RaceView::Selecting;
    }

    /// Invite the other viewers to race the current selection
    pub fn send_invitation(&self) {
        self.send(ClientMsg::RaceInvitation(self.selection.clone()));
    }

    pub fn send_move(&self, position: RocketPosition) {
        self.send(ClientMsg::RocketMove(position));
    }

    pub fn send_collision(&self, report: CollisionReport) {
        self.send(ClientMsg::RocketCollision(report));
    }

    /// Queue a selection or launch message. It goes out ahead of any queued
    /// game traffic, and is only lost if the connection is down.
    fn announce(&self, msg: ClientMsg) {
        if self.control_tx.send(msg).is_err() {
            warn!("Relay connection task stopped, announcement dropped");
        }
    }

    /// Queue game-view traffic. If the connection cannot take it, it is lost.
    fn send(&self, msg: ClientMsg) {
        if let Err(e) = self.game_tx.try_send(msg) {
            warn!(error = %e, "Dropped message for relay");
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.connection.abort();
    }
}
