//! WebSocket protocol message definitions
//! These are the wire types for client-relay communication.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::relay::Selection;

/// Messages sent from client to relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMsg {
    /// The sender changed the selection
    RocketSelection(Selection),

    /// The sender re-announces the selection it loaded from local storage
    SyncRocketSelection(Selection),

    /// The sender started a race with these rockets
    LaunchRace(Selection),

    /// Invite the other viewers to race these rockets
    RaceInvitation(Selection),

    /// A rocket hit an asteroid in the sender's game view
    RocketCollision(CollisionReport),

    /// A rocket moved in the sender's game view
    RocketMove(RocketPosition),
}

impl ClientMsg {
    /// Wire name of the event, for logging
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RocketSelection(_) => "rocket-selection",
            Self::SyncRocketSelection(_) => "sync-rocket-selection",
            Self::LaunchRace(_) => "launch-race",
            Self::RaceInvitation(_) => "race-invitation",
            Self::RocketCollision(_) => "rocket-collision",
            Self::RocketMove(_) => "rocket-move",
        }
    }

    /// Game-view traffic that is subject to the per-connection rate limit.
    /// Selection and launch events always get through.
    pub fn is_throttled(&self) -> bool {
        matches!(
            self,
            Self::RaceInvitation(_) | Self::RocketCollision(_) | Self::RocketMove(_)
        )
    }
}

/// Messages sent from relay to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// Current selection: sent once on connect, then on every change made
    /// by another client
    RocketSelection(Selection),

    /// Another client launched a race
    RaceLaunched(RaceLaunch),

    /// Another client sent a race invitation
    RaceInvitation(Selection),

    /// Another client reported a collision
    GameCollision(CollisionReport),

    /// Another client moved a rocket
    RocketMove(RocketPosition),

    /// The last message from this client was rejected
    Error { code: String, message: String },
}

/// Launch announcement fanned out to every other viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceLaunch {
    pub rocket_ids: Selection,
    /// Connection that launched the race (attribution only)
    pub initiator_socket_id: Uuid,
}

/// Rocket/asteroid collision seen by one viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionReport {
    pub rocket_id: String,
    pub asteroid_id: String,
}

/// Rocket position in game-view coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocketPosition {
    pub id: String,
    pub x: f32,
    pub y: f32,
}

/// Error codes carried by [`ServerMsg::Error`]
pub mod error_code {
    /// The frame was not valid JSON or did not match any event schema
    pub const MALFORMED: &str = "malformed_payload";
    /// The connection exceeded its message rate
    pub const RATE_LIMITED: &str = "rate_limited";
}
