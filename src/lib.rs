//! Rocket Race Relay - real-time selection sync for the two-player rocket race
//!
//! The crate has two halves:
//! - the relay server (`relay`, `ws`, `http`, `app`): a WebSocket hub that
//!   holds the shared rocket selection and fans out selection, launch and
//!   in-race events to every other viewer
//! - the client side (`client`): a per-viewer sync adapter with durable local
//!   state, the race launch trigger, and a GraphQL client for the race API

pub mod app;
pub mod client;
pub mod config;
pub mod http;
pub mod relay;
pub mod util;
pub mod ws;
