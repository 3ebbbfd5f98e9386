//! HTTP surface: router, health, and the WebSocket route

pub mod routes;

pub use routes::build_router;
