// Shared harness for the integration tests: an in-process relay on an
// ephemeral port and a fake of the external GraphQL race API.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use rocket_race_relay::app::AppState;
use rocket_race_relay::config::{ClientConfig, Config};
use rocket_race_relay::http::build_router;
use rocket_race_relay::relay::RelayHub;

pub const WAIT: Duration = Duration::from_secs(5);

/// Start a relay on 127.0.0.1 with a random port and a rate limit high
/// enough to stay out of the way
pub async fn start_relay() -> SocketAddr {
    start_relay_with(Config {
        input_rate_limit: 1_000,
        ..Config::default()
    })
    .await
}

/// Start a relay on 127.0.0.1 with a random port
pub async fn start_relay_with(config: Config) -> SocketAddr {
    let (hub, relay) = RelayHub::new(config.channel_capacity);
    tokio::spawn(hub.run());
    serve(build_router(AppState::new(config, relay))).await
}

/// A relay on its own runtime, so stopping it closes every connection it
/// holds, the way a crashed or restarted server would
pub struct RelayProcess {
    pub addr: SocketAddr,
    runtime: Option<Runtime>,
}

impl RelayProcess {
    /// Start on `addr`; port 0 picks a free one
    pub async fn start(addr: SocketAddr) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let (hub, relay) = RelayHub::new(64);
        runtime.spawn(hub.run());

        let config = Config {
            input_rate_limit: 1_000,
            ..Config::default()
        };
        let router = build_router(AppState::new(config, relay));
        let (bound_tx, bound_rx) = oneshot::channel();
        runtime.spawn(async move {
            // a restart can race the previous listener being dropped
            let mut attempts = 0;
            let listener = loop {
                match TcpListener::bind(addr).await {
                    Ok(listener) => break listener,
                    Err(e) if attempts < 50 => {
                        attempts += 1;
                        tracing::debug!(error = %e, "Relay port busy, retrying");
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Err(e) => panic!("could not bind relay on {addr}: {e}"),
                }
            };
            bound_tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        let addr = bound_rx.await.unwrap();
        Self {
            addr,
            runtime: Some(runtime),
        }
    }

    /// Drop the relay and all of its connections
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        // a blocking shutdown would panic inside the test's runtime
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Start the fake GraphQL API on 127.0.0.1 with a random port
pub async fn start_fake_api() -> SocketAddr {
    let router = Router::new().route("/graphql", post(graphql_http).get(graphql_ws));
    serve(router).await
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Client config pointing at a relay and (optionally) the fake API
pub fn client_config(relay: SocketAddr, api: Option<SocketAddr>, store: &Path) -> ClientConfig {
    // port 9 (discard) is never listening in the test environment
    let api = api.map(|a| a.to_string()).unwrap_or_else(|| "127.0.0.1:9".to_string());
    ClientConfig {
        relay_url: format!("ws://{relay}/ws"),
        graphql_url: format!("http://{api}/graphql"),
        graphql_ws_url: format!("ws://{api}/graphql"),
        store_path: store.to_path_buf(),
        reconnect_delay: Duration::from_millis(50),
    }
}

fn racer(id: &Value) -> Value {
    json!({"id": id, "progress": 0.0, "exploded": false})
}

/// Fake GraphQL over HTTP. `startRace` fails when rocket1 is "boom".
async fn graphql_http(Json(body): Json<Value>) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default();
    let variables = &body["variables"];

    if query.contains("startRace") {
        if variables["rocket1"] == "boom" {
            return Json(json!({
                "data": null,
                "errors": [{"message": "rocket boom exploded on the pad"}]
            }));
        }
        return Json(json!({"data": {"startRace": {
            "id": "race-1",
            "rocket1": racer(&variables["rocket1"]),
            "rocket2": racer(&variables["rocket2"]),
            "winner": null
        }}}));
    }

    if query.contains("rockets") {
        return Json(json!({"data": {"rockets": [
            {"id": "r1", "name": "Falcon", "description": "Reusable", "image": "/falcon.png"},
            {"id": "r2", "name": "Saturn", "description": "Heavy lift", "image": null}
        ]}}));
    }

    if query.contains("races") {
        return Json(json!({"data": {"races": [{
            "id": "race-0",
            "rocket1": {"id": "r1", "progress": 100.0, "exploded": false},
            "rocket2": {"id": "r2", "progress": 61.5, "exploded": true},
            "winner": {"id": "r1"}
        }]}}));
    }

    Json(json!({"data": null, "errors": [{"message": "unknown operation"}]}))
}

/// Fake graphql-transport-ws endpoint: acks, then streams two progress
/// updates for the subscribed rocket and completes.
async fn graphql_ws(ws: WebSocketUpgrade) -> Response {
    ws.protocols(["graphql-transport-ws"])
        .on_upgrade(run_subscription)
}

async fn run_subscription(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => return,
        };

        match frame["type"].as_str() {
            Some("connection_init") => {
                let _ = socket
                    .send(Message::Text(json!({"type": "connection_ack"}).to_string()))
                    .await;
            }
            Some("subscribe") => {
                let id = frame["id"].clone();
                let vars = &frame["payload"]["variables"];
                for (progress, exploded) in [(50.0, false), (100.0, false)] {
                    let next = json!({
                        "id": id,
                        "type": "next",
                        "payload": {"data": {"rocketProgress": {
                            "raceId": vars["raceId"],
                            "rocketId": vars["rocketId"],
                            "progress": progress,
                            "exploded": exploded
                        }}}
                    });
                    let _ = socket.send(Message::Text(next.to_string())).await;
                }
                let _ = socket
                    .send(Message::Text(json!({"id": id, "type": "complete"}).to_string()))
                    .await;
            }
            _ => {}
        }
    }
}
