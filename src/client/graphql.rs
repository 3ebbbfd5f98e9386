//! GraphQL race API client (rockets, races, progress subscription)

use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::ClientConfig;

const ROCKETS_QUERY: &str = "query { rockets { id name description image } }";

const START_RACE_MUTATION: &str = "mutation StartRace($rocket1: ID!, $rocket2: ID!) { \
    startRace(rocket1: $rocket1, rocket2: $rocket2) { \
        id \
        rocket1 { id progress exploded } \
        rocket2 { id progress exploded } \
        winner { id } \
    } \
}";

const RACES_QUERY: &str = "query { races { \
    id \
    rocket1 { id progress exploded } \
    rocket2 { id progress exploded } \
    winner { id } \
} }";

const PROGRESS_SUBSCRIPTION: &str = "subscription RocketProgress($raceId: ID!, $rocketId: ID!) { \
    rocketProgress(raceId: $raceId, rocketId: $rocketId) { raceId rocketId progress exploded } \
}";

/// WebSocket sub-protocol spoken by the subscription endpoint
pub const SUBSCRIPTION_PROTOCOL: &str = "graphql-transport-ws";

/// A rocket from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocketInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// One racer's state within a race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacerState {
    pub id: String,
    pub progress: f64,
    pub exploded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RocketRef {
    pub id: String,
}

/// A race as returned by `startRace` and `races`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    pub rocket1: RacerState,
    pub rocket2: RacerState,
    #[serde(default)]
    pub winner: Option<RocketRef>,
}

/// One progress update from the `rocketProgress` subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RocketProgress {
    pub race_id: String,
    pub rocket_id: String,
    pub progress: f64,
    pub exploded: bool,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T, ApiError> {
        if !self.errors.is_empty() {
            let messages: Vec<String> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(ApiError::GraphQl(messages.join("; ")));
        }
        self.data.ok_or(ApiError::MissingData)
    }
}

#[derive(Deserialize)]
struct RocketsData {
    rockets: Vec<RocketInfo>,
}

#[derive(Deserialize)]
struct StartRaceData {
    #[serde(rename = "startRace")]
    start_race: Race,
}

#[derive(Deserialize)]
struct RacesData {
    races: Vec<Race>,
}

#[derive(Deserialize)]
struct ProgressData {
    #[serde(rename = "rocketProgress")]
    rocket_progress: RocketProgress,
}

/// Client for the external race API
#[derive(Clone)]
pub struct RaceApi {
    client: Client,
    http_url: String,
    ws_url: String,
}

impl RaceApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            http_url: config.graphql_url.clone(),
            ws_url: config.graphql_ws_url.clone(),
        }
    }

    /// POST a GraphQL operation and unwrap its `data`
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(&self.http_url)
            .header("Content-Type", "application/json")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(ApiError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }

        let body: GraphQlResponse<T> = response.json().await.map_err(ApiError::Request)?;
        body.into_data()
    }

    /// Rocket catalog
    pub async fn rockets(&self) -> Result<Vec<RocketInfo>, ApiError> {
        let data: RocketsData = self.execute(ROCKETS_QUERY, json!({})).await?;
        Ok(data.rockets)
    }

    /// Start a race between two rockets
    pub async fn start_race(&self, rocket1: &str, rocket2: &str) -> Result<Race, ApiError> {
        let data: StartRaceData = self
            .execute(
                START_RACE_MUTATION,
                json!({ "rocket1": rocket1, "rocket2": rocket2 }),
            )
            .await?;
        Ok(data.start_race)
    }

    /// Past races
    pub async fn races(&self) -> Result<Vec<Race>, ApiError> {
        let data: RacesData = self.execute(RACES_QUERY, json!({})).await?;
        Ok(data.races)
    }

    /// Open a progress subscription for one rocket in one race
    pub async fn subscribe_progress(
        &self,
        race_id: &str,
        rocket_id: &str,
    ) -> Result<ProgressSubscription, ApiError> {
        let mut request = self.ws_url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBSCRIPTION_PROTOCOL),
        );

        let (mut socket, _) = connect_async(request).await?;

        send_frame(&mut socket, json!({ "type": "connection_init" })).await?;
        loop {
            let frame = next_frame(&mut socket)
                .await?
                .ok_or_else(|| ApiError::Protocol("closed before connection_ack".into()))?;
            match frame.kind.as_str() {
                "connection_ack" => break,
                "ping" => send_frame(&mut socket, json!({ "type": "pong" })).await?,
                other => {
                    return Err(ApiError::Protocol(format!(
                        "unexpected {other} before connection_ack"
                    )))
                }
            }
        }

        let id = "1".to_string();
        send_frame(
            &mut socket,
            json!({
                "id": id,
                "type": "subscribe",
                "payload": {
                    "query": PROGRESS_SUBSCRIPTION,
                    "variables": { "raceId": race_id, "rocketId": rocket_id },
                },
            }),
        )
        .await?;

        debug!(race_id, rocket_id, "Subscribed to rocket progress");
        Ok(ProgressSubscription {
            socket,
            id,
            done: false,
        })
    }
}

type ApiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame of the graphql-transport-ws protocol
#[derive(Debug, Deserialize)]
struct WsFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

async fn send_frame(socket: &mut ApiSocket, frame: Value) -> Result<(), ApiError> {
    socket.send(Message::Text(frame.to_string())).await?;
    Ok(())
}

/// Next protocol frame, or `None` once the socket closes
async fn next_frame(socket: &mut ApiSocket) -> Result<Option<WsFrame>, ApiError> {
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

/// Live `rocketProgress` subscription
pub struct ProgressSubscription {
    socket: ApiSocket,
    id: String,
    done: bool,
}

impl ProgressSubscription {
    /// Next progress update. `None` once the server completes the
    /// subscription or closes the socket.
    pub async fn next(&mut self) -> Option<Result<RocketProgress, ApiError>> {
        if self.done {
            return None;
        }

        loop {
            let frame = match next_frame(&mut self.socket).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if frame.id.as_deref().is_some_and(|id| id != self.id) {
                continue;
            }

            match frame.kind.as_str() {
                "next" => return Some(parse_progress(frame.payload)),
                "error" => {
                    self.done = true;
                    let message = frame
                        .payload
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "subscription error".to_string());
                    return Some(Err(ApiError::GraphQl(message)));
                }
                "complete" => {
                    self.done = true;
                    return None;
                }
                "ping" => {
                    if let Err(e) = send_frame(&mut self.socket, json!({ "type": "pong" })).await {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                "pong" => {}
                other => warn!(kind = other, "Ignoring unknown subscription frame"),
            }
        }
    }

    /// Stop the subscription and close the socket
    pub async fn close(mut self) -> Result<(), ApiError> {
        if !self.done {
            send_frame(&mut self.socket, json!({ "id": self.id, "type": "complete" })).await?;
        }
        self.socket.close(None).await?;
        Ok(())
    }
}

fn parse_progress(payload: Option<Value>) -> Result<RocketProgress, ApiError> {
    let payload = payload.ok_or(ApiError::MissingData)?;
    let response: GraphQlResponse<ProgressData> = serde_json::from_value(payload)?;
    Ok(response.into_data()?.rocket_progress)
}

/// Race API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Response carried no data")]
    MissingData,

    #[error("Subscription socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Subscription protocol error: {0}")]
    Protocol(String),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}
