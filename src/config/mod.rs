//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Relay server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Allowed client origins for CORS ("*" or a comma-separated list)
    pub client_origin: String,
    /// Capacity of the fan-out broadcast channel
    pub channel_capacity: usize,
    /// Max inbound messages per second per connection
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_var("LOG_FORMAT", LogFormat::Pretty)?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            channel_capacity: parse_var("RELAY_CHANNEL_CAPACITY", 64)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", 30)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            client_origin: "*".to_string(),
            channel_capacity: 64,
            input_rate_limit: 30,
        }
    }
}

/// Client-side configuration for one race viewer
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    pub relay_url: String,
    /// GraphQL HTTP endpoint
    pub graphql_url: String,
    /// GraphQL subscription endpoint (graphql-transport-ws)
    pub graphql_ws_url: String,
    /// File holding the durable selection
    pub store_path: PathBuf,
    /// Fixed delay between relay reconnect attempts
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let graphql_url = env::var("GRAPHQL_URL")
            .unwrap_or_else(|_| "http://localhost:4000/graphql".to_string());
        let graphql_ws_url =
            env::var("GRAPHQL_WS_URL").unwrap_or_else(|_| http_to_ws(&graphql_url));

        Ok(Self {
            relay_url: env::var("RELAY_URL")
                .unwrap_or_else(|_| "ws://localhost:3001/ws".to_string()),
            graphql_url,
            graphql_ws_url,
            store_path: env::var("SELECTION_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("selected_rockets.json")),
            reconnect_delay: Duration::from_millis(parse_var("RELAY_RECONNECT_DELAY_MS", 1000)?),
        })
    }
}

/// Log output format for the tracing subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Turn an http(s) URL into the matching ws(s) URL
pub fn http_to_ws(url: &str) -> String {
    url.replace("https://", "wss://").replace("http://", "ws://")
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
