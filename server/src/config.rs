use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::state::WsSettings;

/// Command-line layer. Only flags the user actually passed are serialized,
/// so unset ones fall through to env, `parley.toml` and the defaults.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "parley-server", version, about = "Parley direct-messaging server")]
pub struct Cli {
    /// Port to listen on [default: 5001]
    #[arg(long, env = "PARLEY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "PARLEY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys, images) [default: ./data]
    #[arg(long, env = "PARLEY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Capacity of each connection's outbound queue [default: 256]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_queue: Option<usize>,

    /// Seconds between WebSocket pings [default: 30]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before dropping the connection [default: 10]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,

    /// Largest accepted image attachment, in bytes [default: 5242880]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_image_bytes: Option<usize>,

    /// Print an access token for the given user id and exit (development aid)
    #[arg(long, value_name = "USER_ID")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<String>,
}

/// Effective server settings after layering.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub outbound_queue: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub max_image_bytes: usize,
    #[serde(default)]
    pub issue_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5001,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            outbound_queue: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            max_image_bytes: 5 * 1024 * 1024,
            issue_token: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("PARLEY_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn ws_settings(&self) -> WsSettings {
        WsSettings {
            // a zero-capacity mpsc channel panics
            outbound_queue: self.outbound_queue.max(1),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5001)
# port = 5001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database, JWT signing key and images
# data_dir = "./data"

# ---- Live connections ----

# Frames buffered per connection before new ones are dropped
# outbound_queue = 256

# Ping interval and pong deadline, in seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Attachments ----

# Largest accepted image, in bytes (default: 5 MiB)
# max_image_bytes = 5242880
"#
    .to_string()
}
