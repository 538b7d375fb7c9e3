use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::messages::{MessageStore, SqliteMessageStore};
use crate::db::DbPool;
use crate::media::{ImageHost, LocalImageHost, MediaError};
use crate::sentiment::{LexiconScorer, SentimentScorer};
use crate::ws::ConnectionRegistry;

/// Allowance for JSON framing, the data URL prefix and message text.
const BODY_OVERHEAD: usize = 64 * 1024;

/// Per-connection transport settings.
#[derive(Debug, Clone, Copy)]
pub struct WsSettings {
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
    /// Interval between server pings
    pub ping_interval: Duration,
    /// How long to wait for a pong before closing
    pub pong_timeout: Duration,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Message persistence
    pub store: Arc<dyn MessageStore>,
    /// Image upload collaborator
    pub images: Arc<dyn ImageHost>,
    /// Directory `GET /images/{name}` serves from
    pub image_dir: PathBuf,
    /// Sentiment labelling of message text
    pub sentiment: Arc<dyn SentimentScorer>,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Arc<Vec<u8>>,
    /// Live WebSocket connections and the user → connection map
    pub connections: Arc<ConnectionRegistry>,
    pub ws: WsSettings,
    /// Request body cap; room for a base64 image at the configured limit
    pub max_body_bytes: usize,
}

impl AppState {
    /// Production wiring: SQLite store, images under `data_dir/images`,
    /// lexicon sentiment scorer and an empty registry.
    pub fn new(
        db: DbPool,
        data_dir: &str,
        jwt_secret: Vec<u8>,
        max_image_bytes: usize,
        ws: WsSettings,
    ) -> Result<Self, MediaError> {
        let images = LocalImageHost::new(data_dir, max_image_bytes)?;
        let image_dir = images.dir().to_path_buf();

        Ok(Self {
            store: Arc::new(SqliteMessageStore::new(db)),
            images: Arc::new(images),
            image_dir,
            sentiment: Arc::new(LexiconScorer),
            jwt_secret: Arc::new(jwt_secret),
            connections: Arc::new(ConnectionRegistry::new()),
            ws,
            max_body_bytes: max_image_bytes.saturating_mul(4) / 3 + BODY_OVERHEAD,
        })
    }
}
