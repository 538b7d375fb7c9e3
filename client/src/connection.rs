//! Live WebSocket connection to the server.

use std::sync::{Arc, OnceLock};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_proto::{ServerEvent, UserId};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;
use crate::events::{EventBus, EventFeed};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open socket plus the task reading from it.
///
/// The reader task owns the [`EventBus`] that `message.new` events are
/// published on; the connection only keeps an [`EventFeed`] of it, so the feed
/// ends when the reader does. The latest `presence.update` is kept in a watch
/// channel. Dropping the connection stops the reader.
pub struct Connection {
    feed: EventFeed,
    presence: watch::Receiver<Vec<UserId>>,
    close_code: Arc<OnceLock<u16>>,
    sink: SplitSink<WsStream, WsMessage>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connect to `ws_url` (e.g. `ws://localhost:5001/ws`) authenticating with
    /// `token`.
    pub async fn connect(ws_url: &str, token: &str) -> Result<Self, ClientError> {
        let sep = if ws_url.contains('?') { '&' } else { '?' };
        let (stream, _) = connect_async(format!("{ws_url}{sep}token={token}")).await?;
        let (sink, stream) = stream.split();

        let (presence_tx, presence) = watch::channel(Vec::new());
        let close_code = Arc::new(OnceLock::new());
        let bus = EventBus::default();
        let feed = bus.feed();
        let reader = tokio::spawn(read_loop(
            stream,
            bus,
            presence_tx,
            Arc::clone(&close_code),
        ));

        tracing::debug!(url = ws_url, "WebSocket connected");
        Ok(Self {
            feed,
            presence,
            close_code,
            sink,
            reader,
        })
    }

    /// Inbound messages. Listeners see [`Polled::Closed`](crate::events::Polled::Closed)
    /// once the socket is gone.
    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// Last presence set received. Empty until the first update arrives.
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.borrow().clone()
    }

    pub fn presence_changes(&self) -> watch::Receiver<Vec<UserId>> {
        self.presence.clone()
    }

    /// Close code sent by the server, if it closed the socket.
    pub fn close_code(&self) -> Option<u16> {
        self.close_code.get().copied()
    }

    pub fn is_open(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Send a close frame and stop reading.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        match self.sink.send(WsMessage::Close(None)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    bus: EventBus,
    presence: watch::Sender<Vec<UserId>>,
    close_code: Arc<OnceLock<u16>>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::NewMessage(message)) => {
                    tracing::debug!(
                        message_id = %message.id,
                        sender_id = %message.sender_id,
                        "Message pushed"
                    );
                    bus.publish(message);
                }
                Ok(ServerEvent::PresenceUpdate { online }) => {
                    presence.send_replace(online);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable server event");
                }
            },
            Ok(WsMessage::Close(frame)) => {
                if let Some(frame) = frame {
                    let code = u16::from(frame.code);
                    let _ = close_code.set(code);
                    tracing::info!(code, reason = frame.reason.as_str(), "Server closed the connection");
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket read failed");
                break;
            }
        }
    }
    tracing::debug!("WebSocket reader finished");
}
