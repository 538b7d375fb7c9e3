use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parley_proto::UserId;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};

use crate::state::{AppState, WsSettings};
use crate::ws::{ConnectionHandle, ConnectionRegistry};

/// Keeps a connection registered for as long as it lives.
///
/// Dropping the guard unregisters the handle, so every way out of
/// [`run_connection`] (close frame, socket error, pong timeout, panic)
/// releases the registry entry synchronously.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl Registration {
    fn new(registry: Arc<ConnectionRegistry>, handle: ConnectionHandle) -> Self {
        registry.register(handle.clone());
        Self { registry, handle }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.handle);
    }
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from the bounded outbound queue
/// - Ping task: sends periodic pings and flags the connection dead on pong timeout
/// - Reader loop (this task): answers pings, feeds pongs, exits on close/error
///
/// Clients only receive over the socket; sending messages goes through HTTP.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let settings = state.ws;
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(settings.outbound_queue);

    let handle = ConnectionHandle::new(user_id.clone(), tx.clone());
    let connection_id = handle.id();

    // The writer must be draining before registration queues the first
    // presence snapshot for this socket.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));
    let registration = Registration::new(state.connections.clone(), handle);

    tracing::info!(
        user_id = %user_id,
        connection_id = connection_id,
        "WebSocket actor started"
    );

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();
    let ping_handle = tokio::spawn(ping_task(tx.clone(), pong_rx, dead_tx, settings));

    loop {
        let next = tokio::select! {
            msg = ws_receiver.next() => msg,
            _ = &mut dead_rx => {
                tracing::warn!(user_id = %user_id, connection_id = connection_id, "Pong timeout, dropping connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
                Message::Text(text) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "Ignoring client text frame: {}",
                        text.as_str().chars().take(100).collect::<String>()
                    );
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id = %user_id, "Ignoring client binary frame");
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Unregister before tearing down the writer so no push races a half-dead socket
    drop(registration);
    ping_handle.abort();
    writer_handle.abort();

    tracing::info!(
        user_id = %user_id,
        connection_id = connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives frames from the outbound queue and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Ping task: pings every `ping_interval`; if no pong arrives within
/// `pong_timeout`, queues a close frame and fires `dead`.
async fn ping_task(
    tx: mpsc::Sender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    dead: oneshot::Sender<()>,
    settings: WsSettings,
) {
    let mut ping_timer = interval(settings.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).await.is_err() {
            // Writer task is gone
            break;
        }

        match timeout(settings.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                let _ = tx.try_send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                let _ = dead.send(());
                break;
            }
        }
    }
}
