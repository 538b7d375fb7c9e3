//! REST endpoints for sending and retrieving direct messages.
//!
//! Sending persists first and relays second; the HTTP response reflects the
//! persisted message regardless of whether live delivery happened.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parley_proto::{Message, SendMessageRequest, UserId};

use crate::auth::middleware::AuthUser;
use crate::chat::relay;
use crate::db::messages::NewMessage;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/messages/send/{receiver_id} -- Send a text and/or image message.
/// JWT auth required. Persists, then pushes to the receiver's live connection.
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender_id): AuthUser,
    Path(receiver_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let receiver_id = UserId::new(receiver_id);
    let text = body.text.filter(|t| !t.trim().is_empty());
    let image = body.image.filter(|i| !i.is_empty());

    if text.is_none() && image.is_none() {
        return Err(ApiError::BadRequest(
            "Message needs text or an image".to_string(),
        ));
    }

    let images = state.images.clone();
    let image_ref = match image {
        Some(data_url) => Some(tokio::task::spawn_blocking(move || images.upload(&data_url)).await??),
        None => None,
    };

    let (sentiment, sentiment_score) = match &text {
        Some(t) => {
            let (label, score) = state.sentiment.score(t);
            (Some(label), score)
        }
        None => (None, 0.0),
    };

    let store = state.store.clone();
    let new_message = NewMessage {
        sender_id,
        receiver_id,
        text,
        image_ref,
        sentiment,
        sentiment_score,
    };
    let message = tokio::task::spawn_blocking(move || store.persist(new_message)).await??;

    let delivery = relay::deliver(&state.connections, &message);
    tracing::info!(
        message_id = %message.id,
        sender_id = %message.sender_id,
        receiver_id = %message.receiver_id,
        delivery = ?delivery,
        "Message sent"
    );

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/{partner_id} -- Conversation history with a partner.
/// JWT auth required. Both directions, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(partner_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let partner = UserId::new(partner_id);
    let store = state.store.clone();

    let messages = tokio::task::spawn_blocking(move || store.history(&me, &partner)).await??;

    Ok(Json(messages))
}
