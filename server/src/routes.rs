use axum::{extract::DefaultBodyLimit, middleware, routing, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, presence};
use crate::media;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the AuthUser extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Authenticated routes (AuthUser extractor validates the token)
    let message_routes = Router::new()
        .route(
            "/api/messages/send/{receiver_id}",
            routing::post(messages::send_message),
        )
        .route(
            "/api/messages/{partner_id}",
            routing::get(messages::get_messages),
        )
        .route("/api/presence", routing::get(presence::get_presence));

    // Public routes
    let public_routes = Router::new()
        .route("/images/{name}", routing::get(media::get_image))
        .route("/health", routing::get(health_check));

    // WebSocket endpoint (auth via query param, not header)
    let ws_routes = Router::new().route("/ws", routing::get(ws_handler::ws_upgrade));

    Router::new()
        .merge(message_routes)
        .merge(public_routes)
        .merge(ws_routes)
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
