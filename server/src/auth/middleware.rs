use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use parley_proto::UserId;
use serde::{Deserialize, Serialize};

use crate::auth::jwt;
use crate::error::ApiError;

/// Name of the cookie browsers carry the token in.
pub const TOKEN_COOKIE: &str = "jwt";

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Authenticated caller, extracted from `Authorization: Bearer` or the `jwt`
/// cookie.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .ok_or(ApiError::Unauthorized("No token provided"))?;

        // Set by the inject_jwt_secret middleware layer
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| ApiError::Internal("JWT secret missing from request extensions".into()))?;

        let user_id = jwt::authenticate(&jwt_secret.0, &token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected request token");
            ApiError::Unauthorized("Invalid token")
        })?;

        Ok(AuthUser(user_id))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// JWT secret stored in request extensions for the AuthUser extractor
#[derive(Clone)]
pub struct JwtSecret(pub std::sync::Arc<Vec<u8>>);
