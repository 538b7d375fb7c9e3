//! REST calls against the Parley server.

use std::future::Future;

use parley_proto::{ErrorBody, Message, SendMessageRequest, UserId};
use reqwest::Response;

use crate::error::ClientError;

/// Where a conversation's persisted history comes from.
pub trait HistorySource {
    fn fetch_history(
        &self,
        partner: &UserId,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// `base_url` without trailing slash, e.g. `http://localhost:5001`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// `GET /api/messages/{partner}`
    pub async fn history(&self, partner: &UserId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/messages/{}", self.base_url, partner))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    /// `POST /api/messages/send/{receiver}`; returns the stored message.
    pub async fn send_message(
        &self,
        receiver: &UserId,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/messages/send/{}", self.base_url, receiver))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    /// `GET /api/presence`
    pub async fn online_users(&self) -> Result<Vec<UserId>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/presence", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

impl HistorySource for ApiClient {
    async fn fetch_history(&self, partner: &UserId) -> Result<Vec<Message>, ClientError> {
        self.history(partner).await
    }
}

/// Turn a non-2xx answer into [`ClientError::Status`], keeping the server's message.
async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(ClientError::Status { status, message })
}
