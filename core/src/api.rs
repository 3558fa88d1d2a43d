/// Chat REST collaborator: the operations the sync core consumes
///
/// Endpoints (relative to the configured base URL):
///   GET  /chat/conversations
///   POST /chat/conversations                  body: {"peerId": n}
///   GET  /chat/conversations/:id/messages
///   POST /chat/conversations/:id/messages     body: {"content": "..."}
///   POST /chat/conversations/:id/read
///   GET  /chat/active-users
///   GET  /users/:id
use crate::error::{Result, SyncError};
use crate::types::{ConversationId, ConversationSummary, ServerMessage, UserId, UserProfile};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Server-side operations used by the pollers and the dispatcher.
///
/// Every call carries the bearer token. Implementations must be cheap to
/// share across tasks.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>>;

    async fn list_active_users(&self, token: &str) -> Result<Vec<UserId>>;

    async fn get_or_create_conversation(&self, token: &str, peer_id: UserId)
        -> Result<ConversationId>;

    /// Full history; ordering is not guaranteed.
    async fn list_messages(
        &self,
        token: &str,
        conversation_id: ConversationId,
    ) -> Result<Vec<ServerMessage>>;

    async fn mark_read(&self, token: &str, conversation_id: ConversationId) -> Result<()>;

    async fn send_message(
        &self,
        token: &str,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<ServerMessage>;

    async fn get_user_profile(&self, token: &str, user_id: UserId) -> Result<UserProfile>;
}

/// Some deployments wrap payloads as `{"data": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

#[derive(Deserialize)]
struct ConversationHandle {
    #[serde(rename = "conversationId", alias = "id")]
    conversation_id: ConversationId,
}

/// `ChatApi` over HTTP/JSON
#[derive(Clone)]
pub struct HttpChatApi {
    http: HttpClient,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, None)
    }

    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = HttpClient::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let resp = self.http.get(self.url(path)).bearer_auth(token).send().await?;
        decode(resp).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        debug!("POST {}", path);
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        decode(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::Api {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let bytes = check_status(resp).await?.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    Ok(envelope.into_inner())
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>> {
        self.get_json(token, "/chat/conversations").await
    }

    async fn list_active_users(&self, token: &str) -> Result<Vec<UserId>> {
        self.get_json(token, "/chat/active-users").await
    }

    async fn get_or_create_conversation(
        &self,
        token: &str,
        peer_id: UserId,
    ) -> Result<ConversationId> {
        let handle: ConversationHandle = self
            .post_json(
                token,
                "/chat/conversations",
                serde_json::json!({ "peerId": peer_id }),
            )
            .await?;
        Ok(handle.conversation_id)
    }

    async fn list_messages(
        &self,
        token: &str,
        conversation_id: ConversationId,
    ) -> Result<Vec<ServerMessage>> {
        self.get_json(token, &format!("/chat/conversations/{}/messages", conversation_id))
            .await
    }

    async fn mark_read(&self, token: &str, conversation_id: ConversationId) -> Result<()> {
        let path = format!("/chat/conversations/{}/read", conversation_id);
        debug!("POST {}", path);
        let resp = self.http.post(self.url(&path)).bearer_auth(token).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        token: &str,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<ServerMessage> {
        self.post_json(
            token,
            &format!("/chat/conversations/{}/messages", conversation_id),
            serde_json::json!({ "content": content }),
        )
        .await
    }

    async fn get_user_profile(&self, token: &str, user_id: UserId) -> Result<UserProfile> {
        self.get_json(token, &format!("/users/{}", user_id)).await
    }
}
