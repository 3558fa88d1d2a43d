/// Outbound dispatcher: optimistic send with reconciliation
use crate::api::ChatApi;
use crate::config::Credentials;
use crate::conversations::ConversationSync;
use crate::error::{Result, SyncError};
use crate::messages::MessageSync;
use crate::types::{ConversationId, LocalId, PendingMessage, SendStatus, ServerMessage, SyncEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct OutboundDispatcher {
    api: Arc<dyn ChatApi>,
    credentials: Option<Credentials>,
    messages: MessageSync,
    conversations: ConversationSync,
    send_timeout: Duration,
    events: broadcast::Sender<SyncEvent>,
}

impl OutboundDispatcher {
    pub fn new(
        api: Arc<dyn ChatApi>,
        credentials: Option<Credentials>,
        messages: MessageSync,
        conversations: ConversationSync,
        send_timeout: Duration,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            credentials,
            messages,
            conversations,
            send_timeout,
            events,
        }
    }

    /// Append an optimistic message to the open buffer and send it.
    ///
    /// Empty content or a conversation that is not the open one is rejected
    /// before anything is appended. A failed send leaves the entry in the
    /// buffer marked `Failed`.
    pub async fn send(&self, conversation_id: ConversationId, content: &str) -> Result<ServerMessage> {
        let Some(creds) = &self.credentials else {
            return Err(SyncError::NotMounted);
        };
        let (generation, pending) = self
            .messages
            .append_pending(conversation_id, creds.user_id, content)
            .await?;
        self.deliver(creds, generation, pending).await
    }

    /// Resend a message previously marked `Failed`
    pub async fn retry(&self, local_id: LocalId) -> Result<ServerMessage> {
        let Some(creds) = &self.credentials else {
            return Err(SyncError::NotMounted);
        };
        let (generation, pending) = self.messages.take_failed(local_id).await?;
        debug!("Retrying {}", local_id);
        self.deliver(creds, generation, pending).await
    }

    /// Drop a message previously marked `Failed`
    pub async fn discard(&self, local_id: LocalId) -> Result<()> {
        self.messages.remove_failed(local_id).await
    }

    async fn deliver(
        &self,
        creds: &Credentials,
        generation: u64,
        pending: PendingMessage,
    ) -> Result<ServerMessage> {
        let sent = timeout(
            self.send_timeout,
            self.api
                .send_message(&creds.token, pending.conversation_id, &pending.content),
        )
        .await
        .unwrap_or_else(|_| {
            Err(SyncError::Timeout(format!(
                "send to conversation {} took longer than {:?}",
                pending.conversation_id, self.send_timeout
            )))
        });

        match sent {
            Ok(confirmed) => {
                info!(
                    "Message {} confirmed in conversation {}",
                    confirmed.id, pending.conversation_id
                );
                if !self
                    .messages
                    .confirm_pending(generation, pending.local_id, confirmed.clone())
                    .await
                {
                    debug!(
                        "Conversation {} no longer open, confirmation not applied",
                        pending.conversation_id
                    );
                }
                self.conversations.request_refresh();
                Ok(confirmed)
            }
            Err(e) => {
                warn!(
                    "Send to conversation {} failed: {}",
                    pending.conversation_id, e
                );
                self.messages
                    .set_status(generation, pending.local_id, SendStatus::Failed)
                    .await;
                let _ = self.events.send(SyncEvent::SendFailed {
                    conversation_id: pending.conversation_id,
                    local_id: pending.local_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
