//! Scripted in-memory chat server shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chatsync_core::error::{Result, SyncError};
use chatsync_core::types::{
    ConversationId, ConversationSummary, ServerMessage, UserId, UserProfile,
};
use chatsync_core::{ChatApi, SyncConfig};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const ME: UserId = 1;
pub const TOKEN: &str = "test-token";

#[derive(Default)]
pub struct MockState {
    pub conversations: Vec<ConversationSummary>,
    pub active_users: Vec<UserId>,
    pub messages: HashMap<ConversationId, Vec<ServerMessage>>,
    pub profiles: HashMap<UserId, UserProfile>,
    /// Conversation id handed out by get-or-create, per peer
    pub direct: HashMap<UserId, ConversationId>,
    pub next_message_id: i64,
    /// Timestamp stamped on sent messages (defaults to now)
    pub send_time: Option<DateTime<Utc>>,
    pub fail_presence: bool,
    pub fail_conversations: bool,
    pub fail_send: bool,
}

/// `ChatApi` backed by `MockState`, recording every call
#[derive(Default)]
pub struct MockChatApi {
    pub state: Mutex<MockState>,
    calls: Mutex<Vec<String>>,
    /// Calls named here wait for a notification before answering
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl MockChatApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        api.state.lock().unwrap().next_message_id = 1000;
        Arc::new(api)
    }

    pub fn with_state(f: impl FnOnce(&mut MockState)) -> Arc<Self> {
        let api = Self::new();
        f(&mut api.state.lock().unwrap());
        api
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// Hold `call` (e.g. `"list_messages:10"`) until the returned handle is notified
    pub fn gate(&self, call: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(call.to_string(), notify.clone());
        notify
    }

    async fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call.clone());
        let gate = self.gates.lock().unwrap().get(&call).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

fn unavailable() -> SyncError {
    SyncError::Api {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn list_conversations(&self, _token: &str) -> Result<Vec<ConversationSummary>> {
        self.record("list_conversations".into()).await;
        let state = self.state.lock().unwrap();
        if state.fail_conversations {
            return Err(unavailable());
        }
        Ok(state.conversations.clone())
    }

    async fn list_active_users(&self, _token: &str) -> Result<Vec<UserId>> {
        self.record("list_active_users".into()).await;
        let state = self.state.lock().unwrap();
        if state.fail_presence {
            return Err(unavailable());
        }
        Ok(state.active_users.clone())
    }

    async fn get_or_create_conversation(
        &self,
        _token: &str,
        peer_id: UserId,
    ) -> Result<ConversationId> {
        self.record(format!("get_or_create:{}", peer_id)).await;
        let mut state = self.state.lock().unwrap();
        let next = 500 + state.direct.len() as ConversationId;
        Ok(*state.direct.entry(peer_id).or_insert(next))
    }

    async fn list_messages(
        &self,
        _token: &str,
        conversation_id: ConversationId,
    ) -> Result<Vec<ServerMessage>> {
        self.record(format!("list_messages:{}", conversation_id)).await;
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, _token: &str, conversation_id: ConversationId) -> Result<()> {
        self.record(format!("mark_read:{}", conversation_id)).await;
        let mut state = self.state.lock().unwrap();
        for c in state
            .conversations
            .iter_mut()
            .filter(|c| c.conversation_id == conversation_id)
        {
            c.unread_count = 0;
        }
        for m in state.messages.entry(conversation_id).or_default() {
            m.is_read = true;
        }
        Ok(())
    }

    async fn send_message(
        &self,
        _token: &str,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<ServerMessage> {
        self.record(format!("send_message:{}", conversation_id)).await;
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(unavailable());
        }
        let id = state.next_message_id;
        state.next_message_id += 1;
        let msg = ServerMessage {
            id,
            conversation_id,
            sender_id: ME,
            content: content.to_string(),
            created_at: state.send_time.unwrap_or_else(Utc::now),
            is_read: true,
        };
        state
            .messages
            .entry(conversation_id)
            .or_default()
            .push(msg.clone());
        if let Some(c) = state
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            c.last_message_text = Some(msg.content.clone());
            c.last_message_time = Some(msg.created_at);
        }
        Ok(msg)
    }

    async fn get_user_profile(&self, _token: &str, user_id: UserId) -> Result<UserProfile> {
        self.record(format!("get_user_profile:{}", user_id)).await;
        let state = self.state.lock().unwrap();
        state.profiles.get(&user_id).cloned().ok_or(SyncError::Api {
            status: 404,
            body: "no such user".to_string(),
        })
    }
}

pub fn config() -> SyncConfig {
    SyncConfig {
        auth_token: Some(TOKEN.to_string()),
        user_id: Some(ME),
        ..Default::default()
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn summary(conversation_id: ConversationId, peer_id: UserId, unread: u32) -> ConversationSummary {
    ConversationSummary {
        conversation_id,
        peer_id,
        peer_display_name: format!("user{}", peer_id),
        peer_nationality: None,
        last_message_text: None,
        last_message_time: None,
        unread_count: unread,
    }
}

pub fn message(
    id: i64,
    conversation_id: ConversationId,
    sender_id: UserId,
    content: &str,
    secs: i64,
) -> ServerMessage {
    ServerMessage {
        id,
        conversation_id,
        sender_id,
        content: content.to_string(),
        created_at: at(secs),
        is_read: false,
    }
}

/// Let spawned tasks run until the runtime is idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
