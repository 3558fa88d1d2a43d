/// Shared types for the chat synchronization layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type UserId = i64;
pub type ConversationId = i64;

/// Placeholder id carried by a message until the server confirms it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Summary of one conversation thread, as served by the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    /// The other participant
    pub peer_id: UserId,
    pub peer_display_name: String,
    #[serde(default)]
    pub peer_nationality: Option<String>,
    /// Preview text of the last message
    #[serde(default)]
    pub last_message_text: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

/// A message record as confirmed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub id: i64,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// Delivery state of a message that only exists locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// Send request issued, no answer yet
    Sending,
    /// Send request failed; can be retried or discarded
    Failed,
}

/// Optimistically appended message awaiting server confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub local_id: LocalId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: SendStatus,
}

impl PendingMessage {
    pub fn new(conversation_id: ConversationId, sender_id: UserId, content: String) -> Self {
        Self {
            local_id: LocalId::new(),
            conversation_id,
            sender_id,
            content,
            created_at: Utc::now(),
            status: SendStatus::Sending,
        }
    }

    /// Whether `confirmed` is the server's record of this message
    pub fn matches(&self, confirmed: &ServerMessage) -> bool {
        self.sender_id == confirmed.sender_id && self.content == confirmed.content
    }
}

/// Identity of a buffer entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Local(LocalId),
    Server(i64),
}

/// One entry of an open conversation's message buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Message {
    Pending(PendingMessage),
    Confirmed(ServerMessage),
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Pending(p) => MessageId::Local(p.local_id),
            Message::Confirmed(m) => MessageId::Server(m.id),
        }
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            Message::Confirmed(m) => Some(m.id),
            Message::Pending(_) => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Message::Pending(p) => p.created_at,
            Message::Confirmed(m) => m.created_at,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::Pending(p) => &p.content,
            Message::Confirmed(m) => &m.content,
        }
    }

    pub fn sender_id(&self) -> UserId {
        match self {
            Message::Pending(p) => p.sender_id,
            Message::Confirmed(m) => m.sender_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Message::Pending(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Message::Pending(p) if p.status == SendStatus::Failed)
    }
}

/// User profile, used only to enrich conversation display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
}

/// How a conversation was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Picked from the conversation list; history is polled
    Listed,
    /// Opened through get-or-create for a peer; history is fetched once
    Direct,
}

/// State change notifications for UI readers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The active-user set was replaced
    PresenceUpdated { active: usize },
    /// The conversation list was replaced
    ConversationsUpdated { count: usize, total_unread: u32 },
    /// A conversation context was opened
    ConversationOpened {
        conversation_id: ConversationId,
        mode: OpenMode,
    },
    /// The open conversation was closed or replaced
    ConversationClosed { conversation_id: ConversationId },
    /// The open conversation's buffer changed
    MessagesUpdated {
        conversation_id: ConversationId,
        len: usize,
    },
    /// An optimistic message was confirmed by the server
    MessageConfirmed {
        conversation_id: ConversationId,
        message_id: i64,
    },
    /// An optimistic message could not be sent
    SendFailed {
        conversation_id: ConversationId,
        local_id: LocalId,
        error: String,
    },
}
