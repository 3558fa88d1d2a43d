/// chatsync - polling synchronization core for chat and presence
///
/// Keeps a local view of conversations, messages and online presence
/// consistent with a REST server that can only be polled.

pub mod api;
pub mod config;
pub mod conversations;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod presence;
pub mod scheduler;
pub mod session;
pub mod types;

pub use api::{ChatApi, HttpChatApi};
pub use config::{Credentials, SyncConfig};
pub use error::{Result, SyncError, ValidationError};
pub use messages::{merge_history, FetchOutcome};
pub use session::{ChatSession, LifecycleState};
pub use types::{ConversationSummary, Message, OpenMode, ServerMessage, SyncEvent};
