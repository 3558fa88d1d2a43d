/// Message synchronizer for the single open conversation
///
/// Every fetch is tagged with the generation of the context that issued it
/// and is applied only if that context is still the open one.
use crate::api::ChatApi;
use crate::config::Credentials;
use crate::conversations::ConversationSync;
use crate::error::{Result, SyncError, ValidationError};
use crate::types::{
    ConversationId, LocalId, Message, OpenMode, PendingMessage, SendStatus, ServerMessage,
    SyncEvent, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Merge a fetched history into the current buffer.
///
/// The fetched list is authoritative. Pending entries whose sender and
/// content match a server message that was not in the buffer before are
/// reconciled into it, oldest pending first, one server message each.
/// Confirmed entries missing from the fetch are kept. The result is sorted
/// by `created_at` and holds each id once, server version first.
pub fn merge_history(buffer: &[Message], fetched: Vec<ServerMessage>) -> Vec<Message> {
    let mut server: Vec<ServerMessage> = Vec::with_capacity(fetched.len());
    let mut index: HashMap<i64, usize> = HashMap::new();
    for msg in fetched {
        match index.get(&msg.id) {
            Some(&i) => server[i] = msg,
            None => {
                index.insert(msg.id, server.len());
                server.push(msg);
            }
        }
    }

    let known: HashSet<i64> = buffer.iter().filter_map(Message::server_id).collect();
    let mut claimed: HashSet<i64> = HashSet::new();

    let mut merged: Vec<Message> = server.iter().cloned().map(Message::Confirmed).collect();

    for entry in buffer {
        match entry {
            Message::Confirmed(local) => {
                if !index.contains_key(&local.id) {
                    merged.push(entry.clone());
                }
            }
            Message::Pending(pending) => {
                let reconciled = server.iter().find(|s| {
                    !known.contains(&s.id) && !claimed.contains(&s.id) && pending.matches(s)
                });
                match reconciled {
                    Some(s) => {
                        claimed.insert(s.id);
                    }
                    None => merged.push(entry.clone()),
                }
            }
        }
    }

    // stable: equal timestamps keep server entries ahead of local ones
    merged.sort_by_key(Message::created_at);
    merged
}

/// Replace the placeholder `local_id` with its confirmed record.
///
/// If a merge already brought the confirmed id in, that entry is refreshed
/// and the placeholder (if still present) dropped. Otherwise the placeholder
/// is found by local id, falling back to a sender+content match.
pub fn reconcile_sent(buffer: &mut Vec<Message>, local_id: LocalId, confirmed: ServerMessage) {
    let is_placeholder =
        |m: &Message| matches!(m, Message::Pending(p) if p.local_id == local_id);

    if let Some(pos) = buffer
        .iter()
        .position(|m| m.server_id() == Some(confirmed.id))
    {
        buffer[pos] = Message::Confirmed(confirmed);
        buffer.retain(|m| !is_placeholder(m));
    } else {
        let pos = buffer.iter().position(is_placeholder).or_else(|| {
            buffer
                .iter()
                .position(|m| matches!(m, Message::Pending(p) if p.matches(&confirmed)))
        });
        match pos {
            Some(pos) => buffer[pos] = Message::Confirmed(confirmed),
            None => buffer.push(Message::Confirmed(confirmed)),
        }
    }

    buffer.sort_by_key(Message::created_at);
}

/// Clears the loading marker when a fetch finishes or is dropped mid-flight
struct LoadingGuard {
    loading: Arc<AtomicU64>,
    generation: u64,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let _ = self.loading.compare_exchange(
            self.generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// The currently open conversation
#[derive(Debug, Clone)]
pub struct OpenConversation {
    pub generation: u64,
    pub conversation_id: ConversationId,
    pub mode: OpenMode,
    pub buffer: Vec<Message>,
}

/// Result of one history fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing open, or no credentials
    Idle,
    /// Merged; carries the new buffer length
    Applied(usize),
    /// The context changed while the fetch was in flight; result dropped
    Stale,
}

#[derive(Clone)]
pub struct MessageSync {
    api: Arc<dyn ChatApi>,
    credentials: Option<Credentials>,
    context: Arc<RwLock<Option<OpenConversation>>>,
    generation: Arc<AtomicU64>,
    /// Generation whose fetch is in flight, 0 when none
    loading: Arc<AtomicU64>,
    conversations: ConversationSync,
    events: broadcast::Sender<SyncEvent>,
}

impl MessageSync {
    pub fn new(
        api: Arc<dyn ChatApi>,
        credentials: Option<Credentials>,
        conversations: ConversationSync,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            credentials,
            context: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            loading: Arc::new(AtomicU64::new(0)),
            conversations,
            events,
        }
    }

    /// Open `conversation_id`, replacing any previous context.
    /// Returns the new context generation.
    pub async fn open(&self, conversation_id: ConversationId, mode: OpenMode) -> u64 {
        let mut guard = self.context.write().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = guard.replace(OpenConversation {
            generation,
            conversation_id,
            mode,
            buffer: Vec::new(),
        });
        drop(guard);

        if let Some(prev) = previous {
            let _ = self.events.send(SyncEvent::ConversationClosed {
                conversation_id: prev.conversation_id,
            });
        }
        debug!(
            "Opened conversation {} ({:?}, generation {})",
            conversation_id, mode, generation
        );
        let _ = self.events.send(SyncEvent::ConversationOpened {
            conversation_id,
            mode,
        });
        generation
    }

    /// Drop the open context, if any
    pub async fn close(&self) -> Option<ConversationId> {
        let mut guard = self.context.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        let closed = guard.take().map(|ctx| ctx.conversation_id);
        drop(guard);

        if let Some(conversation_id) = closed {
            let _ = self
                .events
                .send(SyncEvent::ConversationClosed { conversation_id });
        }
        closed
    }

    /// Fetch the open conversation's history and merge it.
    ///
    /// After a successful merge the conversation is marked read and the
    /// conversation list is asked to refresh.
    pub async fn refresh(&self) -> Result<FetchOutcome> {
        let generation = self.context.read().await.as_ref().map(|ctx| ctx.generation);
        match generation {
            Some(generation) => self.refresh_generation(generation).await,
            None => Ok(FetchOutcome::Idle),
        }
    }

    /// Fetch and merge only if the context opened as `generation` is still
    /// the open one.
    pub async fn refresh_generation(&self, generation: u64) -> Result<FetchOutcome> {
        let Some(creds) = &self.credentials else {
            return Ok(FetchOutcome::Idle);
        };

        let conversation_id = match self.context.read().await.as_ref() {
            Some(ctx) if ctx.generation == generation => ctx.conversation_id,
            _ => return Ok(FetchOutcome::Stale),
        };

        self.loading.store(generation, Ordering::SeqCst);
        let in_flight = LoadingGuard {
            loading: self.loading.clone(),
            generation,
        };
        let fetched = self.api.list_messages(&creds.token, conversation_id).await;
        drop(in_flight);

        let len = {
            let mut guard = self.context.write().await;
            match guard.as_mut() {
                Some(ctx) if ctx.generation == generation => {
                    ctx.buffer = merge_history(&ctx.buffer, fetched?);
                    ctx.buffer.len()
                }
                _ => {
                    debug!(
                        "Discarding stale history for conversation {} (generation {})",
                        conversation_id, generation
                    );
                    return Ok(FetchOutcome::Stale);
                }
            }
        };

        let _ = self.events.send(SyncEvent::MessagesUpdated {
            conversation_id,
            len,
        });

        match self.api.mark_read(&creds.token, conversation_id).await {
            Ok(()) => self.conversations.request_refresh(),
            Err(e) => warn!("Mark-read for conversation {} failed: {}", conversation_id, e),
        }

        Ok(FetchOutcome::Applied(len))
    }

    pub async fn current(&self) -> Option<(u64, ConversationId, OpenMode)> {
        self.context
            .read()
            .await
            .as_ref()
            .map(|ctx| (ctx.generation, ctx.conversation_id, ctx.mode))
    }

    pub async fn open_conversation_id(&self) -> Option<ConversationId> {
        self.context.read().await.as_ref().map(|ctx| ctx.conversation_id)
    }

    /// Copy of the open buffer (empty when nothing is open)
    pub async fn messages(&self) -> Vec<Message> {
        self.context
            .read()
            .await
            .as_ref()
            .map(|ctx| ctx.buffer.clone())
            .unwrap_or_default()
    }

    /// A history fetch for the open context is in flight
    pub async fn is_loading(&self) -> bool {
        let loading = self.loading.load(Ordering::SeqCst);
        loading != 0
            && self
                .context
                .read()
                .await
                .as_ref()
                .is_some_and(|ctx| ctx.generation == loading)
    }

    // ─── Dispatcher hooks ────────────────────────────────────────────────────

    /// Validate and append an optimistic message to the open buffer.
    pub(crate) async fn append_pending(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> std::result::Result<(u64, PendingMessage), ValidationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }

        let mut guard = self.context.write().await;
        let ctx = guard.as_mut().ok_or(ValidationError::NoOpenConversation)?;
        if ctx.conversation_id != conversation_id {
            return Err(ValidationError::ConversationNotOpen {
                requested: conversation_id,
                open: ctx.conversation_id,
            });
        }

        let pending = PendingMessage::new(conversation_id, sender_id, content.to_string());
        ctx.buffer.push(Message::Pending(pending.clone()));
        ctx.buffer.sort_by_key(Message::created_at);
        let (generation, len) = (ctx.generation, ctx.buffer.len());
        drop(guard);

        let _ = self.events.send(SyncEvent::MessagesUpdated {
            conversation_id,
            len,
        });
        Ok((generation, pending))
    }

    /// Apply a send confirmation. Returns false when the context changed.
    pub(crate) async fn confirm_pending(
        &self,
        generation: u64,
        local_id: LocalId,
        confirmed: ServerMessage,
    ) -> bool {
        let mut guard = self.context.write().await;
        let Some(ctx) = guard.as_mut().filter(|ctx| ctx.generation == generation) else {
            return false;
        };
        let (conversation_id, message_id) = (ctx.conversation_id, confirmed.id);
        reconcile_sent(&mut ctx.buffer, local_id, confirmed);
        let len = ctx.buffer.len();
        drop(guard);

        let _ = self.events.send(SyncEvent::MessageConfirmed {
            conversation_id,
            message_id,
        });
        let _ = self.events.send(SyncEvent::MessagesUpdated {
            conversation_id,
            len,
        });
        true
    }

    /// Set the status of a still-pending entry. Returns false when the
    /// context changed or the entry is gone.
    pub(crate) async fn set_status(
        &self,
        generation: u64,
        local_id: LocalId,
        status: SendStatus,
    ) -> bool {
        let mut guard = self.context.write().await;
        let Some(ctx) = guard.as_mut().filter(|ctx| ctx.generation == generation) else {
            return false;
        };
        let entry = ctx.buffer.iter_mut().find_map(|m| match m {
            Message::Pending(p) if p.local_id == local_id => Some(p),
            _ => None,
        });
        match entry {
            Some(p) => {
                p.status = status;
                true
            }
            None => false,
        }
    }

    /// Flip a failed entry back to sending and hand it out for a resend
    pub(crate) async fn take_failed(&self, local_id: LocalId) -> Result<(u64, PendingMessage)> {
        let mut guard = self.context.write().await;
        let ctx = guard
            .as_mut()
            .ok_or(SyncError::Validation(ValidationError::NoOpenConversation))?;
        let generation = ctx.generation;
        let pending = ctx
            .buffer
            .iter_mut()
            .find_map(|m| match m {
                Message::Pending(p) if p.local_id == local_id => Some(p),
                _ => None,
            })
            .ok_or(SyncError::UnknownMessage(local_id))?;
        if pending.status != SendStatus::Failed {
            return Err(ValidationError::NotFailed(local_id).into());
        }
        pending.status = SendStatus::Sending;
        Ok((generation, pending.clone()))
    }

    /// Remove a failed entry from the open buffer
    pub(crate) async fn remove_failed(&self, local_id: LocalId) -> Result<()> {
        let mut guard = self.context.write().await;
        let ctx = guard
            .as_mut()
            .ok_or(SyncError::Validation(ValidationError::NoOpenConversation))?;
        let pos = ctx
            .buffer
            .iter()
            .position(|m| matches!(m, Message::Pending(p) if p.local_id == local_id))
            .ok_or(SyncError::UnknownMessage(local_id))?;
        if !ctx.buffer[pos].is_failed() {
            return Err(ValidationError::NotFailed(local_id).into());
        }
        ctx.buffer.remove(pos);
        let (conversation_id, len) = (ctx.conversation_id, ctx.buffer.len());
        drop(guard);

        let _ = self.events.send(SyncEvent::MessagesUpdated {
            conversation_id,
            len,
        });
        Ok(())
    }
}
