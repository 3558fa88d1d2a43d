/// Lifecycle controller for one mounted chat view
///
/// Owns every poll timer. Components never start timers of their own.
use crate::api::{ChatApi, HttpChatApi};
use crate::config::{Credentials, SyncConfig};
use crate::conversations::ConversationSync;
use crate::dispatcher::OutboundDispatcher;
use crate::error::{Result, SyncError};
use crate::messages::{FetchOutcome, MessageSync};
use crate::presence::PresencePoller;
use crate::scheduler::PollTask;
use crate::types::{ConversationId, LocalId, Message, OpenMode, ServerMessage, SyncEvent, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, or left idle because there are no credentials
    Idle,
    Mounted { open: Option<ConversationId> },
    /// Terminal
    Unmounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Mounted,
    Unmounted,
}

struct Controller {
    phase: Phase,
    presence: Option<PollTask>,
    conversations: Option<PollTask>,
    messages: Option<PollTask>,
}

impl Controller {
    fn tasks(&self) -> impl Iterator<Item = &PollTask> {
        [&self.presence, &self.conversations, &self.messages]
            .into_iter()
            .flatten()
    }

    fn stop_messages(&mut self) {
        if let Some(task) = self.messages.take() {
            task.cancel();
        }
    }

    fn stop_all(&mut self) {
        for slot in [&mut self.presence, &mut self.conversations, &mut self.messages] {
            if let Some(task) = slot.take() {
                task.cancel();
            }
        }
    }
}

/// Chat synchronization session
pub struct ChatSession {
    config: SyncConfig,
    credentials: Option<Credentials>,
    api: Arc<dyn ChatApi>,
    presence: PresencePoller,
    conversations: ConversationSync,
    messages: MessageSync,
    dispatcher: OutboundDispatcher,
    controller: Mutex<Controller>,
    /// Bumped by every open or close; a direct open applies only if still the latest
    selections: AtomicU64,
    events: broadcast::Sender<SyncEvent>,
}

impl ChatSession {
    pub fn new(config: SyncConfig, api: Arc<dyn ChatApi>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let credentials = config.credentials();

        let presence = PresencePoller::new(api.clone(), credentials.clone(), events.clone());
        let conversations = ConversationSync::new(api.clone(), credentials.clone(), events.clone());
        let messages = MessageSync::new(
            api.clone(),
            credentials.clone(),
            conversations.clone(),
            events.clone(),
        );
        let dispatcher = OutboundDispatcher::new(
            api.clone(),
            credentials.clone(),
            messages.clone(),
            conversations.clone(),
            config.timeout_for(config.messages_interval),
            events.clone(),
        );

        Self {
            config,
            credentials,
            api,
            presence,
            conversations,
            messages,
            dispatcher,
            controller: Mutex::new(Controller {
                phase: Phase::Idle,
                presence: None,
                conversations: None,
                messages: None,
            }),
            selections: AtomicU64::new(0),
            events,
        }
    }

    /// Session talking to the HTTP API at `config.api_base_url`
    pub fn connect(config: SyncConfig) -> Result<Self> {
        let api = HttpChatApi::with_timeout(&config.api_base_url, config.request_timeout)?;
        Ok(Self::new(config, Arc::new(api)))
    }

    /// Start the presence and conversation list pollers.
    ///
    /// Without credentials nothing starts and `Ok(false)` is returned.
    /// An unmounted session cannot be mounted again.
    pub async fn mount(&self) -> Result<bool> {
        let mut ctl = self.controller.lock().await;
        match ctl.phase {
            Phase::Mounted => return Ok(true),
            Phase::Unmounted => return Err(SyncError::NotMounted),
            Phase::Idle => {}
        }
        if self.credentials.is_none() {
            info!("No credentials configured, chat sync not started");
            return Ok(false);
        }

        let presence = self.presence.clone();
        ctl.presence = Some(PollTask::spawn(
            "presence",
            self.config.presence_interval,
            self.config.timeout_for(self.config.presence_interval),
            None,
            move || {
                let presence = presence.clone();
                async move { presence.tick().await }
            },
        ));

        let conversations = self.conversations.clone();
        ctl.conversations = Some(PollTask::spawn(
            "conversations",
            self.config.conversations_interval,
            self.config.timeout_for(self.config.conversations_interval),
            Some(self.conversations.refresh_signal()),
            move || {
                let conversations = conversations.clone();
                async move { conversations.tick().await }
            },
        ));

        ctl.phase = Phase::Mounted;
        info!("Chat sync mounted against {}", self.config.api_base_url);
        Ok(true)
    }

    /// Open a conversation picked from the list; its history is polled.
    pub async fn open_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        let mut ctl = self.controller.lock().await;
        if ctl.phase != Phase::Mounted {
            return Err(SyncError::NotMounted);
        }
        self.selections.fetch_add(1, Ordering::SeqCst);
        if let Some((_, open, OpenMode::Listed)) = self.messages.current().await {
            if open == conversation_id && ctl.messages.is_some() {
                debug!("Conversation {} already open", conversation_id);
                return Ok(());
            }
        }

        ctl.stop_messages();
        self.messages.open(conversation_id, OpenMode::Listed).await;

        let messages = self.messages.clone();
        ctl.messages = Some(PollTask::spawn(
            "messages",
            self.config.messages_interval,
            self.config.timeout_for(self.config.messages_interval),
            None,
            move || {
                let messages = messages.clone();
                async move { Ok(messages.refresh().await? != FetchOutcome::Idle) }
            },
        ));
        info!("Opened conversation {}", conversation_id);
        Ok(())
    }

    /// Open (creating if needed) the conversation with `peer_id`.
    ///
    /// The history is fetched once; no poll task is started. If another
    /// conversation is opened or closed while the lookup is in flight, the
    /// lookup's result is dropped and `SyncError::Superseded` is returned.
    pub async fn open_direct(&self, peer_id: UserId) -> Result<ConversationId> {
        let creds = self.require_mounted().await?;
        let ticket = self.selections.fetch_add(1, Ordering::SeqCst) + 1;

        let request_timeout = self.config.timeout_for(self.config.messages_interval);
        let conversation_id = timeout(
            request_timeout,
            self.api.get_or_create_conversation(&creds.token, peer_id),
        )
        .await
        .map_err(|_| SyncError::Timeout(format!("get-or-create conversation with {}", peer_id)))??;

        let generation = {
            let mut ctl = self.controller.lock().await;
            if ctl.phase != Phase::Mounted {
                return Err(SyncError::NotMounted);
            }
            if self.selections.load(Ordering::SeqCst) != ticket {
                debug!(
                    "Dropping conversation {} with {}: selection changed meanwhile",
                    conversation_id, peer_id
                );
                return Err(SyncError::Superseded);
            }
            ctl.stop_messages();
            self.messages.open(conversation_id, OpenMode::Direct).await
        };
        info!("Opened direct conversation {} with {}", conversation_id, peer_id);

        match timeout(request_timeout, self.messages.refresh_generation(generation)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Initial fetch for conversation {} failed: {}", conversation_id, e),
            Err(_) => warn!("Initial fetch for conversation {} timed out", conversation_id),
        }
        Ok(conversation_id)
    }

    /// Close the open conversation, stopping its poller
    pub async fn close_conversation(&self) -> Result<Option<ConversationId>> {
        let mut ctl = self.controller.lock().await;
        if ctl.phase != Phase::Mounted {
            return Err(SyncError::NotMounted);
        }
        self.selections.fetch_add(1, Ordering::SeqCst);
        ctl.stop_messages();
        Ok(self.messages.close().await)
    }

    pub async fn send(&self, conversation_id: ConversationId, content: &str) -> Result<ServerMessage> {
        self.require_mounted().await?;
        self.dispatcher.send(conversation_id, content).await
    }

    pub async fn retry(&self, local_id: LocalId) -> Result<ServerMessage> {
        self.require_mounted().await?;
        self.dispatcher.retry(local_id).await
    }

    pub async fn discard(&self, local_id: LocalId) -> Result<()> {
        self.require_mounted().await?;
        self.dispatcher.discard(local_id).await
    }

    /// A peer relationship was accepted; its conversation may now exist
    pub async fn peer_accepted(&self, peer_id: UserId) -> Result<()> {
        self.require_mounted().await?;
        info!("Peer {} accepted, refreshing conversations", peer_id);
        self.conversations.request_refresh();
        Ok(())
    }

    /// Stop every poller and drop all synchronized state. Idempotent.
    pub async fn unmount(&self) {
        let mut ctl = self.controller.lock().await;
        if ctl.phase == Phase::Unmounted {
            return;
        }
        ctl.stop_all();
        ctl.phase = Phase::Unmounted;
        drop(ctl);

        self.messages.close().await;
        self.presence.clear().await;
        self.conversations.clear().await;
        info!("Chat sync unmounted");
    }

    async fn require_mounted(&self) -> Result<Credentials> {
        let ctl = self.controller.lock().await;
        match (&self.credentials, ctl.phase) {
            (Some(creds), Phase::Mounted) => Ok(creds.clone()),
            _ => Err(SyncError::NotMounted),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        let phase = self.controller.lock().await.phase;
        match phase {
            Phase::Idle => LifecycleState::Idle,
            Phase::Unmounted => LifecycleState::Unmounted,
            Phase::Mounted => LifecycleState::Mounted {
                open: self.messages.open_conversation_id().await,
            },
        }
    }

    /// Names of the pollers currently owned by the session
    pub async fn running_tasks(&self) -> Vec<&'static str> {
        self.controller
            .lock()
            .await
            .tasks()
            .map(PollTask::name)
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn presence(&self) -> &PresencePoller {
        &self.presence
    }

    pub fn conversations(&self) -> &ConversationSync {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageSync {
        &self.messages
    }

    pub async fn is_active(&self, user_id: UserId) -> bool {
        self.presence.is_active(user_id).await
    }

    pub async fn open_messages(&self) -> Vec<Message> {
        self.messages.messages().await
    }

    pub async fn total_unread(&self) -> u32 {
        self.conversations.total_unread().await
    }
}
