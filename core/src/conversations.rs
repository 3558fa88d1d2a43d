/// Conversation list synchronizer
///
/// The server is authoritative for this view: every tick replaces the whole
/// list in server order and recomputes the unread total.
use crate::api::ChatApi;
use crate::config::Credentials;
use crate::error::Result;
use crate::types::{ConversationId, ConversationSummary, SyncEvent, UserId, UserProfile};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::debug;

/// Upper bound on each profile lookup made during a list tick
pub const PROFILE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Snapshot of the list and its aggregate unread count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationList {
    pub summaries: Vec<ConversationSummary>,
    pub total_unread: u32,
}

impl ConversationList {
    fn from_snapshot(summaries: Vec<ConversationSummary>) -> Self {
        let total_unread = summaries
            .iter()
            .fold(0u32, |total, s| total.saturating_add(s.unread_count));
        Self {
            summaries,
            total_unread,
        }
    }
}

#[derive(Clone)]
pub struct ConversationSync {
    api: Arc<dyn ChatApi>,
    credentials: Option<Credentials>,
    list: Arc<RwLock<ConversationList>>,
    /// Profiles fetched for display enrichment, kept while mounted
    profiles: Arc<RwLock<HashMap<UserId, UserProfile>>>,
    refresh: Arc<Notify>,
    events: broadcast::Sender<SyncEvent>,
}

impl ConversationSync {
    pub fn new(
        api: Arc<dyn ChatApi>,
        credentials: Option<Credentials>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            credentials,
            list: Arc::new(RwLock::new(ConversationList::default())),
            profiles: Arc::new(RwLock::new(HashMap::new())),
            refresh: Arc::new(Notify::new()),
            events,
        }
    }

    /// One poll tick. Returns `Ok(false)` when there are no credentials.
    /// On failure the previous list is kept.
    pub async fn tick(&self) -> Result<bool> {
        let Some(creds) = &self.credentials else {
            return Ok(false);
        };

        let mut fetched = self.api.list_conversations(&creds.token).await?;
        self.enrich(&creds.token, &mut fetched).await;

        let list = ConversationList::from_snapshot(fetched);
        let event = SyncEvent::ConversationsUpdated {
            count: list.summaries.len(),
            total_unread: list.total_unread,
        };
        debug!(
            "Conversation list updated: {} conversations, {} unread",
            list.summaries.len(),
            list.total_unread
        );
        *self.list.write().await = list;
        let _ = self.events.send(event);
        Ok(true)
    }

    /// Fill in peer nationality from cached or freshly fetched profiles.
    /// Lookups run concurrently, each bounded by `PROFILE_LOOKUP_TIMEOUT`;
    /// failures and timeouts only skip the enrichment.
    async fn enrich(&self, token: &str, summaries: &mut [ConversationSummary]) {
        let missing: HashSet<UserId> = {
            let cache = self.profiles.read().await;
            summaries
                .iter()
                .filter(|s| s.peer_nationality.is_none() && !cache.contains_key(&s.peer_id))
                .map(|s| s.peer_id)
                .collect()
        };

        let mut lookups = JoinSet::new();
        for peer_id in missing {
            let api = self.api.clone();
            let token = token.to_string();
            lookups.spawn(async move {
                let lookup = api.get_user_profile(&token, peer_id);
                (peer_id, timeout(PROFILE_LOOKUP_TIMEOUT, lookup).await)
            });
        }
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((peer_id, Ok(Ok(profile)))) => {
                    self.profiles.write().await.insert(peer_id, profile);
                }
                Ok((peer_id, Ok(Err(e)))) => {
                    debug!("Profile lookup for {} failed: {}", peer_id, e)
                }
                Ok((peer_id, Err(_))) => debug!("Profile lookup for {} timed out", peer_id),
                Err(e) => debug!("Profile lookup task failed: {}", e),
            }
        }

        let cache = self.profiles.read().await;
        for summary in summaries.iter_mut().filter(|s| s.peer_nationality.is_none()) {
            summary.peer_nationality = cache
                .get(&summary.peer_id)
                .and_then(|p| p.nationality.clone());
        }
    }

    /// Ask the running list poller for an immediate out-of-band tick
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub(crate) fn refresh_signal(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    pub async fn snapshot(&self) -> ConversationList {
        self.list.read().await.clone()
    }

    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        self.list.read().await.summaries.clone()
    }

    pub async fn summary(&self, conversation_id: ConversationId) -> Option<ConversationSummary> {
        self.list
            .read()
            .await
            .summaries
            .iter()
            .find(|s| s.conversation_id == conversation_id)
            .cloned()
    }

    pub async fn find_by_peer(&self, peer_id: UserId) -> Option<ConversationSummary> {
        self.list
            .read()
            .await
            .summaries
            .iter()
            .find(|s| s.peer_id == peer_id)
            .cloned()
    }

    pub async fn total_unread(&self) -> u32 {
        self.list.read().await.total_unread
    }

    pub(crate) async fn clear(&self) {
        *self.list.write().await = ConversationList::default();
        self.profiles.write().await.clear();
    }
}
