/// Presence poller: the set of users the server currently considers active
use crate::api::ChatApi;
use crate::config::Credentials;
use crate::error::Result;
use crate::types::{SyncEvent, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

#[derive(Clone)]
pub struct PresencePoller {
    api: Arc<dyn ChatApi>,
    credentials: Option<Credentials>,
    active: Arc<RwLock<HashSet<UserId>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl PresencePoller {
    pub fn new(
        api: Arc<dyn ChatApi>,
        credentials: Option<Credentials>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            api,
            credentials,
            active: Arc::new(RwLock::new(HashSet::new())),
            events,
        }
    }

    /// One poll tick. Returns `Ok(false)` when there are no credentials.
    ///
    /// On failure the previous set is left untouched; the error is only
    /// reported to the scheduler, which logs it.
    pub async fn tick(&self) -> Result<bool> {
        let Some(creds) = &self.credentials else {
            return Ok(false);
        };

        let fetched: HashSet<UserId> = self
            .api
            .list_active_users(&creds.token)
            .await?
            .into_iter()
            .collect();
        let count = fetched.len();

        *self.active.write().await = fetched;
        debug!("Presence updated: {} active users", count);
        let _ = self.events.send(SyncEvent::PresenceUpdated { active: count });
        Ok(true)
    }

    pub async fn is_active(&self, user_id: UserId) -> bool {
        self.active.read().await.contains(&user_id)
    }

    pub async fn snapshot(&self) -> HashSet<UserId> {
        self.active.read().await.clone()
    }

    pub(crate) async fn clear(&self) {
        self.active.write().await.clear();
    }
}
