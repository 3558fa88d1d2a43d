/// chatsync - mounts a sync session and logs what it sees
use chatsync_core::{ChatSession, SyncConfig, SyncEvent};
use std::env;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = SyncConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let open = env::var("CHATSYNC_OPEN").ok().and_then(|s| s.parse::<i64>().ok());

    let session = ChatSession::connect(config)
        .map_err(|e| anyhow::anyhow!("Client error: {}", e))?;
    let mut events = session.subscribe();

    if !session.mount().await? {
        warn!("Set CHATSYNC_TOKEN and CHATSYNC_USER_ID (or --token/--user-id) to start syncing");
        return Ok(());
    }
    if let Some(conversation_id) = open {
        session.open_conversation(conversation_id).await?;
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::ConversationsUpdated { count, total_unread }) => {
                    info!("{} conversations, {} unread", count, total_unread);
                }
                Ok(SyncEvent::PresenceUpdated { active }) => {
                    info!("{} users active", active);
                }
                Ok(SyncEvent::MessagesUpdated { conversation_id, len }) => {
                    info!("Conversation {}: {} messages", conversation_id, len);
                }
                Ok(other) => info!("{:?}", other),
                Err(RecvError::Lagged(n)) => warn!("Event stream lagged {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.unmount().await;
    Ok(())
}
