/// CLI for one-shot chat API calls
use chatsync_core::{merge_history, ChatApi, HttpChatApi, Message, SyncConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut config = SyncConfig::default();
    config.apply_env();
    let Some(creds) = config.credentials() else {
        anyhow::bail!("CHATSYNC_TOKEN and CHATSYNC_USER_ID must be set");
    };
    let api = HttpChatApi::with_timeout(&config.api_base_url, config.request_timeout)?;

    match args[1].as_str() {
        "conversations" => {
            for c in api.list_conversations(&creds.token).await? {
                println!(
                    "#{:<6} {:<24} unread {:<3} {}",
                    c.conversation_id,
                    c.peer_display_name,
                    c.unread_count,
                    c.last_message_text.unwrap_or_default()
                );
            }
        }
        "presence" => {
            let mut active = api.list_active_users(&creds.token).await?;
            active.sort_unstable();
            println!("{} active: {:?}", active.len(), active);
        }
        "history" => {
            let Some(id) = args.get(2).and_then(|s| s.parse::<i64>().ok()) else {
                eprintln!("Usage: chatsync-cli history <conversation_id>");
                return Ok(());
            };
            let fetched = api.list_messages(&creds.token, id).await?;
            for m in merge_history(&[], fetched) {
                if let Message::Confirmed(m) = m {
                    let who = if m.sender_id == creds.user_id { "me".to_string() } else { m.sender_id.to_string() };
                    println!("[{}] {}: {}", m.created_at.format("%Y-%m-%d %H:%M"), who, m.content);
                }
            }
        }
        "send" => {
            if args.len() < 4 {
                eprintln!("Usage: chatsync-cli send <conversation_id> <message>");
                return Ok(());
            }
            let id = args[2]
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("conversation id must be a number"))?;
            let content = args[3..].join(" ");
            if content.trim().is_empty() {
                anyhow::bail!("message is empty");
            }
            let sent = api.send_message(&creds.token, id, content.trim()).await?;
            println!("✓ sent as message {}", sent.id);
        }
        "open" => {
            let Some(peer) = args.get(2).and_then(|s| s.parse::<i64>().ok()) else {
                eprintln!("Usage: chatsync-cli open <peer_id>");
                return Ok(());
            };
            let id = api.get_or_create_conversation(&creds.token, peer).await?;
            println!("conversation {}", id);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("chatsync CLI");
    println!();
    println!("Usage: chatsync-cli <command> [args]");
    println!();
    println!("Commands:");
    println!("  conversations                 List conversations with unread counts");
    println!("  presence                      List active user ids");
    println!("  history <conversation_id>     Print a conversation's history");
    println!("  send <conversation_id> <msg>  Send a message");
    println!("  open <peer_id>                Get or create the conversation with a peer");
    println!();
    println!("Environment: CHATSYNC_BASE_URL, CHATSYNC_TOKEN, CHATSYNC_USER_ID");
}
