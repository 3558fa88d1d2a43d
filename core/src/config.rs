/// Configuration management
use crate::error::{Result, SyncError};
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";

/// Bearer credential plus the identity it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    /// Sender id stamped on optimistic messages
    pub user_id: UserId,
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the chat REST API
    pub api_base_url: String,

    /// Bearer token; without it nothing starts
    pub auth_token: Option<String>,

    /// Id of the signed-in user
    pub user_id: Option<UserId>,

    /// Active-user poll interval
    pub presence_interval: Duration,

    /// Conversation list poll interval
    pub conversations_interval: Duration,

    /// Open conversation poll interval
    pub messages_interval: Duration,

    /// Per-request timeout; `None` means each poller uses its own interval
    pub request_timeout: Option<Duration>,

    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            user_id: None,
            presence_interval: Duration::from_secs(15),
            conversations_interval: Duration::from_secs(10),
            messages_interval: Duration::from_secs(5),
            request_timeout: None,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(SyncError::Config(format!(
                "Usage: {} <base_url> [--token <token>] [--user-id <id>] [--presence-secs <n>] [--conversations-secs <n>] [--messages-secs <n>] [--timeout-secs <n>]",
                args.first().map(String::as_str).unwrap_or("chatsync")
            )));
        }

        let mut config = Self {
            api_base_url: args[1].trim_end_matches('/').to_string(),
            ..Default::default()
        };

        let mut i = 2;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = args
                .get(i + 1)
                .ok_or_else(|| SyncError::Config(format!("{} requires an argument", flag)))?;
            match flag {
                "--token" => config.auth_token = Some(value.clone()),
                "--user-id" => config.user_id = Some(parse_user_id(flag, value)?),
                "--presence-secs" => config.presence_interval = parse_secs(flag, value)?,
                "--conversations-secs" => config.conversations_interval = parse_secs(flag, value)?,
                "--messages-secs" => config.messages_interval = parse_secs(flag, value)?,
                "--timeout-secs" => config.request_timeout = Some(parse_secs(flag, value)?),
                other => {
                    return Err(SyncError::Config(format!("Unknown argument: {}", other)));
                }
            }
            i += 2;
        }

        config.apply_env();
        Ok(config)
    }

    /// Env overrides (nice for scripts)
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CHATSYNC_BASE_URL") {
            self.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(token) = std::env::var("CHATSYNC_TOKEN") {
            if !token.is_empty() {
                self.auth_token = Some(token);
            }
        }
        if let Some(id) = std::env::var("CHATSYNC_USER_ID")
            .ok()
            .and_then(|s| s.parse::<UserId>().ok())
        {
            self.user_id = Some(id);
        }
    }

    /// Credentials, when both a token and a user id are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.auth_token, self.user_id) {
            (Some(token), Some(user_id)) if !token.is_empty() => Some(Credentials {
                token: token.clone(),
                user_id,
            }),
            _ => None,
        }
    }

    /// Timeout applied to one tick of a poller running every `interval`
    pub fn timeout_for(&self, interval: Duration) -> Duration {
        self.request_timeout.unwrap_or(interval)
    }
}

fn parse_secs(flag: &str, value: &str) -> Result<Duration> {
    let secs = value
        .parse::<u64>()
        .map_err(|_| SyncError::Config(format!("{} must be a whole number of seconds", flag)))?;
    if secs == 0 {
        return Err(SyncError::Config(format!("{} must be greater than zero", flag)));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_user_id(flag: &str, value: &str) -> Result<UserId> {
    value
        .parse::<UserId>()
        .map_err(|_| SyncError::Config(format!("{} must be a numeric user id", flag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.presence_interval, Duration::from_secs(15));
        assert_eq!(config.conversations_interval, Duration::from_secs(10));
        assert_eq!(config.messages_interval, Duration::from_secs(5));
        assert_eq!(config.timeout_for(config.messages_interval), Duration::from_secs(5));
    }

    #[test]
    fn test_from_args_flags() {
        let config = SyncConfig::from_args(&args(&[
            "chatsync",
            "http://localhost:3000/api/",
            "--token",
            "abc",
            "--user-id",
            "7",
            "--messages-secs",
            "2",
            "--timeout-secs",
            "1",
        ]))
        .unwrap();

        assert_eq!(config.api_base_url, "http://localhost:3000/api");
        assert_eq!(config.messages_interval, Duration::from_secs(2));
        assert_eq!(config.timeout_for(config.presence_interval), Duration::from_secs(1));
        let creds = config.credentials().unwrap();
        assert_eq!(creds.user_id, 7);
        assert_eq!(creds.token, "abc");
    }

    #[test]
    fn test_from_args_errors() {
        assert!(SyncConfig::from_args(&args(&["chatsync"])).is_err());
        assert!(SyncConfig::from_args(&args(&["chatsync", "http://x", "--token"])).is_err());
        assert!(SyncConfig::from_args(&args(&["chatsync", "http://x", "--presence-secs", "0"])).is_err());
        assert!(SyncConfig::from_args(&args(&["chatsync", "http://x", "--bogus", "1"])).is_err());
    }

    #[test]
    fn test_credentials_require_token_and_user() {
        let mut config = SyncConfig::default();
        assert!(config.credentials().is_none());
        config.auth_token = Some("t".into());
        assert!(config.credentials().is_none());
        config.user_id = Some(1);
        assert!(config.credentials().is_some());
        config.auth_token = Some(String::new());
        assert!(config.credentials().is_none());
    }
}
