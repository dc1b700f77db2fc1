use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How conversation history is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopePolicy {
    #[default]
    PerChannel,
    PerUser,
    PerThread,
    PerChannelUser,
}

impl FromStr for ScopePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "per-channel" | "channel" => Ok(ScopePolicy::PerChannel),
            "per-user" | "user" => Ok(ScopePolicy::PerUser),
            "per-thread" | "thread" => Ok(ScopePolicy::PerThread),
            "per-channel-user" | "per-channel-and-user" | "channel-user" => {
                Ok(ScopePolicy::PerChannelUser)
            }
            other => Err(format!("unknown conversation scope '{other}'")),
        }
    }
}

impl fmt::Display for ScopePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopePolicy::PerChannel => "per-channel",
            ScopePolicy::PerUser => "per-user",
            ScopePolicy::PerThread => "per-thread",
            ScopePolicy::PerChannelUser => "per-channel-user",
        };
        f.write_str(name)
    }
}

/// The bits of an inbound Discord event that matter for scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    pub guild_id: Option<u64>,
    pub channel_id: u64,
    pub user_id: u64,
    /// Set when the event happened inside a thread (equal to `channel_id`).
    pub thread_id: Option<u64>,
}

/// Map an event to its conversation key. Pure.
pub fn resolve(policy: ScopePolicy, meta: &EventMeta) -> String {
    let guild = meta
        .guild_id
        .map_or_else(|| "dm".to_string(), |g| g.to_string());

    match policy {
        ScopePolicy::PerChannel => format!("{guild}:channel:{}", meta.channel_id),
        ScopePolicy::PerUser => format!("user:{}", meta.user_id),
        ScopePolicy::PerThread => match meta.thread_id {
            Some(thread) => format!("{guild}:thread:{thread}"),
            None => format!("{guild}:channel:{}", meta.channel_id),
        },
        ScopePolicy::PerChannelUser => {
            format!("{guild}:channel:{}:user:{}", meta.channel_id, meta.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(thread: Option<u64>) -> EventMeta {
        EventMeta {
            guild_id: Some(10),
            channel_id: 20,
            user_id: 30,
            thread_id: thread,
        }
    }

    #[test]
    fn per_channel_shares_between_users() {
        let a = meta(None);
        let b = EventMeta { user_id: 31, ..a };
        assert_eq!(
            resolve(ScopePolicy::PerChannel, &a),
            resolve(ScopePolicy::PerChannel, &b)
        );
        assert_eq!(resolve(ScopePolicy::PerChannel, &a), "10:channel:20");
    }

    #[test]
    fn per_user_follows_user_across_channels() {
        let a = meta(None);
        let b = EventMeta { channel_id: 21, guild_id: None, ..a };
        assert_eq!(resolve(ScopePolicy::PerUser, &a), "user:30");
        assert_eq!(
            resolve(ScopePolicy::PerUser, &a),
            resolve(ScopePolicy::PerUser, &b)
        );
    }

    #[test]
    fn per_thread_falls_back_to_channel() {
        assert_eq!(resolve(ScopePolicy::PerThread, &meta(Some(99))), "10:thread:99");
        assert_eq!(resolve(ScopePolicy::PerThread, &meta(None)), "10:channel:20");
    }

    #[test]
    fn composite_separates_users_in_same_channel() {
        let a = meta(None);
        let b = EventMeta { user_id: 31, ..a };
        assert_ne!(
            resolve(ScopePolicy::PerChannelUser, &a),
            resolve(ScopePolicy::PerChannelUser, &b)
        );
    }

    #[test]
    fn direct_messages_are_namespaced() {
        let dm = EventMeta { guild_id: None, ..meta(None) };
        assert_eq!(resolve(ScopePolicy::PerChannel, &dm), "dm:channel:20");
    }

    #[test]
    fn parses_config_spellings() {
        assert_eq!("per-channel".parse::<ScopePolicy>(), Ok(ScopePolicy::PerChannel));
        assert_eq!("PER_USER".parse::<ScopePolicy>(), Ok(ScopePolicy::PerUser));
        assert_eq!(
            "per-channel-and-user".parse::<ScopePolicy>(),
            Ok(ScopePolicy::PerChannelUser)
        );
        assert!("everywhere".parse::<ScopePolicy>().is_err());
        assert_eq!(ScopePolicy::PerThread.to_string(), "per-thread");
    }
}
