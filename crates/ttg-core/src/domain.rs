use chrono::{DateTime, Utc};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TelegramId(pub i64);

/// Telegram chat id (numeric). Private chats share the id of their user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl std::fmt::Display for TelegramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TelegramId> for ChatId {
    fn from(id: TelegramId) -> Self {
        ChatId(id.0)
    }
}

/// Twitch user id. Helix transports it as a decimal string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TwitchId(pub i64);

impl TwitchId {
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<i64>().ok().map(TwitchId)
    }
}

impl std::fmt::Display for TwitchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Telegram account that proved control of a following Twitch account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedUser {
    pub telegram_id: TelegramId,
    pub twitch_id: TwitchId,
    pub display_name: String,
    pub linked_at: DateTime<Utc>,
}

/// A Telegram account the owner let in without follower verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhitelistedUser {
    pub telegram_id: TelegramId,
    pub note: String,
}

/// Derived on demand; never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipStatus {
    Unlinked,
    Linked,
    Whitelisted,
}

impl MembershipStatus {
    pub fn is_member(self) -> bool {
        !matches!(self, MembershipStatus::Unlinked)
    }
}

/// Posting rights applied to a group member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rights {
    Full,
    Restricted,
}

/// Twitch account as returned by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwitchUser {
    pub id: TwitchId,
    pub login: String,
    pub display_name: String,
}
