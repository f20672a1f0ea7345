use async_trait::async_trait;

use crate::{
    domain::{ChatId, Rights, TelegramId, TwitchId, TwitchUser},
    followers::credential::AppCredential,
    Result,
};

/// Hexagonal port for the chat platform.
///
/// Rights changes and member lookups always target the managed group; the
/// adapter knows which one.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()>;

    async fn set_rights(&self, user: TelegramId, rights: Rights) -> Result<()>;

    /// `Ok(false)` when the platform does not know the user as a group member.
    async fn is_group_member(&self, user: TelegramId) -> Result<bool>;
}

/// Direction of a follow-edge listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowQuery {
    /// Everyone following this channel.
    FollowersOf(TwitchId),
    /// Every channel this user follows.
    FollowedBy(TwitchId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowEdge {
    pub from: TwitchId,
    pub to: TwitchId,
}

#[derive(Clone, Debug, Default)]
pub struct FollowPage {
    pub edges: Vec<FollowEdge>,
    /// `None` once the listing is exhausted.
    pub cursor: Option<String>,
}

/// Hexagonal port for the follower-graph provider (Twitch).
///
/// Calls that take an `app_token` use the shared application credential; the
/// caller owns its freshness. Adapters honor the provider's rate-limit signal
/// on every call.
#[async_trait]
pub trait FollowerProvider: Send + Sync {
    /// Authorization URL embedding `state` as the anti-forgery value.
    fn authorization_url(&self, state: &str) -> Result<String>;

    /// Exchange an OAuth authorization code for a user access token.
    async fn exchange_code(&self, code: &str) -> Result<String>;

    /// "Who am I" for a user access token.
    async fn current_user(&self, user_token: &str) -> Result<TwitchUser>;

    async fn request_app_token(&self) -> Result<AppCredential>;

    async fn lookup_login(&self, app_token: &str, login: &str) -> Result<Option<TwitchUser>>;

    async fn follows_page(
        &self,
        app_token: &str,
        query: FollowQuery,
        cursor: Option<&str>,
    ) -> Result<FollowPage>;
}
