//! Authorization Decision Engine.
//!
//! Decides the membership status of a Telegram user and drives the matching
//! rights change on the chat platform. The mutating operations here must not
//! run concurrently; [`actor::EngineHandle`] is the only production caller and
//! runs them one at a time.
//!
//! Per Telegram user:
//! - `Unlinked -> Linked` on a completed OAuth link of a following account
//! - `Linked -> Unlinked` when the sweep finds the account no longer follows
//!
//! The whitelist is independent of both and always checked first.

pub mod actor;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    domain::{ChatId, MembershipStatus, Rights, TelegramId, TwitchId},
    errors::Error,
    followers::FollowerDirectory,
    ports::{ChatPort, FollowerProvider},
    sessions::LinkSessions,
    store::IdentityStore,
    Result,
};

pub const MANUAL_WHITELIST_NOTE: &str = "manual added";

/// Answer to a link request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkRequest {
    /// Already a member; rights were re-applied instead of issuing a link.
    AlreadyMember(MembershipStatus),
    /// Provider authorization URL carrying the session token as `state`.
    Authorize { url: String },
}

/// Non-error outcomes of completing a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked { display_name: String },
    /// Authorization worked but the account does not follow the channel.
    NotFollower { display_name: String },
}

pub struct Engine {
    store: Arc<IdentityStore>,
    sessions: Arc<LinkSessions>,
    directory: Arc<FollowerDirectory>,
    provider: Arc<dyn FollowerProvider>,
    chat: Arc<dyn ChatPort>,
}

impl Engine {
    pub fn new(
        store: Arc<IdentityStore>,
        sessions: Arc<LinkSessions>,
        directory: Arc<FollowerDirectory>,
        provider: Arc<dyn FollowerProvider>,
        chat: Arc<dyn ChatPort>,
    ) -> Self {
        Self {
            store,
            sessions,
            directory,
            provider,
            chat,
        }
    }

    pub(crate) fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub(crate) fn directory(&self) -> &FollowerDirectory {
        &self.directory
    }

    /// Whitelist first, then the linked table.
    pub fn check_status(&self, user: TelegramId) -> Result<MembershipStatus> {
        if self.store.get_whitelisted(user)?.is_some() {
            return Ok(MembershipStatus::Whitelisted);
        }
        if self.store.get_by_telegram_id(user)?.is_some() {
            return Ok(MembershipStatus::Linked);
        }
        Ok(MembershipStatus::Unlinked)
    }

    pub async fn request_link(&self, user: TelegramId) -> Result<LinkRequest> {
        let status = self.check_status(user)?;
        if status.is_member() {
            info!(tg_id = user.0, ?status, "link requested by member, restoring rights");
            self.apply_rights(user, Rights::Full, "restore").await?;
            return Ok(LinkRequest::AlreadyMember(status));
        }

        let token = self.sessions.create_or_reuse(user).await;
        let url = self.provider.authorization_url(&token)?;
        info!(tg_id = user.0, "authorization link issued");
        Ok(LinkRequest::Authorize { url })
    }

    pub async fn complete_link(&self, state: &str, code: &str) -> Result<LinkOutcome> {
        let Some(user) = self.sessions.resolve(state).await else {
            return Err(Error::SessionExpired);
        };

        if self.store.get_by_telegram_id(user)?.is_some() {
            warn!(tg_id = user.0, "link completion for already linked telegram user");
            return Err(Error::AlreadyLinked(format!("telegram user {}", user.0)));
        }

        let user_token = self.provider.exchange_code(code).await.map_err(|e| {
            warn!(tg_id = user.0, error = %e, "authorization code exchange failed");
            as_auth_failure(e)
        })?;
        let account = self
            .provider
            .current_user(&user_token)
            .await
            .map_err(as_auth_failure)?;

        if let Some(existing) = self.store.get_by_twitch_id(account.id)? {
            if existing.telegram_id != user {
                warn!(
                    tg_id = user.0,
                    twitch_id = account.id.0,
                    bound_to = existing.telegram_id.0,
                    "twitch account already linked to another telegram user"
                );
                return Err(Error::AlreadyLinked(format!("twitch user {}", account.id)));
            }
        }

        if !self.directory.is_follower(account.id).await? {
            info!(
                tg_id = user.0,
                twitch_id = account.id.0,
                "authorized account does not follow the channel"
            );
            return Ok(LinkOutcome::NotFollower {
                display_name: account.display_name,
            });
        }

        self.store
            .add_linked(user, account.id, &account.display_name)
            .map_err(|e| match e {
                Error::AlreadyExists(what) => Error::AlreadyLinked(what),
                other => other,
            })?;
        info!(
            tg_id = user.0,
            twitch_id = account.id.0,
            name = %account.display_name,
            "user linked"
        );

        self.apply_rights(user, Rights::Full, "link").await?;
        Ok(LinkOutcome::Linked {
            display_name: account.display_name,
        })
    }

    /// Owner-only: persist a whitelist entry and grant rights immediately.
    pub async fn manual_whitelist(&self, user: TelegramId, note: &str) -> Result<()> {
        self.store.add_whitelisted(user, note)?;
        info!(tg_id = user.0, note, "user whitelisted");
        self.apply_rights(user, Rights::Full, "whitelist").await?;
        self.notify(user, "You have been added to the whitelist!")
            .await;
        Ok(())
    }

    /// Owner-only: drop a whitelist entry. Users without a link lose their
    /// rights; the resulting status is returned.
    pub async fn remove_whitelist(&self, user: TelegramId) -> Result<MembershipStatus> {
        self.store.remove_whitelisted(user)?;
        info!(tg_id = user.0, "user removed from whitelist");

        let status = self.check_status(user)?;
        if !status.is_member() {
            self.apply_rights(user, Rights::Restricted, "unwhitelist")
                .await?;
        }
        Ok(status)
    }

    /// Default-deny for a user who just joined the group. Returns whether a
    /// restriction was applied.
    pub async fn restrict_newcomer(&self, user: TelegramId) -> Result<bool> {
        if self.check_status(user)?.is_member() {
            return Ok(false);
        }
        info!(tg_id = user.0, "new group member, restricting");
        self.apply_rights_quietly(user, Rights::Restricted, "join")
            .await?;
        Ok(true)
    }

    /// Sweep-driven revocation: the record goes first, then the rights.
    pub(crate) async fn revoke(&self, user: TelegramId, twitch_id: TwitchId) -> Result<()> {
        info!(
            tg_id = user.0,
            twitch_id = twitch_id.0,
            "no longer a follower, revoking"
        );
        self.store.remove_linked(user)?;
        self.apply_rights(user, Rights::Restricted, "revoke").await
    }

    async fn apply_rights(&self, user: TelegramId, rights: Rights, op: &str) -> Result<()> {
        self.apply_rights_quietly(user, rights, op).await?;
        let notice = match rights {
            Rights::Full => "Now you can send messages in the group",
            Rights::Restricted => "Your rights in the group have been restricted",
        };
        self.notify(user, notice).await;
        Ok(())
    }

    async fn apply_rights_quietly(&self, user: TelegramId, rights: Rights, op: &str) -> Result<()> {
        self.chat.set_rights(user, rights).await.map_err(|e| {
            error!(
                tg_id = user.0,
                ?rights,
                op,
                error = %e,
                "rights update failed; stored membership and chat rights now disagree"
            );
            Error::PermissionChangeFailed {
                user,
                reason: e.to_string(),
            }
        })
    }

    async fn notify(&self, user: TelegramId, text: &str) {
        if let Err(e) = self.chat.send_html(ChatId::from(user), text).await {
            warn!(tg_id = user.0, error = %e, "failed to notify user");
        }
    }
}

fn as_auth_failure(e: Error) -> Error {
    match e {
        Error::ProviderAuthFailed(_) => e,
        other => Error::ProviderAuthFailed(other.to_string()),
    }
}
