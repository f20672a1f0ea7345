//! Telegram adapter (teloxide).
//!
//! This crate implements the `ttg-core` ChatPort over the Telegram Bot API and
//! feeds inbound updates to the core dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ChatPermissions, ParseMode, UserId},
    RequestError,
};

use tokio::time::sleep;
use tracing::debug;

pub mod handlers;
pub mod router;

use ttg_core::{
    domain::{ChatId, Rights, TelegramId},
    errors::Error,
    ports::ChatPort,
    Result,
};

#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
    group: ChatId,
}

impl TelegramChat {
    pub fn new(bot: Bot, group: ChatId) -> Self {
        Self { bot, group }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_user(user: TelegramId) -> Result<UserId> {
        u64::try_from(user.0)
            .map(UserId)
            .map_err(|_| Error::External(format!("invalid telegram user id {}", user.0)))
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

pub fn permissions_for(rights: Rights) -> ChatPermissions {
    match rights {
        Rights::Full => {
            ChatPermissions::SEND_MESSAGES
                | ChatPermissions::SEND_MEDIA_MESSAGES
                | ChatPermissions::SEND_POLLS
                | ChatPermissions::SEND_OTHER_MESSAGES
                | ChatPermissions::ADD_WEB_PAGE_PREVIEWS
        }
        Rights::Restricted => ChatPermissions::empty(),
    }
}

#[async_trait]
impl ChatPort for TelegramChat {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn set_rights(&self, user: TelegramId, rights: Rights) -> Result<()> {
        let user_id = Self::tg_user(user)?;
        let permissions = permissions_for(rights);
        self.with_retry(|| {
            self.bot
                .restrict_chat_member(Self::tg_chat(self.group), user_id, permissions)
        })
        .await
        .map_err(Self::map_err)?;
        debug!(tg_id = user.0, ?rights, "chat permissions applied");
        Ok(())
    }

    async fn is_group_member(&self, user: TelegramId) -> Result<bool> {
        let user_id = Self::tg_user(user)?;
        match self
            .with_retry(|| self.bot.get_chat_member(Self::tg_chat(self.group), user_id))
            .await
        {
            Ok(member) => Ok(member.kind.is_present()),
            // "user not found" and friends: never seen in the group.
            Err(RequestError::Api(e)) => {
                debug!(tg_id = user.0, error = %e, "member lookup rejected");
                Ok(false)
            }
            Err(e) => Err(Self::map_err(e)),
        }
    }
}
