//! Command Dispatcher: maps inbound chat events onto engine calls and turns
//! the outcomes into replies.

pub mod commands;
pub mod owner_flow;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    domain::{ChatId, MembershipStatus, TelegramId},
    engine::{actor::EngineHandle, LinkRequest, MANUAL_WHITELIST_NOTE},
    errors::Error,
    formatting::escape_html,
    ports::ChatPort,
    security::is_owner,
    Result,
};

use commands::{parse_target, Command, OWNER_USAGE, USAGE};
use owner_flow::{OwnerAction, OwnerPrompts, Pending};

const GENERIC_FAILURE: &str = "Something went wrong, please try again later.";

/// Platform-neutral inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncomingEvent {
    Message {
        chat_id: ChatId,
        is_private: bool,
        from: Option<TelegramId>,
        text: String,
    },
    MembersJoined {
        chat_id: ChatId,
        members: Vec<JoinedMember>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinedMember {
    pub id: TelegramId,
    pub is_bot: bool,
}

pub struct CommandDispatcher {
    engine: EngineHandle,
    chat: Arc<dyn ChatPort>,
    group: ChatId,
    owner: TelegramId,
    prompts: OwnerPrompts,
}

impl CommandDispatcher {
    pub fn new(
        engine: EngineHandle,
        chat: Arc<dyn ChatPort>,
        group: ChatId,
        owner: TelegramId,
        prompts: OwnerPrompts,
    ) -> Self {
        Self {
            engine,
            chat,
            group,
            owner,
            prompts,
        }
    }

    /// Errors returned here are chat-send failures; engine failures have
    /// already been turned into replies.
    pub async fn dispatch(&self, event: IncomingEvent) -> Result<()> {
        match event {
            IncomingEvent::MembersJoined { chat_id, members } => {
                self.on_members_joined(chat_id, &members).await;
                Ok(())
            }
            IncomingEvent::Message {
                chat_id,
                is_private,
                from: Some(from),
                text,
            } => match Command::parse(&text) {
                Some(cmd) => self.on_command(chat_id, is_private, from, cmd).await,
                None if is_private && is_owner(Some(from), self.owner) => {
                    self.on_owner_text(chat_id, &text).await
                }
                None => Ok(()),
            },
            IncomingEvent::Message { from: None, .. } => Ok(()),
        }
    }

    async fn on_members_joined(&self, chat_id: ChatId, members: &[JoinedMember]) {
        if chat_id != self.group {
            debug!(chat_id = chat_id.0, "join event outside the managed group");
            return;
        }
        for member in members.iter().filter(|m| !m.is_bot) {
            if let Err(e) = self.engine.restrict_newcomer(member.id).await {
                error!(tg_id = member.id.0, error = %e, op = "join", "failed to restrict newcomer");
            }
        }
    }

    async fn on_command(
        &self,
        chat_id: ChatId,
        is_private: bool,
        from: TelegramId,
        cmd: Command,
    ) -> Result<()> {
        let owner = is_owner(Some(from), self.owner);
        match cmd {
            Command::Start | Command::Help => {
                if owner && is_private {
                    self.reply(chat_id, &format!("{USAGE}{OWNER_USAGE}")).await
                } else {
                    self.reply(chat_id, USAGE).await
                }
            }
            Command::GetLink if !is_private => {
                self.reply(chat_id, "Send /getlink to me in a private chat.")
                    .await
            }
            Command::GetLink => self.on_get_link(chat_id, from).await,
            Command::Status => {
                let text = match self.engine.status(from) {
                    Ok(MembershipStatus::Whitelisted) => "You are whitelisted.",
                    Ok(MembershipStatus::Linked) => "Your Twitch account is linked.",
                    Ok(MembershipStatus::Unlinked) => {
                        "Your Twitch account is not linked. Use /getlink to link it."
                    }
                    Err(e) => {
                        error!(tg_id = from.0, error = %e, op = "status", "status lookup failed");
                        GENERIC_FAILURE
                    }
                };
                self.reply(chat_id, text).await
            }
            Command::Add | Command::Remove if owner && is_private => {
                let (action, prompt) = if cmd == Command::Add {
                    (OwnerAction::Whitelist, "Send the Telegram ID of the user to whitelist.")
                } else {
                    (
                        OwnerAction::Unwhitelist,
                        "Send the Telegram ID of the user to remove from the whitelist.",
                    )
                };
                self.prompts.begin(from, action).await;
                self.reply(chat_id, prompt).await
            }
            Command::Cancel if owner && is_private => {
                let text = if self.prompts.cancel(from).await {
                    "Cancelled."
                } else {
                    "Nothing to cancel."
                };
                self.reply(chat_id, text).await
            }
            Command::Add | Command::Remove | Command::Cancel => {
                debug!(tg_id = from.0, ?cmd, "owner command ignored");
                Ok(())
            }
            Command::Unknown(_) if is_private => {
                self.reply(chat_id, "Unknown command. Use /help.").await
            }
            Command::Unknown(_) => Ok(()),
        }
    }

    async fn on_get_link(&self, chat_id: ChatId, from: TelegramId) -> Result<()> {
        let text = match self.engine.request_link(from).await {
            Ok(LinkRequest::Authorize { url }) => format!(
                "Follow the link to connect your Twitch account:\n<a href=\"{}\">Authorize with Twitch</a>",
                escape_html(&url)
            ),
            Ok(LinkRequest::AlreadyMember(_)) => {
                "You already have access. Your rights in the group were restored.".to_string()
            }
            Err(Error::PermissionChangeFailed { .. }) => {
                "You already have access, but restoring your rights failed. Please try again later."
                    .to_string()
            }
            Err(e) => {
                error!(tg_id = from.0, error = %e, op = "getlink", "link request failed");
                GENERIC_FAILURE.to_string()
            }
        };
        self.reply(chat_id, &text).await
    }

    async fn on_owner_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let action = match self.prompts.take(self.owner).await {
            Pending::Ready(action) => action,
            Pending::Expired(_) => {
                return self
                    .reply(chat_id, "The prompt timed out. Send /add or /remove again.")
                    .await;
            }
            Pending::Idle => return Ok(()),
        };

        let Some(target) = parse_target(text) else {
            self.prompts.begin(self.owner, action).await;
            return self.reply(chat_id, "ID must be numeric").await;
        };

        let reply = match action {
            OwnerAction::Whitelist => self.whitelist_target(target).await,
            OwnerAction::Unwhitelist => self.unwhitelist_target(target).await,
        };
        self.reply(chat_id, &reply).await
    }

    async fn whitelist_target(&self, target: TelegramId) -> String {
        match self.chat.is_group_member(target).await {
            Ok(true) => {}
            Ok(false) => return format!("User {} is not a member of the group.", target.0),
            Err(e) => {
                warn!(tg_id = target.0, error = %e, "group member lookup failed");
                return GENERIC_FAILURE.to_string();
            }
        }

        match self
            .engine
            .manual_whitelist(target, MANUAL_WHITELIST_NOTE)
            .await
        {
            Ok(()) => {
                info!(tg_id = target.0, op = "whitelist", "owner whitelisted user");
                format!("User {} added to the whitelist.", target.0)
            }
            Err(Error::AlreadyExists(_)) => {
                format!("User {} is already whitelisted.", target.0)
            }
            Err(Error::PermissionChangeFailed { .. }) => format!(
                "User {} was whitelisted, but updating their rights failed.",
                target.0
            ),
            Err(e) => {
                error!(tg_id = target.0, error = %e, op = "whitelist", "whitelist failed");
                GENERIC_FAILURE.to_string()
            }
        }
    }

    async fn unwhitelist_target(&self, target: TelegramId) -> String {
        match self.engine.remove_whitelist(target).await {
            Ok(MembershipStatus::Linked) => format!(
                "User {} removed from the whitelist. They keep access through their linked Twitch account.",
                target.0
            ),
            Ok(_) => format!("User {} removed from the whitelist.", target.0),
            Err(Error::NotFound(_)) => format!("User {} is not whitelisted.", target.0),
            Err(Error::PermissionChangeFailed { .. }) => format!(
                "User {} was removed from the whitelist, but restricting their rights failed.",
                target.0
            ),
            Err(e) => {
                error!(tg_id = target.0, error = %e, op = "unwhitelist", "whitelist removal failed");
                GENERIC_FAILURE.to_string()
            }
        }
    }

    async fn reply(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.chat.send_html(chat_id, html).await
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        domain::{Rights, TwitchId},
        engine::Engine,
        followers::FollowerDirectory,
        sessions::LinkSessions,
        store::IdentityStore,
        test_support::{FakeChat, FakeProvider},
    };

    const GROUP: ChatId = ChatId(-1001);
    const OWNER: TelegramId = TelegramId(42);
    const OWNER_CHAT: ChatId = ChatId(42);

    struct Fixture {
        dispatcher: CommandDispatcher,
        store: Arc<IdentityStore>,
        chat: Arc<FakeChat>,
        _cancel: CancellationToken,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(IdentityStore::open_in_memory().unwrap());
        let provider = Arc::new(FakeProvider::default());
        let chat = Arc::new(FakeChat::default());
        let engine = Arc::new(Engine::new(
            store.clone(),
            Arc::new(LinkSessions::default()),
            Arc::new(FollowerDirectory::new(provider.clone(), TwitchId(777))),
            provider,
            chat.clone(),
        ));
        let cancel = CancellationToken::new();
        let (handle, _task) = EngineHandle::spawn(engine, cancel.clone());
        let dispatcher = CommandDispatcher::new(
            handle,
            chat.clone(),
            GROUP,
            OWNER,
            OwnerPrompts::default(),
        );
        Fixture {
            dispatcher,
            store,
            chat,
            _cancel: cancel,
        }
    }

    fn private(from: TelegramId, text: &str) -> IncomingEvent {
        IncomingEvent::Message {
            chat_id: ChatId(from.0),
            is_private: true,
            from: Some(from),
            text: text.to_string(),
        }
    }

    fn member(id: i64, is_bot: bool) -> JoinedMember {
        JoinedMember {
            id: TelegramId(id),
            is_bot,
        }
    }

    fn last_reply(chat: &FakeChat, to: ChatId) -> String {
        chat.sent_to(to).pop().unwrap_or_default()
    }

    #[tokio::test]
    async fn join_restricts_non_members_and_skips_bots() {
        let f = fixture();
        f.store.add_linked(TelegramId(1), TwitchId(100), "a").unwrap();

        f.dispatcher
            .dispatch(IncomingEvent::MembersJoined {
                chat_id: GROUP,
                members: vec![member(1, false), member(2, false), member(3, true)],
            })
            .await
            .unwrap();

        assert_eq!(f.chat.rights(), vec![(TelegramId(2), Rights::Restricted)]);
    }

    #[tokio::test]
    async fn join_in_other_chat_is_ignored() {
        let f = fixture();
        f.dispatcher
            .dispatch(IncomingEvent::MembersJoined {
                chat_id: ChatId(-5),
                members: vec![member(2, false)],
            })
            .await
            .unwrap();
        assert!(f.chat.rights().is_empty());
    }

    #[tokio::test]
    async fn getlink_in_private_sends_authorization_url() {
        let f = fixture();
        f.dispatcher
            .dispatch(private(TelegramId(5), "/getlink"))
            .await
            .unwrap();

        let reply = last_reply(&f.chat, ChatId(5));
        assert!(reply.contains("https://id.example/oauth2/authorize?state="));
    }

    #[tokio::test]
    async fn getlink_in_group_points_to_private_chat() {
        let f = fixture();
        f.dispatcher
            .dispatch(IncomingEvent::Message {
                chat_id: GROUP,
                is_private: false,
                from: Some(TelegramId(5)),
                text: "/getlink@ttg_bot".to_string(),
            })
            .await
            .unwrap();

        assert!(last_reply(&f.chat, GROUP).contains("private chat"));
        assert!(f.chat.sent_to(ChatId(5)).is_empty());
    }

    #[tokio::test]
    async fn owner_two_step_whitelist() {
        let f = fixture();
        f.dispatcher.dispatch(private(OWNER, "/add")).await.unwrap();
        f.dispatcher.dispatch(private(OWNER, "abc")).await.unwrap();
        assert_eq!(last_reply(&f.chat, OWNER_CHAT), "ID must be numeric");

        f.dispatcher.dispatch(private(OWNER, "900")).await.unwrap();
        assert!(last_reply(&f.chat, OWNER_CHAT).contains("added to the whitelist"));
        assert!(f.store.get_whitelisted(TelegramId(900)).unwrap().is_some());
        assert_eq!(f.chat.rights(), vec![(TelegramId(900), Rights::Full)]);

        // The prompt is consumed; a further number is plain text.
        f.dispatcher.dispatch(private(OWNER, "901")).await.unwrap();
        assert!(f.store.get_whitelisted(TelegramId(901)).unwrap().is_none());
    }

    #[tokio::test]
    async fn owner_whitelist_requires_group_membership() {
        let f = fixture();
        f.chat.mark_non_member(TelegramId(900));
        f.dispatcher.dispatch(private(OWNER, "/add")).await.unwrap();
        f.dispatcher.dispatch(private(OWNER, "900")).await.unwrap();

        assert!(last_reply(&f.chat, OWNER_CHAT).contains("not a member"));
        assert!(f.store.get_whitelisted(TelegramId(900)).unwrap().is_none());
    }

    #[tokio::test]
    async fn owner_remove_restricts_unlinked_user() {
        let f = fixture();
        f.store.add_whitelisted(TelegramId(900), "x").unwrap();
        f.dispatcher.dispatch(private(OWNER, "/remove")).await.unwrap();
        f.dispatcher.dispatch(private(OWNER, "900")).await.unwrap();

        assert!(last_reply(&f.chat, OWNER_CHAT).contains("removed from the whitelist"));
        assert_eq!(f.chat.rights(), vec![(TelegramId(900), Rights::Restricted)]);

        f.dispatcher.dispatch(private(OWNER, "/remove")).await.unwrap();
        f.dispatcher.dispatch(private(OWNER, "900")).await.unwrap();
        assert!(last_reply(&f.chat, OWNER_CHAT).contains("is not whitelisted"));
    }

    #[tokio::test]
    async fn owner_commands_from_others_are_ignored() {
        let f = fixture();
        f.dispatcher.dispatch(private(TelegramId(5), "/add")).await.unwrap();
        f.dispatcher.dispatch(private(TelegramId(5), "900")).await.unwrap();

        assert!(f.chat.sent().is_empty());
        assert!(f.store.get_whitelisted(TelegramId(900)).unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_clears_pending_prompt() {
        let f = fixture();
        f.dispatcher.dispatch(private(OWNER, "/add")).await.unwrap();
        f.dispatcher.dispatch(private(OWNER, "/cancel")).await.unwrap();
        assert_eq!(last_reply(&f.chat, OWNER_CHAT), "Cancelled.");

        f.dispatcher.dispatch(private(OWNER, "900")).await.unwrap();
        assert!(f.store.get_whitelisted(TelegramId(900)).unwrap().is_none());
    }

    #[tokio::test]
    async fn status_reports_membership() {
        let f = fixture();
        f.store.add_whitelisted(TelegramId(6), "x").unwrap();
        f.dispatcher.dispatch(private(TelegramId(6), "/status")).await.unwrap();
        f.dispatcher.dispatch(private(TelegramId(7), "/status")).await.unwrap();

        assert_eq!(last_reply(&f.chat, ChatId(6)), "You are whitelisted.");
        assert!(last_reply(&f.chat, ChatId(7)).contains("not linked"));
    }
}
