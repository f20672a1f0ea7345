//! Telegram update handlers.
//!
//! Each update is converted into a platform-neutral `IncomingEvent` and handed
//! to the core dispatcher; nothing here decides anything.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::warn;

use ttg_core::{
    dispatch::{CommandDispatcher, IncomingEvent, JoinedMember},
    domain::{ChatId, TelegramId},
};

pub fn to_event(msg: &Message) -> Option<IncomingEvent> {
    let chat_id = ChatId(msg.chat.id.0);

    if let Some(users) = msg.new_chat_members() {
        let members = users
            .iter()
            .map(|u| JoinedMember {
                id: TelegramId(u.id.0 as i64),
                is_bot: u.is_bot,
            })
            .collect();
        return Some(IncomingEvent::MembersJoined { chat_id, members });
    }

    let text = msg.text()?;
    Some(IncomingEvent::Message {
        chat_id,
        is_private: msg.chat.is_private(),
        from: msg.from().map(|u| TelegramId(u.id.0 as i64)),
        text: text.to_string(),
    })
}

pub async fn handle_message(
    msg: Message,
    dispatcher: Arc<CommandDispatcher>,
) -> ResponseResult<()> {
    let Some(event) = to_event(&msg) else {
        return Ok(());
    };

    if let Err(e) = dispatcher.dispatch(event).await {
        warn!(chat_id = msg.chat.id.0, error = %e, "failed to handle message");
    }
    Ok(())
}
