use std::sync::OnceLock;

use regex::Regex;

use crate::domain::TelegramId;

pub const USAGE: &str = "<b>Twitch follower access</b>\n\n\
Link your Twitch account to get posting rights in the group.\n\n\
/getlink - Get your personal authorization link (private chat only)\n\
/status - Show your current access\n\
/help - Show this message";

pub const OWNER_USAGE: &str = "\n\n<b>Owner</b>\n\
/add - Whitelist a user by Telegram ID\n\
/remove - Remove a user from the whitelist\n\
/cancel - Abort a pending /add or /remove";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    GetLink,
    Status,
    Add,
    Remove,
    Cancel,
    Unknown(String),
}

impl Command {
    /// `None` for text that is not a slash command.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.trim_start().starts_with('/') {
            return None;
        }
        let (cmd, _) = parse_command(text);
        Some(match cmd.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "getlink" => Command::GetLink,
            "status" => Command::Status,
            "add" => Command::Add,
            "remove" => Command::Remove,
            "cancel" => Command::Cancel,
            _ => Command::Unknown(cmd),
        })
    }
}

pub fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

static NUMERIC_ID: OnceLock<Option<Regex>> = OnceLock::new();

/// A bare numeric Telegram id, as the owner types it in reply to a prompt.
pub fn parse_target(text: &str) -> Option<TelegramId> {
    let re = NUMERIC_ID
        .get_or_init(|| Regex::new(r"^-?\d{1,19}$").ok())
        .as_ref()?;
    let text = text.trim();
    if !re.is_match(text) {
        return None;
    }
    text.parse::<i64>().ok().map(TelegramId)
}
