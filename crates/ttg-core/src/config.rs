use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{ChatId, TelegramId},
    errors::Error,
    Result,
};

pub const CALLBACK_PATH: &str = "/auth/callback";

/// Typed process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    // Twitch
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub twitch_channel: String,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_group_id: ChatId,
    pub telegram_owner_id: TelegramId,

    // Callback surface
    pub public_host: String,
    pub http_listen_addr: SocketAddr,
    pub http_public_port: u16,
    pub callback_rate_limit_per_min: u32,
    pub callback_rate_limit_burst: u32,

    // Storage
    pub database_path: PathBuf,

    // Timings
    pub sweep_interval: Duration,
    pub link_session_ttl: Duration,
    pub owner_prompt_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env, map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            get(key)
                .and_then(non_empty)
                .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
        };

        let twitch_client_id = required("TWITCH_CLIENT_ID")?;
        let twitch_client_secret = required("TWITCH_CLIENT_SECRET")?;
        let twitch_channel = required("TWITCH_CHANNEL")?.trim().to_lowercase();
        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let telegram_group_id = ChatId(parse_required_i64(
            "TELEGRAM_GROUP_ID",
            &required("TELEGRAM_GROUP_ID")?,
        )?);
        let telegram_owner_id = TelegramId(parse_required_i64(
            "TELEGRAM_OWNER_ID",
            &required("TELEGRAM_OWNER_ID")?,
        )?);
        let public_host = required("PUBLIC_HOST")?.trim().to_string();

        let http_listen_addr = match get("HTTP_LISTEN_ADDR").and_then(non_empty) {
            Some(raw) => raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| Error::Config(format!("HTTP_LISTEN_ADDR is invalid: {e}")))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8444)),
        };
        let http_public_port = parse_opt(&get, "HTTP_PUBLIC_PORT")?.unwrap_or(8444u16);
        let callback_rate_limit_per_min =
            parse_opt(&get, "CALLBACK_RATE_LIMIT_PER_MIN")?.unwrap_or(30u32);
        let callback_rate_limit_burst =
            parse_opt(&get, "CALLBACK_RATE_LIMIT_BURST")?.unwrap_or(5u32);

        let database_path = get("DATABASE_PATH")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("db.sqlite"));

        let sweep_interval =
            Duration::from_secs(parse_opt(&get, "SWEEP_INTERVAL_SECS")?.unwrap_or(30 * 60));
        let link_session_ttl =
            Duration::from_secs(parse_opt(&get, "LINK_SESSION_TTL_SECS")?.unwrap_or(10 * 60));
        let owner_prompt_timeout =
            Duration::from_secs(parse_opt(&get, "OWNER_PROMPT_TIMEOUT_SECS")?.unwrap_or(5 * 60));

        if sweep_interval.is_zero() {
            return Err(Error::Config("SWEEP_INTERVAL_SECS must be > 0".to_string()));
        }
        if callback_rate_limit_per_min == 0 || callback_rate_limit_burst == 0 {
            return Err(Error::Config(
                "callback rate limit values must be > 0".to_string(),
            ));
        }

        Ok(Self {
            twitch_client_id,
            twitch_client_secret,
            twitch_channel,
            telegram_bot_token,
            telegram_group_id,
            telegram_owner_id,
            public_host,
            http_listen_addr,
            http_public_port,
            callback_rate_limit_per_min,
            callback_rate_limit_burst,
            database_path,
            sweep_interval,
            link_session_ttl,
            owner_prompt_timeout,
        })
    }

    /// OAuth redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        let scheme = if self.public_host == "localhost" {
            "http"
        } else {
            "https"
        };
        format!(
            "{scheme}://{}:{}{CALLBACK_PATH}",
            self.public_host, self.http_public_port
        )
    }

    /// Window over which `callback_rate_limit_burst` requests refill, so the
    /// sustained rate equals `callback_rate_limit_per_min`.
    pub fn callback_rate_limit_window(&self) -> Duration {
        Duration::from_secs_f64(
            60.0 * self.callback_rate_limit_burst as f64 / self.callback_rate_limit_per_min as f64,
        )
    }
}

fn parse_required_i64(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("{key} must be a numeric id, got {raw:?}")))
}

fn parse_opt<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} is not a valid number: {raw:?}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
