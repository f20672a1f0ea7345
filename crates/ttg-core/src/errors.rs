use crate::domain::{TelegramId, TwitchId};

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the engine and
/// the surfaces above it can decide between a user-facing rejection, a client
/// error, and a logged upstream failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("already linked: {0}")]
    AlreadyLinked(String),

    #[error("link session expired or unknown")]
    SessionExpired,

    #[error("provider authorization failed: {0}")]
    ProviderAuthFailed(String),

    #[error("provider api error: {0}")]
    ProviderApi(String),

    /// The provider rejected the application credential (HTTP 401).
    #[error("provider rejected app credential: {0}")]
    CredentialRejected(String),

    #[error("permission change failed for telegram user {user}: {reason}")]
    PermissionChangeFailed { user: TelegramId, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn telegram_exists(id: TelegramId) -> Self {
        Error::AlreadyExists(format!("telegram user {}", id.0))
    }

    pub fn twitch_exists(id: TwitchId) -> Self {
        Error::AlreadyExists(format!("twitch user {}", id.0))
    }

    /// Upstream failures are the ones worth retrying later; everything else is
    /// a definitive answer.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::ProviderAuthFailed(_) | Error::ProviderApi(_) | Error::CredentialRejected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
