//! Linking Session Cache.
//!
//! Short-lived bidirectional mapping between an opaque link token (the OAuth
//! `state` value) and the Telegram user that asked for it. Entries expire
//! after a fixed TTL; an expired entry is indistinguishable from one that
//! never existed.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::domain::TelegramId;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Debug)]
struct Entry {
    user: TelegramId,
    expires_at: Instant,
}

#[derive(Default)]
struct SessionMaps {
    by_token: HashMap<String, Entry>,
    by_user: HashMap<TelegramId, String>,
}

impl SessionMaps {
    fn live_token_for(&self, user: TelegramId, now: Instant) -> Option<&str> {
        let token = self.by_user.get(&user)?;
        let entry = self.by_token.get(token)?;
        (entry.expires_at > now).then_some(token.as_str())
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.by_token.len();
        self.by_token.retain(|_, e| e.expires_at > now);
        let by_token = &self.by_token;
        self.by_user.retain(|_, token| by_token.contains_key(token));
        before - self.by_token.len()
    }
}

pub struct LinkSessions {
    ttl: Duration,
    maps: Mutex<SessionMaps>,
}

impl LinkSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            maps: Mutex::new(SessionMaps::default()),
        }
    }

    /// Return the live token for `user`, or mint a fresh one.
    ///
    /// Reuse does not extend the original expiry.
    pub async fn create_or_reuse(&self, user: TelegramId) -> String {
        let now = Instant::now();
        let mut maps = self.maps.lock().await;

        if let Some(token) = maps.live_token_for(user, now) {
            return token.to_string();
        }

        maps.purge(now);
        let token = Uuid::new_v4().to_string();
        maps.by_token.insert(
            token.clone(),
            Entry {
                user,
                expires_at: now + self.ttl,
            },
        );
        maps.by_user.insert(user, token.clone());
        debug!(tg_id = user.0, "link session created");
        token
    }

    pub async fn resolve(&self, token: &str) -> Option<TelegramId> {
        let now = Instant::now();
        let maps = self.maps.lock().await;
        maps.by_token
            .get(token)
            .filter(|e| e.expires_at > now)
            .map(|e| e.user)
    }

    /// Drop every expired entry; returns how many went away.
    pub async fn purge_expired(&self) -> usize {
        self.maps.lock().await.purge(Instant::now())
    }

    /// Periodically purge expired sessions until `cancel` fires.
    pub async fn run_janitor(&self, every: Duration, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                let purged = self.purge_expired().await;
                if purged > 0 {
                  debug!(purged, "expired link sessions purged");
                }
              }
            }
        }
    }
}

impl Default for LinkSessions {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}
