//! Shared application credential for the follower-graph provider.

use std::time::Duration;

use tokio::{sync::RwLock, time::Instant};
use tracing::{info, warn};

use crate::{ports::FollowerProvider, Result};

/// Renew this long before the provider's stated expiry. Short-lived tokens
/// use half their lifetime instead.
pub const RENEW_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct AppCredential {
    pub access_token: String,
    pub expires_at: Instant,
    renew_at: Instant,
}

impl AppCredential {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        let now = Instant::now();
        let margin = RENEW_MARGIN.min(expires_in / 2);
        Self {
            access_token: access_token.into(),
            expires_at: now + expires_in,
            renew_at: now + (expires_in - margin),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        !self.access_token.is_empty() && now < self.renew_at
    }
}

/// Lock-guarded credential with lazy, mutually exclusive renewal.
///
/// Ordinary use takes the read lock. Renewal takes the write lock and
/// re-checks freshness, so callers queued behind a renewal reuse its result
/// instead of issuing their own request.
#[derive(Default)]
pub struct CredentialCell {
    inner: RwLock<Option<AppCredential>>,
}

impl CredentialCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a usable access token, renewing only when absent or expiring.
    pub async fn ensure_fresh(&self, provider: &dyn FollowerProvider) -> Result<String> {
        {
            let guard = self.inner.read().await;
            if let Some(cred) = guard.as_ref().filter(|c| c.is_fresh(Instant::now())) {
                return Ok(cred.access_token.clone());
            }
        }

        let mut guard = self.inner.write().await;
        if let Some(cred) = guard.as_ref().filter(|c| c.is_fresh(Instant::now())) {
            return Ok(cred.access_token.clone());
        }

        let cred = provider.request_app_token().await?;
        let token = cred.access_token.clone();
        info!(
            expires_in_secs = cred
                .expires_at
                .saturating_duration_since(Instant::now())
                .as_secs(),
            "app credential renewed"
        );
        *guard = Some(cred);
        Ok(token)
    }

    /// Forget the cached credential so the next caller renews it.
    pub async fn invalidate(&self) {
        if self.inner.write().await.take().is_some() {
            warn!("app credential invalidated");
        }
    }
}
