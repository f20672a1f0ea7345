//! Provider rate-limit gate.
//!
//! The provider reports remaining quota and a reset time (unix seconds) with
//! every response. Once the quota hits zero, the next outbound call waits
//! until the reset instant.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_unix: Option<i64>,
}

/// How long to wait before the next call, given the last response's
/// rate-limit feedback and the current unix time.
pub fn backoff_for(info: RateLimitInfo, now_unix: i64) -> Option<Duration> {
    if info.remaining? > 0 {
        return None;
    }
    let reset = info.reset_unix?;
    if reset <= now_unix {
        return None;
    }
    Some(Duration::from_secs((reset - now_unix) as u64))
}

#[derive(Default)]
pub struct RateLimitGate {
    blocked_until: Mutex<Option<i64>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the feedback of a completed call.
    pub async fn observe(&self, info: RateLimitInfo) {
        let mut blocked = self.blocked_until.lock().await;
        *blocked = match info.remaining {
            Some(0) => info.reset_unix,
            _ => None,
        };
    }

    /// Suspend until the provider's quota has reset, if it is exhausted.
    ///
    /// The lock is held across the wait so concurrent callers queue behind
    /// the first one instead of racing into a 429.
    pub async fn wait_ready(&self) {
        let mut blocked = self.blocked_until.lock().await;
        let Some(reset_unix) = *blocked else {
            return;
        };
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_unix: Some(reset_unix),
        };
        if let Some(wait) = backoff_for(info, Utc::now().timestamp()) {
            info!(
                wait_secs = wait.as_secs(),
                "waiting on provider rate limit before next request"
            );
            tokio::time::sleep(wait).await;
        }
        *blocked = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_backoff_while_quota_remains() {
        let info = RateLimitInfo {
            remaining: Some(3),
            reset_unix: Some(2_000),
        };
        assert_eq!(backoff_for(info, 1_000), None);
        assert_eq!(backoff_for(RateLimitInfo::default(), 1_000), None);
    }

    #[test]
    fn exhausted_quota_waits_until_reset() {
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_unix: Some(1_045),
        };
        assert_eq!(backoff_for(info, 1_000), Some(Duration::from_secs(45)));
        assert_eq!(backoff_for(info, 1_045), None);
        assert_eq!(backoff_for(info, 2_000), None);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_sleeps_once_then_opens() {
        let gate = RateLimitGate::new();
        gate.observe(RateLimitInfo {
            remaining: Some(0),
            reset_unix: Some(Utc::now().timestamp() + 30),
        })
        .await;

        let start = tokio::time::Instant::now();
        gate.wait_ready().await;
        assert!(start.elapsed() >= Duration::from_secs(29));

        let again = tokio::time::Instant::now();
        gate.wait_ready().await;
        assert_eq!(again.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn healthy_response_clears_block() {
        let gate = RateLimitGate::new();
        gate.observe(RateLimitInfo {
            remaining: Some(0),
            reset_unix: Some(Utc::now().timestamp() + 3600),
        })
        .await;
        gate.observe(RateLimitInfo {
            remaining: Some(799),
            reset_unix: None,
        })
        .await;
        // Would hang for an hour if the block were still set.
        gate.wait_ready().await;
    }
}
