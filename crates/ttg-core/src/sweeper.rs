//! Reconciliation Sweeper.
//!
//! Periodically compares every linked user against a full follower snapshot
//! and revokes the ones whose Twitch account no longer follows the channel.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::TelegramId,
    engine::{actor::EngineHandle, Engine},
    Result,
};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Linked users considered, whitelisted ones excluded.
    pub checked: usize,
    pub revoked: Vec<TelegramId>,
    /// Revocations that did not complete.
    pub failures: usize,
}

/// One reconciliation pass. Must run inside the engine's mutation queue.
///
/// A failed follower snapshot aborts before any revocation.
pub(crate) async fn sweep(engine: &Engine) -> Result<SweepReport> {
    let linked = engine.store().list_all_linked()?;
    if linked.is_empty() {
        debug!("sweep: no linked users");
        return Ok(SweepReport::default());
    }

    let followers = engine.directory().list_followers().await.map_err(|e| {
        error!(error = %e, linked = linked.len(), "sweep aborted: follower snapshot failed");
        e
    })?;

    let mut report = SweepReport::default();
    for (twitch_id, tg_id) in linked {
        if engine.store().get_whitelisted(tg_id)?.is_some() {
            continue;
        }
        report.checked += 1;
        if followers.contains(&twitch_id) {
            continue;
        }

        match engine.revoke(tg_id, twitch_id).await {
            Ok(()) => report.revoked.push(tg_id),
            Err(e) => {
                warn!(tg_id = tg_id.0, twitch_id = twitch_id.0, error = %e, "revocation failed");
                report.failures += 1;
            }
        }
    }

    info!(
        checked = report.checked,
        revoked = report.revoked.len(),
        failures = report.failures,
        "sweep finished"
    );
    Ok(report)
}

pub struct Sweeper {
    handle: EngineHandle,
    every: Duration,
}

impl Sweeper {
    pub fn new(handle: EngineHandle, every: Duration) -> Self {
        Self { handle, every }
    }

    /// Sweep every `every` until cancelled. The first pass runs one period
    /// after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = interval_at(Instant::now() + self.every, self.every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every_secs = self.every.as_secs(), "sweeper started");

        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                if let Err(e) = self.handle.sweep().await {
                  warn!(error = %e, "sweep failed; retrying next tick");
                }
              }
            }
        }
        info!("sweeper stopped");
    }
}
