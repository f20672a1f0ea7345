//! HTTP callback surface (axum).
//!
//! One endpoint, [`ttg_core::config::CALLBACK_PATH`], receiving the Twitch
//! OAuth redirect. Requests are rate-limited per client address.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{routing::get, Router};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ttg_core::{config::CALLBACK_PATH, engine::actor::EngineHandle, security::RateLimiter};

pub mod callback;

pub use callback::callback_handler;

/// Buckets beyond this many addresses trigger a prune of idle ones.
const LIMITER_PRUNE_THRESHOLD: usize = 4096;

/// Shared state for the callback handler.
#[derive(Clone)]
pub struct CallbackState {
    inner: Arc<CallbackStateInner>,
}

struct CallbackStateInner {
    engine: EngineHandle,
    limiter: Mutex<RateLimiter<IpAddr>>,
}

impl CallbackState {
    pub fn new(engine: EngineHandle, burst: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(CallbackStateInner {
                engine,
                limiter: Mutex::new(RateLimiter::new(true, burst, window)),
            }),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    async fn allow(&self, ip: IpAddr) -> bool {
        let mut limiter = self.inner.limiter.lock().await;
        let now = std::time::Instant::now();
        if limiter.tracked() > LIMITER_PRUNE_THRESHOLD {
            limiter.prune_at(now);
        }
        limiter.check_at(ip, now).0
    }
}

pub fn build_router(state: CallbackState) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback_handler))
        .with_state(state)
}

/// Serve until `cancel` fires; in-flight requests are allowed to finish.
pub async fn serve(
    addr: SocketAddr,
    state: CallbackState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = CALLBACK_PATH, "callback server listening");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;

    info!("callback server stopped");
    Ok(())
}
