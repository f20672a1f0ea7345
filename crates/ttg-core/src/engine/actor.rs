//! Single-consumer task that owns every engine mutation.
//!
//! Callers on any task send a request and await the reply; the actor runs one
//! request to completion before receiving the next, so link, whitelist and
//! sweep operations never interleave.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    domain::{MembershipStatus, TelegramId},
    errors::Error,
    sweeper::{self, SweepReport},
    Result,
};

use super::{Engine, LinkOutcome, LinkRequest};

const QUEUE_DEPTH: usize = 64;

enum Request {
    RequestLink {
        user: TelegramId,
        reply: oneshot::Sender<Result<LinkRequest>>,
    },
    CompleteLink {
        state: String,
        code: String,
        reply: oneshot::Sender<Result<LinkOutcome>>,
    },
    ManualWhitelist {
        user: TelegramId,
        note: String,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveWhitelist {
        user: TelegramId,
        reply: oneshot::Sender<Result<MembershipStatus>>,
    },
    RestrictNewcomer {
        user: TelegramId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Sweep {
        reply: oneshot::Sender<Result<SweepReport>>,
    },
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
    engine: Arc<Engine>,
}

impl EngineHandle {
    /// Start the actor. It stops when `cancel` fires or every handle is dropped.
    pub fn spawn(engine: Arc<Engine>, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run(engine.clone(), rx, cancel));
        (Self { tx, engine }, task)
    }

    /// Status read outside the mutation queue; may trail an in-flight change.
    pub fn status(&self, user: TelegramId) -> Result<MembershipStatus> {
        self.engine.check_status(user)
    }

    pub async fn request_link(&self, user: TelegramId) -> Result<LinkRequest> {
        self.call(|reply| Request::RequestLink { user, reply }).await
    }

    pub async fn complete_link(&self, state: &str, code: &str) -> Result<LinkOutcome> {
        let (state, code) = (state.to_string(), code.to_string());
        self.call(|reply| Request::CompleteLink { state, code, reply })
            .await
    }

    pub async fn manual_whitelist(&self, user: TelegramId, note: &str) -> Result<()> {
        let note = note.to_string();
        self.call(|reply| Request::ManualWhitelist { user, note, reply })
            .await
    }

    pub async fn remove_whitelist(&self, user: TelegramId) -> Result<MembershipStatus> {
        self.call(|reply| Request::RemoveWhitelist { user, reply })
            .await
    }

    pub async fn restrict_newcomer(&self, user: TelegramId) -> Result<bool> {
        self.call(|reply| Request::RestrictNewcomer { user, reply })
            .await
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.call(|reply| Request::Sweep { reply }).await
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| engine_stopped())?;
        rx.await.map_err(|_| engine_stopped())?
    }
}

fn engine_stopped() -> Error {
    Error::External("engine actor stopped".to_string())
}

async fn run(engine: Arc<Engine>, mut rx: mpsc::Receiver<Request>, cancel: CancellationToken) {
    info!("engine actor started");
    loop {
        let req = tokio::select! {
          _ = cancel.cancelled() => break,
          req = rx.recv() => match req {
            Some(req) => req,
            None => {
                info!("engine actor stopped");
                return;
            }
          },
        };
        handle(&engine, req).await;
    }

    // Refuse new work but answer everything already queued.
    rx.close();
    let mut drained = 0usize;
    while let Some(req) = rx.recv().await {
        handle(&engine, req).await;
        drained += 1;
    }
    info!(drained, "engine actor stopped");
}

async fn handle(engine: &Engine, req: Request) {
    // A dropped receiver only means the caller went away.
    match req {
        Request::RequestLink { user, reply } => {
            let _ = reply.send(engine.request_link(user).await);
        }
        Request::CompleteLink { state, code, reply } => {
            let _ = reply.send(engine.complete_link(&state, &code).await);
        }
        Request::ManualWhitelist { user, note, reply } => {
            let _ = reply.send(engine.manual_whitelist(user, &note).await);
        }
        Request::RemoveWhitelist { user, reply } => {
            let _ = reply.send(engine.remove_whitelist(user).await);
        }
        Request::RestrictNewcomer { user, reply } => {
            let _ = reply.send(engine.restrict_newcomer(user).await);
        }
        Request::Sweep { reply } => {
            debug!("sweep dequeued");
            let _ = reply.send(sweeper::sweep(engine).await);
        }
    }
}
