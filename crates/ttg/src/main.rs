use std::{sync::Arc, time::Duration};

use teloxide::Bot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ttg_core::{
    config::Config,
    dispatch::{owner_flow::OwnerPrompts, CommandDispatcher},
    engine::{actor::EngineHandle, Engine},
    followers::FollowerDirectory,
    ports::{ChatPort, FollowerProvider},
    sessions::LinkSessions,
    store::IdentityStore,
    sweeper::Sweeper,
};
use ttg_telegram::TelegramChat;
use ttg_twitch::{HelixClient, HelixConfig};
use ttg_web::CallbackState;

const SESSION_PURGE_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ttg_core::logging::init("ttg")?;

    let cfg = Config::load()?;
    info!(
        channel = %cfg.twitch_channel,
        group = cfg.telegram_group_id.0,
        redirect = %cfg.redirect_uri(),
        "starting"
    );

    let store = Arc::new(IdentityStore::open(&cfg.database_path)?);

    let provider: Arc<dyn FollowerProvider> = Arc::new(HelixClient::new(HelixConfig::new(
        cfg.twitch_client_id.clone(),
        cfg.twitch_client_secret.clone(),
        cfg.redirect_uri(),
    ))?);
    let directory =
        Arc::new(FollowerDirectory::connect(provider.clone(), &cfg.twitch_channel).await?);
    let sessions = Arc::new(LinkSessions::new(cfg.link_session_ttl));

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let chat: Arc<dyn ChatPort> = Arc::new(TelegramChat::new(bot.clone(), cfg.telegram_group_id));

    let engine = Arc::new(Engine::new(
        store,
        sessions.clone(),
        directory,
        provider,
        chat.clone(),
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let (handle, actor) = EngineHandle::spawn(engine, cancel.clone());

    let sweeper = tokio::spawn(Sweeper::new(handle.clone(), cfg.sweep_interval).run(cancel.clone()));
    let janitor = {
        let cancel = cancel.clone();
        tokio::spawn(async move { sessions.run_janitor(SESSION_PURGE_EVERY, cancel).await })
    };

    let web = {
        let state = CallbackState::new(
            handle.clone(),
            cfg.callback_rate_limit_burst,
            cfg.callback_rate_limit_window(),
        );
        let addr = cfg.http_listen_addr;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let res = ttg_web::serve(addr, state, cancel.clone()).await;
            if let Err(e) = &res {
                error!(error = %e, "callback server failed; shutting down");
            }
            cancel.cancel();
            res
        })
    };

    let dispatcher = Arc::new(CommandDispatcher::new(
        handle,
        chat,
        cfg.telegram_group_id,
        cfg.telegram_owner_id,
        OwnerPrompts::new(cfg.owner_prompt_timeout),
    ));
    let polled = ttg_telegram::router::run_polling(bot, dispatcher, cancel.clone()).await;

    cancel.cancel();
    join_background(vec![
        ("sweeper", sweeper),
        ("session janitor", janitor),
        ("engine actor", actor),
    ])
    .await;
    web.await??;
    polled?;

    info!("shutdown complete");
    Ok(())
}

/// Await every background task; a panicked or aborted one is logged and its
/// name returned.
async fn join_background(tasks: Vec<(&'static str, JoinHandle<()>)>) -> Vec<&'static str> {
    let mut failed = Vec::new();
    for (task, handle) in tasks {
        if let Err(e) = handle.await {
            error!(task, error = %e, "background task failed");
            failed.push(task);
        }
    }
    failed
}

async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                  _ = tokio::signal::ctrl_c() => {},
                  _ = term.recv() => {},
                  _ = cancel.cancelled() => return,
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                tokio::select! {
                  _ = tokio::signal::ctrl_c() => {},
                  _ = cancel.cancelled() => return,
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => {},
          _ = cancel.cancelled() => return,
        }
    }

    info!("termination signal received");
    cancel.cancel();
}
