use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ttg_core::dispatch::CommandDispatcher;

use crate::handlers;

/// Long-poll Telegram until `cancel` fires.
pub async fn run_polling(
    bot: Bot,
    dispatcher: Arc<CommandDispatcher>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "telegram bot started"),
        Err(e) => warn!(error = %e, "get_me failed; polling anyway"),
    }

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut tg = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .build();

    let shutdown = tg.shutdown_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        // Idle until dispatch() has actually started.
        loop {
            match shutdown.shutdown() {
                Ok(done) => break done.await,
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    tg.dispatch().await;
    info!("telegram polling stopped");
    Ok(())
}
