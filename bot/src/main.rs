mod config;
mod poller;
mod telegram;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use config::Config;
use joblib::{Dispatcher, JobRunner};
use std::sync::Arc;
use telegram::TelegramClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,joblib=debug,bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::parse();
    ensure!(!config.bot_token.trim().is_empty(), "BOT_TOKEN is empty");

    tokio::fs::create_dir_all(&config.novels_dir)
        .await
        .with_context(|| format!("cannot create novels folder {:?}", config.novels_dir))?;

    let client = TelegramClient::new(&config.api_url, config.bot_token.trim())
        .context("cannot build the Telegram client")?;
    let username = match client.get_me().await {
        Ok(me) => me.username,
        Err(err) => {
            tracing::warn!(error = %err, "getMe failed, accepting commands addressed to any bot");
            None
        }
    };
    let runner = JobRunner::new(config.tool_command()).with_termination_grace(config.termination_grace());
    let dispatcher = Arc::new(Dispatcher::new(runner, Arc::new(client.clone()), &config.novels_dir));

    tracing::info!(
        novels_dir = ?config.novels_dir,
        tool = %config.tool,
        username = ?username,
        "lncrawl bot started"
    );

    poller::run(client, dispatcher, username, config.poll_timeout(), async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await;

    Ok(())
}
