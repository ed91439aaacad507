mod aggregation;
mod analyzer;
mod classifier;
mod config;
mod dispatch;
mod event;
mod format;
mod llm;
mod platform;
mod relay;
mod resolver;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::analyzer::LlmAnalyzer;
use crate::config::Config;
use crate::platform::telegram::{self, TelegramPlatform};
use crate::relay::{BotIdentity, Relay};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,postrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Provider: {}", config.llm.provider);
    info!("  Model: {}", config.llm.model);
    info!("  Language: {}", config.llm.language);
    info!("  Media group debounce: {}ms", config.aggregation.debounce_ms);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);

    let bot = Bot::new(&config.telegram.bot_token);
    let me = bot
        .get_me()
        .await
        .context("Failed to fetch bot identity from Telegram")?;
    let identity = BotIdentity {
        id: me.user.id.0,
        username: me.user.username.clone().unwrap_or_default(),
    };
    info!("Authorized as @{} ({})", identity.username, identity.id);

    let platform = Arc::new(TelegramPlatform::new(
        bot.clone(),
        config.telegram.inline_images,
    ));
    let analyzer = Arc::new(LlmAnalyzer::new(config.llm.clone()));
    let relay = Arc::new(Relay::new(
        identity,
        &config.aggregation,
        analyzer,
        platform,
    ));

    info!("Bot is starting...");
    telegram::run(bot, relay, config.telegram).await?;

    Ok(())
}
