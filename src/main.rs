use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use vova_bot::bot::{Bot, BotDeps};
use vova_bot::channels::{
    ChannelManager, CliChannel, TelegramApi, TelegramChannel, WebhookChannel,
};
use vova_bot::config::{BotConfig, Mode};
use vova_bot::llm::{LlmProvider, Transcriber, create_provider};
use vova_bot::store::{DurableLog, JsonFileLog, ProfileStore};

/// Log to stderr, and to a daily rolling file when `log_dir` is set.
/// The returned guard must live until exit so buffered lines get flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "vova.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🧠 Vova v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {:?}", config.mode);
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Memory: {}", config.memory_file.display());
    eprintln!("   Profiles: {}", config.profile_file.display());

    let provider = create_provider(&config.llm);
    let llm: Arc<dyn LlmProvider> = provider.clone();
    let transcriber: Option<Arc<dyn Transcriber>> = if config.voice {
        Some(provider)
    } else {
        None
    };

    let log: Arc<dyn DurableLog> = Arc::new(JsonFileLog::new(config.memory_file.clone()));
    let profiles = Arc::new(
        ProfileStore::open(config.profile_file.clone())
            .await
            .with_context(|| format!("failed to load {}", config.profile_file.display()))?,
    );

    let bot = Arc::new(Bot::new(BotDeps { llm, log, profiles }));
    let channels = Arc::new(ChannelManager::new());

    match config.mode {
        Mode::Cli => {
            eprintln!("   Type a message and press Enter. Ctrl+C to exit.\n");
            channels.add(Box::new(CliChannel::new())).await;
        }
        Mode::Polling => {
            let mut telegram = TelegramChannel::new(telegram_api(&config)?, config.allowed_users.clone());
            if let Some(transcriber) = transcriber {
                telegram = telegram.with_transcriber(transcriber);
            }
            channels.add(Box::new(telegram)).await;
        }
        Mode::Webhook => {
            let settings = config
                .webhook
                .clone()
                .context("webhook mode needs WEBHOOK_URL")?;
            eprintln!("   Webhook: {} (port {})", settings.webhook_url(), settings.port);
            channels
                .add(Box::new(WebhookChannel::new(
                    telegram_api(&config)?,
                    config.allowed_users.clone(),
                    transcriber,
                    settings,
                )))
                .await;
        }
    }

    for (name, result) in channels.health_check_all().await {
        if let Err(e) = result {
            tracing::warn!(channel = %name, error = %e, "Health check failed");
        }
    }
    eprintln!("   Channels: {}\n", channels.channel_names().await.join(", "));

    bot.run(channels).await?;
    Ok(())
}

fn telegram_api(config: &BotConfig) -> anyhow::Result<Arc<TelegramApi>> {
    let token = config
        .telegram_token
        .as_ref()
        .context("TELEGRAM_TOKEN is not set")?;
    Ok(Arc::new(TelegramApi::new(token.expose_secret().to_string())))
}
