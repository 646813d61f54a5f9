use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::update_listeners::Polling;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch;
use crate::render::D2Renderer;
use crate::transport::TelegramTransport;
use crate::update;

/// Slack on top of the long-poll timeout before the HTTP client gives up.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// HTTP timeout for Telegram calls; `getUpdates` holds the request open for `poll_interval`.
fn client_timeout(poll_interval: Duration) -> Duration {
    poll_interval + POLL_TIMEOUT_MARGIN
}

fn build_bot(config: &Config) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(client_timeout(config.poll_interval))
        .build()
        .context("Failed to build Telegram HTTP client")?;
    Ok(Bot::with_client(&config.bot_token, client))
}

/// Verify the bot, switch it to polling mode and serve updates until Ctrl-C.
pub async fn run(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> Result<()> {
    let bot = build_bot(&config)?;

    let me = bot
        .get_me()
        .await
        .context("Failed to get bot information")?;
    bot.delete_webhook()
        .await
        .context("Failed to delete webhook")?;

    info!(
        "Starting bot {}: @{} ({})",
        env!("CARGO_PKG_VERSION"),
        me.username(),
        me.first_name
    );
    info!("  Allowed users: {:?}", config.allowed_ids);
    info!("  Poll interval: {:?}", config.poll_interval);

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let transport = Arc::new(TelegramTransport::new(bot.clone(), http));
    let renderer = Arc::new(D2Renderer::new(config.renderer.clone()));
    let dispatcher = Arc::new(dispatch::Dispatcher::new(
        config.clone(),
        transport,
        renderer,
        shutdown,
    ));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited_message));

    let listener = Polling::builder(bot.clone())
        .timeout(config.poll_interval)
        .build();

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .default_handler(|upd| async move {
            debug!("No usable message in update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("Failed to poll updates"),
        )
        .await;

    info!("Bot stopped");
    Ok(())
}

async fn handle_message(
    msg: Message,
    me: Me,
    dispatcher: Arc<dispatch::Dispatcher>,
) -> ResponseResult<()> {
    let incoming = update::Update::from_message(&msg, false, me.user.username.as_deref());
    dispatcher.dispatch(incoming).await;
    Ok(())
}

async fn handle_edited_message(
    msg: Message,
    me: Me,
    dispatcher: Arc<dispatch::Dispatcher>,
) -> ResponseResult<()> {
    let incoming = update::Update::from_message(&msg, true, me.user.username.as_deref());
    dispatcher.dispatch(incoming).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    fn config(content: &str) -> Config {
        let file = ConfigFile::parse(content).unwrap();
        Config::from_parts(file, "123:abc".to_string()).unwrap()
    }

    #[test]
    fn test_client_timeout_outlasts_long_poll() {
        for secs in [1, 5, 17, 30, 120] {
            let poll = Duration::from_secs(secs);
            assert!(client_timeout(poll) > poll);
        }
    }

    #[tokio::test]
    async fn test_long_poll_interval_reaches_telegram() {
        let config = config(r#"{"monitor_interval": 30}"#);
        assert_eq!(config.poll_interval, Duration::from_secs(30));

        let mut server = mockito::Server::new_async().await;
        let updates = server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"^/bot123:abc/(?i)getupdates$".to_string()),
            )
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({ "timeout": 30 }),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":[]}"#)
            .create_async()
            .await;

        let bot = build_bot(&config)
            .unwrap()
            .set_api_url(reqwest::Url::parse(&server.url()).unwrap());
        let result = bot.get_updates().timeout(30).await.unwrap();

        assert!(result.is_empty());
        updates.assert_async().await;
    }
}
