use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::allowance::is_allowed;
use crate::config::Config;
use crate::render::{render_with_timeout, RenderError, RenderRequest, Renderer};
use crate::respond::Responder;
use crate::transport::{TextFormat, Transport};
use crate::update::{Payload, Update};

pub const DOCUMENT_EXTENSION: &str = ".d2";

pub const COMMAND_START: &str = "/start";
pub const COMMAND_HELP: &str = "/help";
pub const COMMAND_PRIVACY: &str = "/privacy";

// MarkdownV2
pub const MESSAGE_HELP: &str = "This is a [Telegram Bot](https://github\\.com/meinside/telegram\\-d2\\-bot) \
which replies to your messages with [D2](https://github\\.com/terrastruct/d2)\\-generated \\.svg files \
in \\.png format\\.\n";

// MarkdownV2
pub const MESSAGE_PRIVACY: &str =
    "[Privacy Policy](https://github\\.com/meinside/telegram\\-d2\\-bot/raw/master/PRIVACY\\.md)";

pub const MESSAGE_NOT_SUPPORTED: &str = "This type of message is not supported (yet).";

/// Static reply registered for a command.
#[derive(Debug, Clone, Copy)]
struct CommandHandler {
    reply: &'static str,
    requires_allowance: bool,
}

fn command_table() -> HashMap<&'static str, CommandHandler> {
    let help = CommandHandler {
        reply: MESSAGE_HELP,
        requires_allowance: true,
    };

    HashMap::from([
        (COMMAND_START, help),
        (COMMAND_HELP, help),
        (
            COMMAND_PRIVACY,
            CommandHandler {
                reply: MESSAGE_PRIVACY,
                requires_allowance: false,
            },
        ),
    ])
}

/// Routes one update through authorization, rendering and replies.
///
/// Holds only read-only state, so a single instance serves concurrent
/// updates from different chats.
pub struct Dispatcher {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn Renderer>,
    responder: Responder,
    commands: HashMap<&'static str, CommandHandler>,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn Renderer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let responder = Responder::new(transport.clone(), config.request_timeout);
        Self {
            config,
            transport,
            renderer,
            responder,
            commands: command_table(),
            shutdown,
        }
    }

    pub async fn dispatch(&self, update: Update) {
        if update.edited {
            debug!(
                "Edited message {} in chat {}",
                update.message_id, update.chat_id
            );
        }

        match &update.payload {
            Payload::Command { name, args } => {
                debug!("Command {} (args: {:?}) in chat {}", name, args, update.chat_id);
                self.on_command(&update, name).await
            }
            Payload::Text(text) => self.on_text(&update, text).await,
            Payload::Document { file_id, file_name } => {
                self.on_document(&update, file_id, file_name.as_deref())
                    .await
            }
            Payload::Unsupported => self.on_unsupported(&update).await,
        }
    }

    /// Denials stay silent towards the sender and are only logged in verbose mode.
    fn allowed(&self, update: &Update) -> bool {
        let allowed = is_allowed(&self.config.allowed_ids, update.sender.as_deref());
        if !allowed && self.config.is_verbose {
            info!(
                "Update not allowed: sender={:?} chat={} message={} payload={:?}",
                update.sender, update.chat_id, update.message_id, update.payload
            );
        }
        allowed
    }

    async fn on_command(&self, update: &Update, name: &str) {
        match self.commands.get(name) {
            Some(handler) => {
                if handler.requires_allowance && !self.allowed(update) {
                    return;
                }
                self.responder
                    .send_text(update.chat_id, handler.reply, TextFormat::MarkdownV2)
                    .await;
            }
            None => {
                if !self.allowed(update) {
                    return;
                }
                self.responder
                    .send_text(
                        update.chat_id,
                        &format!("Not a supported command: {}", name),
                        TextFormat::Plain,
                    )
                    .await;
            }
        }
    }

    async fn on_text(&self, update: &Update, text: &str) {
        if !self.allowed(update) {
            return;
        }
        self.render_and_reply(update, text.to_string()).await;
    }

    async fn on_document(&self, update: &Update, file_id: &str, file_name: Option<&str>) {
        if !self.allowed(update) {
            return;
        }

        let Some(name) = file_name else {
            warn!(
                "Ignoring document without a file name in chat {}",
                update.chat_id
            );
            return;
        };

        if !name.ends_with(DOCUMENT_EXTENSION) {
            self.responder
                .reply_text(
                    update.chat_id,
                    update.message_id,
                    &format!("'{}' does not seem to be a .d2 file.", name),
                )
                .await;
            return;
        }

        let download = self.transport.download_file(file_id);
        let content = match tokio::time::timeout(self.config.request_timeout, download).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                error!("Failed to download '{}': {:#}", name, e);
                return;
            }
            Err(_) => {
                error!(
                    "Timed out downloading '{}' after {:?}",
                    name, self.config.request_timeout
                );
                return;
            }
        };

        self.render_and_reply(update, String::from_utf8_lossy(&content).into_owned())
            .await;
    }

    async fn on_unsupported(&self, update: &Update) {
        if !self.allowed(update) {
            return;
        }
        self.responder
            .reply_text(update.chat_id, update.message_id, MESSAGE_NOT_SUPPORTED)
            .await;
    }

    async fn render_and_reply(&self, update: &Update, source: String) {
        self.responder.typing(update.chat_id).await;

        let request = RenderRequest {
            source,
            style: self.config.render_style(),
        };

        let mut shutdown = self.shutdown.clone();
        let result = tokio::select! {
            result = render_with_timeout(
                self.renderer.as_ref(),
                &request,
                self.config.render_timeout,
            ) => result,
            _ = shutdown_requested(&mut shutdown) => Err(RenderError::Cancelled),
        };

        match result {
            Ok(png) => {
                if self
                    .responder
                    .reply_document(update.chat_id, update.message_id, png)
                    .await
                {
                    self.responder
                        .react(update.chat_id, update.message_id)
                        .await;
                }
            }
            Err(RenderError::Cancelled) => {
                warn!(
                    "Render of message {} in chat {} cancelled by shutdown",
                    update.message_id, update.chat_id
                );
            }
            Err(e) => {
                error!("Failed to render message: {}", e);
                self.responder
                    .reply_text(
                        update.chat_id,
                        update.message_id,
                        &format!("Failed to render message: {}", e),
                    )
                    .await;
            }
        }
    }
}
