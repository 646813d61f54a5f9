use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, warn};

use crate::transport::{TextFormat, Transport};

/// Timeout for calls whose failure is ignored (chat actions).
const IGNORABLE_TIMEOUT: Duration = Duration::from_secs(3);

pub const RENDERED_FILE_NAME: &str = "diagram.png";
pub const SUCCESS_REACTION: &str = "👌";

/// Best-effort outbound replies. Every call is bounded by a timeout and
/// failures are logged here instead of being returned to the dispatcher.
#[derive(Clone)]
pub struct Responder {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

async fn bounded(limit: Duration, call: impl Future<Output = Result<()>>) -> Result<()> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("timed out after {}s", limit.as_secs_f32()),
    }
}

impl Responder {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Sends `text` to the chat without threading it to a message.
    pub async fn send_text(&self, chat_id: i64, text: &str, format: TextFormat) -> bool {
        let call = self.transport.send_text(chat_id, None, text, format);
        match bounded(self.timeout, call).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send message to chat {}: {:#}", chat_id, e);
                false
            }
        }
    }

    pub async fn reply_text(&self, chat_id: i64, message_id: i32, text: &str) -> bool {
        let call = self
            .transport
            .send_text(chat_id, Some(message_id), text, TextFormat::Plain);
        match bounded(self.timeout, call).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send reply to chat {}: {:#}", chat_id, e);
                false
            }
        }
    }

    pub async fn reply_document(&self, chat_id: i64, message_id: i32, bytes: Vec<u8>) -> bool {
        let call = self
            .transport
            .send_document(chat_id, message_id, RENDERED_FILE_NAME, bytes);
        match bounded(self.timeout, call).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send rendered image to chat {}: {:#}", chat_id, e);
                false
            }
        }
    }

    pub async fn react(&self, chat_id: i64, message_id: i32) {
        let call = self
            .transport
            .set_reaction(chat_id, message_id, SUCCESS_REACTION);
        if let Err(e) = bounded(self.timeout, call).await {
            warn!("Failed to set reaction: {:#}", e);
        }
    }

    pub async fn typing(&self, chat_id: i64) {
        if let Err(e) = bounded(IGNORABLE_TIMEOUT, self.transport.send_typing(chat_id)).await {
            debug!("Ignoring failed chat action: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Call, RecordingTransport};
    use async_trait::async_trait;

    /// Never answers.
    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn send_text(&self, _: i64, _: Option<i32>, _: &str, _: TextFormat) -> Result<()> {
            std::future::pending().await
        }

        async fn send_document(&self, _: i64, _: i32, _: &str, _: Vec<u8>) -> Result<()> {
            std::future::pending().await
        }

        async fn send_typing(&self, _: i64) -> Result<()> {
            std::future::pending().await
        }

        async fn set_reaction(&self, _: i64, _: i32, _: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn download_file(&self, _: &str) -> Result<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_reply_times_out() {
        let responder = Responder::new(Arc::new(StalledTransport), Duration::from_millis(20));
        assert!(!responder.reply_text(1, 2, "hello").await);
        assert!(!responder.reply_document(1, 2, vec![0xFF]).await);
        responder.react(1, 2).await;
    }

    #[tokio::test]
    async fn test_reply_is_threaded_plain_text() {
        let transport = Arc::new(RecordingTransport::new());
        let responder = Responder::new(transport.clone(), Duration::from_secs(1));

        assert!(responder.reply_text(10, 20, "oops").await);
        assert_eq!(
            transport.calls(),
            vec![Call::Text {
                chat_id: 10,
                reply_to: Some(20),
                text: "oops".to_string(),
                format: TextFormat::Plain,
            }]
        );
    }

    #[tokio::test]
    async fn test_document_failure_reports_false() {
        let transport = Arc::new(RecordingTransport::new().failing_documents());
        let responder = Responder::new(transport.clone(), Duration::from_secs(1));
        assert!(!responder.reply_document(10, 20, vec![1, 2]).await);
    }

    #[tokio::test]
    async fn test_reaction_failure_is_swallowed() {
        let transport = Arc::new(RecordingTransport::new().failing_reactions());
        let responder = Responder::new(transport.clone(), Duration::from_secs(1));
        responder.react(10, 20).await;
        assert_eq!(transport.calls().len(), 1);
    }
}
