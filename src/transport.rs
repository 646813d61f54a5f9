use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, ChatId, FileId, InputFile, MessageId, ParseMode, ReactionType, ReplyParameters,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    MarkdownV2,
}

/// Outbound calls the dispatcher needs from the bot platform.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        text: &str,
        format: TextFormat,
    ) -> Result<()>;

    async fn send_document(
        &self,
        chat_id: i64,
        reply_to: i32,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()>;

    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    async fn set_reaction(&self, chat_id: i64, message_id: i32, emoji: &str) -> Result<()>;

    /// Resolves an uploaded file and downloads its content.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// Telegram implementation on top of `teloxide::Bot`.
pub struct TelegramTransport {
    bot: Bot,
    http: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot: Bot, http: reqwest::Client) -> Self {
        Self { bot, http }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        text: &str,
        format: TextFormat,
    ) -> Result<()> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(id)));
        }
        if format == TextFormat::MarkdownV2 {
            request = request.parse_mode(ParseMode::MarkdownV2);
        }
        request.await.context("sendMessage failed")?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        reply_to: i32,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let file = InputFile::memory(bytes).file_name(file_name.to_string());
        self.bot
            .send_document(ChatId(chat_id), file)
            .reply_parameters(ReplyParameters::new(MessageId(reply_to)))
            .await
            .context("sendDocument failed")?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .context("sendChatAction failed")?;
        Ok(())
    }

    async fn set_reaction(&self, chat_id: i64, message_id: i32, emoji: &str) -> Result<()> {
        self.bot
            .set_message_reaction(ChatId(chat_id), MessageId(message_id))
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_string(),
            }])
            .await
            .context("setMessageReaction failed")?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .with_context(|| format!("Failed to fetch file with id: {}", file_id))?;

        let url = self
            .bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .context("Failed to build file URL")?;

        // The URL embeds the bot token; log the path only.
        debug!("Downloading file '{}'", file.path);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch '{}'", file.path))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Failed to fetch '{}': HTTP {}", file.path, status);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read '{}'", file.path))?;
        Ok(bytes.to_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123:abc";

    fn transport(server: &mockito::Server) -> TelegramTransport {
        let bot = Bot::new(TOKEN).set_api_url(reqwest::Url::parse(&server.url()).unwrap());
        TelegramTransport::new(bot, reqwest::Client::new())
    }

    async fn mock_get_file(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(format!(r"^/bot{}/(?i)getfile$", TOKEN)),
            )
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({ "file_id": "doc-1" }),
            ))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":true,"result":{"file_id":"doc-1","file_unique_id":"u-1","file_size":7,"file_path":"documents/file_1.d2"}}"#,
            )
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_download_file() {
        let mut server = mockito::Server::new_async().await;
        let get_file = mock_get_file(&mut server).await;
        let content = server
            .mock("GET", "/file/bot123:abc/documents/file_1.d2")
            .with_body("a -> b\n")
            .create_async()
            .await;

        let bytes = transport(&server).download_file("doc-1").await.unwrap();

        assert_eq!(bytes, b"a -> b\n");
        get_file.assert_async().await;
        content.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_error_status_fails() {
        let mut server = mockito::Server::new_async().await;
        let _get_file = mock_get_file(&mut server).await;
        let _content = server
            .mock("GET", "/file/bot123:abc/documents/file_1.d2")
            .with_status(404)
            .create_async()
            .await;

        let err = transport(&server)
            .download_file("doc-1")
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("documents/file_1.d2"));
        assert!(message.contains("404"));
        assert!(!message.contains(TOKEN));
    }

    #[tokio::test]
    async fn test_unknown_file_id_fails() {
        let mut server = mockito::Server::new_async().await;
        let _get_file = server
            .mock("POST", mockito::Matcher::Regex(r"(?i)/getfile$".to_string()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: invalid file_id"}"#)
            .create_async()
            .await;

        let err = transport(&server)
            .download_file("missing")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to fetch file with id: missing"));
    }
}
