use teloxide::types::Message;

/// An inbound event, independent of the bot platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Sender username; `None` for anonymous or username-less senders
    pub sender: Option<String>,
    pub chat_id: i64,
    pub message_id: i32,
    pub edited: bool,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Command { name: String, args: String },
    Text(String),
    Document {
        file_id: String,
        file_name: Option<String>,
    },
    Unsupported,
}

impl Update {
    /// Converts a Telegram message. `bot_username` strips `/cmd@bot` suffixes.
    pub fn from_message(msg: &Message, edited: bool, bot_username: Option<&str>) -> Self {
        let payload = if let Some(text) = msg.text() {
            parse_command(text, bot_username).unwrap_or_else(|| Payload::Text(text.to_string()))
        } else if let Some(doc) = msg.document() {
            Payload::Document {
                file_id: doc.file.id.0.clone(),
                file_name: doc.file_name.clone(),
            }
        } else {
            Payload::Unsupported
        };

        Self {
            sender: msg.from.as_ref().and_then(|user| user.username.clone()),
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
            edited,
            payload,
        }
    }
}

/// Parses `/name[@bot] args...`. Returns `None` for non-command text.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Payload> {
    if !text.starts_with('/') {
        return None;
    }

    let (head, args) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };

    let name = match head.split_once('@') {
        Some((name, target)) => match bot_username {
            Some(me) if !target.eq_ignore_ascii_case(me) => head,
            _ => name,
        },
        None => head,
    };

    if name.len() < 2 {
        return None;
    }

    Some(Payload::Command {
        name: name.to_string(),
        args: args.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, args: &str) -> Option<Payload> {
        Some(Payload::Command {
            name: name.to_string(),
            args: args.to_string(),
        })
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("x -> y", None), None);
    }

    #[test]
    fn test_bare_command() {
        assert_eq!(parse_command("/help", None), command("/help", ""));
    }

    #[test]
    fn test_command_with_args() {
        assert_eq!(
            parse_command("/start  now please", None),
            command("/start", "now please")
        );
    }

    #[test]
    fn test_bot_mention_is_stripped() {
        assert_eq!(
            parse_command("/help@D2Bot", Some("d2bot")),
            command("/help", "")
        );
        assert_eq!(parse_command("/help@d2bot", None), command("/help", ""));
    }

    #[test]
    fn test_mention_of_other_bot_is_kept() {
        assert_eq!(
            parse_command("/help@other_bot", Some("d2bot")),
            command("/help@other_bot", "")
        );
    }

    #[test]
    fn test_lone_slash_is_text() {
        assert_eq!(parse_command("/", None), None);
        assert_eq!(parse_command("/ x", None), None);
    }
}
