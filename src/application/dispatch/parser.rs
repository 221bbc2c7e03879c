//! Command parser - splits raw chat text into a command token and payload

use regex_lite::Regex;

use crate::application::errors::ConfigError;
use crate::domain::entities::{Content, Message, User};

/// Parses incoming chat text into structured messages.
///
/// A command is `<prefix><name>[@botname] <payload>`; `/` is always accepted
/// as a prefix. The token stored on the message keeps the leading `/`, so
/// routes register `/find`, not `find`. Everything after the first run of
/// whitespace is the payload, verbatim.
pub struct CommandParser {
    command_prefix: String,
    pattern: Regex,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let command_prefix = prefix.into();
        let pattern = Regex::new(r"(?s)^(\S+?)(?:@\S+)?(?:\s+(.*))?$")
            .map_err(|e| ConfigError::InvalidValue(format!("command pattern: {}", e)))?;
        Ok(Self {
            command_prefix,
            pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse one text message
    pub fn parse(&self, chat_id: impl Into<String>, text: &str, sender: Option<User>) -> Message {
        let content = self.parse_content(text);
        Message::new(chat_id, content).with_sender_opt(sender)
    }

    fn parse_content(&self, text: &str) -> Content {
        let text = text.trim();
        if text.is_empty() {
            return Content::Empty;
        }

        let body = if let Some(rest) = text.strip_prefix('/') {
            rest
        } else if !self.command_prefix.is_empty() && text.starts_with(&self.command_prefix) {
            &text[self.command_prefix.len()..]
        } else {
            return Content::Text(text.to_string());
        };

        match self.pattern.captures(body) {
            Some(caps) => {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if name.is_empty() {
                    return Content::Text(text.to_string());
                }
                let payload = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                Content::Command {
                    name: format!("/{}", name.to_lowercase()),
                    payload: payload.to_string(),
                }
            }
            None => Content::Text(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new("!").unwrap()
    }

    #[test]
    fn test_command_with_json_payload() {
        let msg = parser().parse("1", r#"/find {"email":"a@b.com"}"#, None);
        assert_eq!(msg.command(), Some("/find"));
        assert_eq!(msg.payload(), r#"{"email":"a@b.com"}"#);
    }

    #[test]
    fn test_command_without_payload() {
        let msg = parser().parse("1", "/help", None);
        assert_eq!(msg.command(), Some("/help"));
        assert_eq!(msg.payload(), "");
    }

    #[test]
    fn test_bot_mention_is_stripped() {
        let msg = parser().parse("1", "/Find@switchyard_bot 42", None);
        assert_eq!(msg.command(), Some("/find"));
        assert_eq!(msg.payload(), "42");
    }

    #[test]
    fn test_custom_prefix() {
        let msg = parser().parse("1", "!find x", None);
        assert_eq!(msg.command(), Some("/find"));
        assert_eq!(msg.payload(), "x");
    }

    #[test]
    fn test_multiline_payload_kept() {
        let msg = parser().parse("1", "/adduser {\n\"name\": \"ann\"\n}", None);
        assert_eq!(msg.command(), Some("/adduser"));
        assert_eq!(msg.payload(), "{\n\"name\": \"ann\"\n}");
    }

    #[test]
    fn test_plain_text() {
        let msg = parser().parse("1", "hello there", None);
        assert_eq!(msg.command(), None);
        assert_eq!(msg.content, Content::Text("hello there".to_string()));
    }

    #[test]
    fn test_bare_prefix_is_text() {
        let msg = parser().parse("1", "/", None);
        assert_eq!(msg.command(), None);
    }
}
