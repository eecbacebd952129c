//! Message parser - turns prefixed chat text into a command name and raw arguments

use serde_json::Value;

use crate::domain::entities::Arguments;

/// Raw command before it is bound against a descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub name: String,
    pub positional: Vec<String>,
    pub named: Arguments,
}

/// Parses text-platform messages like `/warn @bob reason="spam links"`
#[derive(Debug, Clone)]
pub struct MessageParser {
    command_prefix: String,
    bot_username: Option<String>,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
            bot_username: None,
        }
    }

    /// Accept `/cmd@username` addressed to this bot and reject other bots' commands
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// `None` if the text is not a command for this bot
    pub fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let body = text.trim().strip_prefix(self.command_prefix.as_str())?;
        let mut tokens = tokenize(body).into_iter();
        let head = tokens.next()?;

        let name = match head.split_once('@') {
            Some((name, target)) => {
                let addressed_to_us = self
                    .bot_username
                    .as_deref()
                    .map(|me| me.eq_ignore_ascii_case(target))
                    .unwrap_or(true);
                if !addressed_to_us {
                    return None;
                }
                name.to_string()
            }
            None => head,
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return None;
        }

        let mut positional = Vec::new();
        let mut named = Arguments::new();
        for token in tokens {
            match named_arg(&token) {
                Some((key, value)) => named.insert(key, Value::String(value.to_string())),
                None => positional.push(token),
            }
        }

        Some(ParsedCommand {
            name: name.to_lowercase(),
            positional,
            named,
        })
    }
}

fn named_arg(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let valid_key = key.starts_with(|c: char| c.is_ascii_alphabetic())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid_key && !value.is_empty() {
        Some((key, value))
    } else {
        None
    }
}

/// Whitespace split that keeps double-quoted runs together
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        let parser = MessageParser::new("/");
        assert!(parser.parse("hello there").is_none());
        assert!(parser.parse("/").is_none());
    }

    #[test]
    fn test_positional_and_named() {
        let parser = MessageParser::new("!");
        let cmd = parser.parse(r#"!warn @bob reason="spam links" extra"#).unwrap();
        assert_eq!(cmd.name, "warn");
        assert_eq!(cmd.positional, vec!["@bob", "extra"]);
        assert_eq!(cmd.named.get_str("reason"), Some("spam links"));
    }

    #[test]
    fn test_bot_suffix() {
        let parser = MessageParser::new("/").with_bot_username("keeper_bot");
        assert_eq!(parser.parse("/Ping@keeper_bot").unwrap().name, "ping");
        assert!(parser.parse("/ping@other_bot").is_none());
    }

    #[test]
    fn test_quoted_empty_string_is_kept() {
        let cmd = MessageParser::new("/").parse(r#"/say "" x"#).unwrap();
        assert_eq!(cmd.positional, vec!["", "x"]);
    }
}
