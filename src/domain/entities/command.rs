use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Arguments, Invocation};
use crate::application::errors::CommandError;

/// Future returned by a command handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), CommandError>> + Send>>;

/// Command handler function type
pub type CommandHandler = Arc<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>;

/// Value type of a command option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    User,
}

/// A named parameter in a command descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub description: String,
    pub kind: OptionKind,
    pub required: bool,
}

/// External-facing schema of a command, published to the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_permissions: Vec<String>,
    #[serde(default)]
    pub dm_allowed: bool,
}

impl CommandDescriptor {
    /// One-line usage string, e.g. `/warn <user> <reason>`
    pub fn usage(&self) -> String {
        let mut usage = format!("/{}", self.name);
        for option in &self.options {
            if option.required {
                usage.push_str(&format!(" <{}>", option.name));
            } else {
                usage.push_str(&format!(" [{}]", option.name));
            }
        }
        usage
    }

    /// Bind raw positional and named arguments against the declared options.
    ///
    /// Named arguments win over positional ones. Positional tokens fill the
    /// remaining options in declaration order; the last string option absorbs
    /// whatever is left so free-form text (a reason, a message) survives intact.
    pub fn bind(&self, positional: &[String], named: &Arguments) -> Result<Arguments, CommandError> {
        let mut bound = Arguments::new();
        let mut rest = positional.iter();

        let unfilled: Vec<&CommandOption> = self
            .options
            .iter()
            .filter(|o| !named.contains(&o.name))
            .collect();

        for (idx, option) in unfilled.iter().enumerate() {
            let is_last = idx + 1 == unfilled.len();
            let raw = if is_last && option.kind == OptionKind::String {
                let remaining: Vec<&str> = rest.by_ref().map(String::as_str).collect();
                (!remaining.is_empty()).then(|| remaining.join(" "))
            } else {
                rest.next().cloned()
            };

            if let Some(raw) = raw {
                bound.insert(option.name.clone(), coerce(option, Value::String(raw))?);
            }
        }

        if let Some(extra) = rest.next() {
            return Err(CommandError::InvalidArgs(format!("unexpected argument '{}'", extra)));
        }

        for (name, value) in named.iter() {
            match self.options.iter().find(|o| &o.name == name) {
                Some(option) => bound.insert(name.clone(), coerce(option, value.clone())?),
                None => return Err(CommandError::InvalidArgs(format!("unknown option '{}'", name))),
            }
        }

        for option in self.options.iter().filter(|o| o.required) {
            if !bound.contains(&option.name) {
                return Err(CommandError::InvalidArgs(format!("missing '{}'", option.name)));
            }
        }

        Ok(bound)
    }
}

fn coerce(option: &CommandOption, value: Value) -> Result<Value, CommandError> {
    let invalid = |raw: &str| {
        CommandError::InvalidArgs(format!("'{}' is not a valid {:?} for '{}'", raw, option.kind, option.name))
    };

    match (option.kind, value) {
        (OptionKind::Integer, Value::String(raw)) => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(&raw)),
        (OptionKind::Boolean, Value::String(raw)) => match raw.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid(&raw)),
        },
        (OptionKind::User, Value::String(raw)) => {
            Ok(Value::String(raw.trim_start_matches('@').to_string()))
        }
        (_, value) => Ok(value),
    }
}

/// Represents a bot command contributed by a plugin
#[derive(Clone)]
pub struct Command {
    pub descriptor: CommandDescriptor,
    pub handler: Option<CommandHandler>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: CommandDescriptor {
                name: name.into(),
                ..CommandDescriptor::default()
            },
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.descriptor.description = desc.into();
        self
    }

    pub fn with_option(
        mut self,
        name: impl Into<String>,
        kind: OptionKind,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        self.descriptor.options.push(CommandOption {
            name: name.into(),
            description: description.into(),
            kind,
            required,
        });
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.descriptor.default_permissions.push(permission.into());
        self
    }

    pub fn allow_in_dm(mut self) -> Self {
        self.descriptor.dm_allowed = true;
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |inv| Box::pin(handler(inv))));
        self
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("descriptor", &self.descriptor)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn warn_descriptor() -> CommandDescriptor {
        Command::new("warn")
            .with_option("user", OptionKind::User, "Who to warn", true)
            .with_option("reason", OptionKind::String, "Why", true)
            .descriptor
    }

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_usage() {
        let desc = Command::new("modlog")
            .with_option("limit", OptionKind::Integer, "How many", false)
            .descriptor;
        assert_eq!(desc.usage(), "/modlog [limit]");
        assert_eq!(warn_descriptor().usage(), "/warn <user> <reason>");
    }

    #[test]
    fn test_bind_last_string_absorbs_rest() {
        let args = warn_descriptor()
            .bind(&words("@mallory spamming the channel"), &Arguments::new())
            .unwrap();
        assert_eq!(args.get_str("user"), Some("mallory"));
        assert_eq!(args.get_str("reason"), Some("spamming the channel"));
    }

    #[test]
    fn test_bind_named_and_positional() {
        let mut named = Arguments::new();
        named.insert("user", json!("eve"));
        let args = warn_descriptor().bind(&words("off topic"), &named).unwrap();
        assert_eq!(args.get_str("user"), Some("eve"));
        assert_eq!(args.get_str("reason"), Some("off topic"));
    }

    #[test]
    fn test_bind_missing_required() {
        let err = warn_descriptor().bind(&words("mallory"), &Arguments::new()).unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgs(msg) if msg.contains("reason")));
    }

    #[test]
    fn test_bind_integer_coercion() {
        let desc = Command::new("purge")
            .with_option("count", OptionKind::Integer, "How many", true)
            .descriptor;
        let args = desc.bind(&words("25"), &Arguments::new()).unwrap();
        assert_eq!(args.get_i64("count"), Some(25));

        assert!(desc.bind(&words("lots"), &Arguments::new()).is_err());
        assert!(desc.bind(&words("1 2"), &Arguments::new()).is_err());
    }

    #[test]
    fn test_bind_rejects_unknown_option() {
        let mut named = Arguments::new();
        named.insert("colour", json!("red"));
        assert!(Command::new("ping").descriptor.bind(&[], &named).is_err());
    }
}
