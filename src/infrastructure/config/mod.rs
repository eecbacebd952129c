//! Configuration management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::errors::ConfigError;

/// Full desired state of the bot at a point in time
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
    #[serde(default)]
    pub platform: PlatformKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "keeper-bot".to_string(),
            prefix: "/".to_string(),
            platform: PlatformKind::Console,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformKind {
    #[default]
    Console,
    Telegram,
}

/// Settings that come from the environment or the command line.
///
/// They shape the running bot but are never written back to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotOverrides {
    pub token: Option<String>,
    pub prefix: Option<String>,
}

impl BotOverrides {
    /// `BOT_TOKEN` and `BOT_PREFIX`
    pub fn from_env() -> Self {
        Self {
            token: std::env::var("BOT_TOKEN").ok().filter(|t| !t.is_empty()),
            prefix: std::env::var("BOT_PREFIX").ok().filter(|p| !p.is_empty()),
        }
    }

    /// Token from the command line; wins over the environment
    pub fn with_token(mut self, token: Option<String>) -> Self {
        if token.is_some() {
            self.token = token;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.prefix.is_none()
    }

    /// A token selects the Telegram platform
    pub fn apply(&self, bot: &BotConfig) -> BotConfig {
        let mut bot = bot.clone();
        if let Some(token) = &self.token {
            bot.token = Some(token.clone());
            bot.platform = PlatformKind::Telegram;
        }
        if let Some(prefix) = &self.prefix {
            bot.prefix = prefix.clone();
        }
        bot
    }
}

/// Per-plugin section: an `enabled` flag plus an opaque config payload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

fn default_enabled() -> bool {
    true
}

impl PluginEntry {
    pub fn enabled(config: Value) -> Self {
        Self { enabled: true, config }
    }

    pub fn disabled(config: Value) -> Self {
        Self { enabled: false, config }
    }
}

impl Snapshot {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let snapshot: Snapshot = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        snapshot.check_fields()?;
        Ok(snapshot)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    /// Full check of the configuration the bot runs with, overrides applied
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_fields()?;
        if self.bot.platform == PlatformKind::Telegram && self.bot.token.is_none() {
            return Err(ConfigError::MissingField("bot.token".to_string()));
        }
        Ok(())
    }

    /// Checks that hold for the file alone; the token may still come from
    /// `BOT_TOKEN` or `--token`
    fn check_fields(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::InvalidValue("bot.prefix must not be empty".to_string()));
        }
        if let Some(name) = self.plugins.keys().find(|n| n.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(format!("invalid plugin name '{}'", name)));
        }
        Ok(())
    }

    /// The snapshot as the bot runs it. Only the `bot` section changes.
    pub fn with_overrides(mut self, overrides: &BotOverrides) -> Self {
        self.bot = overrides.apply(&self.bot);
        self
    }

    pub fn with_plugin(mut self, name: impl Into<String>, entry: PluginEntry) -> Self {
        self.plugins.insert(name.into(), entry);
        self
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.plugins.get(name).map(|e| e.enabled).unwrap_or(false)
    }

    pub fn enabled_plugins(&self) -> impl Iterator<Item = (&String, &PluginEntry)> {
        self.plugins.iter().filter(|(_, entry)| entry.enabled)
    }

    /// Starter configuration written by `init-config`
    pub fn template() -> Self {
        Snapshot::default()
            .with_plugin("ping", PluginEntry::enabled(serde_json::json!({ "heartbeat-secs": 300 })))
            .with_plugin(
                "moderation",
                PluginEntry::enabled(serde_json::json!({
                    "history-limit": 20,
                    "max-subjects": 1000,
                    "log-limit": 200,
                    "banned-words": [],
                })),
            )
            .with_plugin(
                "verification",
                PluginEntry::disabled(serde_json::json!({
                    "expire-after-secs": 300,
                    "sweep-interval-secs": 30,
                })),
            )
    }
}
