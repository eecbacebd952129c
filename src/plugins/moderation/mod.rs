//! Moderation: warnings, a moderation log, bulk deletion and a word filter

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex_lite::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::application::errors::{BotError, CommandError, PluginError};
use crate::domain::entities::{event_handler, Command, Event, EventKind, Invocation, OptionKind};
use crate::plugins::bounded::BoundedLog;
use crate::plugins::disposables::DisposableId;
use crate::plugins::{Plugin, PluginContext};

const PURGE_BATCH: usize = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ModerationConfig {
    /// Warnings kept per user
    pub history_limit: usize,
    /// Users with a warning history; the least recently warned is dropped first
    pub max_subjects: usize,
    /// Entries kept in the global moderation log
    pub log_limit: usize,
    pub banned_words: Vec<String>,
    pub max_purge: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            max_subjects: 1000,
            log_limit: 200,
            banned_words: Vec::new(),
            max_purge: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub moderator: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModAction {
    Warned { user: String, moderator: String, reason: String },
    Purged { channel: String, moderator: String, count: usize },
    Filtered { user: String, channel: String },
}

impl std::fmt::Display for ModAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModAction::Warned { user, moderator, reason } => {
                write!(f, "{} warned {}: {}", moderator, user, reason)
            }
            ModAction::Purged { channel, moderator, count } => {
                write!(f, "{} purged {} messages in {}", moderator, count, channel)
            }
            ModAction::Filtered { user, channel } => write!(f, "filtered a message from {} in {}", user, channel),
        }
    }
}

/// Plugin-private records, discarded with the plugin instance
#[derive(Debug)]
pub struct ModerationState {
    history_limit: usize,
    max_subjects: usize,
    warnings: IndexMap<String, BoundedLog<Warning>>,
    log: BoundedLog<(DateTime<Utc>, ModAction)>,
}

impl ModerationState {
    pub fn new(config: &ModerationConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            max_subjects: config.max_subjects.max(1),
            warnings: IndexMap::new(),
            log: BoundedLog::new(config.log_limit),
        }
    }

    /// Record a warning, returning how many the user now has on file
    pub fn warn(&mut self, user: &str, moderator: &str, reason: &str) -> usize {
        // Re-inserting moves the user to the back, so index 0 is always the
        // least recently warned.
        let mut history = self
            .warnings
            .shift_remove(user)
            .unwrap_or_else(|| BoundedLog::new(self.history_limit));
        history.push(Warning {
            moderator: moderator.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
        let count = history.len();
        self.warnings.insert(user.to_string(), history);
        while self.warnings.len() > self.max_subjects {
            if let Some((evicted, _)) = self.warnings.shift_remove_index(0) {
                debug!(user = %evicted, "Dropped warning history");
            }
        }
        self.record(ModAction::Warned {
            user: user.to_string(),
            moderator: moderator.to_string(),
            reason: reason.to_string(),
        });
        count
    }

    pub fn tracked_users(&self) -> usize {
        self.warnings.len()
    }

    pub fn history(&self, user: &str) -> Vec<Warning> {
        self.warnings
            .get(user)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record(&mut self, action: ModAction) {
        self.log.push((Utc::now(), action));
    }

    pub fn recent_actions(&self, n: usize) -> Vec<ModAction> {
        self.log.recent(n).map(|(_, action)| action.clone()).collect()
    }
}

type SharedState = Arc<Mutex<ModerationState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, ModerationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build a case-insensitive whole-word matcher; `None` when the list is empty
pub fn banned_word_filter(words: &[String]) -> Result<Option<Regex>, regex_lite::Error> {
    let words: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex_lite::escape)
        .collect();
    if words.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))).map(Some)
}

#[derive(Default)]
pub struct ModerationPlugin {
    state: Option<SharedState>,
    filter: Option<DisposableId>,
}

impl ModerationPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Plugin for ModerationPlugin {
    fn name(&self) -> &str {
        "moderation"
    }

    fn description(&self) -> &str {
        "Warnings, moderation log, purge and banned-word filter"
    }

    async fn load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let config: ModerationConfig = ctx.config_as()?;
        let filter = banned_word_filter(&config.banned_words).map_err(|e| PluginError::Config {
            plugin: ctx.name().to_string(),
            message: format!("banned-words: {}", e),
        })?;
        let state: SharedState = Arc::new(Mutex::new(ModerationState::new(&config)));

        let s = state.clone();
        ctx.register(
            Command::new("warn")
                .with_description("Warn a user")
                .with_option("user", OptionKind::User, "User to warn", true)
                .with_option("reason", OptionKind::String, "Why", true)
                .with_permission("moderate_members")
                .with_handler(move |inv: Invocation| {
                    let state = s.clone();
                    async move {
                        let user = inv.args.require_str("user")?.to_string();
                        let reason = inv.args.require_str("reason")?.to_string();
                        let count = lock(&state).warn(&user, inv.user.label(), &reason);
                        inv.reply(format!("Warned @{}: {} ({} on record)", user, reason, count)).await
                    }
                }),
        )?;

        let s = state.clone();
        ctx.register(
            Command::new("history")
                .with_description("Show warnings for a user")
                .with_option("user", OptionKind::User, "User to look up", true)
                .with_permission("moderate_members")
                .with_handler(move |inv: Invocation| {
                    let state = s.clone();
                    async move {
                        let user = inv.args.require_str("user")?.to_string();
                        let history = lock(&state).history(&user);
                        if history.is_empty() {
                            return inv.reply(format!("@{} has no warnings", user)).await;
                        }
                        let mut text = format!("Warnings for @{}:", user);
                        for (i, w) in history.iter().enumerate() {
                            text.push_str(&format!(
                                "\n{}. {} ({}, {})",
                                i + 1,
                                w.reason,
                                w.moderator,
                                w.at.format("%Y-%m-%d %H:%M")
                            ));
                        }
                        inv.reply(text).await
                    }
                }),
        )?;

        let s = state.clone();
        ctx.register(
            Command::new("modlog")
                .with_description("Show recent moderation actions")
                .with_option("count", OptionKind::Integer, "How many entries", false)
                .with_permission("moderate_members")
                .with_handler(move |inv: Invocation| {
                    let state = s.clone();
                    async move {
                        let count = inv.args.get_i64("count").unwrap_or(10).clamp(1, 50) as usize;
                        let actions = lock(&state).recent_actions(count);
                        if actions.is_empty() {
                            return inv.reply("Moderation log is empty").await;
                        }
                        let lines: Vec<String> = actions.iter().map(ToString::to_string).collect();
                        inv.reply(lines.join("\n")).await
                    }
                }),
        )?;

        let s = state.clone();
        let platform = ctx.platform();
        let cancel = ctx.cancellation();
        let max_purge = config.max_purge.max(1);
        ctx.register(
            Command::new("purge")
                .with_description("Delete recent messages in this channel")
                .with_option("count", OptionKind::Integer, "Number of messages", true)
                .with_permission("manage_messages")
                .with_handler(move |inv: Invocation| {
                    let state = s.clone();
                    let platform = platform.clone();
                    let cancel = cancel.clone();
                    async move {
                        let requested = inv
                            .args
                            .get_i64("count")
                            .filter(|n| *n > 0)
                            .ok_or_else(|| CommandError::InvalidArgs("count must be positive".to_string()))?;
                        let target = (requested as usize).min(max_purge);
                        inv.defer().await?;

                        let mut deleted = 0;
                        while deleted < target {
                            if cancel.is_cancelled() {
                                debug!(deleted, "Purge cancelled");
                                return Err(CommandError::Cancelled);
                            }
                            let batch = PURGE_BATCH.min(target - deleted);
                            let n = platform.delete_recent_messages(&inv.channel_id, batch).await?;
                            deleted += n;
                            if n < batch {
                                break;
                            }
                        }

                        lock(&state).record(ModAction::Purged {
                            channel: inv.channel_id.clone(),
                            moderator: inv.user.label().to_string(),
                            count: deleted,
                        });
                        inv.follow_up(format!("Deleted {} messages", deleted)).await
                    }
                }),
        )?;

        if let Some(filter) = filter {
            let s = state.clone();
            let platform = ctx.platform();
            let id = ctx.subscribe(
                EventKind::MessageCreated,
                event_handler(move |event: Event| {
                    let state = s.clone();
                    let platform = platform.clone();
                    let filter = filter.clone();
                    async move {
                        let Event::MessageCreated { channel_id, author, content, .. } = event else {
                            return Ok::<(), BotError>(());
                        };
                        if author.is_bot || !filter.is_match(&content) {
                            return Ok(());
                        }
                        info!(user = %author, channel = %channel_id, "Banned word filtered");
                        lock(&state).record(ModAction::Filtered {
                            user: author.label().to_string(),
                            channel: channel_id.clone(),
                        });
                        platform
                            .send_message(&channel_id, &format!("@{}, watch your language.", author.label()))
                            .await
                    }
                }),
            );
            self.filter = Some(id);
        }

        self.state = Some(state);
        Ok(())
    }

    async fn unload(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if let Some(id) = self.filter.take() {
            ctx.release(id).await;
        }
        self.state = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_per_user() {
        let mut state = ModerationState::new(&ModerationConfig {
            history_limit: 2,
            log_limit: 3,
            ..ModerationConfig::default()
        });
        for reason in ["a", "b", "c"] {
            state.warn("spammer", "mod", reason);
        }
        state.warn("other", "mod", "d");

        let reasons: Vec<String> = state.history("spammer").into_iter().map(|w| w.reason).collect();
        assert_eq!(reasons, vec!["b", "c"]);
        assert_eq!(state.recent_actions(10).len(), 3);
        assert!(state.history("nobody").is_empty());
    }

    #[test]
    fn test_tracked_users_are_bounded() {
        let mut state = ModerationState::new(&ModerationConfig {
            max_subjects: 3,
            ..ModerationConfig::default()
        });
        for user in ["u1", "u2", "u3"] {
            state.warn(user, "mod", "x");
        }
        // u1 is warned again, so u2 becomes the oldest
        state.warn("u1", "mod", "y");
        state.warn("u4", "mod", "z");

        assert_eq!(state.tracked_users(), 3);
        assert!(state.history("u2").is_empty());
        assert_eq!(state.history("u1").len(), 2);
        assert_eq!(state.history("u4").len(), 1);

        for i in 0..5000 {
            state.warn(&format!("flood{}", i), "mod", "x");
        }
        assert_eq!(state.tracked_users(), 3);
    }

    #[test]
    fn test_filter_matches_whole_words_case_insensitively() {
        let filter = banned_word_filter(&["spam".to_string(), "eggs".to_string()]).unwrap().unwrap();
        assert!(filter.is_match("no SPAM please"));
        assert!(!filter.is_match("spammer"));
        assert!(filter.is_match("green eggs, ham"));
        assert!(banned_word_filter(&[" ".to_string()]).unwrap().is_none());
    }
}
