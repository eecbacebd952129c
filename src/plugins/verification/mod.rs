//! Member verification: a code is issued on join and redeemed with `/verify`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::application::errors::{BotError, PluginError};
use crate::domain::entities::{event_handler, Command, Event, EventKind, Invocation, OptionKind, User};
use crate::plugins::bounded::BoundedLog;
use crate::plugins::disposables::DisposableId;
use crate::plugins::{Plugin, PluginContext};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VerificationConfig {
    pub expire_after_secs: u64,
    pub sweep_interval_secs: u64,
    pub log_limit: usize,
    pub code_length: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            expire_after_secs: 300,
            sweep_interval_secs: 30,
            log_limit: 100,
            code_length: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub code: String,
    pub channel_id: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Issued,
    Verified,
    Rejected,
    Expired,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub user: String,
    pub outcome: Outcome,
    pub at: DateTime<Utc>,
}

/// Pending challenges keyed by user id plus a bounded outcome log
#[derive(Debug)]
pub struct VerificationState {
    expire_after: chrono::Duration,
    code_length: usize,
    pending: HashMap<String, Challenge>,
    log: BoundedLog<LogEntry>,
}

impl VerificationState {
    pub fn new(config: &VerificationConfig) -> Self {
        Self {
            expire_after: chrono::Duration::seconds(config.expire_after_secs.min(31_536_000) as i64),
            code_length: config.code_length.clamp(4, 32),
            pending: HashMap::new(),
            log: BoundedLog::new(config.log_limit),
        }
    }

    fn note(&mut self, user: &str, outcome: Outcome) {
        self.log.push(LogEntry {
            user: user.to_string(),
            outcome,
            at: Utc::now(),
        });
    }

    /// Issue (or re-issue) a code for `user`
    pub fn issue(&mut self, user: &str, channel_id: &str) -> String {
        let code: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(self.code_length)
            .collect::<String>()
            .to_uppercase();
        self.pending.insert(
            user.to_string(),
            Challenge {
                code: code.clone(),
                channel_id: channel_id.to_string(),
                issued_at: Utc::now(),
            },
        );
        self.note(user, Outcome::Issued);
        code
    }

    /// `None` when the user has no pending challenge
    pub fn redeem(&mut self, user: &str, code: &str) -> Option<bool> {
        let challenge = self.pending.get(user)?;
        if challenge.code.eq_ignore_ascii_case(code.trim()) {
            self.pending.remove(user);
            self.note(user, Outcome::Verified);
            Some(true)
        } else {
            self.note(user, Outcome::Rejected);
            Some(false)
        }
    }

    pub fn abandon(&mut self, user: &str) -> bool {
        let removed = self.pending.remove(user).is_some();
        if removed {
            self.note(user, Outcome::Abandoned);
        }
        removed
    }

    /// Drop challenges older than the expiry window, returning who lost theirs
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - self.expire_after;
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, c)| c.issued_at <= cutoff)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &expired {
            self.pending.remove(user);
            self.note(user, Outcome::Expired);
        }
        expired
    }

    pub fn is_pending(&self, user: &str) -> bool {
        self.pending.contains_key(user)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }
}

type SharedState = Arc<Mutex<VerificationState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, VerificationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct VerificationPlugin {
    disposables: Vec<DisposableId>,
}

impl VerificationPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Plugin for VerificationPlugin {
    fn name(&self) -> &str {
        "verification"
    }

    fn description(&self) -> &str {
        "Challenge new members with a code"
    }

    async fn load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let config: VerificationConfig = ctx.config_as()?;
        let state: SharedState = Arc::new(Mutex::new(VerificationState::new(&config)));

        let s = state.clone();
        ctx.register(
            Command::new("verify")
                .with_description("Redeem your verification code")
                .with_option("code", OptionKind::String, "Code you were sent on joining", true)
                .with_handler(move |inv: Invocation| {
                    let state = s.clone();
                    async move {
                        let code = inv.args.require_str("code")?.to_string();
                        let outcome = lock(&state).redeem(&inv.user.id, &code);
                        let text = match outcome {
                            Some(true) => format!("Welcome aboard, {}! You are verified.", inv.user.label()),
                            Some(false) => "That code does not match. Try again.".to_string(),
                            None => "You have no pending verification.".to_string(),
                        };
                        inv.reply(text).await
                    }
                }),
        )?;

        let s = state.clone();
        let platform = ctx.platform();
        let expire_secs = config.expire_after_secs;
        let joined = ctx.subscribe(
            EventKind::MemberJoined,
            event_handler(move |event: Event| {
                let state = s.clone();
                let platform = platform.clone();
                async move {
                    let Event::MemberJoined { channel_id, user } = event else {
                        return Ok::<(), BotError>(());
                    };
                    if user.is_bot {
                        return Ok(());
                    }
                    let code = lock(&state).issue(&user.id, &channel_id);
                    debug!(user = %user, "Issued verification code");
                    platform
                        .send_message(&channel_id, &welcome(&user, &code, expire_secs))
                        .await
                }
            }),
        );
        self.disposables.push(joined);

        let s = state.clone();
        let left = ctx.subscribe(
            EventKind::MemberLeft,
            event_handler(move |event: Event| {
                let state = s.clone();
                async move {
                    if let Event::MemberLeft { user, .. } = event {
                        lock(&state).abandon(&user.id);
                    }
                    Ok::<(), BotError>(())
                }
            }),
        );
        self.disposables.push(left);

        let s = state.clone();
        let sweep = ctx.schedule_every(Duration::from_secs(config.sweep_interval_secs.max(1)), move || {
            let state = s.clone();
            async move {
                let expired = lock(&state).expire(Utc::now());
                if !expired.is_empty() {
                    info!(count = expired.len(), "Expired verification challenges");
                }
            }
        });
        self.disposables.push(sweep);

        Ok(())
    }

    async fn unload(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        for id in self.disposables.drain(..) {
            ctx.release(id).await;
        }
        Ok(())
    }
}

fn welcome(user: &User, code: &str, expire_secs: u64) -> String {
    format!(
        "Welcome {}! Reply with /verify {} within {} seconds to get access.",
        user.label(),
        code,
        expire_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> VerificationState {
        VerificationState::new(&VerificationConfig {
            expire_after_secs: 60,
            log_limit: 3,
            ..VerificationConfig::default()
        })
    }

    #[test]
    fn test_redeem_matches_case_insensitively() {
        let mut state = state();
        let code = state.issue("u1", "c1");
        assert_eq!(code.len(), 6);

        assert_eq!(state.redeem("u1", "nope"), Some(false));
        assert!(state.is_pending("u1"));
        assert_eq!(state.redeem("u1", &code.to_lowercase()), Some(true));
        assert!(!state.is_pending("u1"));
        assert_eq!(state.redeem("u1", &code), None);
    }

    #[test]
    fn test_expire_drops_old_challenges() {
        let mut state = state();
        state.issue("u1", "c1");
        assert!(state.expire(Utc::now()).is_empty());

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(state.expire(later), vec!["u1".to_string()]);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut state = state();
        for i in 0..5 {
            state.issue(&format!("u{}", i), "c");
        }
        assert_eq!(state.log().count(), 3);
        assert_eq!(state.log().next().map(|e| e.user.as_str()), Some("u2"));
    }
}
