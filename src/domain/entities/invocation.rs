use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::User;
use crate::application::errors::CommandError;
use crate::domain::traits::Responder;

/// Named, typed arguments of an invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, CommandError> {
        self.get_str(name)
            .ok_or_else(|| CommandError::InvalidArgs(format!("missing '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

const PENDING: u8 = 0;
const DEFERRED: u8 = 1;
const REPLIED: u8 = 2;

/// Where an invocation stands with respect to its single-shot reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Pending,
    Deferred,
    Replied,
}

/// An inbound command invocation with its reply capability
#[derive(Clone)]
pub struct Invocation {
    pub id: String,
    pub command: String,
    pub user: User,
    pub channel_id: String,
    pub args: Arguments,
    /// Unbound tokens from text-based platforms; consumed by descriptor binding
    pub positional: Vec<String>,
    pub received_at: DateTime<Utc>,
    responder: Arc<dyn Responder>,
    state: Arc<AtomicU8>,
}

impl Invocation {
    pub fn new(
        command: impl Into<String>,
        user: User,
        channel_id: impl Into<String>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            user,
            channel_id: channel_id.into(),
            args: Arguments::new(),
            positional: Vec::new(),
            received_at: Utc::now(),
            responder,
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    pub fn with_args(mut self, args: Arguments) -> Self {
        self.args = args;
        self
    }

    pub fn with_positional(mut self, positional: Vec<String>) -> Self {
        self.positional = positional;
        self
    }

    pub fn response_state(&self) -> ResponseState {
        match self.state.load(Ordering::SeqCst) {
            PENDING => ResponseState::Pending,
            DEFERRED => ResponseState::Deferred,
            _ => ResponseState::Replied,
        }
    }

    pub fn has_responded(&self) -> bool {
        self.response_state() != ResponseState::Pending
    }

    /// Send the single reply. Completes a deferred invocation.
    pub async fn reply(&self, text: impl AsRef<str>) -> Result<(), CommandError> {
        let previous = self.state.swap(REPLIED, Ordering::SeqCst);
        if previous == REPLIED {
            return Err(CommandError::AlreadyResponded);
        }
        self.responder.reply(text.as_ref()).await?;
        Ok(())
    }

    /// Acknowledge now, reply later
    pub async fn defer(&self) -> Result<(), CommandError> {
        self.state
            .compare_exchange(PENDING, DEFERRED, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CommandError::AlreadyResponded)?;
        self.responder.defer().await?;
        Ok(())
    }

    /// Additional message after the reply or defer
    pub async fn follow_up(&self, text: impl AsRef<str>) -> Result<(), CommandError> {
        if !self.has_responded() {
            return Err(CommandError::NotResponded);
        }
        self.state.store(REPLIED, Ordering::SeqCst);
        self.responder.follow_up(text.as_ref()).await?;
        Ok(())
    }

    /// Answer with whatever operation the current state allows
    pub async fn respond(&self, text: impl AsRef<str>) -> Result<(), CommandError> {
        match self.response_state() {
            ResponseState::Pending | ResponseState::Deferred => self.reply(text).await,
            ResponseState::Replied => self.follow_up(text).await,
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("user", &self.user.id)
            .field("channel_id", &self.channel_id)
            .field("args", &self.args)
            .field("state", &self.response_state())
            .finish()
    }
}
