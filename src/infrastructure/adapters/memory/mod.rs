//! In-memory platform for tests and local embedding
//!
//! Records every publication, message and deletion so assertions can inspect
//! what the host and its plugins did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::errors::BotError;
use crate::domain::entities::{
    Arguments, CommandDescriptor, Event, EventHandler, EventKind, Invocation, Subscription, User,
};
use crate::domain::traits::{Platform, PlatformInfo, Responder};
use crate::infrastructure::events::EventHub;

/// One interaction with a responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(String),
    Defer,
    FollowUp(String),
}

/// Responder that stores what it was asked to send
#[derive(Debug, Default)]
pub struct RecordingResponder {
    log: Mutex<Vec<Response>>,
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reply and follow-up texts in order
    pub fn replies(&self) -> Vec<String> {
        self.responses()
            .into_iter()
            .filter_map(|r| match r {
                Response::Reply(text) | Response::FollowUp(text) => Some(text),
                Response::Defer => None,
            })
            .collect()
    }

    pub fn was_deferred(&self) -> bool {
        self.responses().contains(&Response::Defer)
    }

    fn push(&self, response: Response) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(response);
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn reply(&self, text: &str) -> Result<(), BotError> {
        self.push(Response::Reply(text.to_string()));
        Ok(())
    }

    async fn defer(&self) -> Result<(), BotError> {
        self.push(Response::Defer);
        Ok(())
    }

    async fn follow_up(&self, text: &str) -> Result<(), BotError> {
        self.push(Response::FollowUp(text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct Recorded {
    publications: Vec<Vec<CommandDescriptor>>,
    messages: Vec<(String, String)>,
    channel_backlog: HashMap<String, usize>,
    deletions: Vec<(String, usize)>,
}

/// Platform whose inbound side is fed by the test
pub struct MemoryPlatform {
    info: PlatformInfo,
    hub: EventHub,
    connected: AtomicBool,
    closed: Mutex<CancellationToken>,
    tx: mpsc::UnboundedSender<Invocation>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Invocation>>,
    recorded: Mutex<Recorded>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            info: PlatformInfo {
                id: "memory".to_string(),
                name: "keeper-bot".to_string(),
                username: "keeper_bot".to_string(),
            },
            hub: EventHub::new(),
            connected: AtomicBool::new(false),
            closed: Mutex::new(CancellationToken::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue an invocation for `next_invocation`
    pub fn inject(&self, invocation: Invocation) {
        let _ = self.tx.send(invocation);
    }

    /// Build an invocation with a recording responder
    pub fn invocation(&self, command: &str, user: User, channel_id: &str) -> (Invocation, Arc<RecordingResponder>) {
        let responder = Arc::new(RecordingResponder::new());
        let invocation = Invocation::new(command, user, channel_id, responder.clone());
        (invocation, responder)
    }

    /// Invocation with raw positional tokens, as a text platform would produce
    pub fn text_invocation(
        &self,
        command: &str,
        positional: &[&str],
        named: Arguments,
    ) -> (Invocation, Arc<RecordingResponder>) {
        let (invocation, responder) = self.invocation(command, User::new("tester").with_username("tester"), "general");
        let invocation = invocation
            .with_positional(positional.iter().map(|s| s.to_string()).collect())
            .with_args(named);
        (invocation, responder)
    }

    /// Deliver an event to subscribers, returning how many handlers ran
    pub async fn emit(&self, event: Event) -> usize {
        self.hub.publish(event).await
    }

    /// Pretend `count` messages exist in a channel for `delete_recent_messages`
    pub fn seed_messages(&self, channel_id: &str, count: usize) {
        self.recorded().channel_backlog.insert(channel_id.to_string(), count);
    }

    pub fn publications(&self) -> Vec<Vec<CommandDescriptor>> {
        self.recorded().publications.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.recorded().publications.len()
    }

    /// Names in the most recent publication
    pub fn published_names(&self) -> Vec<String> {
        self.recorded()
            .publications
            .last()
            .map(|p| p.iter().map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.recorded().messages.clone()
    }

    pub fn deletions(&self) -> Vec<(String, usize)> {
        self.recorded().deletions.clone()
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn connect(&self) -> Result<(), BotError> {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if closed.is_cancelled() {
            *closed = CancellationToken::new();
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.lock().unwrap_or_else(PoisonError::into_inner).cancel();
        Ok(())
    }

    async fn publish_commands(&self, commands: &[CommandDescriptor]) -> Result<(), BotError> {
        if !self.is_connected() {
            return Err(BotError::NotConnected);
        }
        self.recorded().publications.push(commands.to_vec());
        Ok(())
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.hub.subscribe(kind, handler)
    }

    async fn next_invocation(&self) -> Option<Invocation> {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = closed.cancelled() => None,
            invocation = rx.recv() => invocation,
        }
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), BotError> {
        self.recorded().messages.push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn delete_recent_messages(&self, channel_id: &str, limit: usize) -> Result<usize, BotError> {
        let mut recorded = self.recorded();
        let backlog = recorded.channel_backlog.entry(channel_id.to_string()).or_insert(0);
        let deleted = limit.min(*backlog);
        *backlog -= deleted;
        recorded.deletions.push((channel_id.to_string(), deleted));
        Ok(deleted)
    }

    async fn announce_ready(&self) {
        self.hub.publish(Event::Ready).await;
    }

    fn info(&self) -> PlatformInfo {
        self.info.clone()
    }
}
