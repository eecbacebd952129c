use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::User;
use crate::application::errors::BotError;

/// Kinds of platform notifications a plugin can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Ready,
    MessageCreated,
    MemberJoined,
    MemberLeft,
}

/// A platform notification
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready,
    MessageCreated {
        channel_id: String,
        message_id: String,
        author: User,
        content: String,
    },
    MemberJoined {
        channel_id: String,
        user: User,
    },
    MemberLeft {
        channel_id: String,
        user: User,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::MessageCreated { .. } => EventKind::MessageCreated,
            Event::MemberJoined { .. } => EventKind::MemberJoined,
            Event::MemberLeft { .. } => EventKind::MemberLeft,
        }
    }
}

pub type EventFuture = Pin<Box<dyn Future<Output = Result<(), BotError>> + Send>>;

/// Event handler function type
pub type EventHandler = Arc<dyn Fn(Event) -> EventFuture + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`]
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BotError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// An attached event handler. Dropping it detaches the handler.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(id: u64, kind: EventKind, detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            kind,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("attached", &self.detach.is_some())
            .finish()
    }
}
