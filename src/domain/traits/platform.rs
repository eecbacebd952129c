use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::domain::entities::{CommandDescriptor, EventHandler, EventKind, Invocation, Subscription};

/// Platform trait - abstraction for the chat platform client
#[async_trait]
pub trait Platform: Send + Sync {
    /// Connect and log in
    async fn connect(&self) -> Result<(), BotError>;

    /// Close the connection; `next_invocation` returns `None` afterwards
    async fn disconnect(&self) -> Result<(), BotError>;

    /// Replace the published command set with `commands`
    async fn publish_commands(&self, commands: &[CommandDescriptor]) -> Result<(), BotError>;

    /// Attach an event handler; dropping the returned subscription detaches it
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription;

    /// Wait for the next inbound command invocation
    async fn next_invocation(&self) -> Option<Invocation>;

    /// Post a message outside of any invocation
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), BotError>;

    /// Delete up to `limit` recent messages in a channel, returning how many went
    async fn delete_recent_messages(&self, channel_id: &str, limit: usize) -> Result<usize, BotError>;

    /// Deliver `Event::Ready` to subscribers. The host calls this once the
    /// initial plugin set is loaded and published.
    async fn announce_ready(&self);

    /// Get platform info
    fn info(&self) -> PlatformInfo;
}

/// Reply capability handed to command handlers through an [`Invocation`]
#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, text: &str) -> Result<(), BotError>;

    async fn defer(&self) -> Result<(), BotError>;

    async fn follow_up(&self, text: &str) -> Result<(), BotError>;
}

/// Platform information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}
