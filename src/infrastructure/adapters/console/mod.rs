//! Console adapter for development/testing
//!
//! Reads stdin line by line. Lines starting with the command prefix become
//! invocations; anything else is delivered as a `MessageCreated` event.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;
use crate::domain::entities::{CommandDescriptor, Event, EventHandler, EventKind, Invocation, Subscription, User};
use crate::domain::traits::{Platform, PlatformInfo, Responder};
use crate::infrastructure::events::EventHub;

const CHANNEL: &str = "console";

struct ConsoleResponder;

#[async_trait]
impl Responder for ConsoleResponder {
    async fn reply(&self, text: &str) -> Result<(), BotError> {
        println!("[BOT] {}", text);
        Ok(())
    }

    async fn defer(&self) -> Result<(), BotError> {
        println!("[BOT] ...");
        Ok(())
    }

    async fn follow_up(&self, text: &str) -> Result<(), BotError> {
        println!("[BOT] {}", text);
        Ok(())
    }
}

/// Console platform for local development
pub struct ConsoleAdapter {
    info: PlatformInfo,
    parser: MessageParser,
    hub: EventHub,
    user: User,
    lines: Mutex<Option<Lines<BufReader<Stdin>>>>,
    closed: CancellationToken,
    message_seq: std::sync::atomic::AtomicU64,
}

impl ConsoleAdapter {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            info: PlatformInfo {
                id: "console".to_string(),
                name: name.into(),
                username: "console".to_string(),
            },
            parser: MessageParser::new(prefix),
            hub: EventHub::new(),
            user: User::new("local").with_username("operator"),
            lines: Mutex::new(None),
            closed: CancellationToken::new(),
            message_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    async fn read_line(&self) -> Option<String> {
        let mut guard = self.lines.lock().await;
        let lines = guard.get_or_insert_with(|| BufReader::new(tokio::io::stdin()).lines());
        tokio::select! {
            _ = self.closed.cancelled() => None,
            line = lines.next_line() => line.ok().flatten(),
        }
    }
}

#[async_trait]
impl Platform for ConsoleAdapter {
    async fn connect(&self) -> Result<(), BotError> {
        info!("Starting console bot (dev mode), type {}help", self.parser.prefix());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        self.closed.cancel();
        Ok(())
    }

    async fn publish_commands(&self, commands: &[CommandDescriptor]) -> Result<(), BotError> {
        println!("[BOT] {} commands available", commands.len());
        for command in commands {
            println!("  {} - {}", command.usage(), command.description);
        }
        Ok(())
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.hub.subscribe(kind, handler)
    }

    async fn next_invocation(&self) -> Option<Invocation> {
        loop {
            let line = self.read_line().await?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(parsed) = self.parser.parse(line) {
                let invocation = Invocation::new(parsed.name, self.user.clone(), CHANNEL, Arc::new(ConsoleResponder))
                    .with_positional(parsed.positional)
                    .with_args(parsed.named);
                return Some(invocation);
            }

            let seq = self.message_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let delivered = self
                .hub
                .publish(Event::MessageCreated {
                    channel_id: CHANNEL.to_string(),
                    message_id: seq.to_string(),
                    author: self.user.clone(),
                    content: line.to_string(),
                })
                .await;
            debug!(delivered, "Console message delivered");
        }
    }

    async fn send_message(&self, _channel_id: &str, text: &str) -> Result<(), BotError> {
        println!("[BOT] {}", text);
        Ok(())
    }

    async fn delete_recent_messages(&self, _channel_id: &str, limit: usize) -> Result<usize, BotError> {
        println!("[BOT] (would delete {} messages)", limit);
        Ok(0)
    }

    async fn announce_ready(&self) {
        self.hub.publish(Event::Ready).await;
    }

    fn info(&self) -> PlatformInfo {
        self.info.clone()
    }
}
