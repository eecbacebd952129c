//! Telegram adapter

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;
use crate::domain::entities::{self, CommandDescriptor, Event, EventHandler, EventKind, Invocation, Subscription};
use crate::domain::traits::{Platform, PlatformInfo, Responder};
use crate::infrastructure::events::EventHub;

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

const POLL_TIMEOUT_SECS: i64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const RECENT_MESSAGES_PER_CHAT: usize = 200;

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    #[serde(default)]
    pub new_chat_members: Vec<User>,
    pub left_chat_member: Option<User>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl From<&User> for entities::User {
    fn from(user: &User) -> Self {
        entities::User {
            id: user.id.to_string(),
            username: user.username.clone(),
            display_name: user.first_name.clone(),
            is_bot: user.is_bot,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Thin HTTP client for the Bot API
#[derive(Clone)]
struct Api {
    token: String,
    client: Client,
}

impl Api {
    /// Get the API URL for a method
    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<Req, Res>(&self, method: &str, request: &Req) -> Result<Res, BotError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.url(method))
            .json(request)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        let data: ApiResponse<Res> = response
            .json()
            .await
            .map_err(|e| BotError::Parse(e.to_string()))?;

        if !data.ok {
            let description = data.description.unwrap_or_else(|| status.to_string());
            return Err(match status.as_u16() {
                401 | 403 => BotError::Auth(description),
                _ => BotError::Platform(format!("{} failed: {}", method, description)),
            });
        }
        data.result
            .ok_or_else(|| BotError::Parse(format!("{} returned no result", method)))
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, BotError> {
        #[derive(Serialize)]
        struct SendMessageRequest<'a> {
            chat_id: &'a str,
            text: &'a str,
        }

        #[derive(Deserialize)]
        struct MessageResult {
            message_id: i64,
        }

        let result: MessageResult = self.call("sendMessage", &SendMessageRequest { chat_id, text }).await?;
        Ok(result.message_id)
    }

    async fn send_chat_action(&self, chat_id: &str, action: &str) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct ChatActionRequest<'a> {
            chat_id: &'a str,
            action: &'a str,
        }

        let _: bool = self.call("sendChatAction", &ChatActionRequest { chat_id, action }).await?;
        Ok(())
    }
}

/// Replies go to the chat the command came from
struct TelegramResponder {
    api: Api,
    chat_id: String,
}

#[async_trait]
impl Responder for TelegramResponder {
    async fn reply(&self, text: &str) -> Result<(), BotError> {
        self.api.send_message(&self.chat_id, text).await.map(|_| ())
    }

    async fn defer(&self) -> Result<(), BotError> {
        self.api.send_chat_action(&self.chat_id, "typing").await
    }

    async fn follow_up(&self, text: &str) -> Result<(), BotError> {
        self.api.send_message(&self.chat_id, text).await.map(|_| ())
    }
}

/// Telegram platform using long polling
pub struct TelegramAdapter {
    api: Api,
    info: RwLock<PlatformInfo>,
    prefix: String,
    hub: EventHub,
    offset: AtomicI64,
    pending: tokio::sync::Mutex<VecDeque<Invocation>>,
    recent: Mutex<HashMap<String, VecDeque<i64>>>,
    closed: CancellationToken,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            api: Api {
                token: token.into(),
                client: Client::new(),
            },
            info: RwLock::new(PlatformInfo {
                id: "unknown".to_string(),
                name: "keeper-bot".to_string(),
                username: "keeper_bot".to_string(),
            }),
            prefix: prefix.into(),
            hub: EventHub::new(),
            offset: AtomicI64::new(0),
            pending: tokio::sync::Mutex::new(VecDeque::new()),
            recent: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        }
    }

    /// Get updates from Telegram using getUpdates API
    pub async fn get_updates(&self, offset: i64, timeout: i64) -> Result<Vec<Update>, BotError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: i64,
            allowed_updates: Vec<String>,
        }

        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: vec!["message".to_string()],
        };
        self.api.call("getUpdates", &request).await
    }

    /// Get the next update offset
    pub fn next_offset(updates: &[Update]) -> Option<i64> {
        updates.iter().map(|u| u.update_id + 1).max()
    }

    fn remember(&self, chat_id: &str, message_id: i64) {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = recent.entry(chat_id.to_string()).or_default();
        if ids.len() >= RECENT_MESSAGES_PER_CHAT {
            ids.pop_front();
        }
        ids.push_back(message_id);
    }

    /// Turn one update into events and queued invocations
    async fn handle_update(&self, update: Update, parser: &MessageParser) {
        let Some(message) = update.message else {
            return;
        };
        let chat_id = message.chat.id.to_string();
        self.remember(&chat_id, message.message_id);

        for member in &message.new_chat_members {
            self.hub
                .publish(Event::MemberJoined {
                    channel_id: chat_id.clone(),
                    user: member.into(),
                })
                .await;
        }
        if let Some(member) = &message.left_chat_member {
            self.hub
                .publish(Event::MemberLeft {
                    channel_id: chat_id.clone(),
                    user: member.into(),
                })
                .await;
        }

        let (Some(text), Some(from)) = (message.text, message.from) else {
            return;
        };
        let author = entities::User::from(&from);

        match parser.parse(&text) {
            Some(parsed) => {
                let responder = Arc::new(TelegramResponder {
                    api: self.api.clone(),
                    chat_id: chat_id.clone(),
                });
                let invocation = Invocation::new(parsed.name, author, chat_id, responder)
                    .with_positional(parsed.positional)
                    .with_args(parsed.named);
                self.pending.lock().await.push_back(invocation);
            }
            None => {
                self.hub
                    .publish(Event::MessageCreated {
                        channel_id: chat_id,
                        message_id: message.message_id.to_string(),
                        author,
                        content: text,
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl Platform for TelegramAdapter {
    async fn connect(&self) -> Result<(), BotError> {
        #[derive(Deserialize)]
        struct Me {
            id: i64,
            first_name: String,
            username: Option<String>,
        }

        let me: Me = self.api.call("getMe", &serde_json::json!({})).await?;
        let info = PlatformInfo {
            id: me.id.to_string(),
            name: me.first_name,
            username: me.username.unwrap_or_default(),
        };
        info!(username = %info.username, "Connected to Telegram");
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = info;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        self.closed.cancel();
        Ok(())
    }

    async fn publish_commands(&self, commands: &[CommandDescriptor]) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct BotCommand<'a> {
            command: &'a str,
            description: &'a str,
        }

        #[derive(Serialize)]
        struct SetMyCommandsRequest<'a> {
            commands: Vec<BotCommand<'a>>,
        }

        let request = SetMyCommandsRequest {
            commands: commands
                .iter()
                .map(|c| BotCommand {
                    command: &c.name,
                    description: if c.description.is_empty() { &c.name } else { &c.description },
                })
                .collect(),
        };
        let _: bool = self.api.call("setMyCommands", &request).await?;
        info!(count = commands.len(), "Registered bot commands with Telegram");
        Ok(())
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
        self.hub.subscribe(kind, handler)
    }

    async fn next_invocation(&self) -> Option<Invocation> {
        let parser = MessageParser::new(self.prefix.clone()).with_bot_username(self.info().username);
        loop {
            if let Some(invocation) = self.pending.lock().await.pop_front() {
                return Some(invocation);
            }

            let offset = self.offset.load(Ordering::SeqCst);
            let updates = tokio::select! {
                _ = self.closed.cancelled() => return None,
                updates = self.get_updates(offset, POLL_TIMEOUT_SECS) => updates,
            };

            match updates {
                Ok(updates) => {
                    if let Some(next) = Self::next_offset(&updates) {
                        self.offset.store(next, Ordering::SeqCst);
                    }
                    debug!(count = updates.len(), "Received updates");
                    for update in updates {
                        self.handle_update(update, &parser).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::select! {
                        _ = self.closed.cancelled() => return None,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), BotError> {
        let message_id = self.api.send_message(channel_id, text).await?;
        self.remember(channel_id, message_id);
        Ok(())
    }

    /// Telegram cannot list history, so only messages this adapter saw can go
    async fn delete_recent_messages(&self, channel_id: &str, limit: usize) -> Result<usize, BotError> {
        #[derive(Serialize)]
        struct DeleteMessagesRequest<'a> {
            chat_id: &'a str,
            message_ids: Vec<i64>,
        }

        let ids: Vec<i64> = {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(known) = recent.get_mut(channel_id) else {
                return Ok(0);
            };
            let take = limit.min(known.len());
            known.split_off(known.len() - take).into_iter().collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let count = ids.len();
        let _: bool = self
            .api
            .call(
                "deleteMessages",
                &DeleteMessagesRequest {
                    chat_id: channel_id,
                    message_ids: ids,
                },
            )
            .await?;
        Ok(count)
    }

    async fn announce_ready(&self) {
        self.hub.publish(Event::Ready).await;
    }

    fn info(&self) -> PlatformInfo {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
