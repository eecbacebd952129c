//! Liveness commands: `ping` and `help`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::application::errors::PluginError;
use crate::domain::entities::{Command, Invocation, OptionKind};
use crate::plugins::disposables::DisposableId;
use crate::plugins::{Plugin, PluginContext};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PingConfig {
    /// Log a heartbeat this often; no heartbeat when unset or zero
    pub heartbeat_secs: Option<u64>,
    pub reply: Option<String>,
}

#[derive(Default)]
pub struct PingPlugin {
    heartbeat: Option<DisposableId>,
    beats: Arc<AtomicU64>,
}

impl PingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for PingPlugin {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Liveness check and command listing"
    }

    async fn load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let config: PingConfig = ctx.config_as()?;
        let reply = config.reply.unwrap_or_else(|| "Pong!".to_string());

        ctx.register(
            Command::new("ping")
                .with_description("Check that the bot is alive")
                .allow_in_dm()
                .with_handler(move |inv: Invocation| {
                    let reply = reply.clone();
                    async move {
                        let latency = (Utc::now() - inv.received_at).num_milliseconds().max(0);
                        inv.reply(format!("{} ({} ms)", reply, latency)).await
                    }
                }),
        )?;

        let registry = ctx.registry();
        ctx.register(
            Command::new("help")
                .with_description("List available commands")
                .with_option("command", OptionKind::String, "Show usage for one command", false)
                .allow_in_dm()
                .with_handler(move |inv: Invocation| {
                    let registry = registry.clone();
                    async move {
                        if let Some(name) = inv.args.get_str("command") {
                            let name = name.trim_start_matches('/');
                            let text = match registry.descriptor(name) {
                                Some(d) => format!("{} - {}", d.usage(), d.description),
                                None => format!("Command /{} not found", name),
                            };
                            return inv.reply(text).await;
                        }

                        let mut help = "Available commands:\n".to_string();
                        for d in registry.snapshot() {
                            help.push_str(&format!("  /{} - {}\n", d.name, d.description));
                        }
                        inv.reply(help.trim_end()).await
                    }
                }),
        )?;

        if let Some(secs) = config.heartbeat_secs.filter(|s| *s > 0) {
            let beats = self.beats.clone();
            let generation = ctx.generation();
            self.heartbeat = Some(ctx.schedule_every(Duration::from_secs(secs), move || {
                let beats = beats.clone();
                async move {
                    let n = beats.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(beat = n, generation, "Heartbeat");
                }
            }));
        }

        Ok(())
    }

    async fn unload(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if let Some(id) = self.heartbeat.take() {
            ctx.release(id).await;
        }
        Ok(())
    }
}
