//! Runtime context handed to a plugin for one Active period

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::disposables::{DisposableId, DisposableSet, LeakReport, Schedule, TimerTask, TimerTracker};
use crate::application::errors::PluginError;
use crate::application::services::CommandRegistry;
use crate::domain::entities::{Command, EventHandler, EventKind};
use crate::domain::traits::Platform;

/// Shared handles every plugin context is built from
#[derive(Clone)]
pub struct PluginEnv {
    pub platform: Arc<dyn Platform>,
    pub registry: Arc<CommandRegistry>,
    pub timers: TimerTracker,
}

/// Everything a plugin may touch while loaded.
///
/// Subscriptions and timers go through the context so the runtime can
/// release them after `unload`. The cancellation token is cancelled as soon as
/// unloading begins; long-running handlers should check it between steps.
pub struct PluginContext {
    name: String,
    config: Value,
    generation: u64,
    span: tracing::Span,
    env: PluginEnv,
    commands: Vec<String>,
    disposables: DisposableSet,
    cancel: CancellationToken,
}

impl PluginContext {
    pub fn new(name: impl Into<String>, config: Value, generation: u64, env: PluginEnv) -> Self {
        let name = name.into();
        let span = tracing::info_span!("plugin", name = %name, generation);
        Self {
            name,
            config,
            generation,
            span,
            env,
            commands: Vec::new(),
            disposables: DisposableSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialize the plugin's config; a missing config yields `T::default()`
    pub fn config_as<T>(&self) -> Result<T, PluginError>
    where
        T: DeserializeOwned + Default,
    {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.config.clone()).map_err(|e| PluginError::Config {
            plugin: self.name.clone(),
            message: e.to_string(),
        })
    }

    /// Incremented on every load; stale work can compare against it
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn platform(&self) -> Arc<dyn Platform> {
        self.env.platform.clone()
    }

    pub fn registry(&self) -> Arc<CommandRegistry> {
        self.env.registry.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a command owned by this plugin
    pub fn register(&mut self, command: Command) -> Result<(), PluginError> {
        let name = command.name().to_string();
        self.env.registry.register(command, &self.name)?;
        if !self.commands.contains(&name) {
            self.commands.push(name);
        }
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.commands.retain(|c| c != name);
        self.env.registry.unregister(name)
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn subscribe(&mut self, kind: EventKind, handler: EventHandler) -> DisposableId {
        let subscription = self.env.platform.subscribe(kind, handler);
        let id = self.disposables.add_subscription(subscription);
        debug!(parent: &self.span, %id, ?kind, "Subscribed to event");
        id
    }

    pub fn schedule_once<F, Fut>(&mut self, delay: Duration, tick: F) -> DisposableId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Schedule::Once(delay), tick)
    }

    pub fn schedule_every<F, Fut>(&mut self, period: Duration, tick: F) -> DisposableId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(Schedule::Every(period), tick)
    }

    fn schedule<F, Fut>(&mut self, schedule: Schedule, tick: F) -> DisposableId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let timer = TimerTask::spawn(&self.env.timers, schedule, self.span.clone(), tick);
        let id = self.disposables.add_timer(timer);
        debug!(parent: &self.span, %id, ?schedule, "Scheduled timer");
        id
    }

    /// Release a subscription or timer acquired through this context
    pub async fn release(&mut self, id: DisposableId) -> bool {
        self.disposables.release(id).await
    }

    pub fn outstanding(&self) -> LeakReport {
        self.disposables.outstanding()
    }

    pub(crate) fn begin_teardown(&self) {
        self.cancel.cancel();
    }

    /// Release whatever is left and withdraw every command this plugin owns
    pub(crate) async fn teardown(&mut self) -> Vec<String> {
        self.cancel.cancel();
        self.disposables.release_all().await;
        self.commands.clear();
        self.env.registry.unregister_all(&self.name)
    }
}
