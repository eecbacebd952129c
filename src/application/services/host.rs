//! Host service - owns the platform connection, the plugin manager and the
//! current configuration snapshot

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::command_registry::CommandRegistry;
use super::reconciler::{self, LifecycleOp};
use crate::application::errors::{BotError, CommandError, PluginError, RegistryError};
use crate::domain::entities::{Invocation, ResponseState};
use crate::domain::traits::{ConfigStore, Platform};
use crate::infrastructure::config::{BotConfig, BotOverrides, Snapshot};
use crate::plugins::{PluginCatalog, PluginInfo, PluginManager, PluginStatus, TimerTracker};

/// A lifecycle operation that did not go through
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpFailure {
    pub op: LifecycleOp,
    pub error: String,
}

/// Outcome of applying a snapshot. Applied operations are never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub applied: Vec<LifecycleOp>,
    pub failed: Vec<OpFailure>,
    pub restart_required: bool,
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.publish_error.is_none()
    }
}

pub struct HostService {
    platform: Arc<dyn Platform>,
    registry: Arc<CommandRegistry>,
    manager: Mutex<PluginManager>,
    store: Arc<dyn ConfigStore>,
    /// Stored config as read from the store; overrides are never merged in
    snapshot: RwLock<Snapshot>,
    overrides: BotOverrides,
    shutdown: CancellationToken,
}

impl HostService {
    pub fn new(platform: Arc<dyn Platform>, catalog: PluginCatalog, store: Arc<dyn ConfigStore>) -> Self {
        let registry = Arc::new(CommandRegistry::new());
        let manager = PluginManager::new(catalog, registry.clone(), platform.clone());
        Self {
            platform,
            registry,
            manager: Mutex::new(manager),
            store,
            snapshot: RwLock::new(Snapshot::default()),
            overrides: BotOverrides::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Environment and command-line settings applied on top of every snapshot
    pub fn with_overrides(mut self, overrides: BotOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_timer_tracker(self, timers: TimerTracker) -> Self {
        let manager = self.manager.into_inner().with_timer_tracker(timers);
        Self {
            manager: Mutex::new(manager),
            ..self
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect, load every enabled plugin, publish once, then announce ready
    pub async fn start(&self) -> Result<ReconcileReport, BotError> {
        let desired = self.store.load().await?;
        desired.clone().with_overrides(&self.overrides).validate()?;

        self.platform.connect().await?;
        let me = self.platform.info();
        info!(platform = %me.id, username = %me.username, "Platform connected");

        // Start from an empty plugin set with the same bot section, so the
        // initial pass is just a series of loads.
        *self.snapshot.write().await = Snapshot {
            bot: desired.bot.clone(),
            plugins: Default::default(),
        };
        let report = self.apply_snapshot(desired).await?;
        if !report.published {
            self.publish().await?;
        }
        self.platform.announce_ready().await;
        info!(
            plugins = report.applied.len(),
            failed = report.failed.len(),
            commands = self.registry.len(),
            "Host started"
        );
        Ok(report)
    }

    /// Replace the published command set with the registry's current contents
    pub async fn publish_commands(&self) -> Result<(), BotError> {
        self.publish().await
    }

    async fn publish(&self) -> Result<(), BotError> {
        let commands = self.registry.snapshot();
        self.platform.publish_commands(&commands).await?;
        info!(count = commands.len(), "Published commands");
        Ok(())
    }

    /// Diff `desired` against the current snapshot and apply the result.
    ///
    /// Lifecycle work is serialized through the manager lock. Commands are
    /// republished exactly once when any operation ran.
    pub async fn apply_snapshot(&self, desired: Snapshot) -> Result<ReconcileReport, BotError> {
        desired.clone().with_overrides(&self.overrides).validate()?;
        let mut manager = self.manager.lock().await;

        let current = self.snapshot.read().await.clone();
        let plan = reconciler::plan(&current, &desired);
        if plan.restart_required {
            warn!("Bot section changed; restart required for it to take effect");
        }

        let mut report = ReconcileReport {
            restart_required: plan.restart_required,
            ..ReconcileReport::default()
        };

        for op in plan.ops {
            debug!(%op, "Applying lifecycle operation");
            match Self::apply_op(&mut manager, &op).await {
                Ok(()) => report.applied.push(op),
                Err(e) => {
                    error!(plugin = %op.name(), error = %e, "Lifecycle operation failed");
                    report.failed.push(OpFailure {
                        op,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.applied.is_empty() || !report.failed.is_empty() {
            match self.publish().await {
                Ok(()) => report.published = true,
                Err(e) => {
                    error!(error = %e, "Failed to publish commands");
                    report.publish_error = Some(e.to_string());
                }
            }
        }

        *self.snapshot.write().await = Snapshot {
            bot: current.bot,
            plugins: desired.plugins,
        };
        Ok(report)
    }

    async fn apply_op(manager: &mut PluginManager, op: &LifecycleOp) -> Result<(), PluginError> {
        match op {
            LifecycleOp::Load { name, config } => manager.load_plugin(name, config.clone()).await,
            LifecycleOp::Reload { name, config } if manager.get_plugin(name).is_some() => {
                manager.reload_plugin(name, Some(config.clone())).await
            }
            // Not running (an earlier load failed): bring it up with the new config
            LifecycleOp::Reload { name, config } => manager.load_plugin(name, config.clone()).await,
            LifecycleOp::Unload { name } => match manager.unload_plugin(name).await {
                Ok(report) => {
                    if !report.leaked.is_clean() {
                        warn!(plugin = %name, leaked = ?report.leaked, "Released leftover plugin resources");
                    }
                    Ok(())
                }
                Err(PluginError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            },
        }
    }

    /// Re-read the store and reconcile
    pub async fn reload_config(&self) -> Result<ReconcileReport, BotError> {
        let desired = self.store.load().await?;
        info!("Reloading configuration");
        self.apply_snapshot(desired).await
    }

    /// Apply a new snapshot and persist it
    pub async fn update_config(&self, desired: Snapshot) -> Result<ReconcileReport, BotError> {
        let report = self.apply_snapshot(desired.clone()).await?;
        self.store.save(&desired).await?;
        Ok(report)
    }

    /// Reload one plugin with its configured settings. The plugin ends absent
    /// if the reload fails.
    pub async fn reload_plugin(&self, name: &str) -> Result<(), BotError> {
        let mut manager = self.manager.lock().await;
        let config = self
            .snapshot
            .read()
            .await
            .plugins
            .get(name)
            .map(|entry| entry.config.clone());

        let result = manager.reload_plugin(name, config).await;
        if !matches!(result, Err(PluginError::NotFound(_))) {
            self.publish().await?;
        }
        result.map_err(BotError::from)
    }

    pub async fn plugin_status(&self) -> Vec<PluginStatus> {
        self.manager.lock().await.status()
    }

    pub async fn list_plugins(&self) -> Vec<PluginInfo> {
        self.manager.lock().await.list_plugins()
    }

    /// The stored config, safe to edit and pass back to `update_config`
    pub async fn current_config(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// The `bot` section the host runs with, overrides applied
    pub async fn effective_bot(&self) -> BotConfig {
        self.overrides.apply(&self.snapshot.read().await.bot)
    }

    /// Route one invocation through the registry. Always leaves it answered.
    pub async fn handle_invocation(&self, mut invocation: Invocation) {
        let name = invocation.command.clone();

        let Some(descriptor) = self.registry.descriptor(&name) else {
            self.answer_unknown(&invocation).await;
            return;
        };

        match descriptor.bind(&invocation.positional, &invocation.args) {
            Ok(args) => {
                invocation.args = args;
                invocation.positional.clear();
            }
            Err(e) => {
                let text = format!("{}\nUsage: {}", e, descriptor.usage());
                Self::answer(&invocation, &text).await;
                return;
            }
        }

        let reply_to = invocation.clone();
        match self.registry.dispatch(&name, invocation).await {
            Ok(()) => {
                if reply_to.response_state() != ResponseState::Replied {
                    Self::answer(&reply_to, "Done.").await;
                }
            }
            Err(RegistryError::UnknownCommand(_)) => self.answer_unknown(&reply_to).await,
            Err(RegistryError::ExecutionError { source, .. }) => {
                let text = match &source {
                    CommandError::InvalidArgs(msg) => format!("Invalid arguments: {}\nUsage: {}", msg, descriptor.usage()),
                    CommandError::PermissionDenied(msg) => format!("Permission denied: {}", msg),
                    CommandError::Cancelled => format!("/{} was interrupted because its plugin is restarting.", name),
                    _ => {
                        error!(command = %name, user = %reply_to.user, error = %source, "Command failed");
                        format!("Something went wrong while running /{}.", name)
                    }
                };
                Self::answer(&reply_to, &text).await;
            }
            Err(e) => {
                error!(command = %name, error = %e, "Dispatch failed");
                Self::answer(&reply_to, "Something went wrong.").await;
            }
        }
    }

    async fn answer_unknown(&self, invocation: &Invocation) {
        let prefix = self.effective_bot().await.prefix;
        let text = format!("Unknown command {}{}. Try {}help", prefix, invocation.command, prefix);
        Self::answer(invocation, &text).await;
    }

    async fn answer(invocation: &Invocation, text: &str) {
        if let Err(e) = invocation.respond(text).await {
            warn!(command = %invocation.command, error = %e, "Failed to answer invocation");
        }
    }

    /// Pull invocations until shutdown or until the platform closes.
    ///
    /// Each invocation runs in its own task so a slow handler never blocks
    /// the next one.
    pub async fn run(self: Arc<Self>) -> Result<(), BotError> {
        info!("Listening for commands");
        loop {
            let invocation = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                invocation = self.platform.next_invocation() => invocation,
            };
            let Some(invocation) = invocation else {
                info!("Platform closed the invocation stream");
                break;
            };

            let span = tracing::info_span!("invocation", command = %invocation.command, user = %invocation.user);
            let host = self.clone();
            tokio::spawn(async move { host.handle_invocation(invocation).await }.instrument(span));
        }
        Ok(())
    }

    /// Unload every plugin, then disconnect
    pub async fn shutdown(&self) -> Result<(), BotError> {
        self.shutdown.cancel();
        let mut manager = self.manager.lock().await;

        for (name, e) in manager.unload_all().await {
            error!(plugin = %name, error = %e, "Plugin failed to unload cleanly");
        }
        let outstanding = manager.timers().outstanding();
        if outstanding > 0 {
            warn!(outstanding, "Plugin timers still running at shutdown");
        }
        drop(manager);

        self.platform.disconnect().await?;
        info!("Host stopped");
        Ok(())
    }
}
