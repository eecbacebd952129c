//! Per-plugin state machine
//!
//! ```text
//! Unloaded -> Loading -> Active -> Unloading -> Unloaded
//!                 \                     \
//!                  -> Error              -> Error
//! ```
//!
//! `Error` behaves like `Unloaded` for the purpose of a later load.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn, Instrument};

use super::context::{PluginContext, PluginEnv};
use super::disposables::LeakReport;
use super::trait_def::Plugin;
use crate::application::errors::PluginError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    Unloaded,
    Loading,
    Active,
    Unloading,
    Error(String),
}

impl PluginState {
    pub fn is_active(&self) -> bool {
        matches!(self, PluginState::Active)
    }

    /// States from which a load may start
    pub fn can_load(&self) -> bool {
        matches!(self, PluginState::Unloaded | PluginState::Error(_))
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Unloaded => write!(f, "unloaded"),
            PluginState::Loading => write!(f, "loading"),
            PluginState::Active => write!(f, "active"),
            PluginState::Unloading => write!(f, "unloading"),
            PluginState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Outcome of a clean unload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadReport {
    pub name: String,
    pub removed_commands: Vec<String>,
    pub leaked: LeakReport,
}

/// A plugin object plus the bookkeeping for its current Active period
pub struct PluginInstance {
    name: String,
    plugin: Box<dyn Plugin>,
    state: PluginState,
    config: Value,
    context: Option<PluginContext>,
    generation: u64,
    loaded_at: Option<DateTime<Utc>>,
}

impl PluginInstance {
    pub fn new(name: impl Into<String>, plugin: Box<dyn Plugin>, config: Value) -> Self {
        Self {
            name: name.into(),
            plugin,
            state: PluginState::Unloaded,
            config,
            context: None,
            generation: 0,
            loaded_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        self.plugin.description()
    }

    pub fn state(&self) -> &PluginState {
        &self.state
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn commands(&self) -> Vec<String> {
        self.context.as_ref().map(|ctx| ctx.commands().to_vec()).unwrap_or_default()
    }

    pub fn outstanding(&self) -> LeakReport {
        self.context.as_ref().map(PluginContext::outstanding).unwrap_or_default()
    }

    /// Run the plugin's load hook.
    ///
    /// On failure everything the plugin registered or acquired so far is
    /// removed again and the instance is left in `Error`.
    pub async fn load(&mut self, env: &PluginEnv, generation: u64) -> Result<(), PluginError> {
        if !self.state.can_load() {
            return Err(PluginError::InvalidLifecycleTransition {
                plugin: self.name.clone(),
                state: self.state.clone(),
                action: "load",
            });
        }

        self.state = PluginState::Loading;
        self.generation = generation;
        let mut ctx = PluginContext::new(self.name.clone(), self.config.clone(), generation, env.clone());
        let span = ctx.span().clone();

        let result = self.plugin.load(&mut ctx).instrument(span.clone()).await;
        match result {
            Ok(()) => {
                info!(parent: &span, commands = ctx.commands().len(), "Plugin loaded");
                self.context = Some(ctx);
                self.state = PluginState::Active;
                self.loaded_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                let removed = ctx.teardown().await;
                warn!(parent: &span, error = %e, rolled_back = removed.len(), "Plugin load failed");
                self.state = PluginState::Error(e.to_string());
                self.loaded_at = None;
                Err(PluginError::load_failure(&self.name, e))
            }
        }
    }

    /// Withdraw the plugin's commands, then run its unload hook, then release
    /// anything it left behind.
    pub async fn unload(&mut self) -> Result<UnloadReport, PluginError> {
        if !self.state.is_active() {
            return Err(PluginError::InvalidLifecycleTransition {
                plugin: self.name.clone(),
                state: self.state.clone(),
                action: "unload",
            });
        }
        let Some(mut ctx) = self.context.take() else {
            return Err(PluginError::InvalidLifecycleTransition {
                plugin: self.name.clone(),
                state: self.state.clone(),
                action: "unload",
            });
        };

        self.state = PluginState::Unloading;
        let span = ctx.span().clone();

        let removed_commands = ctx.registry().unregister_all(&self.name);
        debug!(parent: &span, removed = removed_commands.len(), "Commands withdrawn");
        ctx.begin_teardown();

        let result = self.plugin.unload(&mut ctx).instrument(span.clone()).await;

        let leaked = ctx.outstanding();
        if !leaked.is_clean() {
            warn!(
                parent: &span,
                timers = leaked.timers,
                subscriptions = leaked.subscriptions,
                "Plugin left resources behind after unload"
            );
        }
        ctx.teardown().await;
        self.loaded_at = None;

        match result {
            Ok(()) => {
                info!(parent: &span, "Plugin unloaded");
                self.state = PluginState::Unloaded;
                Ok(UnloadReport {
                    name: self.name.clone(),
                    removed_commands,
                    leaked,
                })
            }
            Err(e) => {
                warn!(parent: &span, error = %e, "Plugin unload failed");
                self.state = PluginState::Error(e.to_string());
                Err(PluginError::unload_failure(&self.name, e))
            }
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
