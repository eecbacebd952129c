//! Plugin manager - handles plugin lifecycle and keeps the registry consistent

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::context::PluginEnv;
use super::disposables::TimerTracker;
use super::lifecycle::{PluginInstance, UnloadReport};
use super::trait_def::PluginCatalog;
use crate::application::errors::PluginError;
use crate::application::services::CommandRegistry;
use crate::domain::entities::CommandDescriptor;
use crate::domain::traits::Platform;

/// Owns the active plugin set
pub struct PluginManager {
    catalog: PluginCatalog,
    env: PluginEnv,
    plugins: BTreeMap<String, PluginInstance>,
    failures: HashMap<String, String>,
    next_generation: u64,
}

impl PluginManager {
    pub fn new(catalog: PluginCatalog, registry: Arc<CommandRegistry>, platform: Arc<dyn Platform>) -> Self {
        Self {
            catalog,
            env: PluginEnv {
                platform,
                registry,
                timers: TimerTracker::new(),
            },
            plugins: BTreeMap::new(),
            failures: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Share a timer tracker with the caller, mostly for leak assertions
    pub fn with_timer_tracker(mut self, timers: TimerTracker) -> Self {
        self.env.timers = timers;
        self
    }

    /// Instantiate `name` from the catalog and load it with `config`
    pub async fn load_plugin(&mut self, name: &str, config: Value) -> Result<(), PluginError> {
        if self.plugins.contains_key(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        let plugin = self
            .catalog
            .create(name)
            .ok_or_else(|| PluginError::NotInCatalog(name.to_string()))?;

        self.next_generation += 1;
        let mut instance = PluginInstance::new(name, plugin, config);
        match instance.load(&self.env, self.next_generation).await {
            Ok(()) => {
                self.failures.remove(name);
                self.plugins.insert(name.to_string(), instance);
                Ok(())
            }
            Err(e) => {
                error!(plugin = %name, error = %e, "Failed to load plugin");
                self.failures.insert(name.to_string(), e.to_string());
                Err(e)
            }
        }
    }

    /// Unload and forget `name`. The plugin is removed even when its unload hook fails.
    pub async fn unload_plugin(&mut self, name: &str) -> Result<UnloadReport, PluginError> {
        let mut instance = self
            .plugins
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let result = instance.unload().await;
        // unload() withdraws commands itself; this covers anything registered
        // behind the context's back.
        let stray = self.env.registry.unregister_all(name);
        if !stray.is_empty() {
            warn!(plugin = %name, commands = ?stray, "Removed commands left after unload");
        }

        if let Err(e) = &result {
            self.failures.insert(name.to_string(), e.to_string());
        }
        result
    }

    /// Unload then load again with `config`, or the previous config when `None`.
    ///
    /// If either half fails the plugin is left absent.
    pub async fn reload_plugin(&mut self, name: &str, config: Option<Value>) -> Result<(), PluginError> {
        let previous = self
            .plugins
            .get(name)
            .map(|p| p.config().clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let config = config.unwrap_or(previous);

        self.unload_plugin(name).await?;
        info!(plugin = %name, "Reloading plugin");
        self.load_plugin(name, config).await
    }

    /// Unload every active plugin, collecting the failures
    pub async fn unload_all(&mut self) -> Vec<(String, PluginError)> {
        let names: Vec<String> = self.plugins.keys().rev().cloned().collect();
        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.unload_plugin(&name).await {
                failures.push((name, e));
            }
        }
        failures
    }

    pub fn get_plugin(&self, name: &str) -> Option<&PluginInstance> {
        self.plugins.get(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.plugins.get(name).map(|p| p.state().is_active()).unwrap_or(false)
    }

    /// Active plugins in name order
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins.values().map(PluginInfo::from_instance).collect()
    }

    /// Active plugins plus the last failure of every plugin that is not active
    pub fn status(&self) -> Vec<PluginStatus> {
        let mut status: Vec<PluginStatus> = self
            .plugins
            .values()
            .map(|p| PluginStatus {
                name: p.name().to_string(),
                state: p.state().to_string(),
                generation: Some(p.generation()),
                loaded_at: p.loaded_at(),
                commands: p.commands(),
                last_error: None,
            })
            .collect();

        for (name, err) in &self.failures {
            if !self.plugins.contains_key(name) {
                status.push(PluginStatus {
                    name: name.clone(),
                    state: "failed".to_string(),
                    generation: None,
                    loaded_at: None,
                    commands: Vec::new(),
                    last_error: Some(err.clone()),
                });
            }
        }
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Aggregated command set for publication
    pub fn command_descriptors(&self) -> Vec<CommandDescriptor> {
        self.env.registry.snapshot()
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.env.registry
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn timers(&self) -> &TimerTracker {
        &self.env.timers
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Plugin information for listing
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub state: String,
    pub config: Value,
    pub commands: Vec<String>,
    pub generation: u64,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl PluginInfo {
    fn from_instance(instance: &PluginInstance) -> Self {
        Self {
            name: instance.name().to_string(),
            description: instance.description().to_string(),
            state: instance.state().to_string(),
            config: instance.config().clone(),
            commands: instance.commands(),
            generation: instance.generation(),
            loaded_at: instance.loaded_at(),
        }
    }
}

/// Row of the dashboard status table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub state: String,
    pub generation: Option<u64>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub commands: Vec<String>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::RegistryError;
    use crate::domain::entities::{Command, Invocation, User};
    use crate::infrastructure::adapters::memory::{MemoryPlatform, RecordingResponder};
    use crate::plugins::{Plugin, PluginContext};
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo {
        command: &'static str,
        /// Registered before `command`
        extra: Option<&'static str>,
        fail_unload: bool,
    }

    #[async_trait]
    impl Plugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
            let word = ctx.config().get("word").and_then(Value::as_str).unwrap_or("hi").to_string();
            if let Some(extra) = self.extra {
                ctx.register(Command::new(extra).with_handler(|inv: Invocation| async move { inv.reply("extra").await }))?;
            }
            ctx.register(Command::new(self.command).with_handler(move |inv: Invocation| {
                let word = word.clone();
                async move { inv.reply(word).await }
            }))?;
            Ok(())
        }

        async fn unload(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
            if self.fail_unload {
                return Err(PluginError::Failed("refused".to_string()));
            }
            Ok(())
        }
    }

    fn manager() -> PluginManager {
        let catalog = PluginCatalog::new()
            .with("echo", || Box::new(Echo { command: "echo", extra: None, fail_unload: false }))
            .with("stubborn", || Box::new(Echo { command: "stubborn", extra: None, fail_unload: true }))
            .with("clash", || Box::new(Echo { command: "echo", extra: None, fail_unload: false }))
            .with("greedy", || Box::new(Echo { command: "echo", extra: Some("extra"), fail_unload: false }));
        let platform: Arc<dyn Platform> = Arc::new(MemoryPlatform::new());
        PluginManager::new(catalog, Arc::new(CommandRegistry::new()), platform)
    }

    async fn call(manager: &PluginManager, name: &str) -> Result<Vec<String>, RegistryError> {
        let responder = Arc::new(RecordingResponder::new());
        let inv = Invocation::new(name, User::new("u"), "c", responder.clone());
        manager.registry().dispatch(name, inv).await?;
        Ok(responder.replies())
    }

    #[tokio::test]
    async fn test_load_then_dispatch() {
        let mut manager = manager();
        manager.load_plugin("echo", json!({"word": "yo"})).await.unwrap();

        assert_eq!(call(&manager, "echo").await.unwrap(), vec!["yo".to_string()]);
        assert_eq!(manager.list_plugins().len(), 1);
        assert_eq!(manager.list_plugins()[0].commands, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_double_load_rejected() {
        let mut manager = manager();
        manager.load_plugin("echo", Value::Null).await.unwrap();
        let err = manager.load_plugin("echo", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded(_)));
    }

    #[tokio::test]
    async fn test_unknown_catalog_entry() {
        let mut manager = manager();
        let err = manager.load_plugin("ghost", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::NotInCatalog(_)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_command_rolls_back_second_plugin() {
        let mut manager = manager();
        manager.load_plugin("echo", Value::Null).await.unwrap();

        let err = manager.load_plugin("clash", Value::Null).await.unwrap_err();
        assert!(matches!(
            err.root_cause(),
            PluginError::Registry(RegistryError::DuplicateCommand { .. })
        ));
        assert!(manager.get_plugin("clash").is_none());
        assert_eq!(manager.registry().owner_of("echo").as_deref(), Some("echo"));

        let status = manager.status();
        let clash = status.iter().find(|s| s.name == "clash").unwrap();
        assert!(clash.last_error.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_command_removes_commands_registered_before_it() {
        let mut manager = manager();
        manager.load_plugin("echo", Value::Null).await.unwrap();

        let err = manager.load_plugin("greedy", Value::Null).await.unwrap_err();
        assert!(matches!(
            err.root_cause(),
            PluginError::Registry(RegistryError::DuplicateCommand { .. })
        ));
        assert!(manager.get_plugin("greedy").is_none());
        assert!(matches!(call(&manager, "extra").await, Err(RegistryError::UnknownCommand(_))));
        assert!(manager.registry().names_owned_by("greedy").is_empty());
        assert_eq!(call(&manager, "echo").await.unwrap(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_unload_still_removes() {
        let mut manager = manager();
        manager.load_plugin("stubborn", Value::Null).await.unwrap();

        let err = manager.unload_plugin("stubborn").await.unwrap_err();
        assert!(matches!(err, PluginError::UnloadFailure { .. }));
        assert!(manager.get_plugin("stubborn").is_none());
        assert!(matches!(
            call(&manager, "stubborn").await,
            Err(RegistryError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_uses_new_or_previous_config() {
        let mut manager = manager();
        manager.load_plugin("echo", json!({"word": "one"})).await.unwrap();
        let first_generation = manager.get_plugin("echo").unwrap().generation();

        manager.reload_plugin("echo", Some(json!({"word": "two"}))).await.unwrap();
        assert_eq!(call(&manager, "echo").await.unwrap(), vec!["two".to_string()]);

        manager.reload_plugin("echo", None).await.unwrap();
        assert_eq!(call(&manager, "echo").await.unwrap(), vec!["two".to_string()]);
        assert!(manager.get_plugin("echo").unwrap().generation() > first_generation);
    }

    #[tokio::test]
    async fn test_unload_missing_is_not_found() {
        let mut manager = manager();
        assert!(matches!(
            manager.unload_plugin("echo").await,
            Err(PluginError::NotFound(_))
        ));
    }
}
