//! Command registry - the single table that dispatch consults

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::application::errors::{CommandError, RegistryError};
use crate::domain::entities::{Command, CommandDescriptor, Invocation};

/// A live registry entry
#[derive(Debug)]
pub struct RegisteredCommand {
    pub owner: String,
    pub command: Command,
}

/// Maps command names to handlers and owning plugins.
///
/// Entries keep insertion order so publication is deterministic. Lookups clone
/// the entry out of the lock; a handler already looked up may still finish
/// after its command has been removed.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: RwLock<IndexMap<String, Arc<RegisteredCommand>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. Re-registering under the same owner replaces the entry.
    pub fn register(&self, command: Command, owner: &str) -> Result<(), RegistryError> {
        let name = command.name().to_string();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(&name) {
            if existing.owner != owner {
                return Err(RegistryError::DuplicateCommand {
                    name,
                    owner: existing.owner.clone(),
                });
            }
        }

        debug!(command = %name, plugin = %owner, "Registered command");
        entries.insert(
            name,
            Arc::new(RegisteredCommand {
                owner: owner.to_string(),
                command,
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
            .is_some();
        if removed {
            debug!(command = %name, "Unregistered command");
        }
        removed
    }

    /// Remove every command owned by `owner` under one write lock
    pub fn unregister_all(&self, owner: &str) -> Vec<String> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = Vec::new();
        entries.retain(|name, entry| {
            if entry.owner == owner {
                removed.push(name.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            debug!(plugin = %owner, count = removed.len(), "Unregistered plugin commands");
        }
        removed
    }

    fn lookup(&self, name: &str) -> Option<Arc<RegisteredCommand>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Run the handler registered under `name`.
    ///
    /// Handler errors and panics both surface as `ExecutionError`.
    pub async fn dispatch(&self, name: &str, invocation: Invocation) -> Result<(), RegistryError> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| RegistryError::UnknownCommand(name.to_string()))?;

        let Some(handler) = entry.command.handler.clone() else {
            return Err(RegistryError::ExecutionError {
                name: name.to_string(),
                source: CommandError::NotImplemented(name.to_string()),
            });
        };

        // The handler call itself runs inside the guard so a panic before the
        // first poll is caught too.
        let outcome = AssertUnwindSafe(futures::future::lazy(move |_| handler(invocation)).flatten())
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                warn!(command = %name, plugin = %entry.owner, "Command handler panicked: {}", message);
                Err(CommandError::ExecutionFailed(message))
            }
        };

        result.map_err(|source| RegistryError::ExecutionError {
            name: name.to_string(),
            source,
        })
    }

    /// All descriptors in registration order
    pub fn snapshot(&self) -> Vec<CommandDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.command.descriptor.clone())
            .collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<CommandDescriptor> {
        self.lookup(name).map(|entry| entry.command.descriptor.clone())
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.lookup(name).map(|entry| entry.owner.clone())
    }

    pub fn names_owned_by(&self, owner: &str) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::User;
    use crate::infrastructure::adapters::memory::RecordingResponder;

    fn invocation(name: &str, responder: &Arc<RecordingResponder>) -> Invocation {
        Invocation::new(name, User::new("u1"), "c1", responder.clone())
    }

    fn echo(name: &str, text: &'static str) -> Command {
        Command::new(name).with_handler(move |inv: Invocation| async move { inv.reply(text).await })
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let registry = CommandRegistry::new();
        registry.register(echo("ping", "pong"), "util").unwrap();

        let responder = Arc::new(RecordingResponder::new());
        registry.dispatch("ping", invocation("ping", &responder)).await.unwrap();
        assert_eq!(responder.replies(), vec!["pong".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let registry = CommandRegistry::new();
        let responder = Arc::new(RecordingResponder::new());
        let err = registry.dispatch("nope", invocation("nope", &responder)).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownCommand(n) if n == "nope"));
    }

    #[test]
    fn test_duplicate_across_owners_rejected() {
        let registry = CommandRegistry::new();
        registry.register(echo("ping", "a"), "util").unwrap();
        let err = registry.register(echo("ping", "b"), "mod").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCommand { ref owner, .. } if owner == "util"));
        assert_eq!(registry.owner_of("ping").as_deref(), Some("util"));
    }

    #[tokio::test]
    async fn test_same_owner_overwrites() {
        let registry = CommandRegistry::new();
        registry.register(echo("ping", "old"), "util").unwrap();
        registry.register(echo("ping", "new"), "util").unwrap();
        assert_eq!(registry.len(), 1);

        let responder = Arc::new(RecordingResponder::new());
        registry.dispatch("ping", invocation("ping", &responder)).await.unwrap();
        assert_eq!(responder.replies(), vec!["new".to_string()]);
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let registry = CommandRegistry::new();
        for name in ["warn", "history", "ping", "modlog"] {
            registry.register(Command::new(name), "p").unwrap();
        }
        registry.unregister("ping");
        let names: Vec<String> = registry.snapshot().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["warn", "history", "modlog"]);
    }

    #[test]
    fn test_unregister_all_only_touches_owner() {
        let registry = CommandRegistry::new();
        registry.register(Command::new("warn"), "moderation").unwrap();
        registry.register(Command::new("ping"), "ping").unwrap();
        registry.register(Command::new("purge"), "moderation").unwrap();

        let removed = registry.unregister_all("moderation");
        assert_eq!(removed, vec!["warn".to_string(), "purge".to_string()]);
        assert_eq!(registry.names_owned_by("ping"), vec!["ping".to_string()]);
        assert!(registry.unregister_all("moderation").is_empty());
        assert!(!registry.unregister("warn"));
    }

    #[tokio::test]
    async fn test_in_flight_handler_finishes_after_removal() {
        let registry = Arc::new(CommandRegistry::new());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let gates = Arc::new(tokio::sync::Mutex::new(Some((started_tx, release_rx))));

        registry
            .register(
                Command::new("slow").with_handler(move |inv: Invocation| {
                    let gates = gates.clone();
                    async move {
                        if let Some((started, release)) = gates.lock().await.take() {
                            let _ = started.send(());
                            let _ = release.await;
                        }
                        inv.reply("done").await
                    }
                }),
                "slow",
            )
            .unwrap();

        let responder = Arc::new(RecordingResponder::new());
        let inv = invocation("slow", &responder);
        let task = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.dispatch("slow", inv).await })
        };
        started_rx.await.unwrap();

        registry.unregister_all("slow");
        let late = registry.dispatch("slow", invocation("slow", &responder)).await;
        assert!(matches!(late, Err(RegistryError::UnknownCommand(_))));

        release_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(responder.replies(), vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_become_execution_errors() {
        let registry = CommandRegistry::new();
        registry
            .register(
                Command::new("fail").with_handler(|_inv: Invocation| async {
                    Err::<(), _>(CommandError::ExecutionFailed("db down".to_string()))
                }),
                "p",
            )
            .unwrap();
        registry
            .register(
                Command::new("boom").with_handler(|inv: Invocation| async move {
                    if !inv.command.is_empty() {
                        panic!("kaboom");
                    }
                    Ok::<(), CommandError>(())
                }),
                "p",
            )
            .unwrap();

        let responder = Arc::new(RecordingResponder::new());
        let err = registry.dispatch("fail", invocation("fail", &responder)).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ExecutionError { source: CommandError::ExecutionFailed(ref m), .. } if m == "db down"
        ));

        let err = registry.dispatch("boom", invocation("boom", &responder)).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ExecutionError { source: CommandError::ExecutionFailed(ref m), .. } if m == "kaboom"
        ));
    }

    #[tokio::test]
    async fn test_handler_panicking_before_its_future_is_caught() {
        let registry = CommandRegistry::new();
        registry
            .register(
                Command::new("eager").with_handler(|inv: Invocation| {
                    if !inv.command.is_empty() {
                        panic!("no future for you");
                    }
                    async { Ok::<(), CommandError>(()) }
                }),
                "p",
            )
            .unwrap();

        let responder = Arc::new(RecordingResponder::new());
        let err = registry.dispatch("eager", invocation("eager", &responder)).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::ExecutionError { source: CommandError::ExecutionFailed(ref m), .. } if m == "no future for you"
        ));
        assert!(registry.contains("eager"));
    }
}
