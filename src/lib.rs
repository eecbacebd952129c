//! keeper-bot: a chat bot host whose features live in plugins
//!
//! The host loads plugins from a static catalog, tracks the commands they
//! register, publishes them to the chat platform and keeps the running plugin
//! set in line with the configuration file.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{BotError, CommandError, ConfigError, PluginError, RegistryError, StorageError};
pub use application::services::{CommandRegistry, HostService, LifecycleOp, ReconcileReport};
pub use infrastructure::config::Snapshot;
pub use plugins::{builtin_catalog, Plugin, PluginCatalog, PluginContext, PluginManager};
