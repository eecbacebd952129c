//! Application layer errors

use thiserror::Error;

use crate::plugins::lifecycle::PluginState;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Platform is not connected")]
    NotConnected,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures raised by a command handler
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Command {0} has no handler")]
    NotImplemented(String),

    #[error("Invocation was already answered")]
    AlreadyResponded,

    #[error("Follow-up sent before any reply or defer")]
    NotResponded,

    #[error("Cancelled: plugin was unloaded")]
    Cancelled,

    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<BotError> for CommandError {
    fn from(err: BotError) -> Self {
        CommandError::Platform(err.to_string())
    }
}

/// Command registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Command /{name} is already registered by plugin '{owner}'")]
    DuplicateCommand { name: String, owner: String },

    #[error("Unknown command: /{0}")]
    UnknownCommand(String),

    #[error("Command /{name} failed: {source}")]
    ExecutionError {
        name: String,
        #[source]
        source: CommandError,
    },
}

/// Plugin lifecycle errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Plugin '{0}' not found")]
    NotFound(String),

    #[error("No plugin named '{0}' in the catalog")]
    NotInCatalog(String),

    #[error("Plugin '{plugin}' cannot {action} while {state}")]
    InvalidLifecycleTransition {
        plugin: String,
        state: PluginState,
        action: &'static str,
    },

    #[error("Plugin '{plugin}' failed to load: {source}")]
    LoadFailure {
        plugin: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error("Plugin '{plugin}' failed to unload: {source}")]
    UnloadFailure {
        plugin: String,
        #[source]
        source: Box<PluginError>,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid configuration for plugin '{plugin}': {message}")]
    Config { plugin: String, message: String },

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("{0}")]
    Failed(String),
}

impl PluginError {
    pub(crate) fn load_failure(plugin: impl Into<String>, source: PluginError) -> Self {
        PluginError::LoadFailure {
            plugin: plugin.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn unload_failure(plugin: impl Into<String>, source: PluginError) -> Self {
        PluginError::UnloadFailure {
            plugin: plugin.into(),
            source: Box::new(source),
        }
    }

    /// The innermost cause, skipping the load/unload wrappers
    pub fn root_cause(&self) -> &PluginError {
        match self {
            PluginError::LoadFailure { source, .. } | PluginError::UnloadFailure { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

impl From<BotError> for PluginError {
    fn from(err: BotError) -> Self {
        PluginError::Platform(err.to_string())
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
