//! Plugin system for keeper-bot
//!
//! Plugins come from a static catalog of trusted implementations. The manager
//! drives their lifecycle; everything a plugin acquires goes through its
//! [`PluginContext`] so it can be released on unload.

pub mod bounded;
pub mod context;
pub mod disposables;
pub mod lifecycle;
pub mod manager;
pub mod trait_def;

pub mod moderation;
pub mod ping;
pub mod verification;

use once_cell::sync::Lazy;

pub use context::{PluginContext, PluginEnv};
pub use disposables::{DisposableId, LeakReport, TimerTracker};
pub use lifecycle::{PluginInstance, PluginState, UnloadReport};
pub use manager::{PluginInfo, PluginManager, PluginStatus};
pub use trait_def::{Plugin, PluginCatalog, PluginFactory};

static BUILTIN_PLUGINS: Lazy<PluginCatalog> = Lazy::new(|| {
    PluginCatalog::new()
        .with("ping", || Box::new(ping::PingPlugin::new()))
        .with("moderation", || Box::new(moderation::ModerationPlugin::new()))
        .with("verification", || Box::new(verification::VerificationPlugin::new()))
});

/// The plugins compiled into this binary
pub fn builtin_catalog() -> PluginCatalog {
    BUILTIN_PLUGINS.clone()
}
