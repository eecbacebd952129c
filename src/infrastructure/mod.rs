//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration snapshots
//! - Storage: Snapshot persistence
//! - Adapters: Platform integrations (console, Telegram, in-memory)
//! - Events: The event hub adapters share

pub mod adapters;
pub mod config;
pub mod events;
pub mod storage;
