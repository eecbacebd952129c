//! Domain traits - Abstractions for infrastructure implementations

pub mod platform;
pub mod store;

pub use platform::{Platform, PlatformInfo, Responder};
pub use store::ConfigStore;
