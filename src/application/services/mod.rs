//! Application services - Business logic orchestration

pub mod command_registry;
pub mod host;
pub mod reconciler;

pub use command_registry::{CommandRegistry, RegisteredCommand};
pub use host::{HostService, ReconcileReport};
pub use reconciler::{plan, reconcile, LifecycleOp, ReconcilePlan};
