//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Services: command registry, config reconciliation, the host service
//! - Errors: Domain-specific errors
//! - Messaging: Command parsing for text platforms

pub mod errors;
pub mod messaging;
pub mod services;
