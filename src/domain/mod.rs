//! Domain layer - Core types and abstractions
//!
//! This layer contains:
//! - Entities: Commands, invocations, events, users
//! - Traits: Abstractions for the platform client and the configuration store

pub mod entities;
pub mod traits;
