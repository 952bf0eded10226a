//! Entity identity, metadata and tracked-state model.
//!
//! # Responsibility
//! - Define what the core needs to know about a persisted record type.
//! - Hold declarative per-entity-type metadata registered at startup.
//!
//! # Invariants
//! - The core never inspects entity fields at runtime; everything it needs
//!   about a type comes from `Entity` or from its registered `EntityType`.
//! - A `Model` is immutable once built and shared by the Store that owns it.

pub mod entity;
pub mod metadata;
pub mod state;
