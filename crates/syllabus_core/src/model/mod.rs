//! Domain model for aggregates and their embedded groups and children.
//!
//! # Responsibility
//! - Define canonical data structures used by the mutation protocol.
//! - Keep one document-centric shape that is persisted as a single unit.
//!
//! # Invariants
//! - Groups and children never exist outside their owning aggregate.
//! - Deletion is a hard delete; there are no tombstones or versions.

pub mod aggregate;
