//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define whole-document data access contracts for aggregates.
//! - Isolate SQLite and JSON encoding details from the mutation protocol.
//!
//! # Invariants
//! - Repository writes must enforce `Aggregate::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `SlugConflict`) in
//!   addition to DB transport errors.

pub mod aggregate_repo;
