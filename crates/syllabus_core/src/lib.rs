//! Core domain logic for Syllabus.
//! This crate is the single source of truth for aggregate/group/child
//! invariants and the child mutation protocol.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod slug;

pub use config::{ConfigError, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::aggregate::{
    Aggregate, AggregateId, Child, ChildDraft, ChildId, Group, GroupId, ModelValidationError,
};
pub use repo::aggregate_repo::{
    AggregateListQuery, AggregateRepository, AggregateSummary, RepoError, RepoResult,
    SqliteAggregateRepository,
};
pub use service::curriculum_service::{
    CurriculumService, MutationError, MutationResult, MutationStage,
};
pub use slug::{generate_slug, is_valid_slug};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
