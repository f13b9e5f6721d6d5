//! Request boundary for Syllabus.
//!
//! Transport adapters (HTTP servers, test harnesses) call into
//! [`CurriculumApi`] and send the returned [`ApiResponse`] unchanged.

pub mod api;

pub use api::{
    mutation_failure, ApiResponse, CurriculumApi, STATUS_BAD_REQUEST, STATUS_CREATED,
    STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND, STATUS_OK,
};
