//! HTTP-style request API over the curriculum service.
//!
//! # Responsibility
//! - Accept JSON request bodies and path parameters for aggregate, group and
//!   child operations.
//! - Return a `{status, body}` envelope the transport layer can send as-is.
//!
//! # Invariants
//! - Handlers never panic; every failure becomes `{ "error": "..." }`.
//! - Status codes: 400 for malformed or missing input, 404 for lookup misses,
//!   500 for storage failures. Success is 200, or 201 for creations.
//! - Each call opens its own migrated connection; no state is shared between
//!   calls besides the database file.

use log::error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use syllabus_core::db::open_db;
use syllabus_core::logging::sanitize_message;
use syllabus_core::{
    Aggregate, AggregateListQuery, ChildDraft, ConfigError, CoreConfig, CurriculumService,
    MutationError, MutationResult, SqliteAggregateRepository,
};

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

const LIST_DEFAULT_LIMIT: u32 = 20;
const LIST_LIMIT_MAX: u32 = 100;
const MAX_LOGGED_ERROR_CHARS: usize = 240;

/// Response envelope returned by every handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn success(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error message for failure responses.
    pub fn error_message(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAggregateRequest {
    title: Option<String>,
    category: Option<String>,
    slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameAggregateRequest {
    title: Option<String>,
    slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAggregatesRequest {
    category: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRequest {
    aggregate_id: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildRequest {
    child_id: Option<String>,
    group_id: Option<String>,
    aggregate_id: Option<String>,
    child_body: Option<ChildDraft>,
}

type HandlerResult = Result<ApiResponse, ApiResponse>;

/// Request handlers bound to one database file.
#[derive(Debug, Clone)]
pub struct CurriculumApi {
    db_path: PathBuf,
}

impl CurriculumApi {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.db_path.clone())
    }

    /// Builds handlers for the database named by `SYLLABUS_DB_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        CoreConfig::from_env().map(|config| Self::from_config(&config))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// `{title, category, slug?}` -> 201 with the new aggregate.
    pub fn create_aggregate(&self, body: &str) -> ApiResponse {
        self.handle("create_aggregate", || {
            let request: CreateAggregateRequest = parse_body(body)?;
            let title = required(request.title, "title")?;
            let category = required(request.category, "category")?;
            let created = self.with_service(|service| {
                service.create_aggregate_with_slug(title, category, request.slug)
            })?;
            aggregate_response(STATUS_CREATED, &created)
        })
    }

    pub fn get_aggregate(&self, aggregate_id: &str) -> ApiResponse {
        self.handle("get_aggregate", || {
            let aggregate = self.with_service(|service| service.get_aggregate(aggregate_id))?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    pub fn get_aggregate_by_slug(&self, slug: &str) -> ApiResponse {
        self.handle("get_aggregate_by_slug", || {
            let aggregate = self.with_service(|service| service.get_aggregate_by_slug(slug))?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    /// `{category?, limit?, offset?}` -> `{items, appliedLimit}`.
    pub fn list_aggregates(&self, body: &str) -> ApiResponse {
        self.handle("list_aggregates", || {
            let request: ListAggregatesRequest = parse_body(body)?;
            let query = AggregateListQuery {
                category: request.category.filter(|value| !value.trim().is_empty()),
                limit: Some(normalize_list_limit(request.limit)),
                offset: request.offset.unwrap_or(0),
            };
            let items = self.with_service(|service| service.list_aggregates(&query))?;
            let items = to_json(&items)?;
            Ok(ApiResponse::success(
                STATUS_OK,
                json!({ "items": items, "appliedLimit": query.limit }),
            ))
        })
    }

    /// `{title, slug?}` -> 200 with the retitled aggregate.
    pub fn rename_aggregate(&self, aggregate_id: &str, body: &str) -> ApiResponse {
        self.handle("rename_aggregate", || {
            let request: RenameAggregateRequest = parse_body(body)?;
            let title = required(request.title, "title")?;
            let aggregate = self.with_service(|service| {
                service.rename_aggregate(aggregate_id, title, request.slug)
            })?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    pub fn delete_aggregate(&self, aggregate_id: &str) -> ApiResponse {
        self.handle("delete_aggregate", || {
            self.with_service(|service| service.delete_aggregate(aggregate_id))?;
            Ok(ApiResponse::success(
                STATUS_OK,
                json!({ "deleted": aggregate_id }),
            ))
        })
    }

    /// `{aggregateId, title}` -> 201 with the updated aggregate.
    pub fn create_group(&self, body: &str) -> ApiResponse {
        self.handle("create_group", || {
            let request: GroupRequest = parse_body(body)?;
            let aggregate_id = required(request.aggregate_id, "aggregateId")?;
            let title = required(request.title, "title")?;
            let aggregate =
                self.with_service(|service| service.add_group(&aggregate_id, title))?;
            aggregate_response(STATUS_CREATED, &aggregate)
        })
    }

    /// `{aggregateId, title}` with the group id from the path.
    pub fn update_group(&self, group_id: &str, body: &str) -> ApiResponse {
        self.handle("update_group", || {
            let request: GroupRequest = parse_body(body)?;
            let aggregate_id = required(request.aggregate_id, "aggregateId")?;
            let title = required(request.title, "title")?;
            let aggregate = self
                .with_service(|service| service.rename_group(&aggregate_id, group_id, title))?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    /// `{aggregateId}` with the group id from the path.
    pub fn delete_group(&self, group_id: &str, body: &str) -> ApiResponse {
        self.handle("delete_group", || {
            let request: GroupRequest = parse_body(body)?;
            let aggregate_id = required(request.aggregate_id, "aggregateId")?;
            let aggregate =
                self.with_service(|service| service.remove_group(&aggregate_id, group_id))?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    /// `{groupId, aggregateId, childBody}` -> 201 with the updated aggregate.
    pub fn create_child(&self, body: &str) -> ApiResponse {
        self.handle("create_child", || {
            let request: ChildRequest = parse_body(body)?;
            let group_id = required(request.group_id, "groupId")?;
            let aggregate_id = required(request.aggregate_id, "aggregateId")?;
            let draft = request
                .child_body
                .ok_or_else(|| missing_field("childBody"))?;
            let aggregate = self.with_service(|service| {
                service.create_child(&aggregate_id, &group_id, draft)
            })?;
            aggregate_response(STATUS_CREATED, &aggregate)
        })
    }

    /// `{childId, groupId, aggregateId, childBody}` -> 200 with the updated
    /// aggregate. `childBody` replaces the stored child in full.
    pub fn update_child(&self, body: &str) -> ApiResponse {
        self.handle("update_child", || {
            let request: ChildRequest = parse_body(body)?;
            let child_id = required(request.child_id, "childId")?;
            let group_id = required(request.group_id, "groupId")?;
            let aggregate_id = required(request.aggregate_id, "aggregateId")?;
            let draft = request
                .child_body
                .ok_or_else(|| missing_field("childBody"))?;
            let aggregate = self.with_service(|service| {
                service.update_child(&aggregate_id, &group_id, &child_id, draft)
            })?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    /// `{groupId, aggregateId}` with the child id from the path.
    pub fn delete_child(&self, child_id: &str, body: &str) -> ApiResponse {
        self.handle("delete_child", || {
            let request: ChildRequest = parse_body(body)?;
            let group_id = required(request.group_id, "groupId")?;
            let aggregate_id = required(request.aggregate_id, "aggregateId")?;
            let aggregate = self.with_service(|service| {
                service.delete_child(&aggregate_id, &group_id, child_id)
            })?;
            aggregate_response(STATUS_OK, &aggregate)
        })
    }

    /// -> `{groupId, child}` for the first child carrying `slug`.
    pub fn find_child_by_slug(&self, aggregate_id: &str, slug: &str) -> ApiResponse {
        self.handle("find_child_by_slug", || {
            let (group_id, child) =
                self.with_service(|service| service.find_child_by_slug(aggregate_id, slug))?;
            let child = to_json(&child)?;
            Ok(ApiResponse::success(
                STATUS_OK,
                json!({ "groupId": group_id, "child": child }),
            ))
        })
    }

    fn handle(&self, route: &'static str, run: impl FnOnce() -> HandlerResult) -> ApiResponse {
        let response = run().unwrap_or_else(|failure| failure);
        if response.status >= STATUS_INTERNAL_ERROR {
            error!(
                "event=api_request module=api status=error route={route} http_status={} error={}",
                response.status,
                sanitize_message(
                    response.error_message().unwrap_or("unknown"),
                    MAX_LOGGED_ERROR_CHARS
                )
            );
        }
        response
    }

    fn with_service<T>(
        &self,
        f: impl FnOnce(&CurriculumService<SqliteAggregateRepository<'_>>) -> MutationResult<T>,
    ) -> Result<T, ApiResponse> {
        let conn = open_db(&self.db_path).map_err(|err| {
            ApiResponse::failure(STATUS_INTERNAL_ERROR, format!("database open failed: {err}"))
        })?;
        let repo = SqliteAggregateRepository::try_new(&conn).map_err(|err| {
            ApiResponse::failure(STATUS_INTERNAL_ERROR, format!("repository init failed: {err}"))
        })?;
        let service = CurriculumService::new(repo);
        f(&service).map_err(mutation_failure)
    }
}

/// Maps the service error taxonomy to a status and error body.
pub fn mutation_failure(err: MutationError) -> ApiResponse {
    let status = match &err {
        MutationError::Validation(_) => STATUS_BAD_REQUEST,
        MutationError::AggregateNotFound(_)
        | MutationError::GroupNotFound(_)
        | MutationError::ChildNotFound(_) => STATUS_NOT_FOUND,
        MutationError::Persistence(_) => STATUS_INTERNAL_ERROR,
    };
    ApiResponse::failure(status, err.to_string())
}

fn parse_body<T: DeserializeOwned + Default>(body: &str) -> Result<T, ApiResponse> {
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|err| {
        ApiResponse::failure(STATUS_BAD_REQUEST, format!("malformed JSON body: {err}"))
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ApiResponse> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(missing_field(field)),
    }
}

fn missing_field(field: &'static str) -> ApiResponse {
    ApiResponse::failure(STATUS_BAD_REQUEST, format!("missing required field: {field}"))
}

fn normalize_list_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => LIST_DEFAULT_LIMIT,
        Some(value) => value.min(LIST_LIMIT_MAX),
    }
}

fn aggregate_response(status: u16, aggregate: &Aggregate) -> HandlerResult {
    Ok(ApiResponse::success(status, to_json(aggregate)?))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ApiResponse> {
    serde_json::to_value(value).map_err(|err| {
        ApiResponse::failure(STATUS_INTERNAL_ERROR, format!("response encoding failed: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::{normalize_list_limit, parse_body, required, CreateAggregateRequest};

    #[test]
    fn list_limit_is_defaulted_and_capped() {
        assert_eq!(normalize_list_limit(None), 20);
        assert_eq!(normalize_list_limit(Some(0)), 20);
        assert_eq!(normalize_list_limit(Some(5)), 5);
        assert_eq!(normalize_list_limit(Some(5_000)), 100);
    }

    #[test]
    fn empty_body_parses_as_all_fields_missing() {
        let request: CreateAggregateRequest = parse_body("  ").unwrap();
        assert!(request.title.is_none());
        assert!(request.category.is_none());
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let failure = parse_body::<CreateAggregateRequest>("{not json").unwrap_err();
        assert_eq!(failure.status, 400);
        assert!(failure.error_message().unwrap().contains("malformed JSON"));
    }

    #[test]
    fn blank_required_field_is_missing() {
        let failure = required(Some("  ".to_string()), "title").unwrap_err();
        assert_eq!(failure.status, 400);
        assert_eq!(
            failure.error_message(),
            Some("missing required field: title")
        );
    }
}
