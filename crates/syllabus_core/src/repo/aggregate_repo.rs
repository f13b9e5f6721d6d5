//! Aggregate repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide load/save/delete APIs over whole aggregate documents.
//! - Keep SQL and JSON encoding details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `Aggregate::validate()` before SQL mutations.
//! - Every write is a single statement over one row, so readers observe either
//!   the previous or the next document, never a partial group/children list.
//! - Aggregate slugs are unique; a collision surfaces as `SlugConflict`.
//! - No version column exists: concurrent saves of one aggregate are
//!   last-writer-wins.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::aggregate::{now_epoch_ms, Aggregate, AggregateId, ModelValidationError};
use rusqlite::types::Value;
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

const AGGREGATE_SELECT_SQL: &str = "SELECT
    id,
    document,
    created_at,
    updated_at
FROM aggregates";

const SUMMARY_SELECT_SQL: &str = "SELECT
    id,
    slug,
    title,
    category,
    created_at,
    updated_at
FROM aggregates";

const REQUIRED_COLUMNS: [&str; 7] = [
    "id",
    "slug",
    "title",
    "category",
    "document",
    "created_at",
    "updated_at",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for aggregate persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Document failed structural validation before the write.
    Validation(ModelValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// No row exists for the aggregate id.
    NotFound(AggregateId),
    /// Another aggregate already owns this slug.
    SlugConflict(String),
    /// Another aggregate already owns this id.
    DuplicateId(AggregateId),
    /// Document could not be encoded for storage.
    Encode(serde_json::Error),
    /// Persisted row cannot be converted to a valid aggregate.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required column is missing from the `aggregates` table.
    MissingRequiredColumn(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "aggregate not found: {id}"),
            Self::SlugConflict(slug) => write!(f, "slug already in use: {slug}"),
            Self::DuplicateId(id) => write!(f, "aggregate id already in use: {id}"),
            Self::Encode(err) => write!(f, "failed to encode aggregate document: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted aggregate data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "aggregate repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredColumn(column) => write!(
                f,
                "aggregate repository requires column `{column}` in table `aggregates`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelValidationError> for RepoError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Query options for listing aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateListQuery {
    pub category: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Listing row read from the indexed columns only.
///
/// The embedded document is never decoded for listings, so one damaged
/// document does not hide the remaining aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSummary {
    pub id: AggregateId,
    pub slug: String,
    pub title: String,
    pub category: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Aggregate> for AggregateSummary {
    fn from(aggregate: &Aggregate) -> Self {
        Self {
            id: aggregate.id.clone(),
            slug: aggregate.slug.clone(),
            title: aggregate.title.clone(),
            category: aggregate.category.clone(),
            created_at: aggregate.created_at,
            updated_at: aggregate.updated_at,
        }
    }
}

/// Repository interface over whole aggregate documents.
pub trait AggregateRepository {
    fn find_by_id(&self, id: &str) -> RepoResult<Option<Aggregate>>;
    fn find_by_slug(&self, slug: &str) -> RepoResult<Option<Aggregate>>;
    fn list(&self, query: &AggregateListQuery) -> RepoResult<Vec<AggregateSummary>>;
    /// Stores a new aggregate under its own id and slug.
    fn insert(&self, aggregate: &Aggregate) -> RepoResult<Aggregate>;
    /// Replaces the stored document, including every group and child.
    fn save(&self, aggregate: &Aggregate) -> RepoResult<Aggregate>;
    /// Hard-deletes the aggregate together with its embedded groups/children.
    fn delete(&self, id: &str) -> RepoResult<()>;
}

impl<R: AggregateRepository + ?Sized> AggregateRepository for &R {
    fn find_by_id(&self, id: &str) -> RepoResult<Option<Aggregate>> {
        (**self).find_by_id(id)
    }

    fn find_by_slug(&self, slug: &str) -> RepoResult<Option<Aggregate>> {
        (**self).find_by_slug(slug)
    }

    fn list(&self, query: &AggregateListQuery) -> RepoResult<Vec<AggregateSummary>> {
        (**self).list(query)
    }

    fn insert(&self, aggregate: &Aggregate) -> RepoResult<Aggregate> {
        (**self).insert(aggregate)
    }

    fn save(&self, aggregate: &Aggregate) -> RepoResult<Aggregate> {
        (**self).save(aggregate)
    }

    fn delete(&self, id: &str) -> RepoResult<()> {
        (**self).delete(id)
    }
}

/// SQLite-backed aggregate repository storing one JSON document per row.
pub struct SqliteAggregateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAggregateRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn find_one(&self, column: &'static str, key: &str) -> RepoResult<Option<Aggregate>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{AGGREGATE_SELECT_SQL} WHERE {column} = ?1;"))?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_aggregate_row(row)?));
        }
        Ok(None)
    }
}

impl AggregateRepository for SqliteAggregateRepository<'_> {
    fn find_by_id(&self, id: &str) -> RepoResult<Option<Aggregate>> {
        self.find_one("id", id)
    }

    fn find_by_slug(&self, slug: &str) -> RepoResult<Option<Aggregate>> {
        self.find_one("slug", slug)
    }

    fn list(&self, query: &AggregateListQuery) -> RepoResult<Vec<AggregateSummary>> {
        let mut sql = format!("{SUMMARY_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(category) = query.category.as_deref() {
            sql.push_str(" AND category = ?");
            bind_values.push(Value::Text(category.to_string()));
        }

        sql.push_str(" ORDER BY updated_at DESC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(parse_summary_row(row)?);
        }
        Ok(summaries)
    }

    fn insert(&self, aggregate: &Aggregate) -> RepoResult<Aggregate> {
        aggregate.validate()?;
        let document = encode_document(aggregate)?;

        self.conn
            .execute(
                "INSERT INTO aggregates (
                    id,
                    slug,
                    title,
                    category,
                    document,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    aggregate.id.as_str(),
                    aggregate.slug.as_str(),
                    aggregate.title.as_str(),
                    aggregate.category.as_str(),
                    document,
                    aggregate.created_at,
                    aggregate.updated_at,
                ],
            )
            .map_err(|err| map_constraint_error(err, aggregate))?;

        Ok(aggregate.clone())
    }

    fn save(&self, aggregate: &Aggregate) -> RepoResult<Aggregate> {
        aggregate.validate()?;

        let mut saved = aggregate.clone();
        saved.updated_at = now_epoch_ms().max(aggregate.updated_at);
        let document = encode_document(&saved)?;

        let changed = self
            .conn
            .execute(
                "UPDATE aggregates
                 SET
                    slug = ?1,
                    title = ?2,
                    category = ?3,
                    document = ?4,
                    updated_at = ?5
                 WHERE id = ?6;",
                params![
                    saved.slug.as_str(),
                    saved.title.as_str(),
                    saved.category.as_str(),
                    document,
                    saved.updated_at,
                    saved.id.as_str(),
                ],
            )
            .map_err(|err| map_constraint_error(err, aggregate))?;

        if changed == 0 {
            return Err(RepoError::NotFound(aggregate.id.clone()));
        }

        Ok(saved)
    }

    fn delete(&self, id: &str) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM aggregates WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn encode_document(aggregate: &Aggregate) -> RepoResult<String> {
    serde_json::to_string(aggregate).map_err(RepoError::Encode)
}

fn parse_aggregate_row(row: &Row<'_>) -> RepoResult<Aggregate> {
    let id: String = row.get("id")?;
    let document: String = row.get("document")?;
    let mut aggregate: Aggregate = serde_json::from_str(&document).map_err(|err| {
        RepoError::InvalidData(format!("undecodable document for aggregate `{id}`: {err}"))
    })?;

    if aggregate.id != id {
        return Err(RepoError::InvalidData(format!(
            "document id `{}` does not match row id `{id}`",
            aggregate.id
        )));
    }

    aggregate.created_at = row.get("created_at")?;
    aggregate.updated_at = row.get("updated_at")?;
    aggregate.validate()?;
    Ok(aggregate)
}

fn parse_summary_row(row: &Row<'_>) -> RepoResult<AggregateSummary> {
    Ok(AggregateSummary {
        id: row.get("id")?,
        slug: row.get("slug")?,
        title: row.get("title")?,
        category: row.get("category")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_constraint_error(err: rusqlite::Error, aggregate: &Aggregate) -> RepoError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            let message = message.as_deref().unwrap_or_default();
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || message.contains("aggregates.id")
            {
                return RepoError::DuplicateId(aggregate.id.clone());
            }
            if message.contains("aggregates.slug") {
                return RepoError::SlugConflict(aggregate.slug.clone());
            }
        }
    }
    err.into()
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for column in REQUIRED_COLUMNS {
        if !table_has_column(conn, column)? {
            return Err(RepoError::MissingRequiredColumn(column));
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, column: &str) -> RepoResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM pragma_table_info('aggregates') WHERE name = ?1;",
            [column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
