//! Curriculum use-case service: the child mutation protocol.
//!
//! # Responsibility
//! - Run locate -> validate -> mutate -> persist for child records.
//! - Provide aggregate and group level create/rename/delete operations.
//! - Translate repository failures into the caller-facing error taxonomy.
//!
//! # Invariants
//! - Validation failures are reported before any store access.
//! - A missing aggregate is reported before any group or child lookup; a
//!   missing group is reported before any child lookup.
//! - Nothing is persisted unless every lookup succeeded.
//! - Updates replace the whole child record; there is no field merge.
//! - Every successful mutation rewrites the whole aggregate with one `save`.
//!   Concurrent mutations of one aggregate are last-writer-wins.

use crate::model::aggregate::{
    new_id, now_epoch_ms, Aggregate, AggregateId, Child, ChildDraft, ChildId, Group, GroupId,
};
use crate::logging::log_field;
use crate::repo::aggregate_repo::{
    AggregateListQuery, AggregateRepository, AggregateSummary, RepoError,
};
use crate::slug::{generate_slug, is_valid_slug};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Steps of one mutation request, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStage {
    Start,
    AggregateLookup,
    GroupLookup,
    ChildLookup,
    Apply,
    Persist,
    Done,
}

impl MutationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AggregateLookup => "aggregate_lookup",
            Self::GroupLookup => "group_lookup",
            Self::ChildLookup => "child_lookup",
            Self::Apply => "apply",
            Self::Persist => "persist",
            Self::Done => "done",
        }
    }
}

/// Errors from curriculum service operations.
///
/// Every variant is terminal for the request and implies no state change.
#[derive(Debug)]
pub enum MutationError {
    /// Required input is absent or malformed.
    Validation(String),
    /// Aggregate id does not resolve.
    AggregateNotFound(AggregateId),
    /// Group id does not resolve inside the aggregate.
    GroupNotFound(GroupId),
    /// Child id (or slug) does not resolve inside the group/aggregate.
    ChildNotFound(ChildId),
    /// The store rejected or failed the read/write.
    Persistence(RepoError),
}

impl MutationError {
    /// Stage at which the request stopped.
    pub fn stage(&self) -> MutationStage {
        match self {
            Self::Validation(_) => MutationStage::Start,
            Self::AggregateNotFound(_) => MutationStage::AggregateLookup,
            Self::GroupNotFound(_) => MutationStage::GroupLookup,
            Self::ChildNotFound(_) => MutationStage::ChildLookup,
            Self::Persistence(_) => MutationStage::Persist,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::AggregateNotFound(_) => "aggregate_not_found",
            Self::GroupNotFound(_) => "group_not_found",
            Self::ChildNotFound(_) => "child_not_found",
            Self::Persistence(_) => "persistence_failed",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AggregateNotFound(_) | Self::GroupNotFound(_) | Self::ChildNotFound(_)
        )
    }
}

impl Display for MutationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "{message}"),
            Self::AggregateNotFound(id) => write!(f, "aggregate not found: {id}"),
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::ChildNotFound(id) => write!(f, "child not found: {id}"),
            Self::Persistence(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MutationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MutationError {
    fn from(value: RepoError) -> Self {
        match value {
            // Row vanished between lookup and save.
            RepoError::NotFound(id) => Self::AggregateNotFound(id),
            other => Self::Persistence(other),
        }
    }
}

pub type MutationResult<T> = Result<T, MutationError>;

/// Curriculum service facade over an aggregate repository.
pub struct CurriculumService<R: AggregateRepository> {
    repo: R,
}

impl<R: AggregateRepository> CurriculumService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates an aggregate with a generated id, a slug derived from `title`
    /// and no groups.
    pub fn create_aggregate(
        &self,
        title: impl Into<String>,
        category: impl Into<String>,
    ) -> MutationResult<Aggregate> {
        self.create_aggregate_with_slug(title, category, None)
    }

    /// Like [`Self::create_aggregate`], but an explicit non-blank `slug`
    /// replaces the one derived from `title`.
    pub fn create_aggregate_with_slug(
        &self,
        title: impl Into<String>,
        category: impl Into<String>,
        slug: Option<String>,
    ) -> MutationResult<Aggregate> {
        let title = require_text(title.into(), "title")?;
        let category = require_text(category.into(), "category")?;
        let slug = normalize_explicit_slug(slug)?;
        let mut aggregate = Aggregate::new(title, category);
        if let Some(slug) = slug {
            aggregate.slug = slug;
        }

        let created = self.repo.insert(&aggregate).map_err(|err| {
            warn!(
                "event=aggregate_create module=service status=error error_code=persistence_failed error={err}"
            );
            MutationError::from(err)
        })?;
        info!(
            "event=aggregate_create module=service status=ok aggregate_id={}",
            created.id
        );
        Ok(created)
    }

    /// Stores an aggregate that already carries its identity.
    pub fn import_aggregate(&self, aggregate: &Aggregate) -> MutationResult<Aggregate> {
        self.repo.insert(aggregate).map_err(|err| match err {
            RepoError::Validation(err) => MutationError::Validation(err.to_string()),
            other => other.into(),
        })
    }

    /// Loads one aggregate by id.
    pub fn get_aggregate(&self, aggregate_id: &str) -> MutationResult<Aggregate> {
        self.repo
            .find_by_id(aggregate_id)?
            .ok_or_else(|| MutationError::AggregateNotFound(aggregate_id.to_string()))
    }

    /// Loads one aggregate by slug.
    pub fn get_aggregate_by_slug(&self, slug: &str) -> MutationResult<Aggregate> {
        self.repo
            .find_by_slug(slug)?
            .ok_or_else(|| MutationError::AggregateNotFound(slug.to_string()))
    }

    /// Lists aggregates, most recently written first.
    pub fn list_aggregates(
        &self,
        query: &AggregateListQuery,
    ) -> MutationResult<Vec<AggregateSummary>> {
        self.repo.list(query).map_err(Into::into)
    }

    /// Retitles an aggregate, regenerating its slug unless one is supplied.
    pub fn rename_aggregate(
        &self,
        aggregate_id: &str,
        title: impl Into<String>,
        slug: Option<String>,
    ) -> MutationResult<Aggregate> {
        let title = require_text(title.into(), "title")?;
        let slug = match normalize_explicit_slug(slug)? {
            Some(slug) => slug,
            None => generate_slug(&title),
        };
        self.mutate("aggregate_rename", aggregate_id, move |aggregate| {
            aggregate.title = title;
            aggregate.slug = slug;
            Ok(())
        })
    }

    /// Hard-deletes an aggregate with all of its groups and children.
    pub fn delete_aggregate(&self, aggregate_id: &str) -> MutationResult<()> {
        match self.repo.delete(aggregate_id) {
            Ok(()) => {
                info!(
                    "event=aggregate_delete module=service status=ok aggregate_id={}",
                    log_field(aggregate_id)
                );
                Ok(())
            }
            Err(err) => {
                let err = MutationError::from(err);
                warn!(
                    "event=aggregate_delete module=service status=error error_code={} aggregate_id={}",
                    err.code(),
                    log_field(aggregate_id)
                );
                Err(err)
            }
        }
    }

    /// Appends a new, empty group.
    pub fn add_group(
        &self,
        aggregate_id: &str,
        title: impl Into<String>,
    ) -> MutationResult<Aggregate> {
        let title = require_text(title.into(), "title")?;
        self.mutate("group_create", aggregate_id, move |aggregate| {
            aggregate.groups.push(Group::new(title));
            Ok(())
        })
    }

    /// Retitles one group; its children are untouched.
    pub fn rename_group(
        &self,
        aggregate_id: &str,
        group_id: &str,
        title: impl Into<String>,
    ) -> MutationResult<Aggregate> {
        let title = require_text(title.into(), "title")?;
        self.mutate("group_rename", aggregate_id, move |aggregate| {
            locate_group(aggregate, group_id)?.title = title;
            Ok(())
        })
    }

    /// Removes one group together with its children.
    pub fn remove_group(&self, aggregate_id: &str, group_id: &str) -> MutationResult<Aggregate> {
        self.mutate("group_delete", aggregate_id, |aggregate| {
            let index = aggregate
                .groups
                .iter()
                .position(|group| group.id == group_id)
                .ok_or_else(|| MutationError::GroupNotFound(group_id.to_string()))?;
            aggregate.groups.remove(index);
            Ok(())
        })
    }

    /// Appends a new child built from `draft` to the end of the group.
    pub fn create_child(
        &self,
        aggregate_id: &str,
        group_id: &str,
        draft: ChildDraft,
    ) -> MutationResult<Aggregate> {
        let mut draft = normalize_draft(draft)?;
        draft.created_at.get_or_insert_with(now_epoch_ms);
        self.mutate("child_create", aggregate_id, move |aggregate| {
            let group = locate_group(aggregate, group_id)?;
            group.children.push(Child::from_draft(new_id(), draft));
            Ok(())
        })
    }

    /// Replaces the whole child record at `child_id` with `draft`.
    ///
    /// Only the id survives; every field the draft leaves out is absent
    /// afterwards.
    pub fn update_child(
        &self,
        aggregate_id: &str,
        group_id: &str,
        child_id: &str,
        draft: ChildDraft,
    ) -> MutationResult<Aggregate> {
        let draft = normalize_draft(draft)?;
        self.mutate("child_update", aggregate_id, move |aggregate| {
            let group = locate_group(aggregate, group_id)?;
            let index = locate_child(group, child_id)?;
            group.children[index] = Child::from_draft(child_id.to_string(), draft);
            Ok(())
        })
    }

    /// Removes one child, keeping the relative order of the rest.
    pub fn delete_child(
        &self,
        aggregate_id: &str,
        group_id: &str,
        child_id: &str,
    ) -> MutationResult<Aggregate> {
        self.mutate("child_delete", aggregate_id, |aggregate| {
            let group = locate_group(aggregate, group_id)?;
            let index = locate_child(group, child_id)?;
            group.children.remove(index);
            Ok(())
        })
    }

    /// Resolves a child by slug, returning its group id alongside it.
    pub fn find_child_by_slug(
        &self,
        aggregate_id: &str,
        slug: &str,
    ) -> MutationResult<(GroupId, Child)> {
        let aggregate = self.get_aggregate(aggregate_id)?;
        aggregate
            .find_child_by_slug(slug)
            .map(|(group, child)| (group.id.clone(), child.clone()))
            .ok_or_else(|| MutationError::ChildNotFound(slug.to_string()))
    }

    fn mutate(
        &self,
        operation: &'static str,
        aggregate_id: &str,
        apply: impl FnOnce(&mut Aggregate) -> MutationResult<()>,
    ) -> MutationResult<Aggregate> {
        let started_at = Instant::now();
        match self.run_mutation(aggregate_id, apply) {
            Ok(saved) => {
                info!(
                    "event={operation} module=service status=ok stage={} aggregate_id={} duration_ms={}",
                    MutationStage::Done.as_str(),
                    log_field(aggregate_id),
                    started_at.elapsed().as_millis()
                );
                Ok(saved)
            }
            Err(err) => {
                warn!(
                    "event={operation} module=service status=error stage={} error_code={} aggregate_id={} duration_ms={}",
                    err.stage().as_str(),
                    err.code(),
                    log_field(aggregate_id),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    fn run_mutation(
        &self,
        aggregate_id: &str,
        apply: impl FnOnce(&mut Aggregate) -> MutationResult<()>,
    ) -> MutationResult<Aggregate> {
        // Working copy: dropped untouched in the store if any later step fails.
        let mut aggregate = self
            .repo
            .find_by_id(aggregate_id)
            .map_err(MutationError::Persistence)?
            .ok_or_else(|| MutationError::AggregateNotFound(aggregate_id.to_string()))?;

        apply(&mut aggregate)?;

        self.repo.save(&aggregate).map_err(Into::into)
    }
}

fn locate_group<'a>(aggregate: &'a mut Aggregate, group_id: &str) -> MutationResult<&'a mut Group> {
    aggregate
        .group_mut(group_id)
        .ok_or_else(|| MutationError::GroupNotFound(group_id.to_string()))
}

fn locate_child(group: &Group, child_id: &str) -> MutationResult<usize> {
    group
        .child_position(child_id)
        .ok_or_else(|| MutationError::ChildNotFound(child_id.to_string()))
}

fn require_text(value: String, field: &'static str) -> MutationResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MutationError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Blank explicit slugs count as absent; non-blank ones must already be
/// slug-shaped.
fn normalize_explicit_slug(slug: Option<String>) -> MutationResult<Option<String>> {
    match slug.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) if is_valid_slug(value) => Ok(Some(value.to_string())),
        Some(value) => Err(MutationError::Validation(format!(
            "slug `{value}` must contain only lowercase letters, digits and hyphens"
        ))),
    }
}

fn normalize_draft(draft: ChildDraft) -> MutationResult<ChildDraft> {
    Ok(ChildDraft {
        title: require_text(draft.title, "title")?,
        slug: normalize_explicit_slug(draft.slug)?,
        ..draft
    })
}
