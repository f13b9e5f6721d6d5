//! Aggregate domain model.
//!
//! # Responsibility
//! - Define the aggregate -> group -> child document shape persisted as one
//!   unit.
//! - Provide lookup helpers used by the mutation protocol.
//!
//! # Invariants
//! - Group ids are unique within their aggregate.
//! - Child ids are unique within their group.
//! - A child exists inside exactly one group of exactly one aggregate; there
//!   is no detached child state.
//! - Aggregate slug uniqueness is a store-level concern, not checked here.

use crate::slug::{generate_slug, is_valid_slug};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Opaque aggregate identifier, immutable after creation.
pub type AggregateId = String;
/// Opaque group identifier, unique within one aggregate.
pub type GroupId = String;
/// Opaque child identifier, unique within one group.
pub type ChildId = String;

/// Structural validation failures for aggregate documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidationError {
    BlankAggregateTitle,
    BlankCategory,
    InvalidAggregateSlug(String),
    BlankGroupTitle(GroupId),
    BlankChildTitle(ChildId),
    InvalidChildSlug { child_id: ChildId, slug: String },
    DuplicateGroupId(GroupId),
    DuplicateChildId { group_id: GroupId, child_id: ChildId },
}

impl Display for ModelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankAggregateTitle => write!(f, "title must not be blank"),
            Self::BlankCategory => write!(f, "category must not be blank"),
            Self::InvalidAggregateSlug(slug) => write!(f, "invalid slug `{slug}`"),
            Self::BlankGroupTitle(id) => write!(f, "group {id} title must not be blank"),
            Self::BlankChildTitle(id) => write!(f, "child {id} title must not be blank"),
            Self::InvalidChildSlug { child_id, slug } => {
                write!(f, "child {child_id} has invalid slug `{slug}`")
            }
            Self::DuplicateGroupId(id) => write!(f, "duplicate group id: {id}"),
            Self::DuplicateChildId { group_id, child_id } => {
                write!(f, "duplicate child id {child_id} in group {group_id}")
            }
        }
    }
}

impl Error for ModelValidationError {}

/// Leaf record embedded in a group (a lecture).
///
/// `content`, `media_url` and `created_at` are payload: the mutation protocol
/// never inspects them, and an update replaces them along with everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: ChildId,
    pub title: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Unix epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl Child {
    /// Builds a child record from a draft under an existing id.
    ///
    /// The slug is the draft's explicit slug when present, otherwise it is
    /// generated from the draft title.
    pub fn from_draft(id: ChildId, draft: ChildDraft) -> Self {
        let slug = match draft.slug {
            Some(slug) => slug,
            None => generate_slug(&draft.title),
        };
        Self {
            id,
            title: draft.title,
            slug,
            content: draft.content,
            media_url: draft.media_url,
            created_at: draft.created_at,
        }
    }
}

/// Full replacement body for creating or updating a child.
///
/// There is no partial patch: fields left `None` are absent on the stored
/// record after the write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl ChildDraft {
    /// Draft carrying only a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Ordered sub-collection of children (a section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub title: String,
    #[serde(default)]
    pub children: Vec<Child>,
}

impl Group {
    /// Creates an empty group with a generated id.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(new_id(), title)
    }

    /// Creates an empty group under a caller-provided id.
    pub fn with_id(id: impl Into<GroupId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            children: Vec::new(),
        }
    }

    /// Position of the first child with `child_id`.
    pub fn child_position(&self, child_id: &str) -> Option<usize> {
        self.children.iter().position(|child| child.id == child_id)
    }

    pub fn child(&self, child_id: &str) -> Option<&Child> {
        self.children.iter().find(|child| child.id == child_id)
    }
}

/// Top-level persisted record (an article or curriculum).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub id: AggregateId,
    pub title: String,
    pub slug: String,
    pub category: String,
    /// Display order is insertion order.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,
    /// Unix epoch milliseconds, refreshed by every store write.
    #[serde(default)]
    pub updated_at: i64,
}

impl Aggregate {
    /// Creates an aggregate with a generated id and a slug derived from
    /// `title`.
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        let title = title.into();
        let slug = generate_slug(&title);
        Self::with_id(new_id(), title, slug, category)
    }

    /// Creates an aggregate with caller-provided identity.
    ///
    /// Used by import paths where the id and slug already exist externally.
    pub fn with_id(
        id: impl Into<AggregateId>,
        title: impl Into<String>,
        slug: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            id: id.into(),
            title: title.into(),
            slug: slug.into(),
            category: category.into(),
            groups: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn group(&self, group_id: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == group_id)
    }

    pub fn group_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| group.id == group_id)
    }

    /// Finds the first child carrying `slug`, scanning groups in display order.
    ///
    /// Child slugs are not guaranteed unique, so later matches are shadowed.
    pub fn find_child_by_slug(&self, slug: &str) -> Option<(&Group, &Child)> {
        self.groups.iter().find_map(|group| {
            group
                .children
                .iter()
                .find(|child| child.slug == slug)
                .map(|child| (group, child))
        })
    }

    /// Total number of children across all groups.
    pub fn child_count(&self) -> usize {
        self.groups.iter().map(|group| group.children.len()).sum()
    }

    /// Checks structural invariants before persistence.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.title.trim().is_empty() {
            return Err(ModelValidationError::BlankAggregateTitle);
        }
        if self.category.trim().is_empty() {
            return Err(ModelValidationError::BlankCategory);
        }
        if !is_valid_slug(&self.slug) {
            return Err(ModelValidationError::InvalidAggregateSlug(self.slug.clone()));
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                return Err(ModelValidationError::DuplicateGroupId(group.id.clone()));
            }
            if group.title.trim().is_empty() {
                return Err(ModelValidationError::BlankGroupTitle(group.id.clone()));
            }

            let mut child_ids = HashSet::new();
            for child in &group.children {
                if !child_ids.insert(child.id.as_str()) {
                    return Err(ModelValidationError::DuplicateChildId {
                        group_id: group.id.clone(),
                        child_id: child.id.clone(),
                    });
                }
                if child.title.trim().is_empty() {
                    return Err(ModelValidationError::BlankChildTitle(child.id.clone()));
                }
                if !is_valid_slug(&child.slug) {
                    return Err(ModelValidationError::InvalidChildSlug {
                        child_id: child.id.clone(),
                        slug: child.slug.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Generates a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall clock time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
