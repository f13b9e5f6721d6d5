use std::cell::{Cell, RefCell};
use syllabus_core::db::open_db_in_memory;
use syllabus_core::{
    Aggregate, AggregateListQuery, AggregateRepository, AggregateSummary, Child, ChildDraft,
    CurriculumService, Group, MutationError, MutationStage, RepoError, RepoResult, SqliteAggregateRepository,
};

fn setup() -> rusqlite::Connection {
    open_db_in_memory().unwrap()
}

fn seeded_course() -> Aggregate {
    let mut aggregate = Aggregate::with_id("a1", "Course", "course", "programming");
    let mut intro = Group::with_id("g1", "Intro");
    intro.children.push(Child {
        id: "c1".to_string(),
        title: "Lesson 1".to_string(),
        slug: "lesson-1".to_string(),
        content: Some("Welcome".to_string()),
        media_url: Some("https://cdn.example/intro.mp4".to_string()),
        created_at: Some(1_700_000_000_000),
    });
    aggregate.groups.push(intro);
    aggregate
}

fn child_titles(aggregate: &Aggregate, group_id: &str) -> Vec<String> {
    aggregate
        .group(group_id)
        .unwrap()
        .children
        .iter()
        .map(|child| child.title.clone())
        .collect()
}

#[test]
fn update_replaces_child_wholesale_end_to_end() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    service.import_aggregate(&seeded_course()).unwrap();

    let updated = service
        .update_child("a1", "g1", "c1", ChildDraft::titled("Lesson One"))
        .unwrap();

    let expected = Child {
        id: "c1".to_string(),
        title: "Lesson One".to_string(),
        slug: "lesson-one".to_string(),
        content: None,
        media_url: None,
        created_at: None,
    };
    assert_eq!(updated.groups[0].children, vec![expected.clone()]);

    let stored = service.get_aggregate("a1").unwrap();
    assert_eq!(stored.groups[0].children, vec![expected]);
}

#[test]
fn update_keeps_explicit_slug_over_generated_one() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    service.import_aggregate(&seeded_course()).unwrap();

    let draft = ChildDraft {
        title: "Lesson One".to_string(),
        slug: Some(" first-steps ".to_string()),
        content: Some("Body".to_string()),
        ..ChildDraft::default()
    };
    let updated = service.update_child("a1", "g1", "c1", draft).unwrap();
    let child = &updated.groups[0].children[0];
    assert_eq!(child.slug, "first-steps");
    assert_eq!(child.content.as_deref(), Some("Body"));
}

#[test]
fn create_appends_in_insertion_order_and_delete_preserves_order() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    let course = service.create_aggregate("Course", "programming").unwrap();
    let course = service.add_group(&course.id, "Basics").unwrap();
    let group_id = course.groups[0].id.clone();

    for title in ["A", "B", "C"] {
        service
            .create_child(&course.id, &group_id, ChildDraft::titled(title))
            .unwrap();
    }
    let before = service.get_aggregate(&course.id).unwrap();
    assert_eq!(child_titles(&before, &group_id), ["A", "B", "C"]);
    assert_eq!(before.groups[0].children[1].slug, "b");
    assert!(before.groups[0].children[1].created_at.is_some());

    let b_id = before.groups[0].children[1].id.clone();
    let after = service.delete_child(&course.id, &group_id, &b_id).unwrap();
    assert_eq!(child_titles(&after, &group_id), ["A", "C"]);
}

#[test]
fn deleting_missing_child_leaves_children_unchanged() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    service.import_aggregate(&seeded_course()).unwrap();
    let before = service.get_aggregate("a1").unwrap();

    let err = service.delete_child("a1", "g1", "nope").unwrap_err();
    assert!(matches!(err, MutationError::ChildNotFound(ref id) if id == "nope"));
    assert_eq!(err.stage(), MutationStage::ChildLookup);

    let after = service.get_aggregate("a1").unwrap();
    assert_eq!(after.groups[0].children, before.groups[0].children);
    assert_eq!(after.updated_at, before.updated_at);
}

#[test]
fn missing_group_is_reported_before_child_lookup() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    service.import_aggregate(&seeded_course()).unwrap();

    let err = service
        .update_child("a1", "missing-group", "missing-child", ChildDraft::titled("X"))
        .unwrap_err();
    assert!(matches!(err, MutationError::GroupNotFound(ref id) if id == "missing-group"));
    assert_eq!(err.code(), "group_not_found");
}

#[test]
fn blank_title_is_a_validation_error_without_store_access() {
    let repo = CountingRepo::default();
    let service = CurriculumService::new(&repo);

    let err = service
        .create_child("a1", "g1", ChildDraft::titled("   "))
        .unwrap_err();
    assert!(matches!(err, MutationError::Validation(_)));
    assert_eq!(repo.lookups.get(), 0);

    let mut bad_slug = ChildDraft::titled("Fine");
    bad_slug.slug = Some("Not A Slug".to_string());
    let err = service.update_child("a1", "g1", "c1", bad_slug).unwrap_err();
    assert!(matches!(err, MutationError::Validation(_)));
    assert_eq!(repo.lookups.get(), 0);
}

#[test]
fn missing_aggregate_wins_over_any_group_or_child_id() {
    let repo = CountingRepo::default();
    let service = CurriculumService::new(&repo);

    let update = service
        .update_child("ghost", "g1", "c1", ChildDraft::titled("X"))
        .unwrap_err();
    let delete = service.delete_child("ghost", "g1", "c1").unwrap_err();
    let create = service
        .create_child("ghost", "nope", ChildDraft::titled("X"))
        .unwrap_err();

    for err in [update, delete, create] {
        assert!(matches!(err, MutationError::AggregateNotFound(ref id) if id == "ghost"));
        assert_eq!(err.stage(), MutationStage::AggregateLookup);
    }
    assert_eq!(repo.saves.get(), 0);
}

#[test]
fn persistence_failure_is_surfaced_and_nothing_is_applied() {
    let repo = CountingRepo::with_aggregate(seeded_course());
    repo.fail_saves.set(true);
    let service = CurriculumService::new(&repo);

    let err = service
        .update_child("a1", "g1", "c1", ChildDraft::titled("Lesson One"))
        .unwrap_err();
    assert!(matches!(err, MutationError::Persistence(_)));
    assert_eq!(err.stage(), MutationStage::Persist);

    let stored = repo.stored.borrow();
    assert_eq!(stored.as_ref().unwrap().groups[0].children[0].title, "Lesson 1");
}

#[test]
fn group_operations_rename_and_cascade() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    service.import_aggregate(&seeded_course()).unwrap();

    let renamed = service.rename_group("a1", "g1", " Getting Started ").unwrap();
    assert_eq!(renamed.groups[0].title, "Getting Started");
    assert_eq!(renamed.groups[0].children.len(), 1);

    let with_second = service.add_group("a1", "Advanced").unwrap();
    assert_eq!(with_second.groups.len(), 2);
    assert_eq!(with_second.groups[1].title, "Advanced");

    let removed = service.remove_group("a1", "g1").unwrap();
    assert_eq!(removed.groups.len(), 1);
    assert_eq!(removed.child_count(), 0);

    let err = service.remove_group("a1", "g1").unwrap_err();
    assert!(matches!(err, MutationError::GroupNotFound(_)));
}

#[test]
fn aggregate_lifecycle_create_rename_lookup_delete() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());

    let created = service.create_aggregate("Intro to Rust", "programming").unwrap();
    assert_eq!(created.slug, "intro-to-rust");
    assert!(created.groups.is_empty());

    let duplicate = service.create_aggregate("Intro to Rust", "other").unwrap_err();
    assert!(matches!(
        duplicate,
        MutationError::Persistence(RepoError::SlugConflict(_))
    ));

    let renamed = service
        .rename_aggregate(&created.id, "Rust in Depth", None)
        .unwrap();
    assert_eq!(renamed.slug, "rust-in-depth");
    assert_eq!(
        service.get_aggregate_by_slug("rust-in-depth").unwrap().id,
        created.id
    );
    assert!(matches!(
        service.get_aggregate_by_slug("intro-to-rust").unwrap_err(),
        MutationError::AggregateNotFound(_)
    ));

    let listed = service.list_aggregates(&AggregateListQuery::default()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].slug, "rust-in-depth");

    service.delete_aggregate(&created.id).unwrap();
    assert!(matches!(
        service.delete_aggregate(&created.id).unwrap_err(),
        MutationError::AggregateNotFound(_)
    ));
}

#[test]
fn create_aggregate_requires_title_and_category() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());

    assert!(matches!(
        service.create_aggregate("", "programming").unwrap_err(),
        MutationError::Validation(message) if message.contains("title")
    ));
    assert!(matches!(
        service.create_aggregate("Course", " ").unwrap_err(),
        MutationError::Validation(message) if message.contains("category")
    ));
}

#[test]
fn non_latin_titles_get_distinct_fallback_slugs() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());

    let first = service.create_aggregate("入門", "languages").unwrap();
    let second = service.create_aggregate("入門", "languages").unwrap();
    assert_ne!(first.slug, second.slug);
    assert!(first.slug.starts_with("item-"));
}

#[test]
fn create_aggregate_accepts_an_explicit_slug() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());

    let created = service
        .create_aggregate_with_slug("入門", "languages", Some(" nihongo-intro ".to_string()))
        .unwrap();
    assert_eq!(created.slug, "nihongo-intro");
    assert_eq!(
        service.get_aggregate_by_slug("nihongo-intro").unwrap().id,
        created.id
    );

    let blank = service
        .create_aggregate_with_slug("Intro to Go", "programming", Some("  ".to_string()))
        .unwrap();
    assert_eq!(blank.slug, "intro-to-go");

    let malformed = service
        .create_aggregate_with_slug("Course", "programming", Some("Not A Slug".to_string()))
        .unwrap_err();
    assert!(matches!(malformed, MutationError::Validation(_)));
    assert_eq!(
        service.list_aggregates(&AggregateListQuery::default()).unwrap().len(),
        2
    );
}

#[test]
fn find_child_by_slug_returns_first_match_with_group() {
    let conn = setup();
    let service = CurriculumService::new(SqliteAggregateRepository::try_new(&conn).unwrap());
    service.import_aggregate(&seeded_course()).unwrap();

    let (group_id, child) = service.find_child_by_slug("a1", "lesson-1").unwrap();
    assert_eq!(group_id, "g1");
    assert_eq!(child.id, "c1");

    assert!(matches!(
        service.find_child_by_slug("a1", "unknown").unwrap_err(),
        MutationError::ChildNotFound(_)
    ));
}

#[test]
fn last_writer_wins_between_stale_copies() {
    let conn = setup();
    let repo = SqliteAggregateRepository::try_new(&conn).unwrap();
    let service = CurriculumService::new(&repo);
    service.import_aggregate(&seeded_course()).unwrap();

    let stale = repo.find_by_id("a1").unwrap().unwrap();
    service
        .create_child("a1", "g1", ChildDraft::titled("Lesson 2"))
        .unwrap();

    // A writer holding the pre-create copy overwrites the new child.
    repo.save(&stale).unwrap();
    let stored = service.get_aggregate("a1").unwrap();
    assert_eq!(child_titles(&stored, "g1"), ["Lesson 1"]);
}

/// In-memory repository that counts store access and can fail writes.
#[derive(Default)]
struct CountingRepo {
    stored: RefCell<Option<Aggregate>>,
    lookups: Cell<usize>,
    saves: Cell<usize>,
    fail_saves: Cell<bool>,
}

impl CountingRepo {
    fn with_aggregate(aggregate: Aggregate) -> Self {
        let repo = Self::default();
        *repo.stored.borrow_mut() = Some(aggregate);
        repo
    }
}

impl AggregateRepository for CountingRepo {
    fn find_by_id(&self, id: &str) -> RepoResult<Option<Aggregate>> {
        self.lookups.set(self.lookups.get() + 1);
        Ok(self
            .stored
            .borrow()
            .clone()
            .filter(|aggregate| aggregate.id == id))
    }

    fn find_by_slug(&self, slug: &str) -> RepoResult<Option<Aggregate>> {
        self.lookups.set(self.lookups.get() + 1);
        Ok(self
            .stored
            .borrow()
            .clone()
            .filter(|aggregate| aggregate.slug == slug))
    }

    fn list(&self, _query: &AggregateListQuery) -> RepoResult<Vec<AggregateSummary>> {
        Ok(self.stored.borrow().iter().map(AggregateSummary::from).collect())
    }

    fn insert(&self, aggregate: &Aggregate) -> RepoResult<Aggregate> {
        *self.stored.borrow_mut() = Some(aggregate.clone());
        Ok(aggregate.clone())
    }

    fn save(&self, aggregate: &Aggregate) -> RepoResult<Aggregate> {
        self.saves.set(self.saves.get() + 1);
        if self.fail_saves.get() {
            return Err(RepoError::InvalidData("store unavailable".to_string()));
        }
        *self.stored.borrow_mut() = Some(aggregate.clone());
        Ok(aggregate.clone())
    }

    fn delete(&self, _id: &str) -> RepoResult<()> {
        *self.stored.borrow_mut() = None;
        Ok(())
    }
}
