use activity_merge::{
    find_page, Database, Filter, MergeError, MergeResult, MergeSession, MergeSettings, OrderSpec, PageRequest,
    RecordId, RecordSource, SharedSource, SortDirection, SourceDescriptor, TableRecord, TableSource,
};
use std::sync::Arc;
use tempfile::TempDir;

const T0: &str = "2024-01-01T00:00:00+00:00";
const T1: &str = "2024-01-02T00:00:00+00:00";
const T2: &str = "2024-01-03T00:00:00+00:00";
const T3: &str = "2024-01-04T00:00:00+00:00";

fn open(schema: &str) -> (TempDir, Arc<Database>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(&dir.path().join("feed.db")).expect("db");
    db.execute_batch(schema).expect("schema");
    (dir, Arc::new(db))
}

fn example_db() -> (TempDir, Arc<Database>) {
    open(&format!(
        "CREATE TABLE a_items (id INTEGER PRIMARY KEY, title TEXT, created_at TEXT, updated_at TEXT);
         CREATE TABLE b_items (id INTEGER PRIMARY KEY, title TEXT, created_at TEXT, updated_at TEXT);
         INSERT INTO a_items VALUES (1, 'a1', '{T0}', '{T3}');
         INSERT INTO a_items VALUES (2, 'a2', '{T1}', NULL);
         INSERT INTO b_items VALUES (1, 'b1', '{T0}', '{T2}');"
    ))
}

fn table(db: &Arc<Database>, tag: &str, table: &str) -> TableSource {
    TableSource::new(SourceDescriptor::new(tag, table), Arc::clone(db)).expect("source")
}

fn example_session(db: &Arc<Database>, dedup: bool) -> MergeSession<TableRecord> {
    MergeSession::builder()
        .source(table(db, "A", "a_items"))
        .source(table(db, "B", "b_items"))
        .order(OrderSpec::timestamp(SortDirection::Desc))
        .dedup(dedup)
        .build()
        .expect("session")
}

fn keys(records: &[TableRecord]) -> Vec<(String, RecordId)> {
    records
        .iter()
        .map(|record| (record.type_tag.clone(), record.id))
        .collect()
}

fn key(tag: &str, id: RecordId) -> (String, RecordId) {
    (tag.to_string(), id)
}

#[test]
fn first_page_takes_the_newest_rows_across_types() {
    let (_dir, db) = example_db();
    let session = example_session(&db, false);

    let page = session.find_page(&*db, PageRequest::new(0, 2)).expect("page");
    assert_eq!(page.total_rows, 3);
    assert_eq!(keys(&page.records), vec![key("A", 1), key("B", 1)]);
    assert_eq!(page.records[1].get("title"), Some(&serde_json::json!("b1")));
    assert_eq!(page.meta.total_pages, 2);
    assert!(page.meta.has_next());

    let page = session.find_page(&*db, PageRequest::new(1, 2)).expect("page");
    assert_eq!(keys(&page.records), vec![key("A", 2)]);
}

#[test]
fn records_follow_the_lean_query_order() {
    let (_dir, db) = example_db();
    let session = example_session(&db, false);

    let lean = session
        .lean_tuples(&*db, &session.build_query(None).expect("query"))
        .expect("lean");
    let lean_keys: Vec<(String, RecordId)> = lean.iter().map(|tuple| (tuple.type_tag.clone(), tuple.id)).collect();
    for pair in lean.windows(2) {
        assert_ne!(
            pair[0].compare(&pair[1], SortDirection::Desc),
            std::cmp::Ordering::Greater
        );
    }

    let all = session.find_all(&*db).expect("all");
    assert_eq!(keys(&all), lean_keys);
}

#[test]
fn contiguous_pages_reproduce_the_full_sequence() {
    let mut schema = String::from(
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, created_at TEXT, updated_at TEXT);
         CREATE TABLE comments (id INTEGER PRIMARY KEY, created_at TEXT, updated_at TEXT);",
    );
    for id in 1..=7 {
        schema.push_str(&format!(
            "INSERT INTO posts VALUES ({id}, '2024-03-{:02}T00:00:00+00:00', NULL);",
            id * 2
        ));
    }
    for id in 1..=5 {
        // Even days collide with posts; the tie breaks on tag then id.
        schema.push_str(&format!(
            "INSERT INTO comments VALUES ({id}, '2024-02-01T00:00:00+00:00', '2024-03-{:02}T00:00:00+00:00');",
            id * 3
        ));
    }
    let (_dir, db) = open(&schema);

    for direction in [SortDirection::Asc, SortDirection::Desc] {
        let session = MergeSession::builder()
            .source(table(&db, "Post", "posts"))
            .source(table(&db, "Comment", "comments"))
            .order(OrderSpec::timestamp(direction))
            .build()
            .expect("session");

        let all = keys(&session.find_all(&*db).expect("all"));
        assert_eq!(all.len(), 12);

        let mut paged = Vec::new();
        for page_index in 0..5 {
            let page = session.find_page(&*db, PageRequest::new(page_index, 3)).expect("page");
            assert_eq!(page.total_rows, 12);
            assert!(page.records.len() <= 3);
            paged.extend(keys(&page.records));
        }
        assert_eq!(paged, all);
    }
}

#[test]
fn dedup_toggle_collapses_identical_rows() {
    let (_dir, db) = open(&format!(
        "CREATE TABLE audit_log (id INTEGER, note TEXT, created_at TEXT, updated_at TEXT);
         INSERT INTO audit_log VALUES (5, 'x', '{T1}', NULL);
         INSERT INTO audit_log VALUES (5, 'x', '{T1}', NULL);
         CREATE TABLE posts (id INTEGER PRIMARY KEY, created_at TEXT, updated_at TEXT);
         INSERT INTO posts VALUES (5, '{T1}', NULL);"
    ));

    for (dedup, expected) in [(false, 3u64), (true, 2u64)] {
        let session = MergeSession::builder()
            .source(table(&db, "Audit", "audit_log"))
            .source(table(&db, "Post", "posts"))
            .dedup(dedup)
            .build()
            .expect("session");

        let page = session.find_page(&*db, PageRequest::new(0, 10)).expect("page");
        assert_eq!(page.total_rows, expected);
        assert_eq!(page.records.len() as u64, expected);

        let all = session.find_all(&*db).expect("all");
        assert_eq!(all.len() as u64, page.total_rows);
    }
}

#[test]
fn filters_narrow_both_the_page_and_the_count() {
    let (_dir, db) = example_db();
    let session = MergeSession::builder()
        .source(TableSource::new(
            SourceDescriptor::new("A", "a_items").with_filter(Filter::ne("title", "a2".to_string())),
            Arc::clone(&db),
        )
        .expect("source"))
        .source(table(&db, "B", "b_items"))
        .build()
        .expect("session");

    let page = session.find_page(&*db, PageRequest::new(0, 10)).expect("page");
    assert_eq!(page.total_rows, 2);
    assert_eq!(keys(&page.records), vec![key("A", 1), key("B", 1)]);
}

#[test]
fn explicit_order_fields_map_onto_each_table() {
    let (_dir, db) = open(
        "CREATE TABLE tasks (id INTEGER PRIMARY KEY, priority INTEGER, title TEXT);
         CREATE TABLE events (event_id INTEGER PRIMARY KEY, weight INTEGER, label TEXT);
         INSERT INTO tasks VALUES (1, 2, 'write'), (2, 1, 'plan');
         INSERT INTO events VALUES (10, 3, 'ship'), (11, 1, 'kickoff');",
    );
    let session = MergeSession::builder()
        .source(TableSource::new(
            SourceDescriptor::new("Task", "tasks").with_order_fields(["priority"]),
            Arc::clone(&db),
        )
        .expect("tasks"))
        .source(TableSource::new(
            SourceDescriptor::new("Event", "events")
                .with_id_field("event_id")
                .with_order_fields(["weight"]),
            Arc::clone(&db),
        )
        .expect("events"))
        .order(OrderSpec::parse("rank", SortDirection::Asc).expect("order"))
        .build()
        .expect("session");

    let all = session.find_all(&*db).expect("all");
    assert_eq!(
        keys(&all),
        vec![key("Event", 11), key("Task", 2), key("Task", 1), key("Event", 10)]
    );
    assert_eq!(all[0].get("label"), Some(&serde_json::json!("kickoff")));
}

/// Stands in for a row deleted between the lean query and rehydration.
struct VanishingSource {
    descriptor: SourceDescriptor,
}

impl RecordSource<TableRecord> for VanishingSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn fetch_by_ids(&self, _ids: &[RecordId]) -> MergeResult<Vec<TableRecord>> {
        Ok(Vec::new())
    }
}

#[test]
fn missing_record_surfaces_as_record_not_found() {
    let (_dir, db) = open(&format!(
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, created_at TEXT, updated_at TEXT);
         INSERT INTO posts VALUES (42, '{T0}', NULL);"
    ));
    let session = MergeSession::builder()
        .source(VanishingSource {
            descriptor: SourceDescriptor::new("Post", "posts"),
        })
        .build()
        .expect("session");

    match session.find_page(&*db, PageRequest::new(0, 10)) {
        Err(MergeError::RecordNotFound { type_tag, id }) => {
            assert_eq!(type_tag, "Post");
            assert_eq!(id, 42);
        }
        other => panic!("expected RecordNotFound, got {:?}", other.map(|page| page.records)),
    }
}

#[test]
fn out_of_range_page_is_empty_with_correct_total() {
    let (_dir, db) = example_db();
    let session = example_session(&db, false);

    let page = session.find_page(&*db, PageRequest::new(9, 2)).expect("page");
    assert!(page.records.is_empty());
    assert_eq!(page.total_rows, 3);
    assert_eq!(page.meta.current_page, 1);
}

#[test]
fn empty_source_list_is_a_configuration_error() {
    let (_dir, db) = example_db();
    let sources: Vec<SharedSource<TableRecord>> = Vec::new();
    let error = find_page(
        &*db,
        &sources,
        OrderSpec::default(),
        false,
        PageRequest::new(0, 10),
    )
    .expect_err("no sources");
    assert!(matches!(error, MergeError::Configuration(_)));
}

#[test]
fn one_shot_find_page_matches_the_session() {
    let (_dir, db) = example_db();
    let sources: Vec<SharedSource<TableRecord>> = vec![
        Arc::new(table(&db, "A", "a_items")),
        Arc::new(table(&db, "B", "b_items")),
    ];
    let page = find_page(
        &*db,
        &sources,
        OrderSpec::timestamp(SortDirection::Asc),
        false,
        PageRequest::new(0, 3),
    )
    .expect("page");
    assert_eq!(keys(&page.records), vec![key("A", 2), key("B", 1), key("A", 1)]);
}

#[test]
fn invalid_page_arguments_are_rejected() {
    let (_dir, db) = example_db();
    let session = example_session(&db, false);
    assert!(matches!(
        session.find_page(&*db, PageRequest::new(0, 0)),
        Err(MergeError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.find_page(&*db, PageRequest::new(-1, 5)),
        Err(MergeError::InvalidArgument(_))
    ));
}

#[test]
fn settings_drive_timestamp_columns_and_direction() {
    let (_dir, db) = open(&format!(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, inserted_at TEXT, modified_at TEXT);
         INSERT INTO notes VALUES (1, '{T0}', NULL), (2, '{T1}', NULL), (3, '{T0}', '{T2}');"
    ));
    let settings = MergeSettings::from_json(
        r#"{ "createdColumn": "inserted_at", "updatedColumn": "modified_at", "defaultDirection": "asc", "defaultPageSize": 2 }"#,
    )
    .expect("settings");

    let session = MergeSession::builder()
        .source(TableSource::new(settings.descriptor("Note", "notes"), Arc::clone(&db)).expect("notes"))
        .settings(settings)
        .build()
        .expect("session");

    let page = session.find_page(&*db, session.default_page(0)).expect("page");
    assert_eq!(keys(&page.records), vec![key("Note", 1), key("Note", 2)]);
    assert_eq!(page.total_rows, 3);
}

#[test]
fn one_shot_find_page_accepts_large_page_sizes() {
    let (_dir, db) = example_db();
    let sources: Vec<SharedSource<TableRecord>> = vec![
        Arc::new(table(&db, "A", "a_items")),
        Arc::new(table(&db, "B", "b_items")),
    ];
    let page = find_page(
        &*db,
        &sources,
        OrderSpec::timestamp(SortDirection::Desc),
        false,
        PageRequest::new(0, 1000),
    )
    .expect("page");
    assert_eq!(page.total_rows, 3);
    assert_eq!(keys(&page.records), vec![key("A", 1), key("B", 1), key("A", 2)]);
    assert_eq!(page.meta.total_pages, 1);
}

#[test]
fn sessions_are_shared_across_threads() {
    let (_dir, db) = example_db();
    let session = Arc::new(example_session(&db, false));

    let handles: Vec<_> = (0..2)
        .map(|page_index| {
            let session = Arc::clone(&session);
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                let page = session.find_page(&*db, PageRequest::new(page_index, 2)).expect("page");
                keys(&page.records)
            })
        })
        .collect();

    let pages: Vec<Vec<(String, RecordId)>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();
    assert_eq!(pages[0], vec![key("A", 1), key("B", 1)]);
    assert_eq!(pages[1], vec![key("A", 2)]);
}
