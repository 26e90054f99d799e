mod support;

use support::{make_event, setup_db};
use usage_core::TimeRange;

#[test]
fn upsert_is_idempotent_on_event_id() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let events = vec![
        make_event("e1", "s1", "2026-01-15T08:00:00Z", 50),
        make_event("e2", "s2", "2026-01-15T09:00:00Z", 70),
    ];

    let first = db.upsert_events(&events).expect("first upsert");
    assert_eq!(first.len(), 2);
    assert!(first.contains("s1") && first.contains("s2"));

    let second = db.upsert_events(&events).expect("second upsert");
    assert!(second.is_empty());
    assert_eq!(db.count_events().expect("count"), 2);
}

#[test]
fn first_write_wins_for_duplicate_ids() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    db.upsert_event(&make_event("e1", "s1", "2026-01-15T08:00:00Z", 50))
        .expect("first");
    let affected = db
        .upsert_event(&make_event("e1", "s1", "2026-01-15T08:00:00Z", 999))
        .expect("second");
    assert!(affected.is_empty());

    let stored = db.get_event("e1").expect("get").expect("present");
    assert_eq!(stored.tokens.input, Some(50));
}

#[test]
fn events_round_trip_optional_fields() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    let mut event = make_event("e1", "s1", "2026-01-15T08:00:00Z", 50);
    event.tokens.reasoning = None;
    event.tokens.output = None;
    event.agent = None;
    event.finish = Some("tool-calls".to_string());
    db.upsert_event(&event).expect("upsert");

    let stored = db.get_event("e1").expect("get").expect("present");
    assert_eq!(stored, event);
    assert!(db.get_event("missing").expect("get").is_none());
}

#[test]
fn range_listing_is_half_open_and_ordered() {
    let mut test_db = setup_db();
    let db = &mut test_db.db;
    db.upsert_events(&[
        make_event("b", "s1", "2026-01-15T09:00:00Z", 1),
        make_event("a", "s1", "2026-01-15T08:00:00Z", 1),
        make_event("c", "s1", "2026-01-15T10:00:00Z", 1),
    ])
    .expect("upsert");

    let range = TimeRange {
        start_ms: support::ts("2026-01-15T08:00:00Z"),
        end_ms: support::ts("2026-01-15T10:00:00Z"),
    };
    let ids: Vec<String> = db
        .list_events_in_range(range)
        .expect("list")
        .into_iter()
        .map(|event| event.id)
        .collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}
