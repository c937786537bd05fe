#![allow(clippy::float_cmp)]

use super::*;
use crate::consts::{DEFAULT_SIZE, WORKSPACE_SIZE};

fn make_object(id: &str, updated_at: f64) -> CanvasObject {
    CanvasObject {
        id: id.to_owned(),
        x: 100.0,
        y: 200.0,
        width: DEFAULT_SIZE,
        height: DEFAULT_SIZE,
        color: "#3182CE".to_owned(),
        created_by: Some("user-1".to_owned()),
        created_at: 1_000.0,
        updated_at,
        workspace_id: "ws-1".to_owned(),
    }
}

// =============================================================
// upsert: last-writer-wins
// =============================================================

#[test]
fn store_new_is_empty() {
    let store = ObjectStore::new();
    assert!(store.is_empty());
    assert_eq!(store.len(), 0);
}

#[test]
fn upsert_inserts_new_object() {
    let mut store = ObjectStore::new();
    assert!(store.upsert(make_object("a", 1_000.0)));
    assert_eq!(store.len(), 1);
    assert!(store.get("a").is_some());
}

#[test]
fn upsert_newer_replaces_older() {
    let mut store = ObjectStore::new();
    store.upsert(make_object("a", 1_000.0));

    let mut newer = make_object("a", 2_000.0);
    newer.x = 500.0;
    assert!(store.upsert(newer));
    assert_eq!(store.get("a").unwrap().x, 500.0);
}

#[test]
fn upsert_stale_is_discarded_silently() {
    let mut store = ObjectStore::new();
    let mut current = make_object("a", 2_000.0);
    current.x = 500.0;
    store.upsert(current);

    let stale = make_object("a", 1_000.0);
    assert!(!store.upsert(stale));
    assert_eq!(store.get("a").unwrap().x, 500.0);
    assert_eq!(store.get("a").unwrap().updated_at, 2_000.0);
}

#[test]
fn upsert_equal_timestamp_replaces() {
    let mut store = ObjectStore::new();
    store.upsert(make_object("a", 1_000.0));

    let mut same_ts = make_object("a", 1_000.0);
    same_ts.x = 700.0;
    assert!(store.upsert(same_ts));
    assert_eq!(store.get("a").unwrap().x, 700.0);
}

#[test]
fn upsert_is_idempotent() {
    let mut store = ObjectStore::new();
    let obj = make_object("a", 1_000.0);
    store.upsert(obj.clone());
    let once = store.list();

    store.upsert(obj);
    assert_eq!(store.list(), once);
}

#[test]
fn merge_is_monotonic_in_either_arrival_order() {
    let older = make_object("a", 1_000.0);
    let mut newer = make_object("a", 2_000.0);
    newer.x = 999.0;

    let mut forward = ObjectStore::new();
    forward.upsert(older.clone());
    forward.upsert(newer.clone());

    let mut reversed = ObjectStore::new();
    reversed.upsert(newer.clone());
    reversed.upsert(older);

    assert_eq!(forward.get("a").unwrap(), &newer);
    assert_eq!(reversed.get("a").unwrap(), &newer);
}

// =============================================================
// remove / get
// =============================================================

#[test]
fn remove_returns_object_and_empties_store() {
    let mut store = ObjectStore::new();
    store.upsert(make_object("a", 1_000.0));
    let removed = store.remove("a");
    assert!(removed.is_some());
    assert_eq!(removed.unwrap().id, "a");
    assert!(store.is_empty());
}

#[test]
fn remove_nonexistent_returns_none() {
    let mut store = ObjectStore::new();
    assert!(store.remove("missing").is_none());
}

#[test]
fn get_nonexistent_returns_none() {
    let store = ObjectStore::new();
    assert!(store.get("missing").is_none());
}

// =============================================================
// list ordering
// =============================================================

#[test]
fn list_orders_by_created_at() {
    let mut store = ObjectStore::new();
    let mut late = make_object("late", 1_000.0);
    late.created_at = 3_000.0;
    let mut early = make_object("early", 1_000.0);
    early.created_at = 1_000.0;

    store.upsert(late);
    store.upsert(early);

    let listed = store.list();
    assert_eq!(listed[0].id, "early");
    assert_eq!(listed[1].id, "late");
}

#[test]
fn list_tiebreaks_equal_created_at_by_id() {
    let mut store = ObjectStore::new();
    // Insert in reverse id order to verify the sort isn't insertion order.
    store.upsert(make_object("b", 1_000.0));
    store.upsert(make_object("a", 1_000.0));

    let listed = store.list();
    assert_eq!(listed[0].id, "a");
    assert_eq!(listed[1].id, "b");
}

#[test]
fn list_order_is_independent_of_arrival_order() {
    let mut forward = ObjectStore::new();
    let mut reversed = ObjectStore::new();

    let mut objs = Vec::new();
    for i in 0..5 {
        let mut obj = make_object(&format!("obj-{i}"), 1_000.0);
        obj.created_at = f64::from(i) * 10.0;
        objs.push(obj);
    }

    for obj in &objs {
        forward.upsert(obj.clone());
    }
    for obj in objs.iter().rev() {
        reversed.upsert(obj.clone());
    }

    assert_eq!(forward.list(), reversed.list());
}

// =============================================================
// clamping
// =============================================================

#[test]
fn clamp_position_keeps_in_bounds_proposal() {
    let (x, y) = clamp_position(100.0, 100.0, 500.0, 600.0);
    assert_eq!(x, 500.0);
    assert_eq!(y, 600.0);
}

#[test]
fn clamp_position_clips_negative_coordinates() {
    let (x, y) = clamp_position(100.0, 100.0, -50.0, -1.0);
    assert_eq!(x, 0.0);
    assert_eq!(y, 0.0);
}

#[test]
fn clamp_position_clips_overflow_by_object_extent() {
    let (x, y) = clamp_position(100.0, 100.0, 3_050.0, WORKSPACE_SIZE + 500.0);
    assert_eq!(x, WORKSPACE_SIZE - 100.0);
    assert_eq!(y, WORKSPACE_SIZE - 100.0);
}

#[test]
fn clamp_position_accounts_for_size() {
    let (x, _) = clamp_position(500.0, 100.0, 2_900.0, 0.0);
    assert_eq!(x, WORKSPACE_SIZE - 500.0);
}

#[test]
fn clamp_size_enforces_minimum() {
    let (w, h) = clamp_size(5.0, 0.0);
    assert_eq!(w, 20.0);
    assert_eq!(h, 20.0);
}

#[test]
fn clamp_size_caps_at_workspace() {
    let (w, h) = clamp_size(10_000.0, 50.0);
    assert_eq!(w, WORKSPACE_SIZE);
    assert_eq!(h, 50.0);
}

#[test]
fn clamped_object_satisfies_positional_invariant() {
    let mut obj = make_object("a", 1_000.0);
    obj.x = -50.0;
    obj.y = 3_050.0;
    obj.width = 5.0;
    obj.height = 5.0;

    let clamped = obj.clamped();
    assert!(clamped.width >= 20.0);
    assert!(clamped.height >= 20.0);
    assert!(clamped.x >= 0.0 && clamped.x <= WORKSPACE_SIZE - clamped.width);
    assert!(clamped.y >= 0.0 && clamped.y <= WORKSPACE_SIZE - clamped.height);
}

// =============================================================
// record conversions
// =============================================================

#[test]
fn record_round_trip_preserves_fields() {
    let obj = make_object("a", 1_234.0);
    let record: wire::ObjectRecord = obj.clone().into();
    let back = CanvasObject::from(record);
    assert_eq!(back, obj);
}
