//! Convergence of the change log and its materialized views.
//!
//! Replicas that receive the same set of change records, in any order, any
//! number of times and split into any batches, must end with identical
//! views equal to the LWW reduction of the records.

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::Connection;
use std::sync::Arc;
use tkkt_core::{ChangeRecord, Clock, Dataset, ManualClock, NodeId, Reduction, Row, Value};
use tkkt_db::{build_change_set, log, projection, schema};

const T0: u64 = 1_704_067_200_000;

fn fresh() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    schema::migrate(&conn).unwrap();
    conn
}

fn views(conn: &Connection) -> Vec<Vec<Row>> {
    Dataset::ALL
        .iter()
        .map(|d| projection::read_rows(conn, *d).unwrap())
        .collect()
}

/// Views as the reduction of `records` says they should be, padded with the
/// defaults the tables give columns that were never written.
fn expected_views(records: &[ChangeRecord]) -> Vec<Vec<Row>> {
    let reduction = Reduction::from_records(records);
    Dataset::ALL
        .iter()
        .map(|dataset| {
            reduction
                .rows(*dataset)
                .unwrap()
                .into_values()
                .map(|reduced| {
                    let mut row = Row::new(reduced.id());
                    for spec in dataset.columns() {
                        let default = if spec.nullable { Value::Null } else { Value::Boolean(false) };
                        row.set(spec.name, reduced.get(spec.name).cloned().unwrap_or(default));
                    }
                    row
                })
                .collect()
        })
        .collect()
}

#[derive(Clone, Debug)]
struct Edit {
    node: usize,
    advance_ms: u64,
    event: u8,
    name: Option<String>,
    max_tickets: Option<i64>,
    tombstone: Option<bool>,
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    (
        0usize..3,
        0u64..90_000,
        0u8..4,
        prop::option::of("[a-z]{1,6}"),
        prop::option::of(0i64..500),
        prop::option::of(any::<bool>()),
    )
        .prop_map(|(node, advance_ms, event, name, max_tickets, tombstone)| Edit {
            node,
            advance_ms,
            event,
            name,
            max_tickets,
            tombstone,
        })
}

/// Replay edits on three independent replicas' clocks and collect every
/// record they would produce.
fn generate(edits: &[Edit]) -> Vec<ChangeRecord> {
    let walls: Vec<Arc<ManualClock>> = (0..3).map(|_| Arc::new(ManualClock::new(T0))).collect();
    let mut clocks: Vec<Clock> = walls
        .iter()
        .enumerate()
        .map(|(i, wall)| Clock::with_source(NodeId::new(format!("node-{i}")).unwrap(), wall.clone()))
        .collect();

    let mut records = Vec::new();
    for edit in edits {
        walls[edit.node].advance(edit.advance_ms);
        let mut row = Row::new(format!("e{}", edit.event));
        if let Some(name) = &edit.name {
            row.set("name", name.as_str());
        }
        if let Some(max) = edit.max_tickets {
            row.set("maxTickets", max);
        }
        if let Some(tombstone) = edit.tombstone {
            row.set("tombstone", tombstone);
        }
        let batch = build_change_set(Dataset::Events, &row, &mut clocks[edit.node], "tester").unwrap();
        records.extend(batch);
    }
    records
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_order_and_duplicates_do_not_matter(
        edits in prop::collection::vec(edit_strategy(), 1..25),
        seed in any::<u64>(),
        chunk in 1usize..6,
    ) {
        let records = generate(&edits);

        let in_order = fresh();
        log::apply(&in_order, &records).unwrap();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut scrambled: Vec<ChangeRecord> = records.iter().chain(records.iter().take(records.len() / 2)).cloned().collect();
        scrambled.shuffle(&mut rng);

        let shuffled = fresh();
        for part in scrambled.chunks(chunk) {
            log::apply(&shuffled, part).unwrap();
        }

        prop_assert_eq!(log::len(&in_order).unwrap(), records.len());
        prop_assert_eq!(log::len(&shuffled).unwrap(), records.len());
        prop_assert_eq!(views(&in_order), views(&shuffled));
        prop_assert_eq!(views(&in_order), expected_views(&records));
    }

    #[test]
    fn prop_apply_is_idempotent(edits in prop::collection::vec(edit_strategy(), 1..15)) {
        let records = generate(&edits);
        let conn = fresh();
        log::apply(&conn, &records).unwrap();
        let once = views(&conn);

        let again = log::apply(&conn, &records).unwrap();
        prop_assert_eq!(again.appended, 0);
        prop_assert_eq!(again.projected, 0);
        prop_assert_eq!(views(&conn), once);
    }

    #[test]
    fn prop_rebuild_equals_incremental(edits in prop::collection::vec(edit_strategy(), 1..20)) {
        let records = generate(&edits);
        let conn = fresh();
        for record in records.iter().rev() {
            log::apply(&conn, std::slice::from_ref(record)).unwrap();
        }
        let incremental = views(&conn);
        log::rebuild(&conn).unwrap();
        prop_assert_eq!(views(&conn), incremental);
    }
}

#[test]
fn test_last_writer_wins_across_nodes() {
    let early_wall = Arc::new(ManualClock::new(T0));
    let late_wall = Arc::new(ManualClock::new(T0 + 5_000));
    let mut early = Clock::with_source(NodeId::new("a").unwrap(), early_wall);
    let mut late = Clock::with_source(NodeId::new("b").unwrap(), late_wall);

    let first = build_change_set(Dataset::Events, &Row::new("e1").with("name", "First"), &mut early, "a").unwrap();
    let second = build_change_set(Dataset::Events, &Row::new("e1").with("name", "Second"), &mut late, "b").unwrap();

    for order in [[&first, &second], [&second, &first]] {
        let conn = fresh();
        for records in order {
            log::apply(&conn, records).unwrap();
        }
        let row = projection::read_row(&conn, Dataset::Events, "e1").unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Second")));
    }
}

#[test]
fn test_same_millisecond_tie_breaks_on_node() {
    let wall = Arc::new(ManualClock::new(T0));
    let mut a = Clock::with_source(NodeId::new("a").unwrap(), wall.clone());
    let mut b = Clock::with_source(NodeId::new("b").unwrap(), wall);

    let from_a = build_change_set(Dataset::Admins, &Row::new("x").with("name", "from a"), &mut a, "a").unwrap();
    let from_b = build_change_set(Dataset::Admins, &Row::new("x").with("name", "from b"), &mut b, "b").unwrap();
    assert_eq!(from_a[0].hlc.wall_clock_ms(), from_b[0].hlc.wall_clock_ms());

    let conn = fresh();
    log::apply(&conn, &from_b).unwrap();
    log::apply(&conn, &from_a).unwrap();
    let row = projection::read_row(&conn, Dataset::Admins, "x").unwrap().unwrap();
    assert_eq!(row.get("name"), Some(&Value::from("from b")));
}

#[test]
fn test_failed_apply_leaves_no_trace() {
    let wall = Arc::new(ManualClock::new(T0));
    let mut clock = Clock::with_source(NodeId::new("a").unwrap(), wall);
    let good = build_change_set(Dataset::Events, &Row::new("e1").with("name", "Gala"), &mut clock, "a").unwrap();
    let doomed = build_change_set(Dataset::Admins, &Row::new("x").with("name", "Root"), &mut clock, "a").unwrap();

    let conn = fresh();
    log::apply(&conn, &good).unwrap();
    conn.execute_batch("DROP TABLE admins").unwrap();

    let mut mixed = good.clone();
    mixed.extend(doomed.iter().cloned());
    assert!(log::apply(&conn, &mixed).is_err());

    assert_eq!(log::len(&conn).unwrap(), good.len());
    assert_eq!(log::timestamps(&conn).unwrap(), vec![good[0].hlc.clone()]);

    conn.execute_batch(&schema::table_ddl(Dataset::Admins)).unwrap();
    let retried = log::apply(&conn, &mixed).unwrap();
    assert_eq!(retried.appended, doomed.len());
}
