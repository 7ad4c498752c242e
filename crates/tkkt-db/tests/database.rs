//! End-to-end tests of the async store facade.

use std::sync::Arc;
use tkkt_core::{Dataset, ManualClock, NodeId, Row, Timestamp, Value};
use tkkt_db::{
    reconcile, AdminInsert, AdminUpdate, Database, DbError, EventUpsert, StoreConfig,
    StudentAccess, StudentInsert, StudentUpdate, SyncPeer, TicketInsert, TicketUpdate,
};
use tkkt_merkle::MerkleDigest;

const T0: u64 = 1_704_067_200_000;

async fn replica(node: &str, wall: Arc<ManualClock>) -> Database {
    let config = StoreConfig::builder()
        .node_id(NodeId::new(node).unwrap())
        .build();
    Database::open_with_wall_clock(config, wall).await.unwrap()
}

fn student(sid: &str, name: &str) -> StudentInsert {
    StudentInsert {
        sid: sid.into(),
        event_id: "e1".into(),
        name: Some(name.into()),
    }
}

#[tokio::test]
async fn test_students_s1_scenario() {
    let db = replica("n1", Arc::new(ManualClock::new(T0))).await;
    let records = db
        .insert(Dataset::Students, Row::new("s1").with("name", "Ann").with("sid", "s1"), "admin")
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let history = db.history(Dataset::Students, "s1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.windows(2).all(|w| w[0].hlc < w[1].hlc));
    assert!(history.iter().all(|r| r.batch_id == history[0].batch_id));

    let recent = db.recent_batches(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert!(recent[0].is_creation);
    assert_eq!(recent[0].records, history);

    let entries = db.history_entries(Dataset::Students, "s1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Created Ann");
    assert_eq!(entries[0].actor, "admin");
}

#[tokio::test]
async fn test_write_skips_unchanged_columns() {
    let db = replica("n1", Arc::new(ManualClock::new(T0))).await;
    let gala = EventUpsert {
        id: "e1".into(),
        name: Some("Gala".into()),
        max_tickets: Some(100.0),
        tombstone: Some(false),
    };

    assert!(db.upsert_event(gala.clone(), "root").await.unwrap());
    assert_eq!(db.len().await.unwrap(), 3);
    assert!(!db.upsert_event(gala.clone(), "root").await.unwrap());
    assert_eq!(db.len().await.unwrap(), 3);

    let bigger = EventUpsert {
        max_tickets: Some(150.0),
        ..gala
    };
    assert!(db.upsert_event(bigger, "root").await.unwrap());
    assert_eq!(db.len().await.unwrap(), 4);

    let event = db.get_event("e1").await.unwrap().unwrap();
    assert_eq!(event.name.as_deref(), Some("Gala"));
    assert_eq!(event.max_tickets, Some(150.0));
    assert!(!event.tombstone);

    let messages: Vec<_> = db
        .history_entries(Dataset::Events, "e1")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["Created Gala", "Changed maxTickets to 150"]);
}

#[tokio::test]
async fn test_student_lifecycle() {
    let db = replica("n1", Arc::new(ManualClock::new(T0))).await;
    let id = db.insert_student(student("s1", "Ann"), "root").await.unwrap();
    assert_eq!(id, "e1_s1");

    let unchanged = StudentUpdate {
        sid: "s1".into(),
        event_id: "e1".into(),
        name: Some("Ann".into()),
        tombstone: None,
    };
    assert!(!db.update_student(unchanged, "root").await.unwrap());

    let delete = StudentUpdate {
        sid: "s1".into(),
        event_id: "e1".into(),
        name: None,
        tombstone: Some(true),
    };
    assert!(db.update_student(delete, "root").await.unwrap());

    let stored = db.get_student("e1", "s1").await.unwrap().unwrap();
    assert!(stored.tombstone);
    assert_eq!(stored.sid, "s1");
    assert_eq!(db.students_for_event("e1").await.unwrap().len(), 1);
    assert!(db.students_for_event("e2").await.unwrap().is_empty());

    let messages: Vec<_> = db
        .history_entries(Dataset::Students, &id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(messages, vec!["Created Ann", "Deleted Ann"]);
}

#[tokio::test]
async fn test_tickets_and_admins() {
    let db = replica("n1", Arc::new(ManualClock::new(T0))).await;

    let missing = TicketUpdate {
        id: "t1".into(),
        redeemed: Some(true),
        tombstone: None,
    };
    assert!(!db.update_ticket(missing.clone(), "door").await.unwrap());
    assert!(db.is_empty().await.unwrap());

    db.add_ticket(
        TicketInsert {
            id: "t1".into(),
            student_sid: "s1".into(),
            event_id: "e1".into(),
        },
        "root",
    )
    .await
    .unwrap();
    assert!(db.update_ticket(missing, "door").await.unwrap());

    let ticket = db.get_ticket("t1").await.unwrap().unwrap();
    assert!(ticket.redeemed);
    assert!(!ticket.tombstone);
    assert_eq!(db.tickets_for_student("e1", "s1").await.unwrap(), vec![ticket]);

    db.insert_admin(
        AdminInsert {
            id: "a1".into(),
            name: Some("Ada".into()),
            event_id: "e1".into(),
        },
        "root",
    )
    .await
    .unwrap();
    let rename = AdminUpdate {
        id: "a1".into(),
        name: Some("Ada L".into()),
        tombstone: None,
    };
    assert!(db.update_admin(rename.clone(), "root").await.unwrap());
    assert!(!db.update_admin(rename, "root").await.unwrap());

    let admin = db.get_admin("a1").await.unwrap().unwrap();
    assert_eq!(admin.name.as_deref(), Some("Ada L"));
    assert_eq!(admin.event_id.as_deref(), Some("e1"));

    let log_id = db
        .log_student_access(
            StudentAccess {
                event_id: "e1".into(),
                student_sid: "s1".into(),
                admin_id: "a1".into(),
            },
            "a1",
        )
        .await
        .unwrap();
    let entry = db.get(Dataset::AccessStudentLogs, &log_id).await.unwrap().unwrap();
    assert_eq!(entry.get("adminId"), Some(&Value::from("a1")));
    assert!(entry.get("timestamp").and_then(Value::as_str).unwrap().starts_with("2024-01-01T00:00:00"));
}

#[tokio::test]
async fn test_schema_errors_surface() {
    let db = Database::in_memory().await.unwrap();
    let err = db
        .insert(Dataset::Events, Row::new("e1").with("colour", "red"), "root")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnknownColumn { .. }));

    let err = db
        .insert(Dataset::Tickets, Row::new("t1").with("redeemed", Value::Null), "root")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::TypeMismatch { .. }));
    assert!(db.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_reopen_keeps_log_and_clock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica.db");
    let config = StoreConfig::builder()
        .path(&path)
        .node_id(NodeId::new("n1").unwrap())
        .build();

    let future = T0 + 3_600_000;
    let last = {
        let db = Database::open_with_wall_clock(config.clone(), Arc::new(ManualClock::new(future)))
            .await
            .unwrap();
        db.insert_student(student("s1", "Ann"), "root").await.unwrap();
        db.latest_timestamp().await.unwrap().unwrap()
    };

    // Reopen with a wall clock that has gone backwards.
    let db = Database::open_with_wall_clock(config, Arc::new(ManualClock::new(T0)))
        .await
        .unwrap();
    assert_eq!(db.len().await.unwrap(), 3);
    assert!(db.get_student("e1", "s1").await.unwrap().is_some());

    let next = db.tick().unwrap();
    assert!(next > last);
    assert_eq!(db.rebuild().await.unwrap(), 3);
}

#[tokio::test]
async fn test_reconcile_converges_partitioned_replicas() {
    let wall_a = Arc::new(ManualClock::new(T0));
    let wall_b = Arc::new(ManualClock::new(T0 + 250));
    let a = replica("a", wall_a.clone()).await;
    let b = replica("b", wall_b.clone()).await;

    a.insert_student(student("s1", "Ann"), "door-a").await.unwrap();
    b.insert_student(student("s2", "Bob"), "door-b").await.unwrap();
    wall_a.advance(120_000);
    wall_b.advance(180_000);
    a.upsert_event(
        EventUpsert {
            id: "e1".into(),
            name: Some("Gala".into()),
            ..Default::default()
        },
        "root",
    )
    .await
    .unwrap();
    b.upsert_event(
        EventUpsert {
            id: "e1".into(),
            name: Some("Spring Gala".into()),
            ..Default::default()
        },
        "root",
    )
    .await
    .unwrap();

    let report = reconcile(&a, &b, 4).await.unwrap();
    assert!(report.converged);
    assert_eq!(report.rounds, 1);
    assert!(report.sent > 0 && report.received > 0);

    assert_eq!(a.digest().await.unwrap(), b.digest().await.unwrap());
    for dataset in Dataset::ALL {
        assert_eq!(a.list(dataset).await.unwrap(), b.list(dataset).await.unwrap());
    }
    let event = a.get_event("e1").await.unwrap().unwrap();
    assert_eq!(event.name.as_deref(), Some("Spring Gala"));

    // The receiver's clock has moved past everything it was sent.
    assert!(a.tick().unwrap() > b.latest_timestamp().await.unwrap().unwrap());

    let again = a.sync_with(&b).await.unwrap();
    assert_eq!(again.rounds, 0);
    assert!(again.converged);
}

#[tokio::test]
async fn test_respond_rejects_malformed_digest() {
    let db = Database::in_memory().await.unwrap();
    let bogus: MerkleDigest = serde_json::from_str(r#"{"nodes":[]}"#).unwrap();
    let request = tkkt_db::SyncRequest {
        node_id: NodeId::new("peer").unwrap(),
        digest: bogus,
    };
    assert!(matches!(db.respond(&request).await, Err(DbError::Digest(_))));
}

#[tokio::test]
async fn test_concurrent_writers_share_one_queue() {
    let db = Database::in_memory().await.unwrap();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            db.insert_student(student(&format!("s{i}"), "Student"), "root").await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(db.len().await.unwrap(), 48);
    let stamps: Vec<Timestamp> = db.timestamps().await.unwrap();
    let mut sorted = stamps.clone();
    sorted.dedup();
    assert_eq!(sorted.len(), 48);
    assert_eq!(db.list(Dataset::Students).await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_student_row_with_event_id_is_one_creation_batch() {
    let db = replica("n1", Arc::new(ManualClock::new(T0))).await;
    let row = Row::new("s1").with("name", "Ann").with("eventId", "e1");
    let records = db.insert(Dataset::Students, row, "admin").await.unwrap();

    let cols: Vec<&str> = records.iter().map(|r| r.col.as_str()).collect();
    assert_eq!(cols, ["eventId", "name"]);
    assert_eq!(records[0].batch_id, records[1].batch_id);
    assert!(records[0].hlc < records[1].hlc);
    assert_eq!(records[0].value().unwrap(), Value::from("e1"));

    let history = db.history(Dataset::Students, "s1").await.unwrap();
    assert_eq!(history, records);

    let recent = db.recent_batches(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert!(recent[0].is_creation);
    assert_eq!(recent[0].records, records);

    let stored = db.get(Dataset::Students, "s1").await.unwrap().unwrap();
    assert_eq!(stored.get("eventId"), Some(&Value::from("e1")));
    assert_eq!(stored.get("name"), Some(&Value::from("Ann")));

    let entries = db.history_entries(Dataset::Students, "s1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Created Ann");
}

#[tokio::test]
async fn test_sync_messages_cross_the_wire_as_json() {
    let a = replica("a", Arc::new(ManualClock::new(T0))).await;
    let b = replica("b", Arc::new(ManualClock::new(T0 + 120_000))).await;
    a.insert_student(student("s1", "Ann"), "door").await.unwrap();

    let request = tkkt_db::SyncRequest::from_json(&b.sync_request().await.unwrap().to_json().unwrap())
        .unwrap();
    let response = a.respond(&request).await.unwrap();
    let response = tkkt_db::SyncResponse::from_json(&response.to_json().unwrap()).unwrap();
    assert_eq!(response.records.len(), 3);

    let outcome = b.receive(response).await.unwrap();
    assert_eq!(outcome.appended, 3);
    assert_eq!(a.digest().await.unwrap(), b.digest().await.unwrap());

    assert!(matches!(
        tkkt_db::SyncRequest::from_json("{\"node_id\":"),
        Err(DbError::Serialization(_))
    ));
}
