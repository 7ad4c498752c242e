//! Walkthroughs of replicas editing offline and reconciling.

use crate::display::{
    convergence_result, converged, header, section, show_digests, show_history, show_replica, step,
    sync_arrow,
};
use colored::*;
use std::sync::Arc;
use tkkt_core::{Dataset, ManualClock, NodeId, WallClock};
use tkkt_db::{
    reconcile, AdminInsert, Database, EventUpsert, Result, StoreConfig, StudentInsert,
    StudentUpdate, SyncPeer, TicketInsert, TicketUpdate,
};

async fn replica(name: &str, wall: Arc<dyn WallClock>) -> Result<Database> {
    let config = StoreConfig::builder().node_id(NodeId::new(name)?).build();
    Database::open_with_wall_clock(config, wall).await
}

async fn sync_pair(a_name: &str, a: &Database, b_name: &str, b: &Database) -> Result<()> {
    let report = reconcile(a, b, a.max_sync_rounds()).await?;
    sync_arrow(a_name, b_name, report.sent);
    sync_arrow(b_name, a_name, report.received);
    Ok(())
}

fn event(id: &str, name: &str, max_tickets: Option<f64>) -> EventUpsert {
    EventUpsert {
        id: id.into(),
        name: Some(name.into()),
        max_tickets,
        tombstone: None,
    }
}

fn student(event_id: &str, sid: &str, name: &str) -> StudentInsert {
    StudentInsert {
        sid: sid.into(),
        event_id: event_id.into(),
        name: Some(name.into()),
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

pub async fn run_demo() -> Result<()> {
    header("DEMO: Two doors, one event, offline edits and sync");

    let wall: Arc<dyn WallClock> = Arc::new(tkkt_core::SystemClock);
    let north = replica("north-door", wall.clone()).await?;
    let south = replica("south-door", wall).await?;

    section("Phase 1: Each door works offline");
    north.upsert_event(event("e1", "Spring Gala", Some(200.0)), "organizer").await?;
    step("north: created event e1 \"Spring Gala\" (200 tickets)");
    north.insert_student(student("e1", "s1", "Ann"), "organizer").await?;
    step("north: registered student s1 Ann");
    north
        .add_ticket(
            TicketInsert {
                id: "t1".into(),
                student_sid: "s1".into(),
                event_id: "e1".into(),
            },
            "organizer",
        )
        .await?;
    step("north: sold ticket t1 to s1");

    south.insert_student(student("e1", "s2", "Bob"), "door-staff").await?;
    step("south: registered student s2 Bob");
    south
        .insert_admin(
            AdminInsert {
                id: "a1".into(),
                name: Some("Grace".into()),
                event_id: "e1".into(),
            },
            "organizer",
        )
        .await?;
    step("south: added admin a1 Grace");

    show_replica("north-door", &north).await?;
    show_replica("south-door", &south).await?;

    section("Phase 2: Doors reconnect and reconcile");
    sync_pair("north-door", &north, "south-door", &south).await?;

    section("Phase 3: Post-sync state");
    show_replica("north-door", &north).await?;
    show_replica("south-door", &south).await?;
    convergence_result(converged(&[&north, &south]).await?);

    section("Phase 4: Ticket redeemed at the south door");
    south
        .update_ticket(
            TicketUpdate {
                id: "t1".into(),
                redeemed: Some(true),
                tombstone: None,
            },
            "a1",
        )
        .await?;
    sync_pair("south-door", &south, "north-door", &north).await?;
    let ticket = north.get_ticket("t1").await?;
    step(&format!(
        "north sees t1 redeemed = {}",
        ticket.map(|t| t.redeemed).unwrap_or(false).to_string().bold()
    ));

    section("History of student s1 as seen from the south door");
    show_history(&south.history_entries(Dataset::Students, "e1_s1").await?);
    Ok(())
}

// ─── Conflict ──────────────────────────────────────────────────────────────

pub async fn run_conflict() -> Result<()> {
    header("CONFLICT: Concurrent renames, merge order does not matter");

    let base = 1_704_067_200_000;
    let walls = [
        Arc::new(ManualClock::new(base)),
        Arc::new(ManualClock::new(base + 40)),
        Arc::new(ManualClock::new(base + 15)),
    ];
    let names = ["alpha", "beta", "gamma"];
    let mut replicas = Vec::new();
    for (name, wall) in names.iter().zip(walls.iter()) {
        replicas.push(replica(name, wall.clone()).await?);
    }

    section("Phase 1: Shared starting point");
    replicas[0].upsert_event(event("e1", "Gala", Some(100.0)), "alpha").await?;
    for other in &replicas[1..] {
        reconcile(&replicas[0], other, 4).await?;
    }
    step("alpha created e1 \"Gala\" and everyone synced");

    section("Phase 2: Everyone renames e1 while offline");
    for ((replica, name), wall) in replicas.iter().zip(names).zip(walls.iter()) {
        wall.advance(1_000);
        let title = format!("Gala by {}", name);
        replica.upsert_event(event("e1", &title, None), name).await?;
        step(&format!("{:<6} renames e1 to \"{}\" at {}", name, title, replica.clock()));
    }

    section("Phase 3: Merge in two different orders");
    let forward: Vec<Database> = {
        let mut copies = Vec::new();
        for (name, wall) in names.iter().zip(walls.iter()) {
            copies.push(replica(&format!("{}-fwd", name), wall.clone()).await?);
        }
        copies
    };
    for (copy, original) in forward.iter().zip(&replicas) {
        reconcile(copy, original, 4).await?;
    }
    reconcile(&forward[0], &forward[1], 4).await?;
    reconcile(&forward[1], &forward[2], 4).await?;
    reconcile(&forward[0], &forward[1], 4).await?;
    step("forward: alpha⇄beta, beta⇄gamma, alpha⇄beta");

    reconcile(&replicas[2], &replicas[0], 4).await?;
    reconcile(&replicas[1], &replicas[2], 4).await?;
    reconcile(&replicas[0], &replicas[1], 4).await?;
    step("reverse: gamma⇄alpha, beta⇄gamma, alpha⇄beta");

    let winner = replicas[0].get_event("e1").await?;
    let winner_fwd = forward[0].get_event("e1").await?;
    let title = winner.and_then(|e| e.name).unwrap_or_default();
    let title_fwd = winner_fwd.and_then(|e| e.name).unwrap_or_default();
    step(&format!("reverse order result: {}", title.bright_green()));
    step(&format!("forward order result: {}", title_fwd.bright_green()));
    step("the rename with the greatest timestamp wins on every replica");

    let all: Vec<&Database> = replicas.iter().chain(forward.iter()).collect();
    convergence_result(converged(&all).await? && title == title_fwd);

    section("History of e1");
    show_history(&replicas[0].history_entries(Dataset::Events, "e1").await?);
    Ok(())
}

// ─── Partition ─────────────────────────────────────────────────────────────

pub async fn run_partition() -> Result<()> {
    header("PARTITION: Split venue, independent work, heal");

    let wall: Arc<dyn WallClock> = Arc::new(tkkt_core::SystemClock);
    let names = ["east-1", "east-2", "west-1", "west-2"];
    let mut replicas = Vec::new();
    for name in names {
        replicas.push(replica(name, wall.clone()).await?);
    }

    section("Phase 1: Shared setup before the split");
    replicas[0].upsert_event(event("e1", "Finals Night", Some(500.0)), "organizer").await?;
    for sid in ["s1", "s2", "s3", "s4"] {
        replicas[0]
            .insert_student(student("e1", sid, &format!("Student {}", sid)), "organizer")
            .await?;
    }
    for other in &replicas[1..] {
        reconcile(&replicas[0], other, 4).await?;
    }
    step("e1 and four students replicated to all doors");

    section("Phase 2: Network partition");
    println!("  {}", "         ╳╳╳ PARTITION ╳╳╳".bright_red().bold());

    replicas[0]
        .update_student(
            StudentUpdate {
                sid: "s1".into(),
                event_id: "e1".into(),
                name: Some("Ann Lee".into()),
                tombstone: None,
            },
            "east-1",
        )
        .await?;
    replicas[1]
        .update_student(
            StudentUpdate {
                sid: "s2".into(),
                event_id: "e1".into(),
                name: None,
                tombstone: Some(true),
            },
            "east-2",
        )
        .await?;
    reconcile(&replicas[0], &replicas[1], 4).await?;
    step("East: renamed s1, removed s2, synced internally");

    replicas[2].upsert_event(event("e1", "Finals Night", Some(650.0)), "west-1").await?;
    replicas[3].insert_student(student("e1", "s5", "Late Arrival"), "west-2").await?;
    reconcile(&replicas[2], &replicas[3], 4).await?;
    step("West: raised capacity to 650, registered s5, synced internally");

    section("Pre-heal state");
    show_replica("east-1", &replicas[0]).await?;
    show_replica("west-1", &replicas[2]).await?;
    let named: Vec<(&str, &Database)> = names.iter().copied().zip(replicas.iter()).collect();
    show_digests(&named).await?;

    section("Phase 3: Partition heals");
    println!("  {}", "         ════ HEALED ════".bright_green().bold());
    for i in 0..replicas.len() {
        for j in (i + 1)..replicas.len() {
            let report = replicas[i].sync_with(&replicas[j]).await?;
            if report.sent + report.received > 0 {
                sync_arrow(names[i], names[j], report.sent);
                sync_arrow(names[j], names[i], report.received);
            }
        }
    }

    section("Post-heal state");
    show_replica("west-2", &replicas[3]).await?;
    show_digests(&named).await?;
    let refs: Vec<&Database> = replicas.iter().collect();
    convergence_result(converged(&refs).await?);

    step(&format!(
        "west-2 peer id: {}",
        replicas[3].peer_id().to_string().bright_magenta()
    ));
    Ok(())
}

// ─── History ───────────────────────────────────────────────────────────────

pub async fn run_history(config: StoreConfig, dataset: Dataset, id: &str) -> Result<()> {
    let db = Database::open(config).await?;
    header(&format!("HISTORY: {} {}", dataset.as_str(), id));

    match db.get(dataset, id).await? {
        Some(row) => {
            for (column, value) in row.columns() {
                step(&format!("{} = {}", column.bold(), value));
            }
        }
        None => step(&"no such row".dimmed().to_string()),
    }

    section("Changes");
    show_history(&db.history_entries(dataset, id).await?);

    section("Recent batches");
    for batch in db.recent_batches(5).await? {
        let kind = if batch.is_creation { "created" } else { "edited" };
        let first = batch.records.first();
        step(&format!(
            "{} {} {} ({} columns)",
            kind.bright_cyan(),
            first.map(|r| r.dataset.as_str()).unwrap_or("-"),
            first.map(|r| r.row_id.as_str()).unwrap_or("-"),
            batch.records.len()
        ));
    }
    Ok(())
}
