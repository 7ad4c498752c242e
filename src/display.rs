//! Terminal output for the scenario runners.

use chrono::{DateTime, Utc};
use colored::*;
use tkkt_core::{Dataset, Row, Value};
use tkkt_db::{Database, HistoryEntry, Result};
use tkkt_merkle::MerkleDigest;

pub fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

pub fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

pub fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

pub fn sync_arrow(from: &str, to: &str, moved: usize) {
    println!(
        "  {} {} {} {}",
        from.bright_magenta(),
        "──sync──▶".bright_cyan(),
        to.bright_magenta(),
        format!("({} new)", moved).dimmed()
    );
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(value) => value.to_string(),
    }
}

fn row_line(dataset: Dataset, row: &Row) -> String {
    let columns: Vec<String> = dataset
        .columns()
        .iter()
        .filter(|c| c.name != "tombstone")
        .map(|c| format!("{}={}", c.name, cell(row.get(c.name))))
        .collect();
    let deleted = matches!(row.get("tombstone"), Some(Value::Boolean(true)));
    let line = format!("{:<8} {}", row.id(), columns.join(" "));
    if deleted {
        line.strikethrough().dimmed().to_string()
    } else {
        line
    }
}

/// Box listing every materialized row a replica holds.
pub async fn show_replica(name: &str, db: &Database) -> Result<()> {
    let border = "─".repeat(56);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^54} │",
        format!("Replica: {} ({} records)", name, db.len().await?)
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);

    let mut empty = true;
    for dataset in Dataset::ALL {
        for row in db.list(dataset).await? {
            empty = false;
            println!("  │ {:<11} {:<42} │", dataset.as_str(), row_line(dataset, &row));
        }
    }
    if empty {
        println!("  │ {:^54} │", "(empty)".dimmed().to_string());
    }
    println!("  └{}┘", border);
    Ok(())
}

/// Root hash of each replica's digest; equal roots mean equal logs.
pub async fn show_digests(replicas: &[(&str, &Database)]) -> Result<()> {
    let digests: Vec<MerkleDigest> = {
        let mut digests = Vec::with_capacity(replicas.len());
        for (_, db) in replicas {
            digests.push(db.digest().await?);
        }
        digests
    };
    for ((name, _), digest) in replicas.iter().zip(&digests) {
        let first_gap = digests[0]
            .diff(digest)?
            .map(|minute| minute.format("%H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<8} root {} ({} nodes, first gap {})",
            name.bright_magenta(),
            digest.root_hash().short().bright_white(),
            digest.node_count(),
            first_gap.dimmed()
        );
    }
    Ok(())
}

fn clock_time(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub fn show_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("    {}", "(no changes)".dimmed());
    }
    for entry in entries {
        println!(
            "    {} {} {}",
            clock_time(&entry.date).dimmed(),
            format!("[{}]", entry.actor).bright_blue(),
            entry.message
        );
    }
}

pub fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL REPLICAS CONVERGED: views and digests are identical"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: replicas differ".bright_red().bold()
        );
    }
}

/// True when every replica holds the same log and the same views.
pub async fn converged(replicas: &[&Database]) -> Result<bool> {
    let Some((first, rest)) = replicas.split_first() else {
        return Ok(true);
    };
    let digest = first.digest().await?;
    for other in rest {
        if other.digest().await? != digest {
            return Ok(false);
        }
        for dataset in Dataset::ALL {
            if other.list(dataset).await? != first.list(dataset).await? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
