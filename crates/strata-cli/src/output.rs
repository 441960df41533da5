use serde_json::{Value, json};
use strata_migrate::{RollbackReport, RunReport, Status, TableName};

pub fn print_run(report: &RunReport) {
    if report.is_empty() {
        println!("Nothing to migrate.");
        return;
    }
    for entry in &report.applied {
        println!("  applied  {:<48} batch {}", entry.name, entry.batch);
    }
}

pub fn print_rollback(report: &RollbackReport) {
    match report.batch {
        None => println!("Nothing to roll back."),
        Some(batch) => {
            for name in &report.rolled_back {
                println!("  reverted {name:<48} batch {batch}");
            }
        }
    }
}

/// Boxed status table, one row per migration.
pub fn print_status(status: &Status, table: &TableName) {
    let width: usize = 78;
    let inner = width - 4;

    let title = format!("strata v{} · {table}", env!("CARGO_PKG_VERSION"));
    let dashes = width.saturating_sub(title.chars().count() + 7);
    println!("╭─── {title} {}╮", "─".repeat(dashes));

    let row = |text: &str| println!("│ {text:<inner$} │");
    row("");
    if status.applied.is_empty() {
        row("applied   none");
    }
    for m in &status.applied {
        let marker = if status.unknown.contains(&m.name) {
            "unknown"
        } else {
            "applied"
        };
        row(&format!(
            "{marker:<9} {:<40} batch {:<4} {}",
            m.name,
            m.batch,
            m.applied_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    for name in &status.pending {
        row(&format!("{:<9} {name}", "pending"));
    }
    row("");
    row(&format!(
        "{} applied, {} pending, {} unknown",
        status.applied.len(),
        status.pending.len(),
        status.unknown.len()
    ));
    println!("╰{}╯", "─".repeat(width - 2));
}

pub fn status_json(status: &Status) -> Value {
    let applied: Vec<Value> = status
        .applied
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "name": m.name,
                "batch": m.batch,
                "applied_at": m.applied_at.to_rfc3339(),
            })
        })
        .collect();

    json!({
        "applied": applied,
        "pending": status.pending,
        "unknown": status.unknown,
    })
}
