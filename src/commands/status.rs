//! Status command - data directory overview

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::{print_json, AppContext};
use kgraph_rag::core::model::RecordKind;
use kgraph_rag::search::VectorStore;

#[derive(Serialize)]
struct KindStatus {
    kind: RecordKind,
    records: usize,
    synced: usize,
    vectors: usize,
}

pub async fn run(ctx: &AppContext, org: Option<&str>, json: bool) -> Result<()> {
    let mut kinds = Vec::new();
    for kind in RecordKind::ALL {
        let counts = ctx.records.counts(kind, org)?;
        kinds.push(KindStatus {
            kind,
            records: counts.total,
            synced: counts.synced,
            vectors: ctx.vectors.count(kind, org).await?,
        });
    }
    let cache = ctx.cache.stats();
    let latest = ctx.evaluation_store().latest_report()?;
    let history = ctx.history.recent(usize::MAX)?.len();

    if json {
        return print_json(&serde_json::json!({
            "root": ctx.paths.root,
            "organization_id": org,
            "kinds": kinds,
            "cache": cache,
            "history_items": history,
            "latest_report": latest.as_ref().map(|r| serde_json::json!({
                "id": r.id,
                "timestamp": r.timestamp,
                "passed": r.passed,
                "total": r.total,
                "average_overall": r.average_overall,
            })),
        }));
    }

    println!("{} {}", "Data directory".bold(), ctx.paths.root.display().to_string().cyan());
    for (path, label) in ctx.paths.files() {
        let marker = if path.exists() { "✓".green() } else { "✗".red() };
        println!("  {} {:<36} {}", marker, label, path.display().to_string().dimmed());
    }

    println!();
    println!("{}", "Records".bold());
    for k in &kinds {
        let gap = k.synced.abs_diff(k.vectors);
        let marker = if gap == 0 && k.synced == k.records { "✓".green() } else { "!".yellow() };
        println!(
            "  {} {:<9} {:>6} records {:>6} synced {:>6} vectors",
            marker,
            k.kind.collection(),
            k.records,
            k.synced,
            k.vectors
        );
    }

    println!();
    println!(
        "{} {} entries ({} in memory), {} searches recorded",
        "Cache".bold(),
        cache.total,
        cache.memory_count,
        history
    );
    match latest {
        Some(r) => println!(
            "{} {}/{} passed, average {:.2} ({})",
            "Last evaluation".bold(),
            r.passed,
            r.total,
            r.average_overall,
            r.timestamp.format("%Y-%m-%d %H:%M")
        ),
        None => println!("{} none", "Last evaluation".bold()),
    }

    Ok(())
}
