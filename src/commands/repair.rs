//! Repair command - sync-flag repair, dangling-reference cleanup and integrity checks

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use super::{cancel_on_ctrl_c, print_json, progress_line, AppContext};
use kgraph_rag::core::model::RecordKind;
use kgraph_rag::integrity::{CancellationToken, FreshnessReport, RepairOptions};
use kgraph_rag::search::VectorStore;

fn parse_kinds(kind: Option<&str>) -> Result<Vec<RecordKind>> {
    Ok(match kind {
        Some(k) => vec![k.parse().context("Invalid --kind")?],
        None => RecordKind::ALL.to_vec(),
    })
}

/// Clear sync flags for records whose vectors are gone.
pub async fn sync(ctx: &AppContext, kind: Option<&str>, org: Option<&str>, promote: bool, json: bool) -> Result<()> {
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);
    let repairer = ctx.repairer();
    let options = RepairOptions { promote_present: promote };

    let mut reports = Vec::new();
    for kind in parse_kinds(kind)? {
        let progress = progress_line(kind.collection(), !json);
        let report = repairer
            .repair_sync_status_with(kind, org, options, &token, progress.as_ref())
            .await?;
        reports.push(report);
        if token.is_cancelled() {
            break;
        }
    }

    if json {
        return print_json(&reports);
    }

    for report in &reports {
        println!(
            "{} {:<9} checked {}, repaired {}{}",
            if report.errors.is_empty() { "✓".green() } else { "!".yellow() },
            report.kind.collection(),
            report.scanned,
            report.repaired.to_string().cyan(),
            if promote { format!(", promoted {}", report.promoted) } else { String::new() }
        );
        for error in &report.errors {
            println!("    {} {}: {}", "✗".red(), error.id, error.error.dimmed());
        }
    }
    Ok(())
}

/// List or remove initiative references to missing topics.
pub async fn refs(ctx: &AppContext, org: Option<&str>, check_only: bool, json: bool) -> Result<()> {
    let cleaner = ctx.cleaner();

    if check_only {
        let dangling = cleaner.check_dangling_references(org).await?;
        if json {
            return print_json(&dangling);
        }
        if dangling.is_empty() {
            println!("{} No dangling topic references", "✓".green());
        }
        for d in &dangling {
            println!(
                "{} {} ({}): {}",
                "✗".red(),
                d.initiative_id,
                d.title.cyan(),
                d.missing_topic_ids.join(", ").dimmed()
            );
        }
        return Ok(());
    }

    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);
    let progress = progress_line("initiatives", !json);
    let report = cleaner
        .cleanup_dangling_references_with(org, &token, progress.as_ref())
        .await?;

    if json {
        return print_json(&report);
    }
    println!(
        "{} Scanned {} initiatives, cleaned {}, removed {} references",
        "✓".green(),
        report.scanned,
        report.cleaned.to_string().cyan(),
        report.removed_refs
    );
    for error in &report.errors {
        println!("    {} {}: {}", "✗".red(), error.id, error.error.dimmed());
    }
    Ok(())
}

#[derive(Serialize)]
struct KindCheck {
    kind: RecordKind,
    records: usize,
    synced: usize,
    vectors: usize,
    freshness: FreshnessReport,
}

/// Read-only integrity overview: counts, freshness and dangling references.
pub async fn check(ctx: &AppContext, org: Option<&str>, json: bool) -> Result<()> {
    let scanner = ctx.freshness();
    let mut kinds = Vec::new();
    for kind in RecordKind::ALL {
        let counts = ctx.records.counts(kind, org)?;
        kinds.push(KindCheck {
            kind,
            records: counts.total,
            synced: counts.synced,
            vectors: ctx.vectors.count(kind, org).await?,
            freshness: scanner.scan(kind, org).await?,
        });
    }
    let dangling = ctx.cleaner().check_dangling_references(org).await?;

    if json {
        return print_json(&serde_json::json!({
            "organization_id": org,
            "kinds": kinds,
            "dangling_references": dangling,
        }));
    }

    println!("{}", "Integrity check".bold());
    for entry in &kinds {
        let regen = entry.freshness.needs_regeneration();
        let marker = if entry.synced == entry.vectors && regen == 0 { "✓".green() } else { "!".yellow() };
        println!(
            "  {} {:<9} {} records, {} synced, {} vectors, {} need embedding",
            marker,
            entry.kind.collection(),
            entry.records,
            entry.synced,
            entry.vectors,
            regen
        );
    }
    let marker = if dangling.is_empty() { "✓".green() } else { "!".yellow() };
    println!("  {} {} initiatives with dangling topic references", marker, dangling.len());
    Ok(())
}
