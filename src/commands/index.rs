//! Index command - (re)generate embeddings and push them to the vector store

use anyhow::{Context, Result};
use colored::Colorize;

use super::{cancel_on_ctrl_c, print_json, progress_line, AppContext};
use kgraph_rag::core::model::RecordKind;
use kgraph_rag::integrity::{CancellationToken, RegenerationMode};

pub async fn run(ctx: &AppContext, kind: Option<&str>, org: Option<&str>, mode: &str, json: bool) -> Result<()> {
    let mode: RegenerationMode = mode.parse().context("Invalid --mode")?;
    let kinds: Vec<RecordKind> = match kind {
        Some(k) => vec![k.parse().context("Invalid --kind")?],
        None => RecordKind::ALL.to_vec(),
    };

    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);
    let regenerator = ctx.regenerator();

    let mut reports = Vec::new();
    for kind in kinds {
        let progress = progress_line(kind.collection(), !json);
        let report = regenerator
            .regenerate(kind, org, mode, &token, progress.as_ref())
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
        let status = if report.errors.is_empty() { "✓".green() } else { "!".yellow() };
        println!(
            "{} {:<9} scanned {}, selected {}, embedded {}",
            status,
            report.kind.collection(),
            report.scanned,
            report.selected,
            report.regenerated.to_string().cyan()
        );
        for error in &report.errors {
            println!("    {} {}: {}", "✗".red(), error.id, error.error.dimmed());
        }
    }
    if token.is_cancelled() {
        println!("{} Cancelled before all records were processed", "!".yellow().bold());
    }

    Ok(())
}
