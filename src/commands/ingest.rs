//! Ingest command - load record bundles (JSON or YAML) into the record store

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use walkdir::WalkDir;

use super::{cancel_on_ctrl_c, print_json, progress_line, AppContext};
use kgraph_rag::core::model::{RecordBundle, RecordKind};
use kgraph_rag::integrity::{CancellationToken, RegenerationMode};

fn is_bundle_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}

pub fn collect_bundle_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_bundle_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

pub fn parse_bundle(path: &Path) -> Result<RecordBundle> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bundle = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))?,
        _ => serde_yaml::from_str(&text).with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    Ok(bundle)
}

pub async fn run(ctx: &AppContext, path: &Path, index: bool, json: bool) -> Result<()> {
    if !path.exists() {
        bail!("Path not found: {}", path.display());
    }

    let files = collect_bundle_files(path);
    let mut written = 0usize;
    let mut failures: Vec<(String, String)> = Vec::new();

    for file in &files {
        let outcome = parse_bundle(file).and_then(|bundle| Ok(ctx.records.import_bundle(bundle)?));
        match outcome {
            Ok(n) => {
                written += n;
                if !json {
                    println!("{} {} ({} records)", "✓".green(), file.display(), n);
                }
            }
            Err(e) => {
                if !json {
                    println!("{} {}: {:#}", "✗".red(), file.display(), e);
                }
                failures.push((file.display().to_string(), format!("{:#}", e)));
            }
        }
    }

    if written > 0 {
        ctx.cache.clear();
    }

    let mut indexed = Vec::new();
    if index && written > 0 {
        let token = CancellationToken::new();
        cancel_on_ctrl_c(&token);
        let regenerator = ctx.regenerator();
        for kind in RecordKind::ALL {
            let progress = progress_line(kind.collection(), !json);
            let report = regenerator
                .regenerate(kind, None, RegenerationMode::Unsynced, &token, progress.as_ref())
                .await?;
            indexed.push(report);
            if token.is_cancelled() {
                break;
            }
        }
    }

    if json {
        print_json(&serde_json::json!({
            "files": files.len(),
            "records_written": written,
            "failures": failures
                .iter()
                .map(|(file, error)| serde_json::json!({ "file": file, "error": error }))
                .collect::<Vec<_>>(),
            "indexed": indexed,
        }))?;
    } else {
        println!();
        println!(
            "{} Wrote {} records from {} files",
            "✓".green().bold(),
            written.to_string().cyan(),
            files.len()
        );
        for report in &indexed {
            println!(
                "  {} {}: {} embedded, {} errors",
                "→".dimmed(),
                report.kind,
                report.regenerated,
                report.errors.len()
            );
        }
        if !failures.is_empty() {
            println!("  {} {} files failed", "✗".red(), failures.len());
        }
    }

    Ok(())
}
