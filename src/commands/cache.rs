//! Cache command - inspect and invalidate the search result cache

use anyhow::{bail, Context, Result};
use colored::Colorize;

use super::{print_json, truncate, AppContext};
use kgraph_rag::core::model::RecordKind;

pub fn stats(ctx: &AppContext, json: bool) -> Result<()> {
    let stats = ctx.cache.stats();
    let counters = ctx.cache.counters();

    if json {
        return print_json(&serde_json::json!({ "stats": stats, "counters": counters }));
    }

    println!("{}", "Search cache".bold());
    println!("  {:<12} {}", "memory".dimmed(), stats.memory_count);
    println!("  {:<12} {}", "persisted".dimmed(), stats.persisted_count);
    println!("  {:<12} {}", "total".dimmed(), stats.total.to_string().cyan());
    println!(
        "  {:<12} ttl {}s, memory max {}, persisted max {}",
        "config".dimmed(),
        ctx.config.cache.ttl_secs,
        ctx.config.cache.max_memory_entries,
        ctx.config.cache.max_persisted_entries
    );
    // Counters only cover this process.
    println!(
        "  {:<12} {} hits, {} misses, {} expired, {} corrupted",
        "session".dimmed(),
        counters.hits,
        counters.misses,
        counters.expired,
        counters.corrupted
    );
    Ok(())
}

pub fn clear(ctx: &AppContext, json: bool) -> Result<()> {
    let before = ctx.cache.stats().total;
    ctx.cache.clear();
    if json {
        return print_json(&serde_json::json!({ "cleared": before }));
    }
    println!("{} Cleared {} cache entries", "✓".green(), before);
    Ok(())
}

pub fn related(ctx: &AppContext, query: &str, limit: usize, json: bool) -> Result<()> {
    let related = ctx.cache.find_related(query, limit);
    if json {
        return print_json(&related);
    }
    if related.is_empty() {
        println!("{} No cached searches related to: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }
    for entry in &related {
        println!(
            "  {} {} ({} shared terms, {} results)",
            "•".dimmed(),
            truncate(&entry.query, 60).cyan(),
            entry.shared_tokens,
            entry.result_count
        );
    }
    Ok(())
}

/// Invalidate by `kind:id` record reference, organization, or raw cache key.
pub fn invalidate(
    ctx: &AppContext,
    record: Option<&str>,
    org: Option<&str>,
    key: Option<&str>,
    json: bool,
) -> Result<()> {
    let removed = match (record, org, key) {
        (Some(record), None, None) => {
            let (kind, id) = record
                .split_once(':')
                .context("Record must be given as <kind>:<id>, e.g. topic:t-42")?;
            let kind: RecordKind = kind.parse()?;
            ctx.cache.invalidate_record(kind, id)
        }
        (None, Some(org), None) => ctx.cache.invalidate_organization(org),
        (None, None, Some(key)) => {
            ctx.cache.invalidate(key);
            1
        }
        _ => bail!("Pass exactly one of --record, --org or --key"),
    };

    if json {
        return print_json(&serde_json::json!({ "invalidated": removed }));
    }
    println!("{} Invalidated {} cache entries", "✓".green(), removed);
    Ok(())
}
