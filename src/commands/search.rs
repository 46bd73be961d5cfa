//! Search command - hybrid search across entities, relations and topics

use anyhow::Result;
use colored::Colorize;

use super::{pad, print_json, truncate, AppContext};
use kgraph_rag::search::SearchFilters;

pub struct SearchArgs {
    pub query: String,
    pub filters: SearchFilters,
    pub limit: Option<usize>,
    pub no_cache: bool,
    pub json: bool,
}

pub async fn run(ctx: &AppContext, args: SearchArgs) -> Result<()> {
    let limit = args.limit.unwrap_or(ctx.config.search.default_max_results);
    let engine = ctx.engine();
    let outcome = engine
        .search_detailed(&args.query, &args.filters, limit, !args.no_cache)
        .await?;

    if args.json {
        return print_json(&outcome);
    }

    for degraded in &outcome.degraded {
        println!(
            "{} {} results unavailable: {}",
            "!".yellow().bold(),
            degraded.kind,
            degraded.reason.dimmed()
        );
    }

    if outcome.results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), args.query.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {}{}",
        "→".dimmed(),
        outcome.results.len(),
        args.query.cyan(),
        if outcome.cache_hit { " (cached)".dimmed().to_string() } else { String::new() }
    );
    println!();

    for (i, result) in outcome.results.iter().enumerate() {
        let score_str = format!("{:.2}", result.score);
        let score_colored = if result.score > 0.8 {
            score_str.green()
        } else if result.score > 0.6 {
            score_str.yellow()
        } else {
            score_str.dimmed()
        };

        println!(
            "{:>3}. [{}] {} {}",
            (i + 1).to_string().bold(),
            score_colored,
            pad(result.kind.as_str(), 8).dimmed(),
            truncate(&result.title, 80).cyan()
        );
        println!(
            "      {} | sim {:.2} | {}{}",
            result.id,
            result.similarity,
            result.updated_at.format("%Y-%m-%d"),
            result
                .organization_id
                .as_deref()
                .map(|o| format!(" | {}", o))
                .unwrap_or_default()
        );
    }

    Ok(())
}
