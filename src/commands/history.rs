//! History command - recent searches and aggregate analytics

use anyhow::Result;
use colored::Colorize;

use super::{print_json, truncate, AppContext};
use kgraph_rag::search::history::Count;

fn print_counts(label: &str, counts: &[Count]) {
    if counts.is_empty() {
        return;
    }
    println!("  {}", label.dimmed());
    for c in counts {
        println!("    {:>4}  {}", c.count, truncate(&c.value, 60));
    }
}

pub fn run(ctx: &AppContext, limit: usize, analyze: bool, clear: bool, json: bool) -> Result<()> {
    if clear {
        ctx.history.clear()?;
        if json {
            return print_json(&serde_json::json!({ "cleared": true }));
        }
        println!("{} Search history cleared", "✓".green());
        return Ok(());
    }

    if analyze {
        let analytics = ctx.history.analyze(limit)?;
        if json {
            return print_json(&analytics);
        }
        println!("{}", "Search analytics".bold());
        println!(
            "  {} searches, {} unique, {:.1} results on average, {:.0}% cache hits",
            analytics.total_searches,
            analytics.unique_queries,
            analytics.average_result_count,
            analytics.cache_hit_rate * 100.0
        );
        print_counts("top queries", &analytics.top_queries);
        print_counts("organizations", &analytics.top_organizations);
        print_counts("entity types", &analytics.top_entity_types);
        print_counts("relation types", &analytics.top_relation_types);
        return Ok(());
    }

    let items = ctx.history.recent(limit)?;
    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("{} No searches recorded", "→".dimmed());
        return Ok(());
    }
    for item in &items {
        println!(
            "  {} {} {} ({} results{})",
            item.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
            truncate(&item.query, 60).cyan(),
            item.filters
                .organization_id
                .as_deref()
                .map(|o| format!("[{}]", o))
                .unwrap_or_default(),
            item.result_count,
            if item.cache_hit { ", cached" } else { "" }
        );
    }
    Ok(())
}
