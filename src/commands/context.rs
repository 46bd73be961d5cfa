//! Context command - render retrieval context for a question

use anyhow::Result;
use colored::Colorize;

use super::{print_json, truncate, AppContext};
use kgraph_rag::search::{ContextBuilder, SearchFilters};

pub async fn run(
    ctx: &AppContext,
    query: &str,
    filters: &SearchFilters,
    per_kind_limit: Option<usize>,
    max_tokens: Option<usize>,
    json: bool,
) -> Result<()> {
    let engine = ctx.engine();
    let mut builder = ContextBuilder::new(&engine);
    if let Some(limit) = per_kind_limit {
        builder = builder.per_kind_limit(limit);
    }
    if let Some(tokens) = max_tokens {
        builder = builder.max_tokens(tokens);
    }
    let context = builder.build(query, filters).await?;

    if json {
        return print_json(&context);
    }

    if context.sources.is_empty() {
        println!("{} No context found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!("{}", context.context);
    println!();
    println!(
        "{} {} sources, ~{} tokens{}",
        "→".dimmed(),
        context.sources.len(),
        context.estimated_tokens,
        if context.truncated { " (truncated)".yellow().to_string() } else { String::new() }
    );
    for source in &context.sources {
        println!(
            "   {} {} {}",
            format!("{:.2}", source.score).dimmed(),
            source.kind.as_str().dimmed(),
            truncate(&source.name, 70)
        );
    }
    Ok(())
}
