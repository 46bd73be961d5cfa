mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::AppContext;
use kgraph_rag::core::model::SemanticCategory;
use kgraph_rag::search::SearchFilters;

#[derive(Parser)]
#[command(name = "kgrag")]
#[command(about = "Knowledge-graph hybrid retrieval: search, evaluation and index integrity", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, env = "KGRAG_DATA_DIR", help = "Data directory (default: ./.kgrag)")]
    data_dir: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Verbose logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ===== Setup =====
    /// Create the data directory and default config
    Init {
        #[arg(long, help = "Rewrite config even if already initialized")]
        force: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Load entity/relation/topic/initiative bundles (JSON or YAML)
    Ingest {
        path: PathBuf,
        #[arg(long, help = "Embed unsynced records after loading")]
        index: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Generate embeddings and push them to the vector store
    Index {
        #[arg(long, help = "Only this kind: entity, relation, topic")]
        kind: Option<String>,
        #[arg(long, help = "Only this organization")]
        org: Option<String>,
        #[arg(long, default_value = "unsynced", help = "unsynced | outdated | all")]
        mode: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== Retrieval =====
    /// Hybrid search across entities, relations and topics
    Search {
        query: String,
        #[arg(long, help = "Organization scope")]
        org: Option<String>,
        #[arg(long, help = "Entity type filter")]
        entity_type: Option<String>,
        #[arg(long, help = "Relation type filter")]
        relation_type: Option<String>,
        #[arg(long, help = "Created at or after (RFC 3339)")]
        created_after: Option<String>,
        #[arg(long, help = "Created at or before (RFC 3339)")]
        created_before: Option<String>,
        #[arg(long, help = "Updated at or after (RFC 3339)")]
        updated_after: Option<String>,
        #[arg(long, help = "Updated at or before (RFC 3339)")]
        updated_before: Option<String>,
        #[arg(long, help = "Topic semantic category filter (e.g. decision)")]
        topic_category: Option<String>,
        #[arg(long, default_value = "and", help = "Combine predicates with and | or")]
        logic: String,
        #[arg(short, long, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "Bypass the result cache")]
        no_cache: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Render retrieval context (entities, relations, topics) for a question
    Context {
        query: String,
        #[arg(long, help = "Organization scope")]
        org: Option<String>,
        #[arg(long, help = "Topic semantic category filter (e.g. decision)")]
        topic_category: Option<String>,
        #[arg(short, long, help = "Results per record kind")]
        limit: Option<usize>,
        #[arg(long, help = "Token budget")]
        max_tokens: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Search result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Recent searches and analytics
    History {
        #[arg(short, long, default_value_t = 20, help = "Items to show")]
        limit: usize,
        #[arg(short, long, help = "Aggregate analytics instead of the item list")]
        analyze: bool,
        #[arg(long, help = "Delete all history")]
        clear: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== Quality =====
    /// Run evaluation test cases
    Evaluate {
        #[arg(help = "Test-case files or glob patterns (default: saved library)")]
        patterns: Vec<String>,
        #[arg(long, help = "Organization scope for every case")]
        org: Option<String>,
        #[arg(long, help = "Save loaded cases to the library")]
        save: bool,
        #[arg(long, help = "Compare against the previous report")]
        compare: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Repair sync flags and dangling references
    Repair {
        #[command(subcommand)]
        action: RepairAction,
    },
    /// Record, vector, cache and evaluation overview
    Status {
        #[arg(long, help = "Only this organization")]
        org: Option<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server over stdio
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show client configuration instructions")]
        install: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Stats {
        #[arg(long)]
        json: bool,
    },
    Clear {
        #[arg(long)]
        json: bool,
    },
    /// Cached searches sharing terms with a query
    Related {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    Invalidate {
        #[arg(long, help = "Record reference <kind>:<id>")]
        record: Option<String>,
        #[arg(long, help = "Every entry touching this organization")]
        org: Option<String>,
        #[arg(long, help = "Raw cache key")]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RepairAction {
    /// Clear sync flags for records without vectors
    Sync {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        org: Option<String>,
        #[arg(long, help = "Also flag unsynced records whose vector exists")]
        promote: bool,
        #[arg(long)]
        json: bool,
    },
    /// Remove initiative references to missing topics
    Refs {
        #[arg(long)]
        org: Option<String>,
        #[arg(long, help = "List only, change nothing")]
        check: bool,
        #[arg(long)]
        json: bool,
    },
    /// Read-only integrity report
    Check {
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_time(value: Option<String>, flag: &str) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
    value
        .map(|v| {
            chrono::DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&chrono::Utc))
                .with_context(|| format!("Invalid {} timestamp: {}", flag, v))
        })
        .transpose()
}

fn main() -> anyhow::Result<()> {
    let Cli {
        data_dir,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    // Init runs before any store is opened
    if let Commands::Init { force, json } = command {
        return commands::init::run(data_dir.as_deref(), force, json);
    }
    #[cfg(feature = "mcp")]
    if let Commands::Mcp { install: true } = command {
        print_mcp_install_instructions(data_dir.as_deref());
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let ctx = AppContext::open(data_dir.as_deref())?;

        match command {
            Commands::Init { .. } => Ok(()),
            Commands::Ingest { path, index, json } => commands::ingest::run(&ctx, &path, index, json).await,
            Commands::Index { kind, org, mode, json } => {
                commands::index::run(&ctx, kind.as_deref(), org.as_deref(), &mode, json).await
            }
            Commands::Search {
                query,
                org,
                entity_type,
                relation_type,
                created_after,
                created_before,
                updated_after,
                updated_before,
                topic_category,
                logic,
                limit,
                no_cache,
                json,
            } => {
                let filters = SearchFilters {
                    organization_id: org,
                    entity_type: entity_type.map(|t| t.parse()).transpose()?,
                    relation_type: relation_type.map(|t| t.parse()).transpose()?,
                    created_after: parse_time(created_after, "--created-after")?,
                    created_before: parse_time(created_before, "--created-before")?,
                    updated_after: parse_time(updated_after, "--updated-after")?,
                    updated_before: parse_time(updated_before, "--updated-before")?,
                    filter_logic: logic.parse()?,
                    topic_semantic_category: topic_category.map(SemanticCategory::from),
                };
                let args = commands::search::SearchArgs {
                    query,
                    filters,
                    limit,
                    no_cache,
                    json,
                };
                commands::search::run(&ctx, args).await
            }
            Commands::Context {
                query,
                org,
                topic_category,
                limit,
                max_tokens,
                json,
            } => {
                let filters = SearchFilters {
                    organization_id: org,
                    topic_semantic_category: topic_category.map(SemanticCategory::from),
                    ..Default::default()
                };
                commands::context::run(&ctx, &query, &filters, limit, max_tokens, json).await
            }
            Commands::Cache { action } => match action {
                CacheAction::Stats { json } => commands::cache::stats(&ctx, json),
                CacheAction::Clear { json } => commands::cache::clear(&ctx, json),
                CacheAction::Related { query, limit, json } => commands::cache::related(&ctx, &query, limit, json),
                CacheAction::Invalidate { record, org, key, json } => {
                    commands::cache::invalidate(&ctx, record.as_deref(), org.as_deref(), key.as_deref(), json)
                }
            },
            Commands::History {
                limit,
                analyze,
                clear,
                json,
            } => commands::history::run(&ctx, limit, analyze, clear, json),
            Commands::Evaluate {
                patterns,
                org,
                save,
                compare,
                json,
            } => commands::evaluate::run(&ctx, &patterns, org.as_deref(), save, compare, json).await,
            Commands::Repair { action } => match action {
                RepairAction::Sync {
                    kind,
                    org,
                    promote,
                    json,
                } => commands::repair::sync(&ctx, kind.as_deref(), org.as_deref(), promote, json).await,
                RepairAction::Refs { org, check, json } => {
                    commands::repair::refs(&ctx, org.as_deref(), check, json).await
                }
                RepairAction::Check { org, json } => commands::repair::check(&ctx, org.as_deref(), json).await,
            },
            Commands::Status { org, json } => commands::status::run(&ctx, org.as_deref(), json).await,

            #[cfg(feature = "mcp")]
            Commands::Mcp { .. } => mcp::run_mcp_server(ctx).await,
        }
    })
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions(data_dir: Option<&std::path::Path>) {
    use colored::Colorize;

    let root = kgraph_rag::DataPaths::resolve(data_dir).root.to_string_lossy().to_string();
    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "kgrag".to_string());

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration:");
    println!();
    println!(
        r#"{{
  "mcpServers": {{
    "kgraph": {{
      "command": "{}",
      "args": ["--data-dir", "{}", "mcp"]
    }}
  }}
}}"#,
        binary_path, root
    );
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Hybrid search over entities, relations and topics", "kg_search".green());
    println!("  • {} - Result cache statistics", "kg_cache_stats".green());
    println!("  • {} - Sync, freshness and reference checks", "kg_check_integrity".green());
    println!("  • {} - Latest evaluation and search analytics", "kg_status".green());
}
