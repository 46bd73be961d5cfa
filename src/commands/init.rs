//! Init command - create the data directory and a default configuration

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use kgraph_rag::core::config::EngineConfig;
use kgraph_rag::core::paths::DataPaths;
use kgraph_rag::search::SqliteVectorStore;
use kgraph_rag::store::SqliteRecordStore;

pub fn run(data_dir: Option<&Path>, force: bool, json: bool) -> Result<()> {
    let paths = DataPaths::resolve(data_dir);
    if paths.is_initialized() && !force {
        if json {
            println!(
                "{}",
                serde_json::json!({ "initialized": false, "root": paths.root, "reason": "already initialized" })
            );
        } else {
            println!(
                "{} Already initialized at {} (use --force to rewrite config)",
                "→".dimmed(),
                paths.root.display().to_string().cyan()
            );
        }
        return Ok(());
    }

    paths
        .ensure_root()
        .with_context(|| format!("Failed to create {}", paths.root.display()))?;
    let config = EngineConfig::default();
    std::fs::write(&paths.config, config.to_yaml()?)
        .with_context(|| format!("Failed to write {}", paths.config.display()))?;
    SqliteRecordStore::open(&paths.records).context("Failed to create record store")?;
    SqliteVectorStore::open(&paths.vectors).context("Failed to create vector store")?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "initialized": true, "root": paths.root, "config": paths.config })
        );
    } else {
        println!("{} Initialized {}", "✓".green().bold(), paths.root.display().to_string().cyan());
        println!("  {} {}", "config".dimmed(), paths.config.display());
        println!();
        println!("Next: {} then {}", "kgrag ingest <dir> --index".cyan(), "kgrag search <query>".cyan());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("data");
        run(Some(&root), false, true)?;

        let paths = DataPaths::from_root(root.clone());
        assert!(paths.is_initialized());
        assert!(paths.config.exists());
        let loaded = EngineConfig::load(&paths.config)?;
        assert_eq!(loaded.search.default_max_results, EngineConfig::default().search.default_max_results);
        Ok(())
    }
}
