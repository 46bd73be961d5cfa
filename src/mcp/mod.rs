//! MCP server for the knowledge graph
//!
//! Exposes hybrid search, cache inspection and integrity checks as tools.

mod server;

pub use server::run_mcp_server;
