//! Knowledge-graph MCP server implementation

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::commands::AppContext;
use kgraph_rag::core::model::{RecordKind, SemanticCategory};
use kgraph_rag::search::{ContextBuilder, SearchFilters, VectorStore};
use kgraph_rag::KgError;

/// Parameters for kg_search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Natural language search query (max 1000 characters)")]
    pub query: String,
    #[schemars(description = "Restrict results to one organization")]
    #[serde(default)]
    pub organization_id: Option<String>,
    #[schemars(description = "Entity type filter: person, company, product, project, location, technology, event, other")]
    #[serde(default)]
    pub entity_type: Option<String>,
    #[schemars(description = "Relation type filter, e.g. works-for, uses, related-to")]
    #[serde(default)]
    pub relation_type: Option<String>,
    #[schemars(description = "How predicates combine: AND or OR (default AND)")]
    #[serde(default)]
    pub filter_logic: Option<String>,
    #[schemars(description = "Maximum number of results (default: 10)")]
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[schemars(description = "Topic category filter, e.g. decision, action-item, risk")]
    #[serde(default)]
    pub topic_semantic_category: Option<String>,
}

fn default_limit() -> usize {
    10
}

/// Parameters for kg_context tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextParams {
    #[schemars(description = "Question or topic to gather knowledge-graph context for")]
    pub query: String,
    #[schemars(description = "Restrict context to one organization")]
    #[serde(default)]
    pub organization_id: Option<String>,
    #[schemars(description = "Topic category filter, e.g. decision, action-item, risk")]
    #[serde(default)]
    pub topic_semantic_category: Option<String>,
    #[schemars(description = "Results per record kind (default from config: 5)")]
    #[serde(default)]
    pub limit_per_kind: Option<usize>,
    #[schemars(description = "Token budget for the rendered context (default from config: 3000)")]
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

/// Parameters for kg_check_integrity tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct IntegrityParams {
    #[schemars(description = "Only check records of this organization")]
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct KindCountsJson {
    kind: RecordKind,
    records: usize,
    synced: usize,
    vectors: usize,
    outdated: usize,
    missing_embedding: usize,
}

fn internal(context: &str, e: impl std::fmt::Display) -> McpError {
    McpError::internal_error(format!("{}: {}", context, e), None)
}

fn to_mcp(e: KgError) -> McpError {
    match e {
        KgError::InvalidInput(_) => McpError::invalid_params(e.to_string(), None),
        other => internal("Search failed", other),
    }
}

fn json_text<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| internal("JSON serialization failed", e))?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

/// Knowledge-graph MCP service
#[derive(Clone)]
pub struct KgService {
    ctx: Arc<AppContext>,
    tool_router: ToolRouter<Self>,
}

impl KgService {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            tool_router: Self::tool_router(),
        }
    }

    fn filters(params: &SearchParams) -> Result<SearchFilters, McpError> {
        let mut filters = SearchFilters {
            organization_id: params.organization_id.clone(),
            ..Default::default()
        };
        if let Some(t) = &params.entity_type {
            filters.entity_type = Some(t.parse().map_err(to_mcp)?);
        }
        if let Some(t) = &params.relation_type {
            filters.relation_type = Some(t.parse().map_err(to_mcp)?);
        }
        if let Some(logic) = &params.filter_logic {
            filters.filter_logic = logic.parse().map_err(to_mcp)?;
        }
        filters.topic_semantic_category = params.topic_semantic_category.clone().map(SemanticCategory::from);
        Ok(filters)
    }
}

#[tool_router]
impl KgService {
    #[tool(description = "Hybrid search over knowledge-graph entities, relations and topics. Combines vector similarity, keyword match and recency into one ranked list.")]
    async fn kg_search(&self, params: Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let filters = Self::filters(&params.0)?;
        // Clamp limit: default 10, max 100
        let limit = match params.0.limit {
            0 => default_limit(),
            n => n.min(100),
        };

        let outcome = self
            .ctx
            .engine()
            .search_detailed(&params.0.query, &filters, limit, true)
            .await
            .map_err(to_mcp)?;

        json_text(&outcome)
    }

    #[tool(description = "Retrieval context for answering a question: related entities with aliases and attributes, relations with resolved endpoint names, and topics, rendered as markdown within a token budget, plus the list of sources used.")]
    async fn kg_context(&self, params: Parameters<ContextParams>) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let filters = SearchFilters {
            organization_id: params.organization_id.clone(),
            topic_semantic_category: params.topic_semantic_category.clone().map(SemanticCategory::from),
            ..Default::default()
        };

        let engine = self.ctx.engine();
        let mut builder = ContextBuilder::new(&engine);
        if let Some(limit) = params.limit_per_kind {
            builder = builder.per_kind_limit(limit.min(20));
        }
        if let Some(tokens) = params.max_tokens {
            builder = builder.max_tokens(tokens);
        }
        let context = builder.build(&params.query, &filters).await.map_err(to_mcp)?;

        json_text(&context)
    }

    #[tool(description = "Search result cache statistics: entry counts per tier and hit/miss counters.")]
    async fn kg_cache_stats(&self) -> Result<CallToolResult, McpError> {
        json_text(&serde_json::json!({
            "stats": self.ctx.cache.stats(),
            "counters": self.ctx.cache.counters(),
        }))
    }

    #[tool(description = "Read-only integrity check: sync flags versus stored vectors, embedding freshness, and initiatives referencing missing topics.")]
    async fn kg_check_integrity(&self, params: Parameters<IntegrityParams>) -> Result<CallToolResult, McpError> {
        let org = params.0.organization_id.as_deref();
        let scanner = self.ctx.freshness();

        let mut kinds = Vec::new();
        for kind in RecordKind::ALL {
            let counts = self.ctx.records.counts(kind, org).map_err(|e| internal("Count failed", e))?;
            let vectors = self.ctx.vectors.count(kind, org).await.map_err(|e| internal("Count failed", e))?;
            let freshness = scanner.scan(kind, org).await.map_err(|e| internal("Scan failed", e))?;
            kinds.push(KindCountsJson {
                kind,
                records: counts.total,
                synced: counts.synced,
                vectors,
                outdated: freshness.outdated,
                missing_embedding: freshness.missing,
            });
        }
        let dangling = self
            .ctx
            .cleaner()
            .check_dangling_references(org)
            .await
            .map_err(|e| internal("Reference check failed", e))?;

        json_text(&serde_json::json!({
            "organization_id": org,
            "kinds": kinds,
            "dangling_references": dangling,
        }))
    }

    #[tool(description = "Latest evaluation report summary and recent search analytics.")]
    async fn kg_status(&self) -> Result<CallToolResult, McpError> {
        let latest = self
            .ctx
            .evaluation_store()
            .latest_report()
            .map_err(|e| internal("Failed to read reports", e))?;
        let analytics = self
            .ctx
            .history
            .analyze(5)
            .map_err(|e| internal("Failed to read history", e))?;

        json_text(&serde_json::json!({
            "latest_report": latest.map(|r| serde_json::json!({
                "id": r.id,
                "timestamp": r.timestamp,
                "passed": r.passed,
                "total": r.total,
                "average_overall": r.average_overall,
            })),
            "search_analytics": analytics,
        }))
    }
}

#[tool_handler]
impl ServerHandler for KgService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Knowledge-graph retrieval server. Search entities, relations and topics, build answer context, and inspect index integrity."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server over stdio
pub async fn run_mcp_server(ctx: AppContext) -> Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!(root = %ctx.paths.root.display(), "starting MCP server");
    let service = KgService::new(ctx);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
