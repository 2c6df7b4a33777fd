//! # m3-mcp
//!
//! The query gateway and the MCP server that exposes it to agents.
//!
//! ## Architecture
//!
//! ```text
//! AI Agent
//!       │
//!       │ MCP over stdio (tools/list, tools/call)
//!       ▼
//! ┌──────────────────────┐
//! │  McpServer           │
//! │  1. Auth gate        │  ← optional bearer token, scopes, rate limit
//! │  2. Parse arguments  │
//! │  3. Validate SQL     │  ← m3-sql
//! │     or render a      │
//! │     fixed template   │
//! │  4. Run on backend   │  ← m3-backend (DuckDB or BigQuery)
//! │  5. Audit + respond  │  ← m3-audit
//! └──────────────────────┘
//! ```
//!
//! ## Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `get_database_schema()` | Tables of the active dataset |
//! | `get_table_info(table_name, show_sample)` | Columns and sample rows |
//! | `execute_query(sql)` | One validated read-only statement |
//! | `get_icu_stays(patient_id?, limit)` | ICU stays |
//! | `get_lab_results(patient_id?, lab_item?, limit)` | Lab events |
//! | `get_race_distribution(limit)` | Admissions by race |
//!
//! Every call returns a [`ToolResponse`]: rows with their columns and the
//! backend label, or `{ "error": { "kind", "message" } }`.
//!
//! ## Example Usage
//!
//! ```ignore
//! use m3_mcp::{GatedGateway, McpServer, QueryGateway};
//!
//! let gateway = QueryGateway::new(backend, config.gateway.clone());
//! let server = McpServer::new(GatedGateway::open(Arc::new(gateway)));
//! server.run_stdio().await?;
//! ```

pub mod auth;
pub mod error;
pub mod gateway;
pub mod params;
pub mod protocol;
pub mod server;
pub mod templates;
pub mod tools;

pub use auth::{
    AllowAll, AuthDenied, AuthGate, CallContext, GatedGateway, Identity, RateLimiter,
    ScopedTokenGate, StaticTokenVerifier, TokenVerifier, gate_from_config,
};
pub use error::{GatewayError, McpError};
pub use gateway::{QueryGateway, ToolFailure, ToolOutput, ToolResponse};
pub use protocol::{
    CallToolParams, CallToolResponse, JsonRpcRequest, JsonRpcResponse, ToolAnnotations,
    ToolContent, ToolDefinition,
};
pub use server::McpServer;
pub use tools::{Tool, ToolRegistry};
