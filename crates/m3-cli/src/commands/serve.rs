//! `m3 serve`: the MCP server on stdio.

use super::AppContext;
use anyhow::Result;
use m3_mcp::{GatedGateway, McpServer, gate_from_config};

/// Bearer token presented on every call when the auth gate is enabled.
const AUTH_TOKEN_ENV: &str = "M3_AUTH_TOKEN";

pub async fn run_serve(ctx: &AppContext) -> Result<()> {
    let gateway = ctx.shared_gateway()?;
    let gate = gate_from_config(&ctx.config.auth);

    let authorization = std::env::var(AUTH_TOKEN_ENV)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .map(|token| format!("Bearer {}", token.trim()));
    if ctx.config.auth.enabled && authorization.is_none() {
        tracing::warn!("Auth gate enabled but {AUTH_TOKEN_ENV} is not set; every call will be refused");
    }

    let server = McpServer::new(GatedGateway::new(gateway, gate)).with_authorization(authorization);
    server.run_stdio().await?;
    Ok(())
}
