//! `m3 query "<sql>"`: the `execute_query` tool from the command line.

use super::AppContext;
use anyhow::Result;
use m3_mcp::ToolResponse;

pub async fn run_query(ctx: &AppContext, sql: &str) -> Result<()> {
    let gateway = ctx.gateway()?;
    let response = ToolResponse::from(gateway.execute_query(sql).await);
    println!("{}", response.to_json());

    if let Some(kind) = response.error_kind() {
        anyhow::bail!("query failed ({})", kind.as_str());
    }
    Ok(())
}
