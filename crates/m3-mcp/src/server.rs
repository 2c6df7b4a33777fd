//! MCP server implementation.
//!
//! Newline-delimited JSON-RPC over stdio. stdout carries protocol messages
//! only; logs go to stderr.

use crate::auth::{CallContext, GatedGateway};
use crate::error::McpError;
use crate::protocol::*;
use crate::tools::ToolRegistry;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// The MCP server.
pub struct McpServer {
    gateway: GatedGateway,
    tools: ToolRegistry,
    authorization: Option<String>,
}

impl McpServer {
    pub fn new(gateway: GatedGateway) -> Self {
        let tools = ToolRegistry::for_gateway(gateway.gateway().limits());
        Self {
            gateway,
            tools,
            authorization: None,
        }
    }

    /// Credential presented on every call. stdio has no per-request
    /// headers, so the token is fixed at startup (e.g. `M3_AUTH_TOKEN`).
    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Serve stdin/stdout until EOF or `shutdown`.
    pub async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!(
            backend = %self.gateway.gateway().backend_label(),
            tools = self.tools.len(),
            "Starting MCP server with stdio transport"
        );
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve one JSON-RPC message per line from `reader`, answering on `writer`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<(), McpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = reader;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!(error = %e, "JSON-RPC message is not valid UTF-8");
                    let response =
                        JsonRpcResponse::error(None, PARSE_ERROR, "Parse error: invalid UTF-8");
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let mut stop = false;
            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Err(e) => {
                    tracing::warn!(error = %e, "Unparseable JSON-RPC message");
                    Some(JsonRpcResponse::error(
                        None,
                        PARSE_ERROR,
                        format!("Parse error: {e}"),
                    ))
                }
                Ok(request) if request.is_notification() => {
                    tracing::debug!(method = %request.method, "Notification");
                    None
                }
                Ok(request) => {
                    stop = request.method == "shutdown";
                    Some(self.handle_request(request).await)
                }
            };

            if let Some(response) = response {
                write_response(&mut writer, &response).await?;
            }
            if stop {
                break;
            }
        }

        tracing::info!("MCP server stopped");
        Ok(())
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let info = ServerInfo {
            name: "m3".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": info,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let response = ListToolsResponse {
            tools: self.tools.list().into_iter().cloned().collect(),
        };
        match serde_json::to_value(response) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {e}"));
                }
            },
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
        };

        if !self.tools.contains(&params.name) {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Tool not found: {}", params.name),
            );
        }

        let ctx = CallContext::new(&params.name).with_authorization(self.authorization.clone());
        match self.gateway.call(&ctx, params.arguments).await {
            Ok(response) => {
                let result = CallToolResponse {
                    content: vec![ToolContent::Text {
                        text: response.to_json(),
                    }],
                    is_error: response.is_error(),
                };
                match serde_json::to_value(result) {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                }
            }
            Err(denied) => JsonRpcResponse::error(id, UNAUTHORIZED, denied.to_string())
                .with_data(json!({ "reason": denied.code() })),
        }
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        tracing::info!("MCP server shutdown requested");
        JsonRpcResponse::success(id, Value::Null)
    }
}

async fn write_response<W>(writer: &mut W, response: &JsonRpcResponse) -> Result<(), McpError>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
