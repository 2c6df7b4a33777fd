//! The stdio loop, driven through in-memory pipes.

mod common;

use common::Fixture;
use m3_core::{AuthConfig, StaticToken};
use m3_mcp::{GatedGateway, McpServer, gate_from_config};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

async fn exchange(server: &McpServer, requests: &[Value]) -> Vec<Value> {
    let mut input = String::new();
    for request in requests {
        input.push_str(&request.to_string());
        input.push('\n');
    }
    let mut output = Vec::new();
    server
        .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn call(id: i64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    })
}

/// Parsed JSON payload of a `tools/call` result.
fn payload(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn test_session_lifecycle() {
    let fixture = Fixture::new();
    let server = McpServer::new(GatedGateway::open(Arc::new(fixture.gateway())));

    let responses = exchange(
        &server,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 4, "method": "shutdown"}),
            json!({"jsonrpc": "2.0", "id": 5, "method": "ping"}),
        ],
    )
    .await;

    // The notification gets no answer and nothing is read after shutdown.
    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0]["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(responses[0]["result"]["serverInfo"]["name"], "m3");
    assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 7);
    assert_eq!(responses[2]["id"], 3);
    assert_eq!(responses[3]["result"], Value::Null);
}

#[tokio::test]
async fn test_tool_results_and_errors() {
    let fixture = Fixture::new();
    let server = McpServer::new(GatedGateway::open(Arc::new(fixture.gateway())));

    let responses = exchange(
        &server,
        &[
            call(1, "execute_query", json!({"sql": "SELECT name FROM patients WHERE id = 10"})),
            call(2, "execute_mimic_query", json!({"sql_query": "SELECT 1; DROP TABLE patients"})),
            call(3, "get_table_info", json!({"table_name": "nonexistent_table"})),
            call(4, "no_such_tool", json!({})),
        ],
    )
    .await;

    assert_eq!(responses[0]["result"]["isError"], false);
    let rows = payload(&responses[0]);
    assert_eq!(rows["rows"], json!([{"name": "Jane"}]));
    assert_eq!(rows["row_count"], 1);
    assert_eq!(rows["backend"], "duckdb (fixture)");

    assert_eq!(responses[1]["result"]["isError"], true);
    assert_eq!(payload(&responses[1])["error"]["kind"], "unsafe_query");

    assert_eq!(payload(&responses[2])["error"]["kind"], "not_found");

    assert_eq!(responses[3]["error"]["code"], -32602);
}

#[tokio::test]
async fn test_malformed_lines_get_parse_errors() {
    let fixture = Fixture::new();
    let server = McpServer::new(GatedGateway::open(Arc::new(fixture.gateway())));

    let mut output = Vec::new();
    server
        .serve(
            tokio::io::BufReader::new(&b"{not json\n\n{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"nope\"}\n"[..]),
            &mut output,
        )
        .await
        .unwrap();
    let responses: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert_eq!(responses[1]["error"]["code"], -32601);
}

#[tokio::test]
async fn test_invalid_utf8_line_does_not_stop_serving() {
    let fixture = Fixture::new();
    let server = McpServer::new(GatedGateway::open(Arc::new(fixture.gateway())));

    let mut input = b"\xff\xfe{\"jsonrpc\":\"2.0\"}\n".to_vec();
    input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");
    let mut output = Vec::new();
    server
        .serve(tokio::io::BufReader::new(&input[..]), &mut output)
        .await
        .unwrap();
    let responses: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert_eq!(responses[0]["id"], Value::Null);
    assert_eq!(responses[1]["id"], 2);
    assert!(responses[1]["result"].is_object());
}

fn gated_server(fixture: &Fixture, token: Option<&str>) -> McpServer {
    let config = AuthConfig {
        enabled: true,
        rate_limit_requests: Some(1),
        tokens: vec![StaticToken {
            token: "secret".into(),
            subject: "alice".into(),
            scopes: vec!["read:mimic-data".into()],
        }],
        ..Default::default()
    };
    let gateway = GatedGateway::new(Arc::new(fixture.gateway()), gate_from_config(&config));
    McpServer::new(gateway).with_authorization(token.map(|t| format!("Bearer {t}")))
}

#[tokio::test]
async fn test_auth_gate_refuses_before_the_gateway() {
    let fixture = Fixture::new();

    let anonymous = gated_server(&fixture, None);
    let responses = exchange(&anonymous, &[call(1, "get_database_schema", json!({}))]).await;
    assert_eq!(responses[0]["error"]["code"], -32001);
    assert_eq!(responses[0]["error"]["data"]["reason"], "missing_token");

    let alice = gated_server(&fixture, Some("secret"));
    let responses = exchange(
        &alice,
        &[
            call(1, "get_database_schema", json!({})),
            call(2, "get_database_schema", json!({})),
        ],
    )
    .await;
    assert_eq!(responses[0]["result"]["isError"], false);
    assert_eq!(responses[1]["error"]["data"]["reason"], "rate_limited");

    let subjects: Vec<_> = fixture
        .audit
        .events()
        .into_iter()
        .map(|e| (e.event_type.to_string(), e.subject))
        .collect();
    assert_eq!(
        subjects,
        vec![
            ("AUTH_DENIED".to_string(), "unknown".to_string()),
            ("TOOL_CALLED".to_string(), "alice".to_string()),
            ("QUERY_EXECUTED".to_string(), "alice".to_string()),
            ("AUTH_DENIED".to_string(), "alice".to_string()),
        ]
    );
}
