//! Both backends answer the same template with the same normalized rows.
//!
//! The warehouse side talks to a local fake of the BigQuery REST API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use m3_backend::{Backend, BackendError, BigQueryBackend, DuckDbBackend, StaticTokenProvider};
use m3_sql::{SqlTemplate, SqlValidator};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeWarehouse {
    requests: Mutex<Vec<Value>>,
    polls: Mutex<u32>,
}

fn race_rows() -> Value {
    json!({
        "jobComplete": true,
        "jobReference": {"projectId": "proj", "jobId": "job-1", "location": "US"},
        "schema": {"fields": [
            {"name": "race", "type": "STRING", "mode": "NULLABLE"},
            {"name": "count", "type": "INTEGER", "mode": "NULLABLE"}
        ]},
        "totalRows": "2",
        "rows": [
            {"f": [{"v": "WHITE"}, {"v": "2"}]},
            {"f": [{"v": "ASIAN"}, {"v": "1"}]}
        ]
    })
}

async fn jobs_query(
    State(state): State<Arc<FakeWarehouse>>,
    Path(_project): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.requests.lock().unwrap().push(body.clone());
    let sql = body["query"].as_str().unwrap_or_default().to_string();

    if sql.contains("no_such_column") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {
                "code": 400,
                "message": "Unrecognized name: no_such_column at [1:8]",
                "errors": [{"reason": "invalidQuery", "message": "Unrecognized name"}]
            }})),
        );
    }
    if sql.contains("slow") {
        return (
            StatusCode::OK,
            Json(json!({
                "jobComplete": false,
                "jobReference": {"projectId": "proj", "jobId": "job-slow", "location": "US"}
            })),
        );
    }
    (StatusCode::OK, Json(race_rows()))
}

async fn get_results(
    State(state): State<Arc<FakeWarehouse>>,
    Path((_project, job)): Path<(String, String)>,
) -> Json<Value> {
    *state.polls.lock().unwrap() += 1;
    let mut body = race_rows();
    body["jobReference"]["jobId"] = json!(job);
    Json(body)
}

async fn spawn_fake() -> (String, Arc<FakeWarehouse>) {
    let state = Arc::new(FakeWarehouse::default());
    let app = Router::new()
        .route("/projects/{project}/queries", post(jobs_query))
        .route("/projects/{project}/queries/{job}", get(get_results))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn warehouse(base_url: &str) -> BigQueryBackend {
    BigQueryBackend::new(
        "proj",
        vec!["ds_hosp".to_string(), "ds_icu".to_string()],
        Arc::new(StaticTokenProvider::new("test-token")),
    )
    .unwrap()
    .with_base_url(base_url)
    .with_retries(0)
}

fn catalog_fixture() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.duckdb");
    let conn = duckdb::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE hosp_admissions AS SELECT * FROM (VALUES \
           (20001, 10006, 'WHITE'), (20002, 10006, 'WHITE'), (20003, 10011, 'ASIAN') \
         ) t(hadm_id, subject_id, race);",
    )
    .unwrap();
    drop(conn);
    (dir, path)
}

fn race_template() -> SqlTemplate {
    SqlTemplate::new("SELECT race, COUNT(*) AS count FROM {hosp.admissions}")
        .push(" GROUP BY race ORDER BY count DESC LIMIT {@limit}")
        .bind("limit", 10u32)
}

#[tokio::test]
async fn test_backends_agree_on_race_distribution() {
    let (_dir, catalog) = catalog_fixture();
    let (base_url, state) = spawn_fake().await;

    let local = DuckDbBackend::new(&catalog);
    let remote = warehouse(&base_url);

    let local_result = local
        .run_query(&race_template().render(&local).unwrap())
        .await
        .unwrap();
    let remote_result = remote
        .run_query(&race_template().render(&remote).unwrap())
        .await
        .unwrap();

    assert_eq!(local_result.column_names(), remote_result.column_names());
    assert_eq!(local_result.rows, remote_result.rows);
    assert_eq!(local_result.rows[0]["count"], json!(2));

    let requests = state.requests.lock().unwrap();
    let sent = &requests[0];
    assert_eq!(sent["useLegacySql"], json!(false));
    assert_eq!(sent["parameterMode"], json!("NAMED"));
    assert_eq!(sent["queryParameters"][0]["name"], json!("limit"));
    assert_eq!(sent["queryParameters"][0]["parameterType"]["type"], json!("INT64"));
    assert!(
        sent["query"]
            .as_str()
            .unwrap()
            .contains("`proj.ds_hosp.admissions`")
    );
}

#[tokio::test]
async fn test_incomplete_job_is_polled() {
    let (base_url, state) = spawn_fake().await;
    let remote = warehouse(&base_url);

    let query = SqlValidator::new(m3_sql::SqlFlavor::BigQuery)
        .validate("SELECT 'slow' AS marker")
        .unwrap();
    let result = remote.run_query(&query).await.unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(*state.polls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_warehouse_errors_use_shared_taxonomy() {
    let (base_url, _state) = spawn_fake().await;
    let remote = warehouse(&base_url);

    let query = SqlValidator::new(m3_sql::SqlFlavor::BigQuery)
        .validate("SELECT no_such_column FROM `proj.ds_hosp.admissions`")
        .unwrap();
    let err = remote.run_query(&query).await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidQuery(_)), "{err:?}");
    assert_eq!(err.kind(), m3_core::ErrorKind::InvalidQuery);
}

#[tokio::test]
async fn test_unreachable_warehouse_is_unavailable() {
    // Nothing listens on the discard port.
    let remote = warehouse("http://127.0.0.1:9");
    let query = SqlValidator::new(m3_sql::SqlFlavor::BigQuery)
        .validate("SELECT 1")
        .unwrap();
    let err = remote.run_query(&query).await.unwrap_err();
    assert!(matches!(err, BackendError::BackendUnavailable(_)), "{err:?}");
}
