//! Gateway operations against a real DuckDB catalog.

mod common;

use common::Fixture;
use m3_audit::AuditEventType;
use m3_catalog::CatalogLocks;
use m3_core::ErrorKind;
use m3_mcp::{GatewayError, ToolResponse};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_select_returns_matching_row() {
    let fixture = Fixture::new();
    let gateway = fixture.gateway();

    let output = gateway
        .execute_query("SELECT name FROM patients WHERE id = 10")
        .await
        .unwrap();

    assert_eq!(output.backend, "duckdb (fixture)");
    assert_eq!(output.result.column_names(), vec!["name"]);
    assert_eq!(output.row_count(), 1);
    assert_eq!(
        serde_json::to_value(&output.result.rows).unwrap(),
        json!([{"name": "Jane"}])
    );
}

#[tokio::test]
async fn test_delete_is_rejected() {
    let fixture = Fixture::new();
    let gateway = fixture.gateway();

    let err = gateway.execute_query("DELETE FROM patients").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsafeQuery);
    assert_eq!(err.message(), "write operation not permitted");

    let rows = gateway.execute_query("SELECT COUNT(*) AS n FROM patients").await.unwrap();
    assert_eq!(rows.result.rows[0]["n"], 1);
}

#[tokio::test]
async fn test_missing_table_is_not_found() {
    let fixture = Fixture::new();
    let response = fixture
        .gateway()
        .call("get_table_info", json!({"table_name": "nonexistent_table"}), "local")
        .await;
    assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_table_info_lists_columns_and_sample() {
    let fixture = Fixture::new();
    let output = fixture
        .gateway()
        .get_table_info("HOSP_ADMISSIONS", true)
        .await
        .unwrap();

    assert_eq!(output.table.as_deref(), Some("hosp_admissions"));
    let columns: Vec<_> = output
        .result
        .rows
        .iter()
        .map(|row| row["column_name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(columns, vec!["subject_id", "hadm_id", "race"]);
    assert_eq!(output.sample.as_ref().map(|s| s.row_count), Some(3));

    let without = fixture
        .gateway()
        .get_table_info("hosp_admissions", false)
        .await
        .unwrap();
    assert_eq!(without.sample, None);
}

#[tokio::test]
async fn test_schema_lists_catalog_tables() {
    let fixture = Fixture::new();
    let output = fixture.gateway().get_database_schema().await.unwrap();
    let tables: Vec<_> = output
        .result
        .rows
        .iter()
        .map(|row| row["table_name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        tables,
        vec!["hosp_admissions", "hosp_labevents", "icu_icustays", "patients"]
    );
}

#[tokio::test]
async fn test_icu_stays_for_patient() {
    let fixture = Fixture::new();
    let output = fixture
        .gateway()
        .get_icu_stays(Some(10011), 10)
        .await
        .unwrap();
    assert_eq!(output.row_count(), 1);
    assert_eq!(output.result.rows[0]["stay_id"], 30002);
    assert_eq!(output.result.rows[0]["los"], 2.25);
}

#[tokio::test]
async fn test_lab_results_filter_by_item() {
    let fixture = Fixture::new();
    let gateway = fixture.gateway();

    let glucose = gateway
        .get_lab_results(Some(10006), Some("Glucose"), 20)
        .await
        .unwrap();
    assert_eq!(glucose.row_count(), 1);
    assert_eq!(glucose.result.rows[0]["value"], "Glucose 95");

    let injected = gateway
        .get_lab_results(None, Some("' OR 1=1 --"), 20)
        .await
        .unwrap();
    assert_eq!(injected.row_count(), 0);

    let limited = gateway.get_lab_results(None, None, 2).await.unwrap();
    assert_eq!(limited.row_count(), 2);
}

#[tokio::test]
async fn test_race_distribution_orders_by_count() {
    let fixture = Fixture::new();
    let output = fixture.gateway().get_race_distribution(10).await.unwrap();
    assert_eq!(
        serde_json::to_value(&output.result.rows).unwrap(),
        json!([{"race": "WHITE", "count": 2}, {"race": "ASIAN", "count": 1}])
    );
}

#[tokio::test]
async fn test_parameter_violations() {
    let fixture = Fixture::new();
    let gateway = fixture.gateway();

    for err in [
        gateway.get_icu_stays(Some(0), 10).await.unwrap_err(),
        gateway.get_icu_stays(None, 1001).await.unwrap_err(),
        gateway.get_lab_results(Some(999_999_999), None, 5).await.unwrap_err(),
        gateway.get_race_distribution(-1).await.unwrap_err(),
    ] {
        assert!(matches!(err, GatewayError::InvalidArgument(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }
}

#[tokio::test]
async fn test_engine_errors_keep_their_kind() {
    let fixture = Fixture::new();
    let response = fixture
        .gateway()
        .call("execute_query", json!({"sql": "SELECT no_such_column FROM patients"}), "local")
        .await;
    let ToolResponse::Error { error } = response else {
        panic!("expected an error response");
    };
    assert_eq!(error.kind, ErrorKind::InvalidQuery);
    assert!(!error.message.contains(fixture.dir.path().to_str().unwrap()));

    let failed: Vec<_> = fixture
        .audit
        .events()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::QueryFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].sql.as_deref(),
        Some("SELECT no_such_column FROM patients")
    );
}

#[tokio::test]
async fn test_queries_wait_for_dataset_writer() {
    let fixture = Fixture::new();
    let locks = CatalogLocks::new();
    let gateway = fixture.gateway().with_locks(locks.clone(), "fixture");

    let writer = locks.write("fixture").await;
    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        gateway.execute_query("SELECT 1 AS one"),
    )
    .await;
    assert!(blocked.is_err());

    drop(writer);
    let output = gateway.execute_query("SELECT 1 AS one").await.unwrap();
    assert_eq!(output.result.rows[0]["one"], 1);
}
