//! Shared fixture: a small DuckDB catalog shaped like MIMIC-IV.

use m3_audit::{AuditLogger, MemoryStorage};
use m3_backend::DuckDbBackend;
use m3_core::{AuditConfig, GatewayConfig};
use m3_mcp::QueryGateway;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub catalog: PathBuf,
    pub audit: Arc<MemoryStorage>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("fixture.duckdb");
        let conn = duckdb::Connection::open(&catalog).unwrap();
        conn.execute_batch(
            "CREATE TABLE patients (id INTEGER, name VARCHAR);
             INSERT INTO patients VALUES (10, 'Jane');

             CREATE TABLE hosp_admissions (subject_id INTEGER, hadm_id INTEGER, race VARCHAR);
             INSERT INTO hosp_admissions VALUES
                 (10006, 1, 'WHITE'), (10011, 2, 'WHITE'), (10020, 3, 'ASIAN');

             CREATE TABLE icu_icustays (subject_id INTEGER, hadm_id INTEGER, stay_id INTEGER, los DOUBLE);
             INSERT INTO icu_icustays VALUES (10006, 1, 30001, 1.5), (10011, 2, 30002, 2.25);

             CREATE TABLE hosp_labevents (subject_id INTEGER, itemid INTEGER, value VARCHAR, valuenum DOUBLE);
             INSERT INTO hosp_labevents VALUES
                 (10006, 50931, 'Glucose 95', 95.0),
                 (10006, 50912, 'Creatinine 1.1', 1.1),
                 (10011, 50931, 'Glucose 140', 140.0);",
        )
        .unwrap();
        drop(conn);

        Self {
            dir,
            catalog,
            audit: Arc::new(MemoryStorage::new()),
        }
    }

    pub fn gateway(&self) -> QueryGateway {
        let backend = DuckDbBackend::new(self.catalog.clone()).with_dataset("fixture");
        QueryGateway::new(Arc::new(backend), GatewayConfig::default()).with_audit(
            AuditLogger::with_storage(AuditConfig::default(), self.audit.clone()),
        )
    }
}
