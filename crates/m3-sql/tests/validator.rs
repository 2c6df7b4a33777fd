//! Validator behavior across both flavors, including generated inputs.

use m3_sql::{Rejection, SqlFlavor, SqlValidator};
use proptest::prelude::*;

const DENIED: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "ATTACH", "COPY",
    "INSTALL", "LOAD", "EXPORT", "MERGE", "GRANT",
];

fn flavors() -> [SqlValidator; 2] {
    [
        SqlValidator::new(SqlFlavor::DuckDb),
        SqlValidator::new(SqlFlavor::BigQuery),
    ]
}

#[test]
fn test_agent_style_exploration_queries() {
    let duck = SqlValidator::new(SqlFlavor::DuckDb);
    for sql in [
        "SELECT COUNT(*) FROM hosp_admissions",
        "SELECT race, COUNT(*) AS n FROM hosp_admissions GROUP BY race ORDER BY n DESC LIMIT 10",
        "SELECT a.subject_id, i.stay_id FROM hosp_admissions a \
         JOIN icu_icustays i ON a.hadm_id = i.hadm_id WHERE a.subject_id = 10006 LIMIT 5",
        "WITH labs AS (SELECT * FROM hosp_labevents WHERE value LIKE '%glucose%') \
         SELECT COUNT(*) FROM labs",
        "SELECT table_name FROM information_schema.tables WHERE table_schema = 'main'",
    ] {
        assert!(duck.validate(sql).is_ok(), "rejected: {sql}");
    }
}

#[test]
fn test_warehouse_qualified_names() {
    let bq = SqlValidator::new(SqlFlavor::BigQuery);
    bq.validate(
        "SELECT subject_id, stay_id FROM `physionet-data.mimiciv_3_1_icu.icustays` LIMIT 10",
    )
    .unwrap();
}

#[test]
fn test_write_rejected_in_every_flavor() {
    for validator in flavors() {
        for sql in [
            "DROP TABLE hosp_patients",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET x = 1",
            "delete from t",
            "CREATE TABLE t AS SELECT 1",
            "SELECT 1; DROP TABLE x;",
        ] {
            let err = validator.validate(sql).unwrap_err();
            assert!(
                matches!(err, Rejection::WriteOperation { .. }),
                "{sql} -> {err:?}"
            );
            assert_eq!(err.to_string(), "write operation not permitted");
        }
    }
}

#[test]
fn test_attach_and_install_rejected() {
    let duck = SqlValidator::new(SqlFlavor::DuckDb);
    for sql in [
        "ATTACH '/tmp/other.duckdb' AS other",
        "INSTALL httpfs",
        "LOAD httpfs",
        "COPY hosp_patients TO '/tmp/out.csv'",
        "EXPORT DATABASE '/tmp/dump'",
    ] {
        assert!(
            matches!(duck.validate(sql), Err(Rejection::WriteOperation { .. })),
            "accepted: {sql}"
        );
    }
}

#[test]
fn test_stacked_reads_rejected() {
    for validator in flavors() {
        assert_eq!(
            validator.validate("SELECT 1; SELECT 2").unwrap_err(),
            Rejection::StackedStatements
        );
    }
}

fn identifier() -> impl Strategy<Value = String> {
    // The `c_` prefix keeps generated names clear of every SQL keyword.
    "c_[a-z0-9_]{0,12}"
}

prop_compose! {
    fn arb_select()(
        columns in prop::collection::vec(identifier(), 1..5),
        table in identifier(),
        filter in identifier(),
        value in any::<i32>(),
        limit in 1u32..1000,
    ) -> String {
        format!(
            "SELECT {} FROM {table} WHERE {filter} = {value} LIMIT {limit}",
            columns.join(", ")
        )
    }
}

prop_compose! {
    fn arb_smuggled_write()(
        prefix in arb_select(),
        keyword in prop::sample::select(DENIED),
        target in identifier(),
        lowercase in any::<bool>(),
        comment in any::<bool>(),
    ) -> String {
        let keyword = if lowercase { keyword.to_lowercase() } else { keyword.to_string() };
        let glue = if comment { "; /* cleanup */ " } else { "; " };
        format!("{prefix}{glue}{keyword} {target}")
    }
}

proptest! {
    #[test]
    fn test_generated_selects_are_accepted(sql in arb_select()) {
        for validator in flavors() {
            prop_assert!(validator.validate(&sql).is_ok(), "rejected: {}", sql);
        }
    }

    #[test]
    fn test_generated_writes_are_rejected(sql in arb_smuggled_write()) {
        for validator in flavors() {
            let rejected = matches!(
                validator.validate(&sql),
                Err(Rejection::WriteOperation { .. })
            );
            prop_assert!(rejected, "accepted: {}", sql);
        }
    }

    #[test]
    fn test_keywords_inside_literals_are_inert(
        query in arb_select(),
        keyword in prop::sample::select(DENIED),
    ) {
        let sql = format!("{query} -- {keyword} everything\n");
        let literal = format!("SELECT '{keyword} it' AS c_note");
        for validator in flavors() {
            prop_assert!(validator.validate(&sql).is_ok(), "rejected: {}", sql);
            prop_assert!(validator.validate(&literal).is_ok(), "rejected: {}", literal);
        }
    }

    #[test]
    fn test_validator_never_panics(sql in "\\PC{0,80}") {
        for validator in flavors() {
            let _ = validator.validate(&sql);
        }
    }
}
