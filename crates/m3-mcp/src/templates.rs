//! SQL behind the convenience tools.
//!
//! Every fragment is a `&'static str`; agent input only ever reaches the
//! backend as a bound parameter.

use m3_sql::SqlTemplate;

pub fn icu_stays(patient_id: Option<i64>, limit: i64) -> SqlTemplate {
    let mut template = SqlTemplate::new("SELECT * FROM {icu.icustays}")
        .push_if(patient_id.is_some(), " WHERE subject_id = {@patient_id}")
        .push(" LIMIT {@limit}")
        .bind("limit", limit);
    if let Some(id) = patient_id {
        template = template.bind("patient_id", id);
    }
    template
}

/// `lab_item` must already be sanitized; it is matched as `%item%`.
pub fn lab_results(patient_id: Option<i64>, lab_item: Option<&str>, limit: i64) -> SqlTemplate {
    let filter = match (patient_id, lab_item) {
        (Some(_), Some(_)) => " WHERE subject_id = {@patient_id} AND value LIKE {@lab_item}",
        (Some(_), None) => " WHERE subject_id = {@patient_id}",
        (None, Some(_)) => " WHERE value LIKE {@lab_item}",
        (None, None) => "",
    };
    let mut template = SqlTemplate::new("SELECT * FROM {hosp.labevents}")
        .push(filter)
        .push(" LIMIT {@limit}")
        .bind("limit", limit);
    if let Some(id) = patient_id {
        template = template.bind("patient_id", id);
    }
    if let Some(item) = lab_item {
        template = template.bind("lab_item", format!("%{item}%"));
    }
    template
}

pub fn race_distribution(limit: i64) -> SqlTemplate {
    SqlTemplate::new(
        "SELECT race, COUNT(*) AS count FROM {hosp.admissions} \
         GROUP BY race ORDER BY count DESC LIMIT {@limit}",
    )
    .bind("limit", limit)
}
