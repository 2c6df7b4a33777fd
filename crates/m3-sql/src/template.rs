//! Constant SQL with named parameter slots.
//!
//! Template text only accepts `&'static str` fragments, so user input can
//! reach the SQL solely through bound parameters. Two slot forms exist:
//!
//! - `{module.table}`: a table reference, resolved by the target backend
//! - `{@name}`: a bound parameter, rendered as the backend's placeholder

use crate::SqlFlavor;
use crate::query::{QueryParam, ValidatedQuery};
use m3_core::ErrorKind;
use std::collections::BTreeMap;
use thiserror::Error;

/// Naming rules of the backend a template renders for.
pub trait SqlTarget {
    fn flavor(&self) -> SqlFlavor;

    /// Fully qualified reference to `table` of `module` (e.g. `icu`, `icustays`).
    fn table_ref(&self, module: &str, table: &str) -> String;

    fn placeholder(&self, name: &str) -> String {
        self.flavor().placeholder(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("parameter '{0}' is not bound")]
    Unbound(String),

    #[error("parameter '{0}' is bound but never used")]
    Unused(String),

    #[error("invalid template slot '{{{0}}}'")]
    BadSlot(String),

    #[error("unterminated template slot")]
    Unterminated,
}

impl TemplateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExecutionError
    }
}

/// Builder for a parameterized query.
#[derive(Debug, Clone, Default)]
pub struct SqlTemplate {
    text: String,
    bindings: BTreeMap<String, QueryParam>,
}

impl SqlTemplate {
    pub fn new(text: &'static str) -> Self {
        Self {
            text: text.to_string(),
            bindings: BTreeMap::new(),
        }
    }

    /// Append another constant fragment.
    pub fn push(mut self, text: &'static str) -> Self {
        self.text.push_str(text);
        self
    }

    /// Append a fragment only when `condition` holds.
    pub fn push_if(self, condition: bool, text: &'static str) -> Self {
        if condition { self.push(text) } else { self }
    }

    pub fn bind(mut self, name: &str, value: impl Into<QueryParam>) -> Self {
        self.bindings.insert(name.to_string(), value.into());
        self
    }

    /// Render for `target`, resolving table slots and placeholders.
    pub fn render<T: SqlTarget + ?Sized>(&self, target: &T) -> Result<ValidatedQuery, TemplateError> {
        let flavor = target.flavor();
        let mut sql = String::with_capacity(self.text.len() + 32);
        let mut params: Vec<(String, QueryParam)> = Vec::new();
        let mut rest = self.text.as_str();

        while let Some(start) = rest.find('{') {
            sql.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or(TemplateError::Unterminated)?;
            let slot = after[..end].trim();

            if let Some(name) = slot.strip_prefix('@') {
                let value = self
                    .bindings
                    .get(name)
                    .ok_or_else(|| TemplateError::Unbound(name.to_string()))?;
                sql.push_str(&target.placeholder(name));
                if flavor.positional_params() || !params.iter().any(|(n, _)| n == name) {
                    params.push((name.to_string(), value.clone()));
                }
            } else {
                match slot.split_once('.') {
                    Some((module, table))
                        if is_identifier(module) && is_identifier(table) =>
                    {
                        sql.push_str(&target.table_ref(module, table));
                    }
                    _ => return Err(TemplateError::BadSlot(slot.to_string())),
                }
            }
            rest = &after[end + 1..];
        }
        sql.push_str(rest);

        if let Some(unused) = self
            .bindings
            .keys()
            .find(|name| !params.iter().any(|(n, _)| n == *name))
        {
            return Err(TemplateError::Unused(unused.clone()));
        }

        Ok(ValidatedQuery::new(sql, params))
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Local;

    impl SqlTarget for Local {
        fn flavor(&self) -> SqlFlavor {
            SqlFlavor::DuckDb
        }

        fn table_ref(&self, module: &str, table: &str) -> String {
            format!("{module}_{table}")
        }
    }

    struct Warehouse;

    impl SqlTarget for Warehouse {
        fn flavor(&self) -> SqlFlavor {
            SqlFlavor::BigQuery
        }

        fn table_ref(&self, module: &str, table: &str) -> String {
            format!("`proj.ds_{module}.{table}`")
        }
    }

    fn stays() -> SqlTemplate {
        SqlTemplate::new("SELECT * FROM {icu.icustays}")
            .push(" WHERE subject_id = {@patient_id} OR hadm_id = {@patient_id}")
            .push(" LIMIT {@limit}")
            .bind("patient_id", 10006i64)
            .bind("limit", 10u32)
    }

    #[test]
    fn test_render_positional() {
        let query = stays().render(&Local).unwrap();
        assert_eq!(
            query.sql(),
            "SELECT * FROM icu_icustays WHERE subject_id = ? OR hadm_id = ? LIMIT ?"
        );
        let names: Vec<&str> = query.params().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["patient_id", "patient_id", "limit"]);
    }

    #[test]
    fn test_render_named() {
        let query = stays().render(&Warehouse).unwrap();
        assert_eq!(
            query.sql(),
            "SELECT * FROM `proj.ds_icu.icustays` WHERE subject_id = @patient_id OR hadm_id = @patient_id LIMIT @limit"
        );
        assert_eq!(query.params().len(), 2);
    }

    #[test]
    fn test_unbound_and_unused() {
        let err = SqlTemplate::new("SELECT {@x}").render(&Local).unwrap_err();
        assert_eq!(err, TemplateError::Unbound("x".into()));

        let err = SqlTemplate::new("SELECT 1").bind("x", 1i64).render(&Local).unwrap_err();
        assert_eq!(err, TemplateError::Unused("x".into()));
    }

    #[test]
    fn test_bad_slots() {
        assert!(matches!(
            SqlTemplate::new("SELECT * FROM {icustays}").render(&Local),
            Err(TemplateError::BadSlot(_))
        ));
        assert_eq!(
            SqlTemplate::new("SELECT * FROM {icu.icustays").render(&Local),
            Err(TemplateError::Unterminated)
        );
    }

    #[test]
    fn test_push_if() {
        let query = SqlTemplate::new("SELECT 1")
            .push_if(false, " WHERE false")
            .render(&Local)
            .unwrap();
        assert_eq!(query.sql(), "SELECT 1");
    }
}
