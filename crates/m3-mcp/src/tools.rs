//! Tool registry for MCP tools.
//!
//! The tool surface is fixed: six gateway operations plus the legacy
//! `execute_mimic_query` alias. Definitions carry JSON input schemas whose
//! numeric bounds come from the gateway limits.

use crate::params::{DEFAULT_ICU_STAYS_LIMIT, DEFAULT_LAB_RESULTS_LIMIT, DEFAULT_RACE_LIMIT};
use crate::protocol::{ToolAnnotations, ToolDefinition};
use m3_core::GatewayConfig;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Older clients call `execute_query` by this name.
pub const EXECUTE_QUERY_ALIAS: &str = "execute_mimic_query";

/// A gateway operation exposed as a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    GetDatabaseSchema,
    GetTableInfo,
    ExecuteQuery,
    GetIcuStays,
    GetLabResults,
    GetRaceDistribution,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::GetDatabaseSchema,
        Tool::GetTableInfo,
        Tool::ExecuteQuery,
        Tool::GetIcuStays,
        Tool::GetLabResults,
        Tool::GetRaceDistribution,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetDatabaseSchema => "get_database_schema",
            Self::GetTableInfo => "get_table_info",
            Self::ExecuteQuery => "execute_query",
            Self::GetIcuStays => "get_icu_stays",
            Self::GetLabResults => "get_lab_results",
            Self::GetRaceDistribution => "get_race_distribution",
        }
    }

    /// Resolve a tool name, accepting the legacy alias.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == EXECUTE_QUERY_ALIAS {
            return Some(Self::ExecuteQuery);
        }
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            Self::GetDatabaseSchema => {
                "List every table available in the active dataset. Call this first to discover \
                 table names such as hosp_admissions or icu_icustays."
            }
            Self::GetTableInfo => {
                "Describe one table: column names and types, plus a few sample rows."
            }
            Self::ExecuteQuery => {
                "Run a single read-only SELECT statement against the active dataset. Writes, \
                 DDL, multiple statements and file access are rejected."
            }
            Self::GetIcuStays => "ICU stays, optionally for one patient (subject_id).",
            Self::GetLabResults => {
                "Laboratory results, optionally filtered by patient (subject_id) and by a text \
                 match on the result value."
            }
            Self::GetRaceDistribution => "Admissions counted by race, most frequent first.",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::GetDatabaseSchema => "Database schema",
            Self::GetTableInfo => "Table info",
            Self::ExecuteQuery => "Execute query",
            Self::GetIcuStays => "ICU stays",
            Self::GetLabResults => "Lab results",
            Self::GetRaceDistribution => "Race distribution",
        }
    }

    fn input_schema(&self, limits: &GatewayConfig) -> Value {
        let limit = |default: i64| {
            json!({
                "type": "integer",
                "minimum": 1,
                "maximum": limits.max_limit,
                "default": default,
                "description": "Maximum number of rows to return"
            })
        };
        let patient_id = json!({
            "type": "integer",
            "exclusiveMinimum": 0,
            "exclusiveMaximum": limits.max_patient_id,
            "description": "Patient identifier (subject_id)"
        });

        match self {
            Self::GetDatabaseSchema => json!({"type": "object", "properties": {}}),
            Self::GetTableInfo => json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string", "description": "Table to describe"},
                    "show_sample": {"type": "boolean", "default": true}
                },
                "required": ["table_name"]
            }),
            Self::ExecuteQuery => json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string", "description": "A single SELECT statement"}
                },
                "required": ["sql"]
            }),
            Self::GetIcuStays => json!({
                "type": "object",
                "properties": {
                    "patient_id": patient_id,
                    "limit": limit(DEFAULT_ICU_STAYS_LIMIT)
                }
            }),
            Self::GetLabResults => json!({
                "type": "object",
                "properties": {
                    "patient_id": patient_id,
                    "lab_item": {
                        "type": "string",
                        "description": "Text matched against the result value"
                    },
                    "limit": limit(DEFAULT_LAB_RESULTS_LIMIT)
                }
            }),
            Self::GetRaceDistribution => json!({
                "type": "object",
                "properties": {"limit": limit(DEFAULT_RACE_LIMIT)}
            }),
        }
    }

    /// MCP definition of this tool.
    pub fn definition(&self, limits: &GatewayConfig) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(limits),
            annotations: Some(ToolAnnotations {
                title: Some(self.title().to_string()),
                read_only_hint: Some(true),
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            }),
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry of available MCP tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every gateway tool plus the `execute_query` alias.
    pub fn for_gateway(limits: &GatewayConfig) -> Self {
        let mut registry = Self::new();
        for tool in Tool::ALL {
            registry.register(tool.definition(limits));
        }
        let mut alias = Tool::ExecuteQuery.definition(limits);
        alias.name = EXECUTE_QUERY_ALIAS.to_string();
        alias.description = Some("Alias of execute_query.".to_string());
        registry.register(alias);
        registry
    }

    /// Register a tool.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tools, sorted by name.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.values().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
