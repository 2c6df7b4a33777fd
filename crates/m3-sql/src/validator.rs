//! Read-only query validation.

use crate::SqlFlavor;
use crate::error::Rejection;
use crate::query::ValidatedQuery;
use sqlparser::ast::Statement;
use sqlparser::dialect::{BigQueryDialect, Dialect, DuckDbDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Keywords that write, change schema, or reach outside the catalog.
const DENIED_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "ATTACH",
    "DETACH",
    "EXEC",
    "EXECUTE",
    "GRANT",
    "REVOKE",
    "MERGE",
    "COPY",
    "INSTALL",
    "LOAD",
    "CALL",
    "EXPORT",
    "IMPORT",
    "VACUUM",
    "CHECKPOINT",
    "INTO",
    "UPSERT",
    "SET",
    "RESET",
];

/// Table functions that read files, URLs or foreign databases.
const FILE_FUNCTIONS: &[&str] = &[
    "read_csv",
    "read_csv_auto",
    "read_parquet",
    "parquet_scan",
    "read_json",
    "read_json_auto",
    "read_ndjson",
    "read_ndjson_auto",
    "read_json_objects",
    "read_text",
    "read_blob",
    "read_xlsx",
    "sniff_csv",
    "parquet_metadata",
    "parquet_schema",
    "parquet_file_metadata",
    "parquet_kv_metadata",
    "glob",
    "sqlite_scan",
    "sqlite_attach",
    "postgres_scan",
    "postgres_attach",
    "mysql_scan",
    "iceberg_scan",
    "iceberg_metadata",
    "iceberg_snapshots",
    "delta_scan",
    "st_read",
    "query",
    "query_table",
    "external_query",
];

/// PRAGMAs that only describe the catalog.
const INTROSPECTION_PRAGMAS: &[&str] = &[
    "table_info",
    "show_tables",
    "show_tables_expanded",
    "show",
    "database_size",
    "database_list",
    "storage_info",
    "version",
    "platform",
];

/// Validates agent-supplied SQL for a given backend flavor.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    flavor: SqlFlavor,
}

impl SqlValidator {
    pub fn new(flavor: SqlFlavor) -> Self {
        Self { flavor }
    }

    pub fn flavor(&self) -> SqlFlavor {
        self.flavor
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        match self.flavor {
            SqlFlavor::DuckDb => Box::new(DuckDbDialect {}),
            SqlFlavor::BigQuery => Box::new(BigQueryDialect {}),
        }
    }

    /// Accept `sql` as a single read-only statement, or say why not.
    pub fn validate(&self, sql: &str) -> Result<ValidatedQuery, Rejection> {
        let result = self.check(sql);
        if let Err(rejection) = &result {
            tracing::debug!(
                flavor = %self.flavor,
                rule = rejection.rule(),
                "Rejected query"
            );
        }
        result
    }

    fn check(&self, sql: &str) -> Result<ValidatedQuery, Rejection> {
        let dialect = self.dialect();

        let tokens = Tokenizer::new(dialect.as_ref(), sql)
            .tokenize()
            .map_err(|e| Rejection::Malformed(e.to_string()))?;
        let significant: Vec<&Token> = tokens.iter().filter(|t| is_significant(t)).collect();

        if significant.is_empty() {
            return Err(Rejection::Empty);
        }

        self.check_keywords(&significant)?;
        self.check_file_access(&significant)?;
        check_stacking(&significant)?;
        let leading = self.check_leading(&significant)?;

        match leading {
            Leading::Query => self.check_parsed(sql)?,
            Leading::Pragma => check_pragma(&significant)?,
            // Token checks above already exclude every write form.
            Leading::Describe => {}
        }

        let text = sql.trim().trim_end_matches(';').trim_end().to_string();
        Ok(ValidatedQuery::new(text, Vec::new()))
    }

    fn check_keywords(&self, tokens: &[&Token]) -> Result<(), Rejection> {
        for token in tokens {
            if let Token::Word(word) = token {
                if word.quote_style.is_some() {
                    continue;
                }
                let upper = word.value.to_uppercase();
                if DENIED_KEYWORDS.contains(&upper.as_str()) {
                    return Err(Rejection::WriteOperation { keyword: upper });
                }
            }
        }
        Ok(())
    }

    fn check_file_access(&self, tokens: &[&Token]) -> Result<(), Rejection> {
        for (i, token) in tokens.iter().enumerate() {
            let next = tokens.get(i + 1).copied();

            if let Token::Word(word) = token {
                let name = word.value.to_lowercase();
                let is_call = matches!(next, Some(Token::LParen));
                let reads_files = FILE_FUNCTIONS.contains(&name.as_str())
                    || name.starts_with("read_")
                    || name.starts_with("parquet_");
                if is_call && reads_files {
                    return Err(Rejection::FileAccess { function: name });
                }

                // DuckDB scans `FROM 'file.csv'` and `FROM "file.csv"` directly.
                let in_table_position = word.quote_style.is_none()
                    && matches!(name.as_str(), "from" | "join");
                if in_table_position && self.flavor == SqlFlavor::DuckDb {
                    match next {
                        Some(Token::SingleQuotedString(path))
                        | Some(Token::DoubleQuotedString(path)) => {
                            return Err(Rejection::FileAccess { function: path.clone() });
                        }
                        Some(Token::Word(next_word))
                            if next_word.quote_style.is_some()
                                && next_word.value.contains(['.', '/', '\\']) =>
                        {
                            return Err(Rejection::FileAccess {
                                function: next_word.value.clone(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn check_leading(&self, tokens: &[&Token]) -> Result<Leading, Rejection> {
        let first = tokens[0];
        match first {
            Token::LParen => return Ok(Leading::Query),
            Token::Word(word) if word.quote_style.is_none() => {
                let upper = word.value.to_uppercase();
                match upper.as_str() {
                    "SELECT" | "WITH" => return Ok(Leading::Query),
                    "PRAGMA" if self.flavor == SqlFlavor::DuckDb => return Ok(Leading::Pragma),
                    "DESCRIBE" | "SHOW" if self.flavor == SqlFlavor::DuckDb => {
                        return Ok(Leading::Describe);
                    }
                    _ => return Err(Rejection::NotReadOnly { leading: upper }),
                }
            }
            _ => {}
        }
        Err(Rejection::NotReadOnly {
            leading: first.to_string(),
        })
    }

    fn check_parsed(&self, sql: &str) -> Result<(), Rejection> {
        let dialect = self.dialect();
        let statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| Rejection::Malformed(e.to_string()))?;

        if statements.len() != 1 {
            return Err(Rejection::MultipleStatements);
        }
        match &statements[0] {
            Statement::Query(_) => Ok(()),
            other => Err(Rejection::NotReadOnly {
                leading: statement_label(other),
            }),
        }
    }
}

enum Leading {
    Query,
    Pragma,
    Describe,
}

/// Comments are whitespace tokens.
fn is_significant(token: &Token) -> bool {
    !matches!(token, Token::Whitespace(_) | Token::EOF)
}

fn check_stacking(tokens: &[&Token]) -> Result<(), Rejection> {
    if let Some(pos) = tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
        if tokens[pos + 1..].iter().any(|t| !matches!(t, Token::SemiColon)) {
            return Err(Rejection::StackedStatements);
        }
    }
    Ok(())
}

/// `PRAGMA name`, `PRAGMA name(args)`; never an assignment.
fn check_pragma(tokens: &[&Token]) -> Result<(), Rejection> {
    let name = match tokens.get(1) {
        Some(Token::Word(word)) => word.value.to_lowercase(),
        Some(other) => return Err(Rejection::Malformed(format!("unexpected {other} after PRAGMA"))),
        None => return Err(Rejection::Malformed("PRAGMA without a name".to_string())),
    };
    if !INTROSPECTION_PRAGMAS.contains(&name.as_str()) {
        return Err(Rejection::DisallowedPragma { name });
    }
    if tokens.iter().any(|t| matches!(t, Token::Eq)) {
        return Err(Rejection::DisallowedPragma { name });
    }
    Ok(())
}

fn statement_label(statement: &Statement) -> String {
    let text = statement.to_string();
    text.split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}
