//! SQL tools: `sql_exec`, `describe_table`, and `query_with_limit`.
//!
//! All three run through `Gateway::execute`, so they work on both the pooled
//! SQL backend and the remote proxy.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::models::{Command, CommandResult, Engine, SqlParam};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub const DEFAULT_ROW_LIMIT: u32 = 100;
pub const MAX_ROW_LIMIT: u32 = 10_000;
const MAX_IDENTIFIER_LEN: usize = 128;

/// Input for the sql_exec tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SqlExecInput {
    /// SQL statement to execute (SELECT, INSERT/UPDATE/DELETE, DDL, ...)
    pub sql: String,
    /// Positional parameters (use ? or $1,$2... placeholders in SQL)
    #[serde(default)]
    pub params: Vec<SqlParam>,
}

/// Output from the sql_exec tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SqlExecOutput {
    /// Normalized result: row_set, affected_count, or acknowledged
    pub result: CommandResult,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Table name, optionally schema-qualified (e.g. "orders" or "sales.orders")
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub table_name: String,
    /// One entry per column, as reported by the database
    pub columns: Vec<Map<String, JsonValue>>,
}

fn default_limit() -> u32 {
    DEFAULT_ROW_LIMIT
}

/// Input for the query_with_limit tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryWithLimitInput {
    /// SELECT statement. A LIMIT clause is appended when the statement has none.
    pub sql: String,
    /// Maximum rows to return. Default: 100, max: 10000
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryWithLimitOutput {
    pub rows: Vec<Map<String, JsonValue>>,
    pub row_count: usize,
    /// The statement actually sent, after LIMIT was applied
    pub executed_sql: String,
    pub execution_time_ms: u64,
}

pub struct SqlToolHandler {
    gateway: Arc<Gateway>,
}

impl SqlToolHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn sql_exec(&self, input: SqlExecInput) -> GatewayResult<SqlExecOutput> {
        let start = Instant::now();
        let result = self
            .gateway
            .execute(Command::sql_with_params(input.sql, input.params))
            .await?;
        Ok(SqlExecOutput {
            result,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> GatewayResult<DescribeTableOutput> {
        let table = validate_identifier(&input.table_name)?;
        let engine = self.gateway.describe_active_instance()?.engine;
        let sql = describe_statement(engine, table);
        info!(table = %table, engine = %engine, "Describing table");

        let result = self.gateway.execute(Command::sql(sql)).await?;
        Ok(DescribeTableOutput {
            table_name: table.to_string(),
            columns: into_rows(result),
        })
    }

    pub async fn query_with_limit(
        &self,
        input: QueryWithLimitInput,
    ) -> GatewayResult<QueryWithLimitOutput> {
        if !(1..=MAX_ROW_LIMIT).contains(&input.limit) {
            return Err(GatewayError::invalid_input(format!(
                "limit must be between 1 and {}",
                MAX_ROW_LIMIT
            )));
        }
        if leading_keyword(&input.sql) != "SELECT" {
            return Err(GatewayError::invalid_input(
                "query_with_limit only accepts SELECT statements; use sql_exec for anything else",
            ));
        }

        let sql = apply_limit(&input.sql, input.limit);
        let start = Instant::now();
        let result = self.gateway.execute(Command::sql(sql.clone())).await?;
        let rows = into_rows(result);
        Ok(QueryWithLimitOutput {
            row_count: rows.len(),
            rows,
            executed_sql: sql,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn into_rows(result: CommandResult) -> Vec<Map<String, JsonValue>> {
    match result {
        CommandResult::RowSet(rows) => rows,
        _ => Vec::new(),
    }
}

/// Accept letters, digits, `_`, `$`, and `.` between non-empty parts.
pub fn validate_identifier(name: &str) -> GatewayResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GatewayError::invalid_input("table name cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(GatewayError::invalid_input(format!(
            "table name is longer than {} characters",
            MAX_IDENTIFIER_LEN
        )));
    }
    let valid = name.split('.').all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    });
    if !valid {
        return Err(GatewayError::invalid_input(format!(
            "invalid table name '{}': only letters, digits, '_', '$' and '.' are allowed",
            name
        )));
    }
    Ok(name)
}

/// Column listing for a validated identifier.
fn describe_statement(engine: Engine, table: &str) -> String {
    match engine {
        Engine::PostgreSQL => {
            let (schema, name) = match table.rsplit_once('.') {
                Some((schema, name)) => (schema, name),
                None => ("public", table),
            };
            format!(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = '{}' AND table_name = '{}' \
                 ORDER BY ordinal_position",
                schema, name
            )
        }
        Engine::SQLite => format!("SELECT * FROM pragma_table_info('{}')", table),
        Engine::MySQL | Engine::Redis => format!("DESCRIBE {}", table),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Append `LIMIT n` unless the statement already has a LIMIT word.
fn apply_limit(sql: &str, limit: u32) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let has_limit = trimmed
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word.eq_ignore_ascii_case("limit"));
    if has_limit {
        trimmed.to_string()
    } else {
        format!("{} LIMIT {}", trimmed, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert_eq!(validate_identifier(" orders ").unwrap(), "orders");
        assert!(validate_identifier("sales.order_items").is_ok());
        assert!(validate_identifier("t$1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a.").is_err());
        assert!(validate_identifier("orders; DROP TABLE x").is_err());
        assert!(validate_identifier("o'rders").is_err());
        assert!(validate_identifier(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_describe_statement_per_engine() {
        assert_eq!(describe_statement(Engine::MySQL, "orders"), "DESCRIBE orders");
        assert_eq!(
            describe_statement(Engine::SQLite, "orders"),
            "SELECT * FROM pragma_table_info('orders')"
        );
        let pg = describe_statement(Engine::PostgreSQL, "sales.orders");
        assert!(pg.contains("table_schema = 'sales'"));
        assert!(pg.contains("table_name = 'orders'"));
        assert!(describe_statement(Engine::PostgreSQL, "orders").contains("'public'"));
    }

    #[test]
    fn test_apply_limit() {
        assert_eq!(apply_limit("SELECT * FROM t;", 10), "SELECT * FROM t LIMIT 10");
        assert_eq!(
            apply_limit("select * from t limit 5", 10),
            "select * from t limit 5"
        );
        // Column names containing "limit" are not a LIMIT clause
        assert_eq!(
            apply_limit("SELECT rate_limit FROM t", 3),
            "SELECT rate_limit FROM t LIMIT 3"
        );
    }

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  select 1"), "SELECT");
        assert_eq!(leading_keyword("WITH x AS (SELECT 1) SELECT * FROM x"), "WITH");
        assert_eq!(leading_keyword(""), "");
    }
}
