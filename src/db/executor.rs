//! SQL statement execution.
//!
//! Statements are classified by their leading keyword and executed on a leased
//! connection:
//! - queries (`SELECT`, `SHOW`, `DESCRIBE`, `DESC`) return a row set,
//! - mutations (`INSERT`, `UPDATE`, `DELETE`) return an affected-row count,
//! - everything else (DDL and friends) is acknowledged without payload.
//!
//! Each dialect lives in its own submodule; the code structure is intentionally
//! parallel to make differences obvious.

use crate::db::pool::SqlLease;
use crate::db::types::RowToJson;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{CommandResult, SqlParam};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Statement family, decided from the leading keyword only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Mutation,
    Other,
}

impl StatementKind {
    /// Classify by leading keyword, ignoring case and leading whitespace.
    pub fn classify(sql: &str) -> Self {
        let keyword: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();

        match keyword.as_str() {
            "SELECT" | "SHOW" | "DESCRIBE" | "DESC" => Self::Query,
            "INSERT" | "UPDATE" | "DELETE" => Self::Mutation,
            _ => Self::Other,
        }
    }
}

/// Best-effort affected-row count from a status payload.
///
/// Numbers are taken as-is, strings contribute their trailing integer token
/// (`"UPDATE 5"` is 5), and objects are searched for a count field. Anything
/// unparseable counts as 0: the mutation itself already succeeded.
pub fn parse_affected_count(status: &JsonValue) -> u64 {
    match status {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        JsonValue::String(s) => s
            .split_whitespace()
            .last()
            .and_then(|token| token.parse::<u64>().ok())
            .unwrap_or(0),
        JsonValue::Object(map) => ["affected_rows", "affectedRows", "rowcount", "rows_affected"]
            .iter()
            .find_map(|key| map.get(*key))
            .map(parse_affected_count)
            .unwrap_or(0),
        JsonValue::Array(items) if items.len() == 1 => parse_affected_count(&items[0]),
        _ => 0,
    }
}

/// Executes one statement on a leased connection within a time bound.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    statement_timeout: Duration,
}

impl SqlExecutor {
    pub fn new(statement_timeout: Duration) -> Self {
        Self { statement_timeout }
    }

    /// Run `sql` and normalize the outcome by statement kind.
    ///
    /// On timeout the lease is marked for discard, since the connection may
    /// still be mid-statement.
    pub async fn execute(
        &self,
        lease: &mut SqlLease,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<CommandResult> {
        let kind = StatementKind::classify(sql);
        let start = Instant::now();

        debug!(
            sql = %sql,
            params = params.len(),
            kind = ?kind,
            timeout_ms = self.statement_timeout.as_millis() as u64,
            "Executing statement"
        );

        let outcome = timeout(self.statement_timeout, run(lease, kind, sql, params)).await;
        match outcome {
            Ok(result) => {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Statement finished");
                result
            }
            Err(_) => {
                lease.discard();
                Err(GatewayError::timeout("statement execution", self.statement_timeout))
            }
        }
    }
}

async fn run(
    lease: &mut SqlLease,
    kind: StatementKind,
    sql: &str,
    params: &[SqlParam],
) -> GatewayResult<CommandResult> {
    match kind {
        StatementKind::Query => {
            let rows = match lease {
                SqlLease::MySql(c) => to_json_rows(mysql::fetch_rows(c, sql, params).await?),
                SqlLease::Postgres(c) => to_json_rows(postgres::fetch_rows(c, sql, params).await?),
                SqlLease::SQLite(c) => to_json_rows(sqlite::fetch_rows(c, sql, params).await?),
            };
            Ok(CommandResult::RowSet(rows))
        }
        StatementKind::Mutation | StatementKind::Other => {
            let affected = match lease {
                SqlLease::MySql(c) => mysql::execute(c, sql, params).await?,
                SqlLease::Postgres(c) => postgres::execute(c, sql, params).await?,
                SqlLease::SQLite(c) => sqlite::execute(c, sql, params).await?,
            };
            if kind == StatementKind::Mutation {
                Ok(CommandResult::AffectedCount(affected))
            } else {
                Ok(CommandResult::Acknowledged)
            }
        }
    }
}

fn to_json_rows<R: RowToJson>(rows: Vec<R>) -> Vec<serde_json::Map<String, JsonValue>> {
    rows.iter().map(|r| r.to_json_map()).collect()
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::mysql::MySqlRow;
    use sqlx::pool::PoolConnection;
    use sqlx::{Executor, MySql};

    pub async fn fetch_rows(
        conn: &mut PoolConnection<MySql>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<Vec<MySqlRow>> {
        // When params is empty, use raw SQL to avoid prepared statement issues
        // (SHOW and DESCRIBE are not preparable on every server)
        let rows = if params.is_empty() {
            (&mut **conn).fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_all(&mut **conn).await?
        };
        Ok(rows)
    }

    pub async fn execute(
        conn: &mut PoolConnection<MySql>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<u64> {
        let result = if params.is_empty() {
            (&mut **conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(&mut **conn).await?
        };
        Ok(result.rows_affected())
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::pool::PoolConnection;
    use sqlx::postgres::PgRow;
    use sqlx::{Executor, Postgres};

    pub async fn fetch_rows(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<Vec<PgRow>> {
        let rows = if params.is_empty() {
            (&mut **conn).fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch_all(&mut **conn).await?
        };
        Ok(rows)
    }

    pub async fn execute(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<u64> {
        let result = if params.is_empty() {
            (&mut **conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.execute(&mut **conn).await?
        };
        Ok(result.rows_affected())
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::pool::PoolConnection;
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Executor, Sqlite};

    pub async fn fetch_rows(
        conn: &mut PoolConnection<Sqlite>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<Vec<SqliteRow>> {
        let rows = if params.is_empty() {
            (&mut **conn).fetch_all(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_all(&mut **conn).await?
        };
        Ok(rows)
    }

    pub async fn execute(
        conn: &mut PoolConnection<Sqlite>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<u64> {
        let result = if params.is_empty() {
            (&mut **conn).execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(&mut **conn).await?
        };
        Ok(result.rows_affected())
    }
}
