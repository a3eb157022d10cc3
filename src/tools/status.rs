//! `gateway_status` and the `database://config` / `database://status`
//! resources: what the gateway is connected to and whether it is up.

use crate::db::PoolStatus;
use crate::error::GatewayResult;
use crate::gateway::Gateway;
use crate::models::{BackendKind, Command, CommandResult, Engine, InstanceSummary};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONFIG_RESOURCE_URI: &str = "database://config";
pub const STATUS_RESOURCE_URI: &str = "database://status";

/// Key written and removed by the key-value status check.
pub const CONNECTION_TEST_KEY: &str = "test:connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    ConnectionError,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GatewayStatusOutput {
    pub backend: BackendKind,
    /// Active instance with the password redacted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceSummary>,
    pub healthy: bool,
    pub status: ConnectionState,
    /// Tables visible to the active SQL instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<u64>,
    /// Pool occupancy; absent before first use and for the remote backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
    /// Why no active instance could be selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `database://config`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResource {
    pub backend: BackendKind,
    #[serde(flatten)]
    pub instance: InstanceSummary,
    pub pool_size: u32,
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub connection_timeout: f64,
}

/// Body of `database://status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionCheck {
    pub ping: bool,
    /// Value read back after writing `CONNECTION_TEST_KEY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_get: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct StatusToolHandler {
    gateway: Arc<Gateway>,
}

impl StatusToolHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Never fails: selection problems are reported in `error`.
    pub async fn gateway_status(&self) -> GatewayStatusOutput {
        let (instance, error) = match self.gateway.describe_active_instance() {
            Ok(summary) => (Some(summary), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let healthy = instance.is_some() && self.gateway.health_check().await;

        let table_count = match (&instance, healthy) {
            (Some(summary), true) => match self.count_tables(summary.engine).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "Table count failed");
                    None
                }
            },
            _ => None,
        };
        let sql_counted = self.gateway.backend_kind() == BackendKind::Kv || table_count.is_some();
        let status = if healthy && sql_counted {
            ConnectionState::Connected
        } else {
            ConnectionState::ConnectionError
        };

        GatewayStatusOutput {
            backend: self.gateway.backend_kind(),
            instance,
            healthy,
            status,
            table_count,
            pool: self.gateway.pool_status().await,
            error,
        }
    }

    /// Redacted active instance plus the pool limits.
    pub fn config_resource(&self) -> GatewayResult<ConfigResource> {
        let instance = self.gateway.describe_active_instance()?;
        let pool = &self.gateway.config().pool;
        Ok(ConfigResource {
            backend: self.gateway.backend_kind(),
            instance,
            pool_size: pool.min_size,
            max_connections: pool.max_size,
            connection_timeout: pool.acquire_timeout.as_secs_f64(),
        })
    }

    /// Live round trip against the active instance. Failures are reported
    /// in `error`, never returned.
    pub async fn status_resource(&self) -> ConnectionCheck {
        let result = match self.gateway.backend_kind() {
            BackendKind::Kv => self.check_kv().await,
            BackendKind::Sql | BackendKind::Remote => self.check_sql().await,
        };
        result.unwrap_or_else(|e| ConnectionCheck {
            error: Some(e.to_string()),
            ..ConnectionCheck::default()
        })
    }

    async fn check_kv(&self) -> GatewayResult<ConnectionCheck> {
        let ping = self
            .gateway
            .execute(Command::named("ping", Vec::<String>::new()))
            .await?;
        self.gateway
            .execute(Command::named("set", [CONNECTION_TEST_KEY, "ok"]))
            .await?;
        let read = self
            .gateway
            .execute(Command::named("get", [CONNECTION_TEST_KEY]))
            .await?;
        self.gateway
            .execute(Command::named("del", [CONNECTION_TEST_KEY]))
            .await?;
        debug!(ping = ?ping, read = ?read, "Key-value connection check finished");

        Ok(ConnectionCheck {
            ping: ping.value() == Some(&JsonValue::Bool(true)),
            set_get: read.value().cloned(),
            ..ConnectionCheck::default()
        })
    }

    async fn check_sql(&self) -> GatewayResult<ConnectionCheck> {
        let instance = self.gateway.describe_active_instance()?;
        let ping = self.gateway.health_check().await;
        let table_count = if ping {
            self.count_tables(instance.engine).await?
        } else {
            None
        };
        Ok(ConnectionCheck {
            ping,
            table_count,
            ..ConnectionCheck::default()
        })
    }

    async fn count_tables(&self, engine: Engine) -> GatewayResult<Option<u64>> {
        let Some(sql) = table_count_statement(engine) else {
            return Ok(None);
        };
        let result = self.gateway.execute(Command::sql(sql)).await?;
        let CommandResult::RowSet(rows) = result else {
            return Ok(None);
        };
        if engine == Engine::MySQL {
            return Ok(Some(rows.len() as u64));
        }
        Ok(rows.first().and_then(|row| row.get("n")).and_then(count_value))
    }
}

/// Statement listing (MySQL) or counting (others) the instance's tables.
fn table_count_statement(engine: Engine) -> Option<&'static str> {
    match engine {
        Engine::MySQL => Some("SHOW TABLES"),
        Engine::PostgreSQL => Some(
            "SELECT count(*) AS n FROM information_schema.tables \
             WHERE table_schema = current_schema()",
        ),
        Engine::SQLite => Some(
            "SELECT count(*) AS n FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        ),
        Engine::Redis => None,
    }
}

fn count_value(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}
