//! The gateway: one active backend, one entry point.
//!
//! A `Gateway` is built once from a validated `GatewayConfig`. It owns the
//! backend selected by `config.backend` (a lazily initialized pool cell for
//! the SQL and key-value backends, an HTTP client for the remote proxy) and
//! the key-value command registry. Every command goes through `execute`,
//! which routes it, normalizes the reply into a `CommandResult`, and returns
//! any leased connection before it returns.

use crate::db::kv::{CommandRegistry, KvExecutor, KvPool, PipelineExecutor, parse_command_line};
use crate::db::{PoolCell, PoolStatus, RemoteProxyClient, SqlExecutor, SqlPool};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    BackendKind, Command, CommandResult, GatewayConfig, InstanceSummary, KvCommand, SqlParam,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The configured backend. Exactly one exists per gateway.
pub enum Backend {
    Sql(PoolCell<SqlPool>),
    Kv(PoolCell<KvPool>),
    Remote(RemoteProxyClient),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Sql(_) => BackendKind::Sql,
            Backend::Kv(_) => BackendKind::Kv,
            Backend::Remote(_) => BackendKind::Remote,
        }
    }
}

pub struct Gateway {
    config: Arc<GatewayConfig>,
    backend: Backend,
    registry: CommandRegistry,
}

impl Gateway {
    /// Validate `config` and set up its backend. No connection is opened here;
    /// pools are built on first use.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let backend = match config.backend {
            BackendKind::Sql => Backend::Sql(PoolCell::new("sql", Arc::clone(&config))),
            BackendKind::Kv => Backend::Kv(PoolCell::new("kv", Arc::clone(&config))),
            BackendKind::Remote => {
                let settings = config.remote.clone().ok_or_else(|| {
                    GatewayError::config("the remote backend requires a remote endpoint URL")
                })?;
                Backend::Remote(RemoteProxyClient::new(settings)?)
            }
        };

        info!(
            backend = %config.backend,
            instances = config.candidates().count(),
            "Gateway configured"
        );

        Ok(Self {
            config,
            backend,
            registry: CommandRegistry::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Run one command against the active instance.
    pub async fn execute(&self, command: Command) -> GatewayResult<CommandResult> {
        let start = Instant::now();
        info!(
            backend = %self.backend.kind(),
            kind = command.kind_name(),
            command = %command.describe(),
            "Executing command"
        );

        let outcome = self.dispatch(&command).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => info!(elapsed_ms, result = %result.summary(), "Command completed"),
            Err(e) => warn!(elapsed_ms, error = %e, "Command failed"),
        }
        outcome
    }

    /// Run a batch of key-value commands in one round trip.
    pub async fn execute_pipeline(
        &self,
        commands: Vec<KvCommand>,
    ) -> GatewayResult<Vec<CommandResult>> {
        let Backend::Kv(cell) = &self.backend else {
            return Err(GatewayError::invalid_input(format!(
                "pipelines need the kv backend; this gateway runs '{}'",
                self.backend.kind()
            )));
        };

        let start = Instant::now();
        info!(commands = commands.len(), "Executing pipeline");
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = async {
            let pool = cell.ensure_initialized().await?;
            let decode_text = pool.connector().instance().decode_responses;
            PipelineExecutor::new(&self.registry, decode_text)
                .execute(&pool, &commands)
                .await
        }
        .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(results) => info!(elapsed_ms, results = results.len(), "Pipeline completed"),
            Err(e) => warn!(elapsed_ms, error = %e, "Pipeline failed"),
        }
        outcome
    }

    /// Split a command line such as `SET greeting "hello world"` and run it as
    /// a named key-value command.
    pub async fn execute_raw(&self, line: &str) -> GatewayResult<CommandResult> {
        let mut words = parse_command_line(line)?.into_iter();
        let name = words
            .next()
            .ok_or_else(|| GatewayError::invalid_input("command line is empty"))?;
        let command = KvCommand::new(name, words.map(JsonValue::String));
        self.execute(Command::Named(command)).await
    }

    /// Liveness of the active backend. Never fails.
    pub async fn health_check(&self) -> bool {
        let healthy = match &self.backend {
            Backend::Sql(cell) => cell.health_check().await,
            Backend::Kv(cell) => cell.health_check().await,
            Backend::Remote(client) => match self.config.active_instance() {
                Ok(instance) => client.health_check(instance).await,
                Err(e) => {
                    debug!(error = %e, "Health check has no active instance");
                    false
                }
            },
        };
        debug!(backend = %self.backend.kind(), healthy, "Health check finished");
        healthy
    }

    /// The active instance with its password redacted.
    pub fn describe_active_instance(&self) -> GatewayResult<InstanceSummary> {
        self.config.active_instance().map(|i| i.summary())
    }

    /// Occupancy of the live pool; `None` before first use and for the remote
    /// backend, which has no pool.
    pub async fn pool_status(&self) -> Option<PoolStatus> {
        match &self.backend {
            Backend::Sql(cell) => cell.status().await,
            Backend::Kv(cell) => cell.status().await,
            Backend::Remote(_) => None,
        }
    }

    /// Close the live pool. Safe to call more than once.
    pub async fn close(&self) {
        match &self.backend {
            Backend::Sql(cell) => cell.close().await,
            Backend::Kv(cell) => cell.close().await,
            Backend::Remote(_) => debug!("Remote backend holds no pool; nothing to close"),
        }
    }

    async fn dispatch(&self, command: &Command) -> GatewayResult<CommandResult> {
        match (&self.backend, command) {
            (Backend::Sql(cell), Command::Sql { text, params }) => {
                self.run_sql(cell, text, params).await
            }
            (Backend::Kv(cell), Command::Named(named)) => {
                let pool = cell.ensure_initialized().await?;
                let decode_text = pool.connector().instance().decode_responses;
                KvExecutor::new(&self.registry, decode_text)
                    .execute(&pool, named)
                    .await
            }
            (
                Backend::Remote(client),
                Command::Remote { sql, params } | Command::Sql { text: sql, params },
            ) => {
                require_statement(sql)?;
                let instance = self.config.active_instance()?;
                client.send(instance, sql, params).await
            }
            (backend, command) => Err(GatewayError::invalid_input(format!(
                "a {} command cannot run on the '{}' backend",
                command.kind_name(),
                backend.kind()
            ))),
        }
    }

    async fn run_sql(
        &self,
        cell: &PoolCell<SqlPool>,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<CommandResult> {
        require_statement(sql)?;
        let pool = cell.ensure_initialized().await?;
        let mut lease = pool.acquire().await?;
        let result = SqlExecutor::new(self.config.pool.socket_timeout)
            .execute(&mut lease, sql, params)
            .await;
        lease.release();
        result
    }
}

fn require_statement(sql: &str) -> GatewayResult<()> {
    if sql.trim().is_empty() {
        return Err(GatewayError::invalid_input("SQL statement cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Engine, InstanceDescriptor, PoolSettings, RemoteSettings};

    fn sql_gateway() -> Gateway {
        let instances = vec![
            InstanceDescriptor::new("standby", Engine::MySQL).with_database("app"),
            InstanceDescriptor::new("primary", Engine::PostgreSQL)
                .with_database("app")
                .with_credentials("app", Some("hunter2"))
                .activated(),
        ];
        let config =
            GatewayConfig::new(BackendKind::Sql, instances, PoolSettings::for_sql(1, 1)).unwrap();
        Gateway::new(config).unwrap()
    }

    #[test]
    fn test_describe_active_instance_is_redacted() {
        let gateway = sql_gateway();
        let summary = gateway.describe_active_instance().unwrap();
        assert_eq!(summary.instance_id, "primary");
        assert!(summary.password_set);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_mismatched_command_kind() {
        let gateway = sql_gateway();
        let err = gateway
            .execute(Command::named("get", ["k"]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
        assert!(gateway.pool_status().await.is_none());
    }

    #[tokio::test]
    async fn test_pipeline_requires_kv_backend() {
        let gateway = sql_gateway();
        let err = gateway
            .execute_pipeline(vec![KvCommand::new("ping", Vec::<String>::new())])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_empty_sql_rejected_before_pool() {
        let gateway = sql_gateway();
        let err = gateway.execute(Command::sql("   ")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
        assert!(gateway.pool_status().await.is_none());
    }

    #[tokio::test]
    async fn test_close_without_pool_is_noop() {
        let gateway = sql_gateway();
        gateway.close().await;
        gateway.close().await;
        assert!(gateway.pool_status().await.is_none());
    }

    #[tokio::test]
    async fn test_execute_raw_rejects_empty_line() {
        let instances = vec![InstanceDescriptor::new("cache", Engine::Redis).activated()];
        let config =
            GatewayConfig::new(BackendKind::Kv, instances, PoolSettings::for_kv(1, 2)).unwrap();
        let gateway = Gateway::new(config).unwrap();

        let err = gateway.execute_raw("   ").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
        let err = gateway.execute_raw("SET k \"open").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_remote_without_active_instance() {
        let instances = vec![InstanceDescriptor::new("db", Engine::MySQL).with_database("app")];
        let remote = RemoteSettings::parse("http://127.0.0.1:1/sql").unwrap();
        let config = GatewayConfig::remote(instances, PoolSettings::default(), remote).unwrap();
        let gateway = Gateway::new(config).unwrap();

        assert_eq!(gateway.backend_kind(), BackendKind::Remote);
        let err = gateway.execute(Command::remote("SELECT 1")).await.unwrap_err();
        assert!(err.is_config_error());
        assert!(!gateway.health_check().await);
    }
}
