//! SQL connection pool.
//!
//! This module wraps the database-specific sqlx pools (MySqlPool, PgPool,
//! SqlitePool) behind one enum so every dialect keeps full type support.
//! Connections are leased one command at a time through `SqlLease`.

use crate::db::cell::{ManagedPool, PoolStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{Engine, InstanceDescriptor, PoolSettings};
use sqlx::pool::PoolConnection;
use sqlx::{
    MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode},
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum SqlPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

/// A connection checked out of a `SqlPool` for one command.
///
/// Dropping the lease returns the connection. A lease whose command was cut
/// short is marked with `discard` and closed instead.
#[derive(Debug)]
pub enum SqlLease {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl SqlLease {
    /// Close the underlying connection when the lease is dropped instead of
    /// returning it to the pool.
    pub fn discard(&mut self) {
        match self {
            SqlLease::MySql(c) => c.close_on_drop(),
            SqlLease::Postgres(c) => c.close_on_drop(),
            SqlLease::SQLite(c) => c.close_on_drop(),
        }
    }

    /// Return the connection to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl SqlPool {
    pub fn engine(&self) -> Engine {
        match self {
            SqlPool::MySql(_) => Engine::MySQL,
            SqlPool::Postgres(_) => Engine::PostgreSQL,
            SqlPool::SQLite(_) => Engine::SQLite,
        }
    }

    /// Wait for a free connection, up to the pool's acquire timeout.
    pub async fn acquire(&self) -> GatewayResult<SqlLease> {
        let start = Instant::now();
        let lease = match self {
            SqlPool::MySql(p) => p.acquire().await.map(SqlLease::MySql),
            SqlPool::Postgres(p) => p.acquire().await.map(SqlLease::Postgres),
            SqlPool::SQLite(p) => p.acquire().await.map(SqlLease::SQLite),
        };
        lease.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => GatewayError::pool_exhausted(start.elapsed()),
            other => GatewayError::from(other),
        })
    }

    fn max_size(&self) -> u32 {
        match self {
            SqlPool::MySql(p) => p.options().get_max_connections(),
            SqlPool::Postgres(p) => p.options().get_max_connections(),
            SqlPool::SQLite(p) => p.options().get_max_connections(),
        }
    }

    /// Build the native pool for `instance`, bounded by `[min_size, max_size]`.
    pub async fn create(
        instance: &InstanceDescriptor,
        settings: &PoolSettings,
    ) -> GatewayResult<Self> {
        let engine = instance.engine;
        let connect_error = |e: sqlx::Error| {
            GatewayError::pool_init(
                format!("Failed to connect: {}", e),
                connection_suggestion(engine, &e),
            )
        };

        match engine {
            Engine::MySQL => {
                let mut options = MySqlConnectOptions::new()
                    .host(&instance.host)
                    .port(instance.port)
                    .username(&instance.username)
                    .database(&instance.database)
                    .charset("utf8mb4")
                    .ssl_mode(if instance.ssl_enabled {
                        MySqlSslMode::Required
                    } else {
                        MySqlSslMode::Preferred
                    });
                if let Some(password) = &instance.password {
                    options = options.password(password);
                }

                let pool = MySqlPoolOptions::new()
                    .min_connections(settings.min_size)
                    .max_connections(settings.max_size)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .test_before_acquire(true)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(SqlPool::MySql(pool))
            }
            Engine::PostgreSQL => {
                let mut options = PgConnectOptions::new()
                    .host(&instance.host)
                    .port(instance.port)
                    .username(&instance.username)
                    .database(&instance.database)
                    .ssl_mode(if instance.ssl_enabled {
                        PgSslMode::Require
                    } else {
                        PgSslMode::Prefer
                    });
                if let Some(password) = &instance.password {
                    options = options.password(password);
                }

                let pool = PgPoolOptions::new()
                    .min_connections(settings.min_size)
                    .max_connections(settings.max_size)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .test_before_acquire(true)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(SqlPool::Postgres(pool))
            }
            Engine::SQLite => {
                let options = SqliteConnectOptions::new()
                    .filename(&instance.database)
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .min_connections(settings.min_size)
                    .max_connections(settings.max_size)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .test_before_acquire(true)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(SqlPool::SQLite(pool))
            }
            Engine::Redis => Err(GatewayError::config(format!(
                "instance '{}' is a key-value instance and cannot back a SQL pool",
                instance.instance_id
            ))),
        }
    }

    /// Run `SELECT 1` on a pooled connection within the acquire timeout.
    pub async fn ping(&self) -> GatewayResult<()> {
        let limit = match self {
            SqlPool::MySql(p) => p.options().get_acquire_timeout(),
            SqlPool::Postgres(p) => p.options().get_acquire_timeout(),
            SqlPool::SQLite(p) => p.options().get_acquire_timeout(),
        };
        let ping = async {
            match self {
                SqlPool::MySql(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
                SqlPool::Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
                SqlPool::SQLite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            }
        };
        match timeout(limit, ping).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::timeout("health check", limit)),
        }
    }
}

impl ManagedPool for SqlPool {
    async fn connect(instance: &InstanceDescriptor, settings: &PoolSettings) -> GatewayResult<Self> {
        Self::create(instance, settings).await
    }

    async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(engine = %self.engine(), error = %e, "SQL health check failed");
                false
            }
        }
    }

    async fn close(&self) {
        debug!(engine = %self.engine(), "Closing SQL pool");
        match self {
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Postgres(pool) => pool.close().await,
            SqlPool::SQLite(pool) => pool.close().await,
        }
    }

    fn status(&self) -> PoolStatus {
        let (size, idle) = match self {
            SqlPool::MySql(p) => (p.size(), p.num_idle() as u32),
            SqlPool::Postgres(p) => (p.size(), p.num_idle() as u32),
            SqlPool::SQLite(p) => (p.size(), p.num_idle() as u32),
        };
        let idle = idle.min(size);
        PoolStatus {
            idle,
            leased: size - idle,
            total: size,
            max_size: self.max_size(),
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(engine: Engine, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", engine);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password in the configuration file".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check the TLS/SSL setting for this instance or build with a TLS feature"
            .to_string();
    }

    match engine {
        Engine::SQLite => "Verify the database file path is accessible".to_string(),
        _ => format!(
            "Verify host, port, and database for the active {} instance",
            engine
        ),
    }
}
