//! Instance and configuration data models.
//!
//! These types are the validated form of the configuration file. They are
//! immutable once loaded and shared read-only behind an `Arc`.

use crate::error::{GatewayError, GatewayResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Storage engine behind an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[serde(alias = "postgres", alias = "pgsql")]
    PostgreSQL,
    /// Includes MariaDB and OceanBase in MySQL mode
    #[serde(alias = "mariadb", alias = "oceanbase")]
    MySQL,
    SQLite,
    Redis,
}

impl Engine {
    /// Parse an engine name as written in the `dbType` / `redisType` keys.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pgsql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" | "oceanbase" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            "redis" | "valkey" => Some(Self::Redis),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
            Self::Redis => "Redis",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
            Self::Redis => Some(6379),
        }
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Redis => Namespace::Kv,
            _ => Namespace::Sql,
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Independent selection namespaces: SQL instances and key-value instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Sql,
    Kv,
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Kv => write!(f, "kv"),
        }
    }
}

/// How commands reach the active instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pooled relational connection
    #[default]
    Sql,
    /// Pooled key-value connection
    Kv,
    /// HTTP proxy that executes SQL on our behalf
    Remote,
}

impl BackendKind {
    /// The remote proxy executes SQL, so it selects from the SQL namespace.
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Sql | Self::Remote => Namespace::Sql,
            Self::Kv => Namespace::Kv,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Kv => write!(f, "kv"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// One configured backend endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub instance_id: String,
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    /// Database name, SQLite file path, or key-value database index
    pub database: String,
    pub username: String,
    /// Sensitive - never log or serialize outside the remote proxy request
    pub password: Option<String>,
    pub ssl_enabled: bool,
    pub active: bool,
    /// Decode key-value replies as UTF-8 text (base64 otherwise)
    pub decode_responses: bool,
}

impl InstanceDescriptor {
    /// Create an inactive descriptor with the engine's default port.
    pub fn new(instance_id: impl Into<String>, engine: Engine) -> Self {
        Self {
            instance_id: instance_id.into(),
            engine,
            host: "127.0.0.1".to_string(),
            port: engine.default_port().unwrap_or(0),
            database: String::new(),
            username: String::new(),
            password: None,
            ssl_enabled: false,
            active: false,
            decode_responses: true,
        }
    }

    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        self.username = username.into();
        self.password = password.map(Into::into);
        self
    }

    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }

    /// Key-value database index; an empty value means index 0.
    pub fn kv_index(&self) -> GatewayResult<u32> {
        let raw = self.database.trim();
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| {
            GatewayError::config(format!(
                "instance '{}': database index must be a non-negative integer",
                self.instance_id
            ))
        })
    }

    /// `host:port` for network engines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Redacted view for status reporting.
    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            instance_id: self.instance_id.clone(),
            engine: self.engine,
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            password_set: self.password.as_deref().is_some_and(|p| !p.is_empty()),
            ssl_enabled: self.ssl_enabled,
            active: self.active,
            decode_responses: self.decode_responses,
        }
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.instance_id.trim().is_empty() {
            return Err(GatewayError::config("instance id cannot be empty"));
        }
        match self.engine {
            Engine::SQLite => {
                if self.database.trim().is_empty() {
                    return Err(GatewayError::config(format!(
                        "instance '{}': SQLite requires a database file path",
                        self.instance_id
                    )));
                }
            }
            Engine::Redis => {
                self.kv_index()?;
                if self.host.trim().is_empty() || self.port == 0 {
                    return Err(GatewayError::config(format!(
                        "instance '{}': host and port are required",
                        self.instance_id
                    )));
                }
            }
            Engine::PostgreSQL | Engine::MySQL => {
                if self.host.trim().is_empty() || self.port == 0 {
                    return Err(GatewayError::config(format!(
                        "instance '{}': host and port are required",
                        self.instance_id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for InstanceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceDescriptor")
            .field("instance_id", &self.instance_id)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("ssl_enabled", &self.ssl_enabled)
            .field("active", &self.active)
            .field("decode_responses", &self.decode_responses)
            .finish()
    }
}

/// Instance description safe to hand to callers (no secrets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// True if a password is configured. The value itself is never exposed.
    pub password_set: bool,
    pub ssl_enabled: bool,
    pub active: bool,
    pub decode_responses: bool,
}

// Pool configuration defaults
pub const DEFAULT_MIN_SIZE: u32 = 1;
pub const DEFAULT_MAX_SIZE: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Pool tuning shared by every instance of one configuration load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_size: u32,
    pub max_size: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Bounds every native read/write and SQL statement
    pub socket_timeout: Duration,
    /// Retry a timed-out TCP connect once before giving up
    pub retry_on_timeout: bool,
    /// Idle key-value connections unused for longer are pinged before reuse
    pub health_check_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            retry_on_timeout: true,
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
        }
    }
}

impl PoolSettings {
    /// SQL pools keep `pool_size` warm and may grow by `max_overflow`.
    pub fn for_sql(pool_size: u32, max_overflow: u32) -> Self {
        Self {
            min_size: pool_size,
            max_size: pool_size.saturating_add(max_overflow),
            ..Self::default()
        }
    }

    /// Key-value pools are bounded by `max_connections` directly.
    pub fn for_kv(pool_size: u32, max_connections: u32) -> Self {
        Self {
            min_size: pool_size,
            max_size: max_connections,
            ..Self::default()
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.max_size == 0 {
            return Err(GatewayError::config("pool max size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(GatewayError::config(format!(
                "pool min size ({}) cannot exceed max size ({})",
                self.min_size, self.max_size
            )));
        }
        for (name, value) in [
            ("acquire timeout", self.acquire_timeout),
            ("idle timeout", self.idle_timeout),
            ("socket timeout", self.socket_timeout),
            ("health check interval", self.health_check_interval),
        ] {
            if value.is_zero() {
                return Err(GatewayError::config(format!(
                    "pool {} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }
}

pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Remote SQL proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub endpoint: Url,
    /// Optional GET endpoint used by health checks
    pub health_url: Option<Url>,
    pub timeout: Duration,
}

impl RemoteSettings {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            health_url: None,
            timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
        }
    }

    pub fn parse(endpoint: &str) -> GatewayResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| GatewayError::config(format!("invalid remote endpoint URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::config(
                "remote endpoint URL must use http or https",
            ));
        }
        Ok(Self::new(url))
    }
}

/// Everything the core needs, loaded once per process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub backend: BackendKind,
    /// Ordered; selection scans in this order
    pub instances: Vec<InstanceDescriptor>,
    pub pool: PoolSettings,
    /// Required when `backend` is `Remote`
    pub remote: Option<RemoteSettings>,
    pub log_path: Option<PathBuf>,
}

impl GatewayConfig {
    /// Build and validate a configuration.
    pub fn new(
        backend: BackendKind,
        instances: Vec<InstanceDescriptor>,
        pool: PoolSettings,
    ) -> GatewayResult<Self> {
        let config = Self {
            backend,
            instances,
            pool,
            remote: None,
            log_path: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build and validate a configuration for the remote proxy backend.
    pub fn remote(
        instances: Vec<InstanceDescriptor>,
        pool: PoolSettings,
        remote: RemoteSettings,
    ) -> GatewayResult<Self> {
        let config = Self {
            backend: BackendKind::Remote,
            instances,
            pool,
            remote: Some(remote),
            log_path: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        self.pool.validate()?;

        let mut seen = HashSet::new();
        for instance in &self.instances {
            instance.validate()?;
            if !seen.insert(instance.instance_id.as_str()) {
                return Err(GatewayError::config(format!(
                    "duplicate instance id '{}'",
                    instance.instance_id
                )));
            }
        }

        if self.backend == BackendKind::Remote && self.remote.is_none() {
            return Err(GatewayError::config(
                "the remote backend requires a remote endpoint URL",
            ));
        }
        Ok(())
    }

    /// Instances belonging to the configured backend's namespace, in order.
    pub fn candidates(&self) -> impl Iterator<Item = &InstanceDescriptor> {
        let namespace = self.backend.namespace();
        self.instances
            .iter()
            .filter(move |i| i.engine.namespace() == namespace)
    }

    /// The instance commands run against.
    pub fn active_instance(&self) -> GatewayResult<&InstanceDescriptor> {
        crate::db::selector::select_active(self.candidates())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(id: &str) -> InstanceDescriptor {
        InstanceDescriptor::new(id, Engine::PostgreSQL).with_database("app")
    }

    fn redis(id: &str) -> InstanceDescriptor {
        InstanceDescriptor::new(id, Engine::Redis)
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!(Engine::parse("PostgreSQL"), Some(Engine::PostgreSQL));
        assert_eq!(Engine::parse("postgres"), Some(Engine::PostgreSQL));
        assert_eq!(Engine::parse("OceanBase"), Some(Engine::MySQL));
        assert_eq!(Engine::parse(" redis "), Some(Engine::Redis));
        assert_eq!(Engine::parse("oracle"), None);
    }

    #[test]
    fn test_backend_namespace() {
        assert_eq!(BackendKind::Remote.namespace(), Namespace::Sql);
        assert_eq!(BackendKind::Kv.namespace(), Namespace::Kv);
    }

    #[test]
    fn test_debug_redacts_password() {
        let instance = pg("a").with_credentials("app", Some("hunter2"));
        let debug = format!("{:?}", instance);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_summary_has_no_password() {
        let instance = pg("a").with_credentials("app", Some("hunter2"));
        let summary = instance.summary();
        assert!(summary.password_set);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_kv_index() {
        assert_eq!(redis("r").kv_index().unwrap(), 0);
        assert_eq!(redis("r").with_database("3").kv_index().unwrap(), 3);
        assert!(redis("r").with_database("x").kv_index().is_err());
    }

    #[test]
    fn test_pool_settings_derivation() {
        let sql = PoolSettings::for_sql(5, 10);
        assert_eq!((sql.min_size, sql.max_size), (5, 15));
        let kv = PoolSettings::for_kv(2, 8);
        assert_eq!((kv.min_size, kv.max_size), (2, 8));
    }

    #[test]
    fn test_pool_settings_validation() {
        assert!(PoolSettings::default().validate().is_ok());
        assert!(PoolSettings::for_kv(1, 0).validate().is_err());
        assert!(PoolSettings::for_kv(5, 2).validate().is_err());
        let zero = PoolSettings::default().with_acquire_timeout(Duration::ZERO);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_duplicate_instance_ids_rejected() {
        let result = GatewayConfig::new(
            BackendKind::Sql,
            vec![pg("a"), pg("a")],
            PoolSettings::default(),
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate instance id"));
    }

    #[test]
    fn test_remote_requires_endpoint() {
        let err = GatewayConfig::new(
            BackendKind::Remote,
            vec![pg("a").activated()],
            PoolSettings::default(),
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_namespaces_are_independent() {
        let config = GatewayConfig::new(
            BackendKind::Kv,
            vec![pg("sql-1").activated(), redis("kv-1"), redis("kv-2").activated()],
            PoolSettings::default(),
        )
        .unwrap();
        assert_eq!(config.active_instance().unwrap().instance_id, "kv-2");

        let config = GatewayConfig {
            backend: BackendKind::Sql,
            ..config
        };
        assert_eq!(config.active_instance().unwrap().instance_id, "sql-1");
    }

    #[test]
    fn test_remote_settings_parse() {
        assert!(RemoteSettings::parse("http://proxy:8080/api/sql").is_ok());
        assert!(RemoteSettings::parse("ftp://proxy").is_err());
        assert!(RemoteSettings::parse("not a url").is_err());
    }
}
