//! Configuration handling for the gateway.
//!
//! Two layers:
//! - `Cli`: process flags (transport, HTTP binding, logging), parsed by clap
//!   with `GATEWAY_*` environment fallbacks.
//! - The JSON configuration file (`dbconfig.json` shape, camelCase keys),
//!   parsed with serde and validated into a `GatewayConfig`.
//!
//! Backend selection from the file: an explicit `backend` key wins; otherwise
//! `multiDBServer` selects the remote proxy, `dbList` the SQL pool, and
//! `redisList` the key-value pool, in that order.

use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    BackendKind, Engine, GatewayConfig, InstanceDescriptor, PoolSettings, RemoteSettings,
};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "dbconfig.json";
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";

// File defaults for optional keys
const DEFAULT_DB_POOL_SIZE: u32 = 5;
const DEFAULT_DB_MAX_OVERFLOW: u32 = 10;
const DEFAULT_DB_POOL_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_KV_CONNECTION_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_SOCKET_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: f64 = 30.0;
const DEFAULT_REMOTE_TIMEOUT_SECS: f64 = 30.0;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum TransportMode {
    /// Standard input/output (default for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web integration)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Stdio => write!(f, "stdio"),
            TransportMode::Http => write!(f, "http"),
        }
    }
}

/// Command-line flags for the gateway binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multidb-gateway",
    about = "MCP gateway that executes commands against the active SQL, key-value, or remote-proxy backend",
    version
)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(
        short,
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        env = "GATEWAY_CONFIG"
    )]
    pub config: PathBuf,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "GATEWAY_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "GATEWAY_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "GATEWAY_HTTP_PORT")]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(long, default_value = DEFAULT_MCP_ENDPOINT, env = "GATEWAY_MCP_ENDPOINT")]
    pub mcp_endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "GATEWAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Cli {
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

// =============================================================================
// Configuration file
// =============================================================================

/// Accepts both `3306` and `"3306"`; the file format allows either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }

    fn to_port(&self, instance_id: &str) -> GatewayResult<u16> {
        let parsed = match self {
            Scalar::Int(n) => u16::try_from(*n).ok(),
            Scalar::Text(s) => s.trim().parse::<u16>().ok(),
        };
        parsed.ok_or_else(|| {
            GatewayError::config(format!(
                "instance '{}': port must be an integer between 0 and 65535",
                instance_id
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlInstanceEntry {
    db_instance_id: String,
    db_type: String,
    #[serde(default)]
    db_host: Option<String>,
    #[serde(default)]
    db_port: Option<Scalar>,
    #[serde(default)]
    db_database: Option<Scalar>,
    #[serde(default)]
    db_username: Option<String>,
    #[serde(default)]
    db_password: Option<String>,
    #[serde(default)]
    db_active: bool,
    #[serde(default)]
    db_ssl: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KvInstanceEntry {
    redis_instance_id: String,
    #[serde(default)]
    redis_type: Option<String>,
    redis_host: String,
    redis_port: Scalar,
    #[serde(default)]
    redis_database: Option<Scalar>,
    #[serde(default)]
    redis_username: Option<String>,
    #[serde(default)]
    redis_password: Option<String>,
    // The key-value entries reuse the SQL `dbActive` key
    #[serde(default)]
    db_active: bool,
    #[serde(default)]
    redis_ssl: bool,
    #[serde(default = "default_true")]
    redis_decode_responses: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    backend: Option<BackendKind>,

    #[serde(default)]
    db_list: Option<Vec<SqlInstanceEntry>>,
    #[serde(default)]
    db_pool_size: Option<u32>,
    #[serde(default)]
    db_max_overflow: Option<u32>,
    #[serde(default)]
    db_pool_timeout: Option<f64>,
    #[serde(default)]
    db_pool_recycle: Option<f64>,

    #[serde(default)]
    redis_list: Option<Vec<KvInstanceEntry>>,
    #[serde(default)]
    redis_pool_size: Option<u32>,
    #[serde(default)]
    redis_max_connections: Option<u32>,
    #[serde(default)]
    redis_connection_timeout: Option<f64>,
    #[serde(default)]
    socket_timeout: Option<f64>,
    #[serde(default)]
    retry_on_timeout: Option<bool>,
    #[serde(default)]
    health_check_interval: Option<f64>,

    #[serde(default, rename = "multiDBServer")]
    multi_db_server: Option<String>,
    #[serde(default)]
    remote_health_url: Option<String>,
    #[serde(default)]
    remote_timeout: Option<f64>,

    #[serde(default)]
    log_path: Option<PathBuf>,
}

/// Read and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> GatewayResult<GatewayConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::config(format!(
            "cannot read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;
    let config = parse_config(&text)?;
    info!(
        path = %path.display(),
        backend = %config.backend,
        instances = config.instances.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Parse and validate configuration JSON.
pub fn parse_config(text: &str) -> GatewayResult<GatewayConfig> {
    let file: ConfigFile = serde_json::from_str(text)
        .map_err(|e| GatewayError::config(format!("invalid configuration JSON: {}", e)))?;
    file.into_config()
}

impl ConfigFile {
    fn into_config(self) -> GatewayResult<GatewayConfig> {
        let backend = self.backend_kind()?;

        let mut instances = Vec::new();
        for entry in self.db_list.iter().flatten() {
            instances.push(sql_instance(entry)?);
        }
        for entry in self.redis_list.iter().flatten() {
            instances.push(kv_instance(entry)?);
        }

        let pool = self.pool_settings(backend)?;
        let remote = match backend {
            BackendKind::Remote => Some(self.remote_settings()?),
            _ => None,
        };

        let config = GatewayConfig {
            backend,
            instances,
            pool,
            remote,
            log_path: self.log_path,
        };
        config.validate()?;
        Ok(config)
    }

    fn backend_kind(&self) -> GatewayResult<BackendKind> {
        if let Some(kind) = self.backend {
            return Ok(kind);
        }
        if self.multi_db_server.is_some() {
            Ok(BackendKind::Remote)
        } else if self.db_list.is_some() {
            Ok(BackendKind::Sql)
        } else if self.redis_list.is_some() {
            Ok(BackendKind::Kv)
        } else {
            Err(GatewayError::config(
                "configuration needs one of 'dbList', 'redisList' or 'multiDBServer'",
            ))
        }
    }

    fn pool_settings(&self, backend: BackendKind) -> GatewayResult<PoolSettings> {
        let socket_timeout = seconds(
            "socketTimeout",
            self.socket_timeout.unwrap_or(DEFAULT_SOCKET_TIMEOUT_SECS),
        )?;
        let health_check_interval = seconds(
            "healthCheckInterval",
            self.health_check_interval
                .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
        )?;

        let mut settings = match backend {
            BackendKind::Kv => {
                let pool_size = require(self.redis_pool_size, "redisPoolSize")?;
                let max_connections =
                    require(self.redis_max_connections, "redisMaxConnections")?;
                let connect_timeout = seconds(
                    "redisConnectionTimeout",
                    self.redis_connection_timeout
                        .unwrap_or(DEFAULT_KV_CONNECTION_TIMEOUT_SECS),
                )?;
                PoolSettings::for_kv(pool_size, max_connections)
                    .with_acquire_timeout(connect_timeout)
            }
            BackendKind::Sql | BackendKind::Remote => {
                let timeout = seconds(
                    "dbPoolTimeout",
                    self.db_pool_timeout.unwrap_or(DEFAULT_DB_POOL_TIMEOUT_SECS),
                )?;
                let mut settings = PoolSettings::for_sql(
                    self.db_pool_size.unwrap_or(DEFAULT_DB_POOL_SIZE),
                    self.db_max_overflow.unwrap_or(DEFAULT_DB_MAX_OVERFLOW),
                )
                .with_acquire_timeout(timeout);
                if let Some(recycle) = self.db_pool_recycle {
                    settings = settings.with_idle_timeout(seconds("dbPoolRecycle", recycle)?);
                }
                settings
            }
        }
        .with_socket_timeout(socket_timeout)
        .with_health_check_interval(health_check_interval);
        settings.retry_on_timeout = self.retry_on_timeout.unwrap_or(true);
        Ok(settings)
    }

    fn remote_settings(&self) -> GatewayResult<RemoteSettings> {
        let endpoint = self.multi_db_server.as_deref().ok_or_else(|| {
            GatewayError::config("the remote backend requires the 'multiDBServer' key")
        })?;
        let mut settings = RemoteSettings::parse(endpoint)?;
        if let Some(health) = &self.remote_health_url {
            let url = Url::parse(health)
                .map_err(|e| GatewayError::config(format!("invalid 'remoteHealthUrl': {}", e)))?;
            settings.health_url = Some(url);
        }
        settings.timeout = seconds(
            "remoteTimeout",
            self.remote_timeout.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
        )?;
        Ok(settings)
    }
}

fn sql_instance(entry: &SqlInstanceEntry) -> GatewayResult<InstanceDescriptor> {
    let id = &entry.db_instance_id;
    let engine = Engine::parse(&entry.db_type)
        .filter(|e| *e != Engine::Redis)
        .ok_or_else(|| {
            GatewayError::config(format!(
                "instance '{}': unsupported 'dbType' (expected mysql, postgresql, sqlite or oceanbase)",
                id
            ))
        })?;

    let mut instance = InstanceDescriptor::new(id.as_str(), engine);
    if let Some(host) = &entry.db_host {
        instance.host = host.clone();
    }
    if let Some(port) = &entry.db_port {
        instance.port = port.to_port(id)?;
    }
    instance.database = entry
        .db_database
        .clone()
        .map(Scalar::into_text)
        .unwrap_or_default();
    instance.username = entry.db_username.clone().unwrap_or_default();
    instance.password = entry.db_password.clone().filter(|p| !p.is_empty());
    instance.ssl_enabled = entry.db_ssl;
    instance.active = entry.db_active;
    Ok(instance)
}

fn kv_instance(entry: &KvInstanceEntry) -> GatewayResult<InstanceDescriptor> {
    let id = &entry.redis_instance_id;
    let declared = entry.redis_type.as_deref().map(Engine::parse);
    if declared.is_some_and(|engine| engine != Some(Engine::Redis)) {
        return Err(GatewayError::config(format!(
            "instance '{}': unsupported 'redisType' (expected redis)",
            id
        )));
    }

    let mut instance = InstanceDescriptor::new(id.as_str(), Engine::Redis)
        .with_endpoint(entry.redis_host.as_str(), entry.redis_port.to_port(id)?);
    instance.database = entry
        .redis_database
        .clone()
        .map(Scalar::into_text)
        .unwrap_or_default();
    instance.username = entry.redis_username.clone().unwrap_or_default();
    instance.password = entry.redis_password.clone().filter(|p| !p.is_empty());
    instance.ssl_enabled = entry.redis_ssl;
    instance.active = entry.db_active;
    instance.decode_responses = entry.redis_decode_responses;
    Ok(instance)
}

fn require(value: Option<u32>, key: &str) -> GatewayResult<u32> {
    value.ok_or_else(|| GatewayError::config(format!("missing required key '{}'", key)))
}

fn seconds(key: &str, value: f64) -> GatewayResult<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| GatewayError::config(format!("'{}' must be a positive number of seconds", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Namespace;

    #[test]
    fn test_default_cli() {
        let cli = Cli::default();
        assert_eq!(cli.transport, TransportMode::Stdio);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(cli.http_bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "multidb-gateway",
            "--config",
            "/etc/gateway.json",
            "--transport",
            "http",
            "--http-port",
            "9000",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/gateway.json"));
        assert_eq!(cli.transport, TransportMode::Http);
        assert_eq!(cli.http_bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_sql_config() {
        let config = parse_config(
            r#"{
                "dbPoolSize": 3,
                "dbMaxOverflow": 2,
                "dbPoolTimeout": 5,
                "dbList": [
                    {"dbInstanceId": "a", "dbType": "MySQL", "dbHost": "h1", "dbPort": "3307",
                     "dbDatabase": "shop", "dbUsername": "u", "dbPassword": "p", "dbActive": false},
                    {"dbInstanceId": "b", "dbType": "PostgreSQL", "dbHost": "h2", "dbPort": 5432,
                     "dbDatabase": "shop", "dbUsername": "u", "dbPassword": "", "dbActive": true}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Sql);
        assert_eq!(config.pool.min_size, 3);
        assert_eq!(config.pool.max_size, 5);
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.instances[0].port, 3307);
        assert_eq!(config.instances[0].password.as_deref(), Some("p"));
        // Empty password means none
        assert_eq!(config.instances[1].password, None);

        let active = config.active_instance().unwrap();
        assert_eq!(active.instance_id, "b");
        assert_eq!(active.engine, Engine::PostgreSQL);
    }

    #[test]
    fn test_kv_config() {
        let config = parse_config(
            r#"{
                "redisPoolSize": 2,
                "redisMaxConnections": 8,
                "redisConnectionTimeout": 1.5,
                "socketTimeout": 4,
                "retryOnTimeout": false,
                "redisList": [
                    {"redisInstanceId": "cache", "redisType": "Redis", "redisHost": "localhost",
                     "redisPort": 6380, "redisDatabase": 2, "dbActive": true,
                     "redisDecodeResponses": false}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Kv);
        assert_eq!(config.backend.namespace(), Namespace::Kv);
        assert_eq!((config.pool.min_size, config.pool.max_size), (2, 8));
        assert_eq!(config.pool.acquire_timeout, Duration::from_millis(1500));
        assert_eq!(config.pool.socket_timeout, Duration::from_secs(4));
        assert!(!config.pool.retry_on_timeout);

        let active = config.active_instance().unwrap();
        assert_eq!(active.kv_index().unwrap(), 2);
        assert!(!active.decode_responses);
    }

    #[test]
    fn test_kv_config_requires_pool_keys() {
        let err = parse_config(
            r#"{"redisList": [{"redisInstanceId": "c", "redisHost": "h", "redisPort": 6379, "dbActive": true}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("redisPoolSize"));
    }

    #[test]
    fn test_remote_config() {
        let config = parse_config(
            r#"{
                "multiDBServer": "http://proxy.local:8088/api/sql",
                "remoteHealthUrl": "http://proxy.local:8088/health",
                "remoteTimeout": 12,
                "logPath": "/var/log/gateway",
                "dbList": [
                    {"dbInstanceId": "prod", "dbType": "oceanbase", "dbHost": "db", "dbPort": 2881,
                     "dbDatabase": "app", "dbUsername": "root", "dbPassword": "x", "dbActive": true}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Remote);
        let remote = config.remote.as_ref().unwrap();
        assert_eq!(remote.endpoint.as_str(), "http://proxy.local:8088/api/sql");
        assert!(remote.health_url.is_some());
        assert_eq!(remote.timeout, Duration::from_secs(12));
        assert_eq!(config.log_path, Some(PathBuf::from("/var/log/gateway")));
        assert_eq!(config.active_instance().unwrap().engine, Engine::MySQL);
    }

    #[test]
    fn test_explicit_backend_wins() {
        let config = parse_config(
            r#"{
                "backend": "sql",
                "multiDBServer": "http://proxy.local/api",
                "dbList": [{"dbInstanceId": "f", "dbType": "sqlite", "dbDatabase": "/tmp/f.db", "dbActive": true}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Sql);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_invalid_configs() {
        // No backend source at all
        assert!(parse_config("{}").unwrap_err().is_config_error());
        // Malformed JSON
        assert!(parse_config("{").unwrap_err().is_config_error());
        // Unknown engine
        let err = parse_config(
            r#"{"dbList": [{"dbInstanceId": "x", "dbType": "oracle", "dbActive": true}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dbType"));
        // Duplicate ids
        let err = parse_config(
            r#"{"dbList": [
                {"dbInstanceId": "x", "dbType": "sqlite", "dbDatabase": "a.db"},
                {"dbInstanceId": "x", "dbType": "sqlite", "dbDatabase": "b.db"}
            ]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        // Non-positive timeout
        let err = parse_config(
            r#"{"dbPoolTimeout": 0, "dbList": [{"dbInstanceId": "x", "dbType": "sqlite", "dbDatabase": "a.db"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dbPoolTimeout"));
        // Bad remote URL
        let err = parse_config(
            r#"{"multiDBServer": "ftp://proxy", "dbList": []}"#,
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_password_not_in_errors() {
        let err = parse_config(
            r#"{"dbList": [{"dbInstanceId": "x", "dbType": "mysql", "dbHost": "h", "dbPort": 99999,
                "dbPassword": "topsecret", "dbActive": true}]}"#,
        )
        .unwrap_err();
        assert!(!err.to_string().contains("topsecret"));
    }
}
