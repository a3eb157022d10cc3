//! Loading the JSON configuration file from disk.

use multidb_gateway::config::load_config;
use multidb_gateway::models::{BackendKind, Engine};
use multidb_gateway::{Command, CommandResult, Gateway};
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_kv_config() {
    let file = write_config(
        r#"{
            "redisPoolSize": 1,
            "redisMaxConnections": 4,
            "redisConnectionTimeout": 3,
            "socketTimeout": 6,
            "healthCheckInterval": 15,
            "redisList": [
                {"redisInstanceId": "old", "redisType": "Redis", "redisHost": "10.0.0.1",
                 "redisPort": 6379, "redisDatabase": 0, "dbActive": false},
                {"redisInstanceId": "new", "redisType": "Redis", "redisHost": "10.0.0.2",
                 "redisPort": "6380", "redisDatabase": "1", "redisPassword": "pw", "dbActive": true},
                {"redisInstanceId": "spare", "redisType": "Redis", "redisHost": "10.0.0.3",
                 "redisPort": 6379, "redisDatabase": 0, "dbActive": true}
            ]
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.backend, BackendKind::Kv);
    assert_eq!(config.pool.max_size, 4);
    assert_eq!(config.pool.acquire_timeout, Duration::from_secs(3));
    assert_eq!(config.pool.health_check_interval, Duration::from_secs(15));

    // First active entry wins
    let active = config.active_instance().unwrap();
    assert_eq!(active.instance_id, "new");
    assert_eq!(active.port, 6380);
    assert_eq!(active.kv_index().unwrap(), 1);
    assert_eq!(active.engine, Engine::Redis);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = load_config(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("absent.json"));
}

#[test]
fn test_no_active_instance_loads_but_cannot_select() {
    let file = write_config(
        r#"{"dbList": [{"dbInstanceId": "a", "dbType": "mysql", "dbHost": "h", "dbPort": 3306,
            "dbDatabase": "x", "dbUsername": "u", "dbPassword": "p", "dbActive": false}]}"#,
    );
    let config = load_config(file.path()).unwrap();
    let err = config.active_instance().unwrap_err();
    assert!(err.is_config_error());
}

#[tokio::test]
async fn test_sqlite_config_end_to_end() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("app.db");
    let file = write_config(&format!(
        r#"{{
            "dbPoolSize": 1,
            "dbMaxOverflow": 1,
            "dbList": [
                {{"dbInstanceId": "local", "dbType": "sqlite", "dbDatabase": {}, "dbActive": true}}
            ]
        }}"#,
        serde_json::to_string(&db_path.to_string_lossy()).unwrap()
    ));

    let gateway = Gateway::new(load_config(file.path()).unwrap()).unwrap();
    let result = gateway.execute(Command::sql("SELECT 41 + 1 AS answer")).await.unwrap();
    match result {
        CommandResult::RowSet(rows) => assert_eq!(rows[0]["answer"], 42),
        other => panic!("unexpected result: {:?}", other),
    }
    gateway.close().await;
}
