//! Remote SQL proxy client.
//!
//! The proxy executes SQL on the gateway's behalf. Each request carries the
//! statement, its parameters, and the full active-instance descriptor (the
//! proxy needs the credentials to connect). The reply's `result` field is
//! mapped with the same leading-keyword classification as the pooled SQL path.

use crate::db::executor::{StatementKind, parse_affected_count};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{CommandResult, InstanceDescriptor, RemoteSettings, SqlParam, truncate_chars};
use serde_json::{Map, Value as JsonValue, json};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// JSON-over-HTTP seam. Both calls fail on a non-success status.
pub trait HttpTransport: Send + Sync + 'static {
    fn post(
        &self,
        url: &Url,
        body: &JsonValue,
    ) -> impl Future<Output = GatewayResult<JsonValue>> + Send;

    fn get(
        &self,
        url: &Url,
        params: &[(String, String)],
    ) -> impl Future<Output = GatewayResult<JsonValue>> + Send;
}

/// `reqwest`-backed transport with a whole-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn post(&self, url: &Url, body: &JsonValue) -> GatewayResult<JsonValue> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(request_error)?;
        read_json(response).await
    }

    async fn get(&self, url: &Url, params: &[(String, String)]) -> GatewayResult<JsonValue> {
        let response = self
            .client
            .get(url.clone())
            .query(params)
            .send()
            .await
            .map_err(request_error)?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> GatewayResult<JsonValue> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::transport(
            format!("HTTP {}: {}", status, truncate_chars(&body, 200)),
            Some(status.as_u16()),
        ));
    }
    response.json::<JsonValue>().await.map_err(|e| {
        GatewayError::transport(
            format!("invalid JSON in response: {}", e),
            Some(status.as_u16()),
        )
    })
}

fn request_error(e: reqwest::Error) -> GatewayError {
    let status = e.status().map(|s| s.as_u16());
    if e.is_timeout() {
        GatewayError::transport(format!("request timed out: {}", e), status)
    } else if e.is_connect() {
        GatewayError::transport(format!("could not reach remote proxy: {}", e), status)
    } else {
        GatewayError::transport(e.to_string(), status)
    }
}

pub struct RemoteProxyClient<T = ReqwestTransport> {
    settings: RemoteSettings,
    transport: T,
}

impl RemoteProxyClient<ReqwestTransport> {
    pub fn new(settings: RemoteSettings) -> GatewayResult<Self> {
        let transport = ReqwestTransport::new(settings.timeout)?;
        Ok(Self::with_transport(settings, transport))
    }
}

impl<T: HttpTransport> RemoteProxyClient<T> {
    pub fn with_transport(settings: RemoteSettings, transport: T) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.settings.endpoint
    }

    /// POST one statement and map the proxy's `result`.
    pub async fn send(
        &self,
        instance: &InstanceDescriptor,
        sql: &str,
        params: &[SqlParam],
    ) -> GatewayResult<CommandResult> {
        let body = request_body(instance, sql, params);
        let start = Instant::now();
        debug!(endpoint = %self.settings.endpoint, instance_id = %instance.instance_id, "Posting to remote proxy");

        let response = self.transport.post(&self.settings.endpoint, &body).await?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Remote proxy replied");

        if response.get("success") == Some(&JsonValue::Bool(false)) {
            let message = ["message", "error", "msg"]
                .iter()
                .find_map(|key| response.get(*key).and_then(JsonValue::as_str))
                .unwrap_or("remote proxy reported failure");
            let code = response.get("code").map(|c| match c {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            });
            return Err(GatewayError::backend(message, code));
        }

        let result = response
            .get("result")
            .cloned()
            .unwrap_or_else(|| JsonValue::Array(Vec::new()));
        Ok(map_result(StatementKind::classify(sql), result))
    }

    /// GET the health URL when configured, otherwise round-trip `SELECT 1`.
    pub async fn health_check(&self, instance: &InstanceDescriptor) -> bool {
        let outcome = match &self.settings.health_url {
            Some(url) => self.transport.get(url, &[]).await.map(|_| ()),
            None => self.send(instance, "SELECT 1", &[]).await.map(|_| ()),
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!(endpoint = %self.settings.endpoint, error = %e, "Remote proxy health check failed");
                false
            }
        }
    }
}

/// `{sql, params, databaseInstance}`; `params` is null when empty.
fn request_body(instance: &InstanceDescriptor, sql: &str, params: &[SqlParam]) -> JsonValue {
    json!({
        "sql": sql,
        "params": if params.is_empty() { JsonValue::Null } else { json!(params) },
        "databaseInstance": {
            "dbInstanceId": instance.instance_id,
            "dbHost": instance.host,
            "dbPort": instance.port,
            "dbDatabase": instance.database,
            "dbUsername": instance.username,
            "dbPassword": instance.password,
            "dbType": instance.engine,
            "dbActive": instance.active,
        },
    })
}

/// Shape the proxy's `result` by statement kind.
fn map_result(kind: StatementKind, result: JsonValue) -> CommandResult {
    match kind {
        StatementKind::Query => CommandResult::RowSet(to_rows(result)),
        StatementKind::Mutation => CommandResult::AffectedCount(parse_affected_count(&result)),
        StatementKind::Other => CommandResult::Acknowledged,
    }
}

fn to_rows(result: JsonValue) -> Vec<Map<String, JsonValue>> {
    match result {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(items) => items.into_iter().map(to_row).collect(),
        single => vec![to_row(single)],
    }
}

fn to_row(item: JsonValue) -> Map<String, JsonValue> {
    match item {
        JsonValue::Object(map) => map,
        // Positional rows are keyed by column index
        JsonValue::Array(values) => values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        scalar => {
            let mut map = Map::new();
            map.insert("value".to_string(), scalar);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Engine;
    use std::sync::Mutex;

    struct FakeTransport {
        reply: GatewayResult<JsonValue>,
        seen: Mutex<Vec<JsonValue>>,
    }

    impl FakeTransport {
        fn replying(reply: JsonValue) -> Self {
            Self {
                reply: Ok(reply),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                reply: Err(GatewayError::transport(format!("HTTP {}", status), Some(status))),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self) -> GatewayResult<JsonValue> {
            match &self.reply {
                Ok(v) => Ok(v.clone()),
                Err(GatewayError::Transport { message, status }) => {
                    Err(GatewayError::transport(message.clone(), *status))
                }
                Err(other) => Err(GatewayError::internal(other.to_string())),
            }
        }
    }

    impl HttpTransport for FakeTransport {
        async fn post(&self, _url: &Url, body: &JsonValue) -> GatewayResult<JsonValue> {
            self.seen.lock().unwrap().push(body.clone());
            self.respond()
        }

        async fn get(&self, _url: &Url, _params: &[(String, String)]) -> GatewayResult<JsonValue> {
            self.respond()
        }
    }

    fn instance() -> InstanceDescriptor {
        InstanceDescriptor::new("prod", Engine::MySQL)
            .with_endpoint("db.internal", 3306)
            .with_database("shop")
            .with_credentials("app", Some("s3cret"))
            .activated()
    }

    fn client(transport: FakeTransport) -> RemoteProxyClient<FakeTransport> {
        let settings = RemoteSettings::parse("http://proxy.local/api/sql").unwrap();
        RemoteProxyClient::with_transport(settings, transport)
    }

    #[tokio::test]
    async fn test_request_carries_instance() {
        let client = client(FakeTransport::replying(json!({"result": []})));
        client
            .send(&instance(), "SELECT * FROM t WHERE id = ?", &[SqlParam::Int(5)])
            .await
            .unwrap();

        let seen = client.transport.seen.lock().unwrap();
        let body = &seen[0];
        assert_eq!(body["sql"], "SELECT * FROM t WHERE id = ?");
        assert_eq!(body["params"], json!([5]));
        let db = &body["databaseInstance"];
        assert_eq!(db["dbInstanceId"], "prod");
        assert_eq!(db["dbPort"], 3306);
        assert_eq!(db["dbPassword"], "s3cret");
        assert_eq!(db["dbType"], "mysql");
        assert_eq!(db["dbActive"], true);
    }

    #[tokio::test]
    async fn test_result_mapping_by_kind() {
        let client_rows = client(FakeTransport::replying(json!({
            "result": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]
        })));
        let result = client_rows.send(&instance(), "select * from t", &[]).await.unwrap();
        assert_eq!(result.row_count(), Some(2));
        assert_eq!(result.rows().unwrap()[1]["name"], "b");

        let client_count = client(FakeTransport::replying(json!({"result": "UPDATE 5"})));
        let result = client_count.send(&instance(), "UPDATE t SET a = 1", &[]).await.unwrap();
        assert_eq!(result, CommandResult::AffectedCount(5));

        let client_ddl = client(FakeTransport::replying(json!({"result": null})));
        let result = client_ddl.send(&instance(), "CREATE TABLE x (id INT)", &[]).await.unwrap();
        assert_eq!(result, CommandResult::Acknowledged);

        // Missing result defaults to an empty row set
        let client_empty = client(FakeTransport::replying(json!({})));
        let result = client_empty.send(&instance(), "SELECT 1", &[]).await.unwrap();
        assert_eq!(result, CommandResult::RowSet(Vec::new()));
    }

    #[test]
    fn test_positional_rows() {
        let rows = to_rows(json!([[1, "a"], [2, "b"]]));
        assert_eq!(rows[0]["0"], 1);
        assert_eq!(rows[1]["1"], "b");
    }

    #[tokio::test]
    async fn test_proxy_failure_reported() {
        let client = client(FakeTransport::replying(json!({
            "success": false, "message": "Table 'shop.t' doesn't exist", "code": 1146
        })));
        let err = client.send(&instance(), "SELECT * FROM t", &[]).await.unwrap_err();
        match err {
            GatewayError::BackendExecution { message, code } => {
                assert!(message.contains("doesn't exist"));
                assert_eq!(code.as_deref(), Some("1146"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_error_is_transport_error() {
        let client = client(FakeTransport::failing(503));
        let err = client.send(&instance(), "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { status: Some(503), .. }));
        assert!(err.is_retryable());
        assert!(!client.health_check(&instance()).await);
    }
}
