//! MCP service implementation using rmcp.
//!
//! `GatewayService` exposes the gateway's tools through the rmcp macros. SQL
//! tools require the `sql` or `remote` backend and key-value tools the `kv`
//! backend; calling the wrong family returns an invalid-params error.
//!
//! Two JSON resources are also served: `database://config` (redacted active
//! instance and pool limits) and `database://status` (a live round trip).

use crate::gateway::Gateway;
use crate::models::BackendKind;
use crate::tools::kv::{
    KvConfigOutput, KvExecInput, KvExecOutput, KvGenTestDataInput, KvGenTestDataOutput,
    KvInfoInput, KvInfoOutput, KvKeyTypesOutput, KvKeysInfoInput, KvKeysInfoOutput,
    KvOverviewOutput, KvPipelineInput, KvPipelineOutput, KvToolHandler,
};
use crate::tools::sql::{
    DescribeTableInput, DescribeTableOutput, QueryWithLimitInput, QueryWithLimitOutput,
    SqlExecInput, SqlExecOutput, SqlToolHandler,
};
use crate::tools::status::{
    CONFIG_RESOURCE_URI, GatewayStatusOutput, STATUS_RESOURCE_URI, StatusToolHandler,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, Implementation, ListResourcesResult, PaginatedRequestParam,
        ProtocolVersion, RawResource, ReadResourceRequestParam, ReadResourceResult, Resource,
        ResourceContents, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct GatewayService {
    gateway: Arc<Gateway>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            tool_router: Self::tool_router(),
        }
    }

    /// Reject tools that belong to the other backend family.
    fn require_sql(&self) -> Result<(), McpError> {
        match self.gateway.backend_kind() {
            BackendKind::Sql | BackendKind::Remote => Ok(()),
            BackendKind::Kv => Err(McpError::invalid_params(
                "SQL tools are unavailable: the gateway runs the 'kv' backend. Use kv_exec instead.",
                None,
            )),
        }
    }

    fn require_kv(&self) -> Result<(), McpError> {
        match self.gateway.backend_kind() {
            BackendKind::Kv => Ok(()),
            other => Err(McpError::invalid_params(
                format!(
                    "Key-value tools are unavailable: the gateway runs the '{}' backend. Use sql_exec instead.",
                    other
                ),
                None,
            )),
        }
    }

    fn resources() -> Vec<Resource> {
        [
            (
                CONFIG_RESOURCE_URI,
                "config",
                "Active instance (password redacted) and pool limits",
            ),
            (
                STATUS_RESOURCE_URI,
                "status",
                "Live connection check against the active instance",
            ),
        ]
        .into_iter()
        .map(|(uri, name, description)| {
            let mut raw = RawResource::new(uri, name);
            raw.description = Some(description.to_string());
            raw.mime_type = Some("application/json".to_string());
            raw.no_annotation()
        })
        .collect()
    }

    /// Resource body as pretty JSON text.
    async fn resource_body(&self, uri: &str) -> Result<String, McpError> {
        let status = StatusToolHandler::new(self.gateway.clone());
        match uri {
            CONFIG_RESOURCE_URI => to_json_text(&status.config_resource()?),
            STATUS_RESOURCE_URI => to_json_text(&status.status_resource().await),
            other => Err(McpError::resource_not_found(
                format!("Unknown resource '{}'", other),
                None,
            )),
        }
    }
}

fn to_json_text<T: Serialize>(value: &T) -> Result<String, McpError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("cannot encode resource: {}", e), None))
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "Execute one SQL statement on the active instance.\nSELECT/SHOW/DESCRIBE return rows, INSERT/UPDATE/DELETE return the affected row count, anything else is acknowledged.\nSupports positional parameters."
    )]
    async fn sql_exec(
        &self,
        Parameters(input): Parameters<SqlExecInput>,
    ) -> Result<Json<SqlExecOutput>, McpError> {
        self.require_sql()?;
        SqlToolHandler::new(self.gateway.clone())
            .sql_exec(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Describe the columns of a table.\nThe name may be schema-qualified and may contain only letters, digits, '_', '$' and '.'."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<Json<DescribeTableOutput>, McpError> {
        self.require_sql()?;
        SqlToolHandler::new(self.gateway.clone())
            .describe_table(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Run a SELECT with a row limit (default 100, max 10000).\nA LIMIT clause is appended when the statement has none."
    )]
    async fn query_with_limit(
        &self,
        Parameters(input): Parameters<QueryWithLimitInput>,
    ) -> Result<Json<QueryWithLimitOutput>, McpError> {
        self.require_sql()?;
        SqlToolHandler::new(self.gateway.clone())
            .query_with_limit(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Execute one key-value command, e.g. {\"command\": \"set\", \"args\": [\"k\", \"v\"], \"kwargs\": {\"ex\": 60}}.\nUnregistered commands are sent verbatim. A full command line such as `HGETALL user:1` is also accepted."
    )]
    async fn kv_exec(
        &self,
        Parameters(input): Parameters<KvExecInput>,
    ) -> Result<Json<KvExecOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_exec(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Execute a batch of key-value commands in one round trip.\nResults are returned in input order; any failing command fails the batch and is named by index."
    )]
    async fn kv_pipeline(
        &self,
        Parameters(input): Parameters<KvPipelineInput>,
    ) -> Result<Json<KvPipelineOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_pipeline(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(description = "Server INFO parsed into a JSON object. Optionally limited to one section.")]
    async fn kv_info(
        &self,
        Parameters(input): Parameters<KvInfoInput>,
    ) -> Result<Json<KvInfoOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_info(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Count keys matching a pattern (default \"*\") and show TYPE and TTL for the first 10.\nUses KEYS, so avoid broad patterns on large production keyspaces."
    )]
    async fn kv_keys_info(
        &self,
        Parameters(input): Parameters<KvKeysInfoInput>,
    ) -> Result<Json<KvKeysInfoOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_keys_info(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(description = "Count every key by TYPE (string, hash, list, set, zset, stream).")]
    async fn kv_key_types(&self) -> Result<Json<KvKeyTypesOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_key_types()
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Read key server settings with CONFIG GET: maxmemory, maxmemory-policy, timeout, databases, save, appendonly, appendfsync.\nSettings the server refuses are left out."
    )]
    async fn kv_config(&self) -> Result<Json<KvConfigOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_config()
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "One-call overview: server, memory, clients and stats INFO, database size and keyspace, a key sample, key type counts, and config."
    )]
    async fn kv_overview(&self) -> Result<Json<KvOverviewOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_overview()
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Generate test rows as hashes `table:<table>:<id>` (ids 1..num) with random 8-letter values for each column.\nExisting rows with the same ids are overwritten."
    )]
    async fn kv_gen_test_data(
        &self,
        Parameters(input): Parameters<KvGenTestDataInput>,
    ) -> Result<Json<KvGenTestDataOutput>, McpError> {
        self.require_kv()?;
        KvToolHandler::new(self.gateway.clone())
            .kv_gen_test_data(input)
            .await
            .map(Json)
            .map_err(Into::into)
    }

    #[tool(
        description = "Report the backend kind, the active instance (password redacted), health, table count, and pool occupancy."
    )]
    async fn gateway_status(&self) -> Json<GatewayStatusOutput> {
        Json(
            StatusToolHandler::new(self.gateway.clone())
                .gateway_status()
                .await,
        )
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "multidb-gateway".to_owned(),
                title: Some("Multi-DB Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Executes commands against one active data store.\n\
                \n\
                ## Workflow\n\
                1. Call `gateway_status` to see the backend kind and active instance\n\
                2. For `sql` and `remote` backends use `sql_exec`, `query_with_limit`, `describe_table`\n\
                3. For the `kv` backend use `kv_exec`, `kv_pipeline`, `kv_info`; inspect with \
                `kv_overview`, `kv_keys_info`, `kv_key_types`, `kv_config`\n\
                4. Read `database://config` or `database://status` for the redacted configuration \
                or a live connection check\n\
                \n\
                ## Results\n\
                Every command returns `{\"kind\", \"data\"}` where kind is `row_set`, `affected_count`, \
                `acknowledged`, or `value`."
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(Self::resources()))
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let text = self.resource_body(&uri).await?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }
}
