//! Key-value tools.
//!
//! `kv_exec`, `kv_pipeline` and `kv_info` pass commands through. The
//! inspection tools (`kv_keys_info`, `kv_key_types`, `kv_config`,
//! `kv_overview`) and `kv_gen_test_data` are built from registered commands.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::models::{Command, CommandResult, KvCommand};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MAX_PIPELINE_COMMANDS: usize = 1_000;

/// Keys inspected by `kv_keys_info`.
pub const KEY_SAMPLE_SIZE: usize = 10;

/// Upper bound on `kv_gen_test_data` rows.
pub const MAX_TEST_ROWS: u32 = 10_000;

const TEST_VALUE_LEN: usize = 8;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Settings reported by `kv_config`.
pub const CONFIG_KEYS: &[&str] = &[
    "maxmemory",
    "maxmemory-policy",
    "timeout",
    "databases",
    "save",
    "appendonly",
    "appendfsync",
];

/// INFO sections included in `kv_overview`.
const OVERVIEW_SECTIONS: &[&str] = &["server", "memory", "clients", "stats"];

/// Input for the kv_exec tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct KvExecInput {
    /// Command name (e.g. "get", "hset"). With no args or kwargs, a full
    /// command line such as `SET greeting "hello world"` is also accepted.
    pub command: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<JsonValue>,
    /// Keyword arguments for registered commands (e.g. {"ex": 60, "nx": true})
    #[serde(default)]
    pub kwargs: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvExecOutput {
    pub result: CommandResult,
    pub execution_time_ms: u64,
}

/// Input for the kv_pipeline tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct KvPipelineInput {
    /// Commands to send in one round trip, in order
    pub commands: Vec<KvCommand>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvPipelineOutput {
    /// One result per command, in input order
    pub results: Vec<CommandResult>,
    pub count: usize,
    pub execution_time_ms: u64,
}

/// Input for the kv_info tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct KvInfoInput {
    /// INFO section (e.g. "memory", "keyspace"). Omit for the default set.
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvInfoOutput {
    /// Parsed INFO fields
    pub info: JsonValue,
}

/// Input for the kv_keys_info tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct KvKeysInfoInput {
    /// KEYS pattern (default "*")
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for KvKeysInfoInput {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
        }
    }
}

fn default_pattern() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct KeySample {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: String,
    /// Seconds to live; -1 without expiry, -2 if the key vanished
    pub ttl: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvKeysInfoOutput {
    pub total_keys: usize,
    /// Type and TTL of the first keys matched
    pub sample: Vec<KeySample>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvKeyTypesOutput {
    pub total_keys: usize,
    /// Key count per TYPE
    pub types: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvConfigOutput {
    /// Settings the server returned; unreadable ones are left out
    pub config: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DatabaseSummary {
    pub dbsize: i64,
    /// Parsed `INFO keyspace`
    pub keyspace: JsonValue,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvOverviewOutput {
    pub server: JsonValue,
    pub memory: JsonValue,
    pub clients: JsonValue,
    pub stats: JsonValue,
    pub database: DatabaseSummary,
    pub keys_sample: KvKeysInfoOutput,
    pub key_types: BTreeMap<String, u64>,
    pub config: Map<String, JsonValue>,
}

/// Input for the kv_gen_test_data tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct KvGenTestDataInput {
    /// Table name; rows are stored as hashes under `table:<table>:<id>`
    pub table: String,
    /// Hash fields to fill with random 8-letter values
    pub columns: Vec<String>,
    /// Number of rows (default 10)
    #[serde(default = "default_rows")]
    pub num: u32,
}

fn default_rows() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct KvGenTestDataOutput {
    pub table: String,
    pub inserted: u32,
    /// Key of the first and last generated row
    pub first_key: String,
    pub last_key: String,
}

pub struct KvToolHandler {
    gateway: Arc<Gateway>,
}

impl KvToolHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn kv_exec(&self, input: KvExecInput) -> GatewayResult<KvExecOutput> {
        let start = Instant::now();
        let name = input.command.trim();
        if name.is_empty() {
            return Err(GatewayError::invalid_input("command cannot be empty"));
        }

        let is_command_line =
            input.args.is_empty() && input.kwargs.is_empty() && name.contains(char::is_whitespace);
        let result = if is_command_line {
            self.gateway.execute_raw(name).await?
        } else {
            let command = KvCommand {
                name: name.to_string(),
                args: input.args,
                kwargs: input.kwargs,
            };
            self.gateway.execute(Command::Named(command)).await?
        };

        Ok(KvExecOutput {
            result,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn kv_pipeline(&self, input: KvPipelineInput) -> GatewayResult<KvPipelineOutput> {
        if input.commands.len() > MAX_PIPELINE_COMMANDS {
            return Err(GatewayError::invalid_input(format!(
                "a pipeline may hold at most {} commands",
                MAX_PIPELINE_COMMANDS
            )));
        }
        let start = Instant::now();
        let results = self.gateway.execute_pipeline(input.commands).await?;
        Ok(KvPipelineOutput {
            count: results.len(),
            results,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn kv_info(&self, input: KvInfoInput) -> GatewayResult<KvInfoOutput> {
        let args: Vec<JsonValue> = input
            .section
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(JsonValue::String)
            .into_iter()
            .collect();
        let result = self
            .gateway
            .execute(Command::Named(KvCommand {
                name: "info".to_string(),
                args,
                kwargs: Map::new(),
            }))
            .await?;

        let info = match result {
            CommandResult::Value(value) => value,
            CommandResult::Acknowledged => JsonValue::Object(Map::new()),
            other => serde_json::to_value(other)
                .map_err(|e| GatewayError::internal(format!("cannot encode INFO reply: {}", e)))?,
        };
        Ok(KvInfoOutput { info })
    }

    /// Matched key count plus TYPE and TTL of the first `KEY_SAMPLE_SIZE` keys.
    pub async fn kv_keys_info(&self, input: KvKeysInfoInput) -> GatewayResult<KvKeysInfoOutput> {
        let keys = self.keys(&input.pattern).await?;
        let sample: Vec<String> = keys.iter().take(KEY_SAMPLE_SIZE).cloned().collect();

        let mut commands = Vec::with_capacity(sample.len() * 2);
        for key in &sample {
            commands.push(KvCommand::new("type", [key.as_str()]));
            commands.push(KvCommand::new("ttl", [key.as_str()]));
        }
        let replies = self.gateway.execute_pipeline(commands).await?;

        let sample = sample
            .into_iter()
            .zip(replies.chunks(2))
            .map(|(key, pair)| KeySample {
                key,
                key_type: text_of(&pair[0]),
                ttl: pair
                    .get(1)
                    .and_then(CommandResult::value)
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(-2),
            })
            .collect();

        Ok(KvKeysInfoOutput {
            total_keys: keys.len(),
            sample,
        })
    }

    /// Count every key by TYPE.
    pub async fn kv_key_types(&self) -> GatewayResult<KvKeyTypesOutput> {
        let keys = self.keys("*").await?;
        let mut types = BTreeMap::new();
        for chunk in keys.chunks(MAX_PIPELINE_COMMANDS) {
            let commands = chunk
                .iter()
                .map(|key| KvCommand::new("type", [key.as_str()]))
                .collect();
            for reply in self.gateway.execute_pipeline(commands).await? {
                *types.entry(text_of(&reply)).or_insert(0) += 1;
            }
        }
        Ok(KvKeyTypesOutput {
            total_keys: keys.len(),
            types,
        })
    }

    /// `CONFIG GET` for each of `CONFIG_KEYS`. A setting the server refuses
    /// or does not know is skipped.
    pub async fn kv_config(&self) -> GatewayResult<KvConfigOutput> {
        let mut config = Map::new();
        for key in CONFIG_KEYS {
            let command = Command::Named(KvCommand::new("config_get", [*key]));
            match self.gateway.execute(command).await {
                Ok(CommandResult::Value(JsonValue::Object(mut values))) => {
                    if let Some(value) = values.remove(*key) {
                        config.insert(key.to_string(), value);
                    }
                }
                Ok(_) => {}
                Err(e) if is_command_failure(&e) => {
                    debug!(setting = %key, error = %e, "Config setting unavailable");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(KvConfigOutput { config })
    }

    /// Server INFO sections, database size, key sample, type counts and config.
    pub async fn kv_overview(&self) -> GatewayResult<KvOverviewOutput> {
        let mut sections = Vec::with_capacity(OVERVIEW_SECTIONS.len());
        for section in OVERVIEW_SECTIONS {
            sections.push(self.info_section(section).await?);
        }
        let [server, memory, clients, stats]: [JsonValue; 4] = sections
            .try_into()
            .map_err(|_| GatewayError::internal("INFO section count mismatch"))?;

        let dbsize = self
            .gateway
            .execute(Command::named("dbsize", Vec::<String>::new()))
            .await?
            .value()
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        let keyspace = self.info_section("keyspace").await?;

        Ok(KvOverviewOutput {
            server,
            memory,
            clients,
            stats,
            database: DatabaseSummary { dbsize, keyspace },
            keys_sample: self.kv_keys_info(KvKeysInfoInput::default()).await?,
            key_types: self.kv_key_types().await?.types,
            config: self.kv_config().await?.config,
        })
    }

    /// Fill `num` hashes `table:<table>:1..=num` with random values.
    pub async fn kv_gen_test_data(
        &self,
        input: KvGenTestDataInput,
    ) -> GatewayResult<KvGenTestDataOutput> {
        let table = input.table.trim();
        if table.is_empty() {
            return Err(GatewayError::invalid_input("table cannot be empty"));
        }
        let columns: Vec<&str> = input
            .columns
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if columns.is_empty() {
            return Err(GatewayError::invalid_input("at least one column is required"));
        }
        if input.num == 0 || input.num > MAX_TEST_ROWS {
            return Err(GatewayError::invalid_input(format!(
                "num must be between 1 and {}",
                MAX_TEST_ROWS
            )));
        }

        info!(table = %table, rows = input.num, columns = columns.len(), "Generating test data");
        let key = |id: u32| format!("table:{}:{}", table, id);
        let commands: Vec<KvCommand> = (1..=input.num)
            .map(|id| {
                KvCommand::new("hset", [key(id)]).with_kwarg("mapping", random_row(&columns))
            })
            .collect();
        for chunk in commands.chunks(MAX_PIPELINE_COMMANDS) {
            self.gateway.execute_pipeline(chunk.to_vec()).await?;
        }

        Ok(KvGenTestDataOutput {
            table: table.to_string(),
            inserted: input.num,
            first_key: key(1),
            last_key: key(input.num),
        })
    }

    /// String keys matching `pattern`, in server order.
    async fn keys(&self, pattern: &str) -> GatewayResult<Vec<String>> {
        let pattern = match pattern.trim() {
            "" => "*",
            p => p,
        };
        let reply = self
            .gateway
            .execute(Command::named("keys", [pattern]))
            .await?;
        Ok(match reply {
            CommandResult::Value(JsonValue::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::String(key) => Some(key),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    async fn info_section(&self, section: &str) -> GatewayResult<JsonValue> {
        let output = self
            .kv_info(KvInfoInput {
                section: Some(section.to_string()),
            })
            .await?;
        Ok(output.info)
    }
}

/// Server-side refusal of one command, as opposed to a dead connection.
fn is_command_failure(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::BackendExecution { .. } | GatewayError::UnsupportedCommand { .. }
    )
}

fn text_of(result: &CommandResult) -> String {
    match result.value() {
        Some(JsonValue::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "none".to_string(),
    }
}

fn random_row(columns: &[&str]) -> JsonValue {
    let mut rng = rand::thread_rng();
    let row: Map<String, JsonValue> = columns
        .iter()
        .map(|column| {
            let value: String = (0..TEST_VALUE_LEN)
                .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
                .collect();
            (column.to_string(), JsonValue::String(value))
        })
        .collect();
    JsonValue::Object(row)
}
