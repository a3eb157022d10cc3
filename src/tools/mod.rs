//! MCP tool implementations.
//!
//! Each handler wraps the shared `Gateway`:
//! - `sql`: `sql_exec`, `describe_table`, `query_with_limit`
//! - `kv`: `kv_exec`, `kv_pipeline`, `kv_info`, `kv_keys_info`, `kv_key_types`,
//!   `kv_config`, `kv_overview`, `kv_gen_test_data`
//! - `status`: `gateway_status` and the `database://` resources

pub mod kv;
pub mod sql;
pub mod status;

pub use kv::{
    KeySample, KvConfigOutput, KvExecInput, KvExecOutput, KvGenTestDataInput,
    KvGenTestDataOutput, KvInfoInput, KvInfoOutput, KvKeyTypesOutput, KvKeysInfoInput,
    KvKeysInfoOutput, KvOverviewOutput, KvPipelineInput, KvPipelineOutput, KvToolHandler,
};
pub use sql::{
    DescribeTableInput, DescribeTableOutput, QueryWithLimitInput, QueryWithLimitOutput,
    SqlExecInput, SqlExecOutput, SqlToolHandler,
};
pub use status::{
    ConfigResource, ConnectionCheck, ConnectionState, GatewayStatusOutput, StatusToolHandler,
};
