//! Backend access layer.
//!
//! - `selector`: picks the active instance
//! - `cell`: lazily initialized, single-flight pool holder
//! - `pool` / `executor` / `types` / `params`: the pooled SQL backend
//! - `kv`: the pooled key-value backend (RESP)
//! - `remote`: the HTTP proxy backend

pub mod cell;
pub mod executor;
pub mod kv;
pub mod params;
pub mod pool;
pub mod remote;
pub mod selector;
pub mod types;

pub use cell::{ManagedPool, PoolCell, PoolStatus};
pub use executor::{SqlExecutor, StatementKind, parse_affected_count};
pub use kv::{CommandRegistry, KvPool, PipelineExecutor};
pub use pool::{SqlLease, SqlPool};
pub use remote::{HttpTransport, RemoteProxyClient, ReqwestTransport};
pub use selector::select_active;
