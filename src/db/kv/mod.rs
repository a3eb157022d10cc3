//! Key-value backend: RESP codec, connections, bounded pool, command registry,
//! and single/pipelined execution.

pub mod commands;
pub mod connection;
pub mod executor;
pub mod pipeline;
pub mod pool;
pub mod resp;

pub use commands::{CommandRegistry, PreparedCommand, parse_command_line};
pub use connection::KvConnection;
pub use executor::KvExecutor;
pub use pipeline::PipelineExecutor;
pub use pool::{BoundedPool, Connector, KvConnector, KvLease, KvPool, Lease, Poolable};
pub use resp::{RespEncoder, RespParser, RespValue};
