//! multidb-gateway library
//!
//! Executes commands against one active data store, selected from
//! configuration: a pooled SQL database (PostgreSQL, MySQL, SQLite), a pooled
//! Redis-compatible key-value store, or a remote HTTP SQL proxy. Results are
//! normalized into a single `CommandResult` shape and exposed as MCP tools.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Cli;
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use mcp::GatewayService;
pub use models::{Command, CommandResult, GatewayConfig, KvCommand};
