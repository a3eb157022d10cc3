//! Data models for the gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod command;
pub mod instance;

// Re-export commonly used types
pub use command::{Command, CommandResult, KvCommand, SqlParam, truncate_chars};
pub use instance::{
    BackendKind, Engine, GatewayConfig, InstanceDescriptor, InstanceSummary, Namespace,
    PoolSettings, RemoteSettings,
};
