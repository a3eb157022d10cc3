//! MCP server integration.
//!
//! Binds the gateway's tool handlers to the MCP protocol through rmcp.

pub mod service;

pub use service::GatewayService;
