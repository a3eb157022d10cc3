//! Single key-value command execution.

use crate::db::kv::commands::CommandRegistry;
use crate::db::kv::pool::KvPool;
use crate::error::GatewayResult;
use crate::models::{CommandResult, KvCommand};
use tracing::debug;

pub struct KvExecutor<'a> {
    registry: &'a CommandRegistry,
    decode_text: bool,
}

impl<'a> KvExecutor<'a> {
    pub fn new(registry: &'a CommandRegistry, decode_text: bool) -> Self {
        Self {
            registry,
            decode_text,
        }
    }

    /// Build the frame, run it on one lease, and decode the reply.
    ///
    /// The frame is built before a lease is taken, so argument errors never
    /// touch the pool.
    pub async fn execute(&self, pool: &KvPool, command: &KvCommand) -> GatewayResult<CommandResult> {
        let prepared = self.registry.prepare(command)?;
        debug!(command = %prepared.name, raw = prepared.raw, "Dispatching key-value command");

        let mut lease = pool.acquire().await?;
        let reply = lease.connection()?.request(&prepared.frame).await?;
        pool.release(lease)?;

        prepared.decode(reply, self.decode_text)
    }
}
