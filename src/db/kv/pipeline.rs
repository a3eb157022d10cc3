//! Pipelined key-value execution: one lease, one write, replies in order.

use crate::db::kv::commands::{CommandRegistry, PreparedCommand};
use crate::db::kv::pool::KvPool;
use crate::db::kv::resp::RespValue;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{CommandResult, KvCommand};
use tracing::debug;

pub struct PipelineExecutor<'a> {
    registry: &'a CommandRegistry,
    decode_text: bool,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(registry: &'a CommandRegistry, decode_text: bool) -> Self {
        Self {
            registry,
            decode_text,
        }
    }

    /// Run `commands` as one round trip and return results in input order.
    ///
    /// Every frame is built before any I/O, so a bad command fails the batch
    /// without touching the server. A server error on any command fails the
    /// batch after all replies are read, naming the failing index.
    pub async fn execute(
        &self,
        pool: &KvPool,
        commands: &[KvCommand],
    ) -> GatewayResult<Vec<CommandResult>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = commands
            .iter()
            .enumerate()
            .map(|(index, command)| {
                self.registry.prepare(command).map_err(|e| match e {
                    GatewayError::UnsupportedCommand { command, reason } => {
                        GatewayError::unsupported(command, format!("command {}: {}", index, reason))
                    }
                    other => GatewayError::invalid_input(format!("command {}: {}", index, other)),
                })
            })
            .collect::<GatewayResult<Vec<PreparedCommand>>>()?;
        let frames: Vec<RespValue> = prepared.iter().map(|p| p.frame.clone()).collect();

        debug!(commands = frames.len(), "Sending pipeline");
        let mut lease = pool.acquire().await?;
        let replies = lease.connection()?.pipeline(&frames).await?;
        pool.release(lease)?;

        prepared
            .iter()
            .zip(replies)
            .enumerate()
            .map(|(index, (command, reply))| {
                command
                    .decode(reply, self.decode_text)
                    .map_err(|e| failed_at(index, command, e))
            })
            .collect()
    }
}

fn failed_at(index: usize, command: &PreparedCommand, error: GatewayError) -> GatewayError {
    let (message, code) = match error {
        GatewayError::BackendExecution { message, code } => (message, code),
        GatewayError::UnsupportedCommand { reason, .. } => (reason, None),
        other => (other.to_string(), None),
    };
    GatewayError::backend(
        format!(
            "pipeline command {} ('{}') failed: {}",
            index, command.name, message
        ),
        code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::pool::KvConnector;
    use crate::models::{Engine, InstanceDescriptor, PoolSettings};
    use serde_json::{Value as JsonValue, json};

    fn unreachable_pool() -> KvPool {
        let instance = InstanceDescriptor::new("kv", Engine::Redis).with_endpoint("127.0.0.1", 1);
        let settings = PoolSettings::for_kv(0, 1);
        KvPool::new(KvConnector::new(instance, settings.clone()), settings)
    }

    #[tokio::test]
    async fn test_empty_batch_takes_no_lease() {
        let pool = unreachable_pool();
        let registry = CommandRegistry::new();
        let results = PipelineExecutor::new(&registry, true)
            .execute(&pool, &[])
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_build_error_fails_before_io() {
        let pool = unreachable_pool();
        let registry = CommandRegistry::new();
        let commands = vec![
            KvCommand::new("set", [json!("k"), json!("v")]),
            KvCommand::new("get", Vec::<JsonValue>::new()),
        ];
        let err = PipelineExecutor::new(&registry, true)
            .execute(&pool, &commands)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput { .. }));
        assert!(err.to_string().contains("command 1"));
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_session_command_fails_batch_before_io() {
        let pool = unreachable_pool();
        let registry = CommandRegistry::new();
        let commands = vec![
            KvCommand::new("multi", Vec::<JsonValue>::new()),
            KvCommand::new("set", [json!("k"), json!("v")]),
        ];
        let err = PipelineExecutor::new(&registry, true)
            .execute(&pool, &commands)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedCommand { .. }));
        assert!(err.to_string().contains("command 0"));
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_failed_at_keeps_code() {
        let registry = CommandRegistry::new();
        let prepared = registry
            .prepare(&KvCommand::new("incr", [json!("k")]))
            .unwrap();
        let err = failed_at(
            2,
            &prepared,
            GatewayError::backend("WRONGTYPE bad", Some("WRONGTYPE".to_string())),
        );
        match err {
            GatewayError::BackendExecution { message, code } => {
                assert!(message.contains("pipeline command 2 ('incr')"));
                assert_eq!(code.as_deref(), Some("WRONGTYPE"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
