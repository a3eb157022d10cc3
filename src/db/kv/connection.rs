//! A single key-value server connection speaking RESP over TCP.

use crate::db::kv::resp::{RespEncoder, RespParser, RespValue};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{InstanceDescriptor, PoolSettings};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

#[derive(Debug)]
pub struct KvConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    socket_timeout: Duration,
    // Set while a request is in flight; a request cut short (error, timeout,
    // or a dropped future) leaves it set and the connection is not reused.
    broken: bool,
}

impl KvConnection {
    /// Connect, authenticate, and select the configured database index.
    pub async fn open(
        instance: &InstanceDescriptor,
        settings: &PoolSettings,
    ) -> GatewayResult<Self> {
        if instance.ssl_enabled {
            return Err(GatewayError::config(format!(
                "instance '{}': TLS is not supported for key-value connections",
                instance.instance_id
            )));
        }
        let index = instance.kv_index()?;
        let address = instance.address();

        let stream = match Self::connect_once(&address, settings.socket_timeout).await {
            Err(GatewayError::Timeout { .. }) if settings.retry_on_timeout => {
                debug!(address = %address, "Connect timed out, retrying once");
                Self::connect_once(&address, settings.socket_timeout).await?
            }
            other => other?,
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }

        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            socket_timeout: settings.socket_timeout,
            broken: false,
        };

        if let Some(password) = instance.password.as_deref().filter(|p| !p.is_empty()) {
            let mut parts = vec![Bytes::from_static(b"AUTH")];
            if !instance.username.is_empty() {
                parts.push(Bytes::from(instance.username.clone()));
            }
            parts.push(Bytes::from(password.to_string()));
            conn.expect_ok(RespValue::command(parts), "AUTH").await?;
        }

        if index != 0 {
            let frame = RespValue::command([
                Bytes::from_static(b"SELECT"),
                Bytes::from(index.to_string()),
            ]);
            conn.expect_ok(frame, "SELECT").await?;
        }

        debug!(
            instance_id = %instance.instance_id,
            address = %address,
            index,
            "Key-value connection established"
        );
        Ok(conn)
    }

    async fn connect_once(address: &str, limit: Duration) -> GatewayResult<TcpStream> {
        match timeout(limit, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(GatewayError::connection(
                format!("Failed to connect to {}: {}", address, e),
                "Check that the key-value server is running and accessible",
            )),
            Err(_) => Err(GatewayError::timeout(format!("connect to {}", address), limit)),
        }
    }

    async fn expect_ok(&mut self, frame: RespValue, step: &str) -> GatewayResult<()> {
        match self.request(&frame).await? {
            RespValue::Error(message) => Err(GatewayError::backend(
                format!("{} rejected: {}", step, message),
                error_code(&message),
            )),
            _ => Ok(()),
        }
    }

    /// Send one command and read its reply. Server error replies are
    /// returned as `RespValue::Error`, not as `Err`.
    pub async fn request(&mut self, frame: &RespValue) -> GatewayResult<RespValue> {
        let mut replies = self.pipeline(std::slice::from_ref(frame)).await?;
        replies
            .pop()
            .ok_or_else(|| GatewayError::internal("no reply read for request"))
    }

    /// Write every frame in one buffer and read exactly one reply per frame.
    pub async fn pipeline(&mut self, frames: &[RespValue]) -> GatewayResult<Vec<RespValue>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = BytesMut::new();
        for frame in frames {
            RespEncoder::encode_into(&mut out, frame);
        }

        self.broken = true;
        let limit = self.socket_timeout;
        let replies = match timeout(limit, self.exchange(&out, frames.len())).await {
            Ok(result) => result?,
            Err(_) => return Err(GatewayError::timeout("key-value socket I/O", limit)),
        };
        self.broken = false;
        Ok(replies)
    }

    async fn exchange(&mut self, out: &[u8], count: usize) -> GatewayResult<Vec<RespValue>> {
        self.stream.write_all(out).await.map_err(io_error)?;
        let mut replies = Vec::with_capacity(count);
        while replies.len() < count {
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }

    async fn read_reply(&mut self) -> GatewayResult<RespValue> {
        loop {
            match RespParser::parse(&mut self.read_buf) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => {
                    return Err(GatewayError::connection(
                        format!("Malformed reply: {}", e),
                        "Check that the configured port serves the RESP protocol",
                    ));
                }
            }
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(io_error)?;
            if n == 0 {
                return Err(GatewayError::connection(
                    "Connection closed by server",
                    "Check the server's timeout and maxclients settings",
                ));
            }
        }
    }

    /// PING round trip within the socket timeout.
    pub async fn ping(&mut self) -> bool {
        let frame = RespValue::command([Bytes::from_static(b"PING")]);
        matches!(self.request(&frame).await, Ok(RespValue::SimpleString(ref s)) if s == "PONG")
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

fn io_error(e: std::io::Error) -> GatewayError {
    GatewayError::connection(
        format!("I/O error: {}", e),
        "Check network connectivity and key-value server status",
    )
}

/// The error prefix of a RESP error reply ("WRONGTYPE", "NOAUTH", ...).
pub fn error_code(message: &str) -> Option<String> {
    message
        .split_whitespace()
        .next()
        .filter(|word| word.chars().all(|c| c.is_ascii_uppercase()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Engine;
    use tokio::net::TcpListener;

    #[test]
    fn test_error_code() {
        assert_eq!(error_code("WRONGTYPE Operation against a key"), Some("WRONGTYPE".to_string()));
        assert_eq!(error_code("ERR unknown command"), Some("ERR".to_string()));
        assert_eq!(error_code("something lowercase"), None);
        assert_eq!(error_code(""), None);
    }

    async fn serve_once(replies: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await;
            // Split the reply across writes to exercise partial reads
            let (head, tail) = replies.split_at(replies.len() / 2);
            socket.write_all(head).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(tail).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        port
    }

    #[tokio::test]
    async fn test_pipeline_reads_one_reply_per_frame() {
        let port = serve_once(b"+OK\r\n$5\r\nhello\r\n:2\r\n").await;
        let instance = InstanceDescriptor::new("kv", Engine::Redis).with_endpoint("127.0.0.1", port);
        let mut conn = KvConnection::open(&instance, &PoolSettings::default()).await.unwrap();

        let frames = vec![
            RespValue::command([Bytes::from("SET"), Bytes::from("k"), Bytes::from("hello")]),
            RespValue::command([Bytes::from("GET"), Bytes::from("k")]),
            RespValue::command([Bytes::from("INCRBY"), Bytes::from("n"), Bytes::from("2")]),
        ];
        let replies = conn.pipeline(&frames).await.unwrap();
        assert_eq!(
            replies,
            vec![
                RespValue::SimpleString("OK".to_string()),
                RespValue::bulk("hello"),
                RespValue::Integer(2),
            ]
        );
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn test_closed_socket_marks_broken() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        let instance = InstanceDescriptor::new("kv", Engine::Redis).with_endpoint("127.0.0.1", port);
        let mut conn = KvConnection::open(&instance, &PoolSettings::default()).await.unwrap();
        assert!(!conn.ping().await);
        assert!(conn.is_broken());
    }

    #[tokio::test]
    async fn test_tls_rejected() {
        let mut instance = InstanceDescriptor::new("kv", Engine::Redis);
        instance.ssl_enabled = true;
        let err = KvConnection::open(&instance, &PoolSettings::default()).await.unwrap_err();
        assert!(err.is_config_error());
    }
}
