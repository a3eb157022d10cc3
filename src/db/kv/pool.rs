//! Bounded connection pool for the key-value backend.
//!
//! A semaphore with `max_size` permits bounds open connections: every lease
//! holds one permit for its whole life, so `idle + leased <= max_size` at all
//! times. Leases return their connection on drop; a lease whose command was cut
//! short (or whose connection is broken) closes it instead.

use crate::db::cell::{ManagedPool, PoolStatus};
use crate::db::kv::connection::KvConnection;
use crate::db::kv::resp::RespValue;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{InstanceDescriptor, PoolSettings};
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A connection the pool can keep idle and ping.
pub trait Poolable: Send + 'static {
    fn ping(&mut self) -> impl Future<Output = bool> + Send;

    /// True once the connection must not be reused.
    fn is_broken(&self) -> bool;
}

/// Opens new connections for a pool.
pub trait Connector: Send + Sync + 'static {
    type Conn: Poolable;

    fn connect(&self) -> impl Future<Output = GatewayResult<Self::Conn>> + Send;
}

struct IdleConn<T> {
    conn: T,
    last_used: Instant,
}

struct State<T> {
    idle: VecDeque<IdleConn<T>>,
    leased: u32,
    closed: bool,
}

struct Shared<C: Connector> {
    connector: C,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    state: Mutex<State<C::Conn>>,
}

impl<C: Connector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State<C::Conn>> {
        // State stays consistent across a panic: every update is a single step
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_in(&self, conn: C::Conn, discard: bool) {
        let rejected = {
            let mut state = self.lock();
            state.leased = state.leased.saturating_sub(1);
            if state.closed || discard || conn.is_broken() {
                Some(conn)
            } else {
                state.idle.push_back(IdleConn {
                    conn,
                    last_used: Instant::now(),
                });
                None
            }
        };
        if rejected.is_some() {
            debug!(discard, "Closing connection on release");
        }
    }
}

/// One checked-out connection. Returned to its pool on drop.
pub struct Lease<C: Connector> {
    conn: Option<C::Conn>,
    discard: bool,
    shared: Arc<Shared<C>>,
    // Dropped after `Drop::drop` has checked the connection in
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Lease<C> {
    pub fn connection(&mut self) -> GatewayResult<&mut C::Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| GatewayError::internal("lease no longer holds a connection"))
    }

    /// Close the connection on release instead of returning it.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(conn, self.discard);
        }
    }
}

impl<C: Connector> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("discard", &self.discard).finish()
    }
}

pub struct BoundedPool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> BoundedPool<C> {
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        let permits = settings.max_size as usize;
        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                semaphore: Arc::new(Semaphore::new(permits)),
                state: Mutex::new(State {
                    idle: VecDeque::new(),
                    leased: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Lease a connection, waiting up to the acquire timeout for a free slot.
    ///
    /// Idle connections past the idle timeout are closed; those unused for
    /// longer than the health-check interval are pinged before reuse.
    pub async fn acquire(&self) -> GatewayResult<Lease<C>> {
        let settings = &self.shared.settings;
        let start = Instant::now();
        let permit = match timeout(
            settings.acquire_timeout,
            Arc::clone(&self.shared.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(GatewayError::PoolClosed),
            Err(_) => {
                warn!(
                    max_size = settings.max_size,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Connection pool exhausted"
                );
                return Err(GatewayError::pool_exhausted(start.elapsed()));
            }
        };

        loop {
            let candidate = {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(GatewayError::PoolClosed);
                }
                state.idle.pop_back()
            };
            let Some(IdleConn { mut conn, last_used }) = candidate else {
                break;
            };
            let idle_for = last_used.elapsed();
            if idle_for >= settings.idle_timeout {
                debug!(idle_ms = idle_for.as_millis() as u64, "Closing expired idle connection");
                continue;
            }
            if idle_for >= settings.health_check_interval && !conn.ping().await {
                debug!("Idle connection failed health check; closing it");
                continue;
            }
            return self.lease(conn, permit);
        }

        let conn = self.shared.connector.connect().await?;
        self.lease(conn, permit)
    }

    fn lease(&self, conn: C::Conn, permit: OwnedSemaphorePermit) -> GatewayResult<Lease<C>> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(GatewayError::PoolClosed);
        }
        state.leased += 1;
        drop(state);
        Ok(Lease {
            conn: Some(conn),
            discard: false,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Return a lease explicitly.
    ///
    /// A lease from a different pool is rejected with `InvalidRelease`; it
    /// still goes back to the pool that issued it.
    pub fn release(&self, lease: Lease<C>) -> GatewayResult<()> {
        if !Arc::ptr_eq(&lease.shared, &self.shared) {
            warn!("Rejected release of a connection leased from another pool");
            drop(lease);
            return Err(GatewayError::invalid_release(
                "connection was not leased from this pool",
            ));
        }
        drop(lease);
        Ok(())
    }

    /// Open idle connections until `target` are available. Best effort.
    pub async fn warm(&self, target: u32) {
        let target = target.min(self.shared.settings.max_size) as usize;
        while self.shared.lock().idle.len() < target {
            match self.shared.connector.connect().await {
                Ok(conn) => {
                    let mut state = self.shared.lock();
                    let open = state.idle.len() + state.leased as usize;
                    if state.closed || open >= self.shared.settings.max_size as usize {
                        break;
                    }
                    state.idle.push_back(IdleConn {
                        conn,
                        last_used: Instant::now(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open warm connection");
                    break;
                }
            }
        }
    }

    /// Lease a connection and ping it. Never fails.
    pub async fn health_check(&self) -> bool {
        let mut lease = match self.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                debug!(error = %e, "Health check could not lease a connection");
                return false;
            }
        };
        let alive = match lease.connection() {
            Ok(conn) => conn.ping().await,
            Err(_) => false,
        };
        if !alive {
            lease.discard();
        }
        alive
    }

    /// Close idle connections and refuse further leases. Idempotent.
    /// Connections still leased are closed when their lease drops.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.shared.semaphore.close();
        debug!(closed = drained.len(), "Closed idle connections");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        let idle = state.idle.len() as u32;
        PoolStatus {
            idle,
            leased: state.leased,
            total: idle + state.leased,
            max_size: self.shared.settings.max_size,
        }
    }
}

// =============================================================================
// Key-value pool
// =============================================================================

impl Poolable for KvConnection {
    async fn ping(&mut self) -> bool {
        KvConnection::ping(self).await
    }

    fn is_broken(&self) -> bool {
        KvConnection::is_broken(self)
    }
}

/// Opens authenticated connections to one key-value instance.
pub struct KvConnector {
    instance: InstanceDescriptor,
    settings: PoolSettings,
}

impl KvConnector {
    pub fn new(instance: InstanceDescriptor, settings: PoolSettings) -> Self {
        Self { instance, settings }
    }

    pub fn instance(&self) -> &InstanceDescriptor {
        &self.instance
    }
}

impl Connector for KvConnector {
    type Conn = KvConnection;

    async fn connect(&self) -> GatewayResult<KvConnection> {
        KvConnection::open(&self.instance, &self.settings).await
    }
}

pub type KvPool = BoundedPool<KvConnector>;
pub type KvLease = Lease<KvConnector>;

impl KvPool {
    /// One PING on a fresh lease; any failure is reported as-is.
    async fn ping_once(&self) -> GatewayResult<()> {
        let mut lease = self.acquire().await?;
        let frame = RespValue::command([Bytes::from_static(b"PING")]);
        match lease.connection()?.request(&frame).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            RespValue::Error(message) => Err(GatewayError::backend(
                format!("PING rejected: {}", message),
                crate::db::kv::connection::error_code(&message),
            )),
            other => Err(GatewayError::backend(
                format!("unexpected PING reply: {:?}", other),
                None,
            )),
        }
    }
}

impl ManagedPool for KvPool {
    async fn connect(instance: &InstanceDescriptor, settings: &PoolSettings) -> GatewayResult<Self> {
        let pool = BoundedPool::new(
            KvConnector::new(instance.clone(), settings.clone()),
            settings.clone(),
        );
        if let Err(e) = pool.ping_once().await {
            pool.close();
            return Err(e.into_pool_init());
        }
        pool.warm(settings.min_size).await;
        info!(
            address = %instance.address(),
            status = ?pool.status(),
            "Key-value pool ready"
        );
        Ok(pool)
    }

    async fn health_check(&self) -> bool {
        BoundedPool::health_check(self).await
    }

    async fn close(&self) {
        BoundedPool::close(self);
    }

    fn status(&self) -> PoolStatus {
        BoundedPool::status(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockConn {
        alive: Arc<AtomicBool>,
    }

    impl Poolable for MockConn {
        async fn ping(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn is_broken(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct MockConnector {
        connects: AtomicUsize,
        alive: Arc<AtomicBool>,
    }

    impl Connector for MockConnector {
        type Conn = MockConn;

        async fn connect(&self) -> GatewayResult<MockConn> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn {
                alive: Arc::clone(&self.alive),
            })
        }
    }

    fn pool(max: u32, acquire_ms: u64) -> BoundedPool<MockConnector> {
        let connector = MockConnector::default();
        connector.alive.store(true, Ordering::SeqCst);
        let settings = PoolSettings::for_kv(0, max)
            .with_acquire_timeout(Duration::from_millis(acquire_ms));
        BoundedPool::new(connector, settings)
    }

    fn assert_accounting(pool: &BoundedPool<MockConnector>) {
        let s = pool.status();
        assert_eq!(s.idle + s.leased, s.total);
        assert!(s.total <= s.max_size, "{:?}", s);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_wait() {
        let pool = pool(2, 50);
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(50));
        match &err {
            GatewayError::PoolExhausted { waited } => assert!(*waited >= Duration::from_millis(50)),
            other => panic!("expected PoolExhausted, got {:?}", other),
        }
        assert!(err.is_retryable());
        assert_eq!(pool.status().leased, 2);
    }

    #[tokio::test]
    async fn test_concurrent_leases_never_exceed_max() {
        let pool = Arc::new(pool(3, 5_000));
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let (pool, in_use, peak) = (pool.clone(), in_use.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                let lease = pool.acquire().await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_use.fetch_sub(1, Ordering::SeqCst);
                pool.release(lease).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.connector().connects.load(Ordering::SeqCst) <= 3);
        let s = pool.status();
        assert_eq!(s.leased, 0);
        assert_accounting(&pool);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_leaks_nothing() {
        let pool = pool(1, 5_000);
        let held = pool.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(waited.is_err());

        drop(held);
        let lease = pool.acquire().await.unwrap();
        let s = pool.status();
        assert_eq!((s.idle, s.leased, s.total), (0, 1, 1));
        drop(lease);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_discarded_lease_is_closed() {
        let pool = pool(2, 100);
        let mut lease = pool.acquire().await.unwrap();
        lease.discard();
        drop(lease);
        let s = pool.status();
        assert_eq!((s.idle, s.leased, s.total), (0, 0, 0));

        let _again = pool.acquire().await.unwrap();
        assert_eq!(pool.connector().connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_foreign_release_rejected() {
        let a = pool(1, 100);
        let b = pool(1, 100);
        let lease = a.acquire().await.unwrap();

        let err = b.release(lease).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRelease { .. }));
        // The lease still went home
        assert_eq!(a.status().idle, 1);
        assert_eq!(a.status().leased, 0);
        assert_eq!(b.status().total, 0);
    }

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let pool = pool(2, 100);
        for _ in 0..5 {
            let lease = pool.acquire().await.unwrap();
            pool.release(lease).unwrap();
        }
        assert_eq!(pool.connector().connects.load(Ordering::SeqCst), 1);
        assert_accounting(&pool);
    }

    #[tokio::test]
    async fn test_stale_idle_connection_is_replaced() {
        let connector = MockConnector::default();
        let settings = PoolSettings::for_kv(0, 2)
            .with_acquire_timeout(Duration::from_millis(100))
            .with_health_check_interval(Duration::from_millis(1));
        let pool = BoundedPool::new(connector, settings);

        pool.connector().alive.store(false, Ordering::SeqCst);
        drop(pool.acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Ping fails on the idle connection, so a new one is opened
        let _lease = pool.acquire().await.unwrap();
        assert_eq!(pool.connector().connects.load(Ordering::SeqCst), 2);
        assert_accounting(&pool);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = pool(2, 100);
        let held = pool.acquire().await.unwrap();
        drop(pool.acquire().await.unwrap());

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await.unwrap_err(), GatewayError::PoolClosed));

        // A lease outstanding at close is not returned to idle
        drop(held);
        let s = pool.status();
        assert_eq!((s.idle, s.leased), (0, 0));
        assert!(!pool.health_check().await);
    }

    #[tokio::test]
    async fn test_warm_respects_max() {
        let pool = pool(2, 100);
        pool.warm(5).await;
        assert_eq!(pool.status().idle, 2);
        assert_accounting(&pool);
    }
}
