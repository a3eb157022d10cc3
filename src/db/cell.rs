//! Lazily initialized pool holder.
//!
//! A `PoolCell` owns at most one live pool for the process. The first caller of
//! `ensure_initialized` builds it against the active instance; concurrent first
//! callers wait for that build and share its result. A failed build leaves the
//! cell empty so a later call can retry.

use crate::error::GatewayResult;
use crate::models::{GatewayConfig, InstanceDescriptor, PoolSettings};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Point-in-time pool occupancy. `idle + leased == total <= max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct PoolStatus {
    pub idle: u32,
    pub leased: u32,
    pub total: u32,
    pub max_size: u32,
}

/// Capability set shared by the SQL and key-value pools.
pub trait ManagedPool: Send + Sync + Sized + 'static {
    /// Build the native pool for `instance`.
    fn connect(
        instance: &InstanceDescriptor,
        settings: &PoolSettings,
    ) -> impl Future<Output = GatewayResult<Self>> + Send;

    /// Lightweight liveness check. Never fails; any error is `false`.
    fn health_check(&self) -> impl Future<Output = bool> + Send;

    /// Release all native resources.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn status(&self) -> PoolStatus;
}

pub struct PoolCell<P> {
    name: &'static str,
    config: Arc<GatewayConfig>,
    // Readers initialize through the OnceCell; close takes the write lock so
    // it waits for any in-flight initialization before tearing down.
    slot: RwLock<OnceCell<Arc<P>>>,
}

impl<P: ManagedPool> PoolCell<P> {
    pub fn new(name: &'static str, config: Arc<GatewayConfig>) -> Self {
        Self {
            name,
            config,
            slot: RwLock::new(OnceCell::new()),
        }
    }

    /// Return the live pool, building it on first use.
    pub async fn ensure_initialized(&self) -> GatewayResult<Arc<P>> {
        let slot = self.slot.read().await;
        if let Some(pool) = slot.get() {
            return Ok(Arc::clone(pool));
        }

        let pool = slot
            .get_or_try_init(|| async {
                let instance = self.config.active_instance()?;
                info!(
                    pool = self.name,
                    instance_id = %instance.instance_id,
                    engine = %instance.engine,
                    min_size = self.config.pool.min_size,
                    max_size = self.config.pool.max_size,
                    "Initializing connection pool"
                );
                match P::connect(instance, &self.config.pool).await {
                    Ok(pool) => {
                        info!(pool = self.name, "Connection pool initialized");
                        Ok(Arc::new(pool))
                    }
                    Err(e) => {
                        warn!(pool = self.name, error = %e, "Connection pool initialization failed");
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(pool))
    }

    /// The live pool, if one has been built.
    pub async fn get(&self) -> Option<Arc<P>> {
        self.slot.read().await.get().cloned()
    }

    pub async fn is_initialized(&self) -> bool {
        self.slot.read().await.initialized()
    }

    /// Check the pool, initializing it first. Initialization failure is `false`.
    pub async fn health_check(&self) -> bool {
        match self.ensure_initialized().await {
            Ok(pool) => pool.health_check().await,
            Err(e) => {
                debug!(pool = self.name, error = %e, "Health check could not initialize pool");
                false
            }
        }
    }

    pub async fn status(&self) -> Option<PoolStatus> {
        self.get().await.map(|pool| pool.status())
    }

    /// Close and forget the pool. Calling this on an empty cell is a no-op.
    ///
    /// A later `ensure_initialized` builds a fresh pool.
    pub async fn close(&self) {
        let taken = self.slot.write().await.take();
        match taken {
            Some(pool) => {
                pool.close().await;
                info!(pool = self.name, "Connection pool closed");
            }
            None => warn!(
                pool = self.name,
                "Connection pool was not initialized; nothing to close"
            ),
        }
    }
}
