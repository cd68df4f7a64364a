use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::pool::{PoolError, WorkerPool};

#[derive(Debug, Default)]
struct RegistryState {
    pools: BTreeMap<String, Arc<WorkerPool>>,
    shut_down: bool,
}

/// Owns named worker pools shared across components.
///
/// The registry replaces process-wide pools: it is constructed explicitly and handed to whoever
/// needs a shared pool. Pools live until [`shutdown_all`](Self::shutdown_all) is called or the
/// registry is dropped. Dropping the registry shuts down all pools immediately and discards their
/// queued tasks.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    state: Mutex<RegistryState>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pool under its name, replacing and returning any previous pool of that name.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShutDown`] if the registry was shut down. The pool is shut down too.
    pub fn register(&self, pool: WorkerPool) -> Result<Option<Arc<WorkerPool>>, PoolError> {
        let mut state = self.state.lock();
        if state.shut_down {
            pool.shutdown();
            return Err(PoolError::ShutDown);
        }

        sluice_log::debug!(pool = pool.name(), "registering shared pool");
        Ok(state.pools.insert(pool.name().to_owned(), Arc::new(pool)))
    }

    /// Returns the pool registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.state.lock().pools.get(name).cloned()
    }

    /// Returns the pool registered under `name`, creating it from `config` if missing.
    pub fn get_or_create(
        &self,
        name: &str,
        config: &PoolConfig,
    ) -> Result<Arc<WorkerPool>, PoolError> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(PoolError::ShutDown);
        }

        if let Some(pool) = state.pools.get(name) {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(config.to_builder(name).build()?);
        sluice_log::debug!(pool = name, "created shared pool");
        state.pools.insert(name.to_owned(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Returns the number of registered pools.
    pub fn len(&self) -> usize {
        self.state.lock().pools.len()
    }

    /// Returns `true` if no pool is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts down all pools and waits for them to terminate within a shared `timeout`.
    ///
    /// Afterwards, the registry rejects new pools. Returns `true` if all pools terminated in time.
    pub fn shutdown_all(&self, timeout: Duration) -> bool {
        let pools: Vec<_> = {
            let mut state = self.state.lock();
            state.shut_down = true;
            std::mem::take(&mut state.pools).into_values().collect()
        };

        for pool in &pools {
            pool.shutdown();
        }

        let deadline = Instant::now() + timeout;
        let mut terminated = true;
        for pool in &pools {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !pool.await_termination(remaining) {
                sluice_log::warn!(
                    pool = pool.name(),
                    "shared pool did not terminate in time"
                );
                terminated = false;
            }
        }

        terminated
    }

    /// Emits gauges for all registered pools.
    pub fn report_metrics(&self) {
        for pool in self.state.lock().pools.values() {
            pool.report_metrics();
        }
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.shut_down = true;

        for (name, pool) in std::mem::take(&mut state.pools) {
            let dropped = pool.shutdown_now();
            sluice_log::trace!(pool = name.as_str(), dropped, "shut down shared pool");
        }
    }
}
