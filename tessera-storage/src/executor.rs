//! Dispatch pools for store and cache calls.
//!
//! Store calls always run on a bounded [`DispatchPool`]. Cache calls run
//! inline for the local topology. For the remote one they run on their own
//! bounded pool of blocking threads, since byte store calls hold the thread
//! for the whole transaction.

use std::future::Future;
use std::sync::Arc;

use tessera_core::{CacheTopology, ConfigError, ExecutorSettings, InvariantViolation};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::info;

/// What happens to a dispatched task when the caller stops waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Abort the task. Cancelling a find or save reaches the store call.
    AbortOnDrop,
    /// Let the task finish. Cache puts and evicts are short and must land.
    RunToCompletion,
}

/// Where a pool's tasks are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Spawned onto the runtime's async workers.
    Async,
    /// Driven to completion on the runtime's blocking threads. Aborting has
    /// no effect once such a task has started.
    Blocking,
}

/// Aborts the wrapped task when dropped; a no-op once the task finished.
struct AbortGuard(AbortHandle);

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Bounded set of in-flight tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct DispatchPool {
    name: &'static str,
    runtime: Handle,
    semaphore: Arc<Semaphore>,
    size: usize,
    policy: CancelPolicy,
    mode: DispatchMode,
}

impl DispatchPool {
    pub fn new(name: &'static str, runtime: Handle, size: usize, policy: CancelPolicy) -> Self {
        let size = size.max(1);
        Self {
            name,
            runtime,
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            policy,
            mode: DispatchMode::Async,
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Pool on the runtime of the calling context.
    pub fn on_current(
        name: &'static str,
        size: usize,
        policy: CancelPolicy,
    ) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|e| ConfigError::InvalidValue {
            field: format!("executor.{}", name),
            reason: e.to_string(),
        })?;
        Ok(Self::new(name, runtime, size, policy))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn policy(&self) -> CancelPolicy {
        self.policy
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `task` on the pool once a slot is free.
    ///
    /// A panic inside the task surfaces as [`InvariantViolation::TaskFailed`].
    pub async fn run<F, T>(&self, task: F) -> Result<T, InvariantViolation>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| self.task_failed(e.to_string()))?;

        let join = match self.mode {
            DispatchMode::Async => self.runtime.spawn(async move {
                let _permit = permit;
                task.await
            }),
            DispatchMode::Blocking => {
                let runtime = self.runtime.clone();
                self.runtime.spawn_blocking(move || {
                    let _permit = permit;
                    runtime.block_on(task)
                })
            }
        };

        let result = match self.policy {
            CancelPolicy::AbortOnDrop => {
                let _guard = AbortGuard(join.abort_handle());
                join.await
            }
            CancelPolicy::RunToCompletion => join.await,
        };

        result.map_err(|e| {
            if e.is_panic() {
                self.task_failed("task panicked".to_string())
            } else {
                self.task_failed("task cancelled".to_string())
            }
        })
    }

    fn task_failed(&self, reason: String) -> InvariantViolation {
        InvariantViolation::TaskFailed {
            pool: self.name.to_string(),
            reason,
        }
    }
}

/// Where cache operations execute.
#[derive(Debug, Clone)]
pub enum CacheExecutor {
    /// On the caller's task; no dispatch.
    Inline,
    Pooled(DispatchPool),
}

impl CacheExecutor {
    pub async fn run<F, T>(&self, task: F) -> Result<T, InvariantViolation>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            CacheExecutor::Inline => Ok(task.await),
            CacheExecutor::Pooled(pool) => pool.run(task).await,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, CacheExecutor::Inline)
    }
}

/// The pair of executors the attribute service is constructed with.
#[derive(Debug, Clone)]
pub struct Executors {
    pub store: DispatchPool,
    pub cache: CacheExecutor,
}

impl Executors {
    pub const STORE_POOL: &'static str = "store";
    pub const CACHE_POOL: &'static str = "cache";

    /// Executors matching the cache topology, on the given runtime.
    pub fn for_topology(
        topology: CacheTopology,
        settings: &ExecutorSettings,
        runtime: Handle,
    ) -> Self {
        let store = DispatchPool::new(
            Self::STORE_POOL,
            runtime.clone(),
            settings.store_pool_size,
            CancelPolicy::AbortOnDrop,
        );
        let cache = match topology {
            CacheTopology::Local => CacheExecutor::Inline,
            CacheTopology::Remote => CacheExecutor::Pooled(DispatchPool::new(
                Self::CACHE_POOL,
                runtime,
                settings.cache_pool_size,
                CancelPolicy::RunToCompletion,
            )
            .with_mode(DispatchMode::Blocking)),
        };
        info!(
            topology = %topology,
            store_pool_size = store.size(),
            cache_inline = cache.is_inline(),
            "Executors ready"
        );
        Self { store, cache }
    }

    /// Local-topology executors on the current runtime.
    pub fn local(store_pool_size: usize) -> Result<Self, ConfigError> {
        let runtime = Handle::try_current().map_err(|e| ConfigError::InvalidValue {
            field: "executor.store_pool_size".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::for_topology(
            CacheTopology::Local,
            &ExecutorSettings {
                store_pool_size,
                cache_pool_size: 1,
            },
            runtime,
        ))
    }
}
