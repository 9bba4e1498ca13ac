//! The engine: per-application scheduler and worker-pool controller.
//!
//! An [`Engine`] owns one application's job queue and worker pool. Foreign
//! threads interact only through the thread-safe façade (`start`, `stop`,
//! `enqueue`, `info`); everything else happens on a single reactor task
//! that multiplexes bus I/O, timers and cross-thread wakeups.

mod builder;
mod pool;
mod reactor;

pub use builder::EngineBuilder;
pub use pool::{PoolMap, ProcessWorkerFactory, WorkerFactory};

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::bus::Bus;
use crate::job::{ErrorCode, Job};
use crate::manifest::Manifest;
use crate::queue::JobQueue;
use crate::resource::ResourceController;
use crate::telemetry;

use reactor::Reactor;

/// Lifecycle state of the engine itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No loop task; submissions are rejected.
    Stopped,
    /// Accepting and dispatching jobs.
    Running,
    /// Shutdown requested; the loop winds down on its next pass.
    Stopping,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Point-in-time snapshot returned by [`Engine::info`].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct EngineInfo {
    pub state: EngineState,
    pub queue_depth: usize,
    pub pool: PoolInfo,
}

/// Pool counters inside an [`EngineInfo`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PoolInfo {
    pub total: usize,
    pub busy: usize,
}

/// Reactor tuning knobs, distinct from the per-application policy.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Messages drained from the bus per pass.
    pub io_bulk_size: usize,
    /// Period of the bus-readability re-check.
    pub pump_interval: Duration,
    /// Period of the garbage-collection sweep.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_bulk_size: 100,
            pump_interval: Duration::from_millis(5),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

pub(crate) struct Core {
    pub(crate) state: EngineState,
    pub(crate) queue: JobQueue,
    pub(crate) pool: PoolMap,
}

/// State shared between the façade and the reactor task. The mutex guards
/// every field the two sides touch; critical sections are brief and never
/// span bus I/O that may block.
pub(crate) struct Shared {
    pub(crate) manifest: Manifest,
    pub(crate) config: EngineConfig,
    pub(crate) core: Mutex<Core>,
    pub(crate) wakeup: Notify,
}

/// Per-application scheduler and worker-pool controller.
///
/// `start`, `stop`, `enqueue` and `info` are safe to call from any thread.
/// All errors a job can experience arrive through its
/// [`JobHandler`](crate::job::JobHandler); the façade itself never fails a
/// call.
pub struct Engine<B: Bus, F: WorkerFactory> {
    shared: Arc<Shared>,
    bus: Arc<B>,
    factory: Arc<F>,
    limits: Arc<dyn ResourceController>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Bus, F: WorkerFactory> Engine<B, F> {
    /// Build an engine around a validated manifest.
    ///
    /// Resource limits are applied here, best-effort: a failing controller
    /// is logged and the engine continues without limits.
    ///
    /// # Errors
    ///
    /// Fails only on manifest validation.
    pub fn new(
        manifest: Manifest,
        config: EngineConfig,
        bus: Arc<B>,
        factory: Arc<F>,
        limits: Arc<dyn ResourceController>,
    ) -> anyhow::Result<Self> {
        manifest.validate()?;

        if let Err(e) = limits.setup(&manifest.name, &manifest.resource_limits) {
            tracing::error!(app = %manifest.name, "unable to apply resource limits: {e:#}");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                manifest,
                config,
                core: Mutex::new(Core {
                    state: EngineState::Stopped,
                    queue: JobQueue::new(),
                    pool: PoolMap::new(),
                }),
                wakeup: Notify::new(),
            }),
            bus,
            factory,
            limits,
            loop_handle: Mutex::new(None),
        })
    }

    /// A builder with defaults for config and resource limits.
    pub fn builder(manifest: Manifest) -> EngineBuilder<B, F> {
        EngineBuilder::new(manifest)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.shared.manifest
    }

    /// The bus this engine receives worker messages on.
    pub fn bus(&self) -> Arc<B> {
        Arc::clone(&self.bus)
    }

    /// Start the reactor task. Idempotent.
    pub async fn start(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.state != EngineState::Stopped {
                return;
            }
            core.state = EngineState::Running;
        }

        tracing::info!(app = %self.shared.manifest.name, "starting");

        let reactor = Reactor::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.bus),
            Arc::clone(&self.factory),
        );
        *self.loop_handle.lock() = Some(tokio::spawn(reactor.run()));
    }

    /// Request shutdown and wait for the reactor to wind down. Idempotent.
    ///
    /// Queued jobs fail with a resource error, workers receive a terminate
    /// command, and in-flight jobs fail with a resource error. After this
    /// returns no further callbacks fire.
    pub async fn stop(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.state == EngineState::Running {
                tracing::info!(app = %self.shared.manifest.name, "stopping");
                core.state = EngineState::Stopping;
                self.shared.wakeup.notify_one();
            }
        }

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let grace = self.shared.manifest.policy.termination_timeout;
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("loop task failed: {e:?}"),
                Err(_) => tracing::warn!("loop task timed out during shutdown"),
            }
        }
    }

    /// Submit a job from any thread.
    ///
    /// When the engine is not running the job fails synchronously with a
    /// resource error, likewise when the queue is at its limit. Otherwise
    /// the job is queued and the loop is woken to schedule it.
    pub fn enqueue(&self, job: Arc<Job>) {
        let mut core = self.shared.core.lock();

        if core.state != EngineState::Running {
            tracing::debug!(
                event = %job.event(),
                "dropping an incomplete job due to an inactive engine"
            );
            drop(core);
            job.fail(ErrorCode::Resource, "engine is not active");
            return;
        }

        if core.queue.len() >= self.shared.manifest.policy.queue_limit {
            tracing::debug!(
                event = %job.event(),
                "dropping an incomplete job due to a full queue"
            );
            drop(core);
            job.fail(ErrorCode::Resource, "the queue is full");
            return;
        }

        telemetry::record_job_enqueued(&self.shared.manifest.name, job.event());
        core.queue.push(job);
        telemetry::set_queue_depth(&self.shared.manifest.name, core.queue.len());
        self.shared.wakeup.notify_one();
    }

    /// Snapshot the engine state for monitoring.
    pub fn info(&self) -> EngineInfo {
        let core = self.shared.core.lock();
        match core.state {
            EngineState::Running => EngineInfo {
                state: core.state,
                queue_depth: core.queue.len(),
                pool: PoolInfo {
                    total: core.pool.len(),
                    busy: core.pool.busy_count(),
                },
            },
            state => EngineInfo {
                state,
                queue_depth: 0,
                pool: PoolInfo::default(),
            },
        }
    }
}

impl<B: Bus, F: WorkerFactory> Drop for Engine<B, F> {
    fn drop(&mut self) {
        // Teardown can fail transiently while workers are still
        // terminating; that is tolerated.
        if let Err(e) = self.limits.teardown(&self.shared.manifest.name) {
            tracing::error!(
                app = %self.shared.manifest.name,
                "unable to tear down resource limits: {e:#}"
            );
        }
    }
}

impl<B: Bus, F: WorkerFactory> fmt::Debug for Engine<B, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("Engine")
            .field("app", &self.shared.manifest.name)
            .field("state", &core.state)
            .field("queue_depth", &core.queue.len())
            .field("pool_total", &core.pool.len())
            .finish()
    }
}
