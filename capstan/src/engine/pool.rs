use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tokio::time::Instant;

use crate::manifest::ExecutionPolicy;
use crate::worker::{Termination, WorkerId, WorkerRecord};

/// Insertion of new worker records and O(1) lookup by routing identity.
///
/// Iteration order is unspecified but stable within one scheduling pass,
/// which is all the dispatch algorithm requires.
#[derive(Debug, Default)]
pub struct PoolMap {
    workers: HashMap<WorkerId, WorkerRecord>,
}

impl PoolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn busy_count(&self) -> usize {
        self.workers.values().filter(|record| record.is_busy()).count()
    }

    pub fn get_mut(&mut self, id: &WorkerId) -> Option<&mut WorkerRecord> {
        self.workers.get_mut(id)
    }

    pub fn insert(&mut self, record: WorkerRecord) {
        self.workers.insert(record.id(), record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.workers.values()
    }

    /// Identities of currently idle workers, in this pass's iteration
    /// order.
    pub fn idle_ids(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|record| record.is_idle())
            .map(WorkerRecord::id)
            .collect()
    }

    /// Identities of workers that have announced themselves and not died.
    pub fn alive_ids(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|record| record.is_alive())
            .map(WorkerRecord::id)
            .collect()
    }

    /// Remove records in the dead state. Returns the reaped identities so
    /// the bus can forget their addresses.
    pub fn reap_dead(&mut self) -> Vec<WorkerId> {
        let corpses: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|record| record.is_dead())
            .map(WorkerRecord::id)
            .collect();
        for id in &corpses {
            self.workers.remove(id);
        }
        if !corpses.is_empty() {
            tracing::debug!(count = corpses.len(), "recycled dead workers");
        }
        corpses
    }

    /// Terminate every worker whose liveness deadline has passed. The
    /// records stay in the map, dead, until the next reap.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for record in self.workers.values_mut() {
            if record.expired(now) {
                tracing::warn!(worker = %record.id(), state = record.state().name(), "worker went silent");
                record.terminate(Termination::Crash);
                expired += 1;
            }
        }
        expired
    }

    /// Terminate every record for engine shutdown, failing in-flight jobs
    /// with a resource error.
    pub fn terminate_all(&mut self) {
        for record in self.workers.values_mut() {
            record.terminate(Termination::Shutdown);
        }
    }

    pub fn clear(&mut self) {
        self.workers.clear();
    }
}

/// The growth rule: grow an empty pool unconditionally, otherwise only
/// while under the pool limit and the queue justifies another worker.
pub(crate) fn should_grow(pool_size: usize, queue_size: usize, policy: &ExecutionPolicy) -> bool {
    pool_size == 0
        || (pool_size < policy.pool_limit
            && pool_size * policy.grow_threshold < queue_size * 2)
}

/// Spawns worker processes and arranges them to connect back to the bus.
///
/// Spawning is best-effort: the engine logs failures and relies on later
/// scheduling passes to retry.
pub trait WorkerFactory: Send + Sync + 'static {
    /// Launch one worker and return its routing identity.
    fn spawn(&self) -> anyhow::Result<WorkerId>;
}

/// Factory launching a worker executable per spawn.
///
/// The worker receives its application name, its assigned identity and the
/// bus endpoint on the command line and is expected to announce itself
/// with a heartbeat before the startup timeout.
#[derive(Clone, Debug)]
pub struct ProcessWorkerFactory {
    executable: PathBuf,
    app: String,
    endpoint: PathBuf,
}

impl ProcessWorkerFactory {
    pub fn new(
        executable: impl Into<PathBuf>,
        app: impl Into<String>,
        endpoint: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            app: app.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn spawn(&self) -> anyhow::Result<WorkerId> {
        let id = WorkerId::new();
        let mut child = Command::new(&self.executable)
            .arg("--app")
            .arg(&self.app)
            .arg("--uuid")
            .arg(id.to_string())
            .arg("--endpoint")
            .arg(&self.endpoint)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                anyhow::anyhow!("unable to launch {}: {e}", self.executable.display())
            })?;

        tracing::debug!(worker = %id, pid = child.id(), "spawned worker process");

        // Reap the exit status off-thread so finished workers don't linger
        // as zombies.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(id)
    }
}
