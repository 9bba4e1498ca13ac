use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::job::{ErrorCode, Job};
use crate::manifest::ExecutionPolicy;
use crate::protocol::WorkerEvent;

/// Stable 16-byte routing identity of a worker on the bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WorkerId(pub Uuid);

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerId {
    /// Create a new worker ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The identity as it travels on the bus.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Parse an identity frame.
    ///
    /// # Errors
    ///
    /// Returns an error unless `bytes` is exactly 16 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("worker identity must be 16 bytes"))?;
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one worker.
///
/// The allowed events per state are encoded in
/// [`WorkerRecord::process`]; there is no state beyond these variants.
#[derive(Debug, Default)]
pub enum WorkerState {
    /// Spawned, no heartbeat seen yet.
    #[default]
    Unknown,
    /// Alive and ready for a job.
    Idle,
    /// Alive and holding exactly one job.
    Busy { job: Arc<Job> },
    /// Terminal; the record lingers until the next sweep to absorb late
    /// frames.
    Dead,
}

impl WorkerState {
    /// Short name for log lines and `info()` output.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerState::Unknown => "unknown",
            WorkerState::Idle => "idle",
            WorkerState::Busy { .. } => "busy",
            WorkerState::Dead => "dead",
        }
    }
}

/// Why a worker is being torn down; selects the error its in-flight job
/// reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The worker died or went silent.
    Crash,
    /// The engine is shutting the pool down.
    Shutdown,
}

impl Termination {
    fn job_error(self) -> (ErrorCode, &'static str) {
        match self {
            Termination::Crash => (ErrorCode::Server, "the worker has unexpectedly died"),
            Termination::Shutdown => (ErrorCode::Resource, "engine is shutting down"),
        }
    }
}

/// Bookkeeping for one worker in the pool map.
#[derive(Debug)]
pub struct WorkerRecord {
    id: WorkerId,
    spawned_at: DateTime<Utc>,
    last_heartbeat: Option<DateTime<Utc>>,
    liveness_deadline: Instant,
    state: WorkerState,
}

impl WorkerRecord {
    /// Track a freshly spawned worker. It has until `startup_timeout` to
    /// announce itself with a heartbeat.
    pub fn new(id: WorkerId, now: Instant, policy: &ExecutionPolicy) -> Self {
        Self {
            id,
            spawned_at: Utc::now(),
            last_heartbeat: None,
            liveness_deadline: now + policy.startup_timeout,
            state: WorkerState::Unknown,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, WorkerState::Idle)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, WorkerState::Busy { .. })
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.state, WorkerState::Dead)
    }

    /// Idle or busy: the worker has announced itself and not died.
    pub fn is_alive(&self) -> bool {
        matches!(self.state, WorkerState::Idle | WorkerState::Busy { .. })
    }

    /// The job this worker holds, present iff busy.
    pub fn current_job(&self) -> Option<&Arc<Job>> {
        match &self.state {
            WorkerState::Busy { job } => Some(job),
            _ => None,
        }
    }

    /// True when the liveness deadline has passed for a non-dead worker.
    pub fn expired(&self, now: Instant) -> bool {
        !self.is_dead() && self.liveness_deadline <= now
    }

    /// Apply one bus-delivered event to the state machine.
    pub fn process(&mut self, event: WorkerEvent, now: Instant, policy: &ExecutionPolicy) {
        if self.is_dead() {
            tracing::warn!(worker = %self.id, event = event.kind(), "dropping an event for a dead worker");
            return;
        }

        match event {
            WorkerEvent::Heartbeat => {
                self.last_heartbeat = Some(Utc::now());
                if matches!(self.state, WorkerState::Unknown) {
                    tracing::debug!(worker = %self.id, "worker came online");
                    self.state = WorkerState::Idle;
                    self.liveness_deadline = now + policy.startup_timeout;
                } else {
                    self.rearm(now, policy);
                }
            }
            WorkerEvent::Terminate => {
                tracing::debug!(worker = %self.id, "worker announced termination");
                self.terminate(Termination::Crash);
            }
            WorkerEvent::Chunk(data) => match &self.state {
                WorkerState::Busy { job } => job.chunk(&data),
                _ => {
                    tracing::warn!(worker = %self.id, "dropping a chunk from a worker with no job")
                }
            },
            WorkerEvent::Error { code, message } => match &self.state {
                // The worker is still expected to choke after reporting an
                // error, so it stays busy.
                WorkerState::Busy { job } => {
                    job.fail(code, &message);
                }
                _ => {
                    tracing::warn!(worker = %self.id, %code, "dropping an error from a worker with no job")
                }
            },
            WorkerEvent::Choke => {
                if self.is_busy() {
                    if let WorkerState::Busy { job } =
                        std::mem::replace(&mut self.state, WorkerState::Idle)
                    {
                        job.close();
                    }
                    self.rearm(now, policy);
                } else {
                    tracing::warn!(worker = %self.id, "dropping a choke from a worker with no job");
                }
            }
        }
    }

    /// Hand a job to an idle worker. The caller has already emitted the
    /// invoke command on the bus.
    pub fn assign(&mut self, job: Arc<Job>, now: Instant, policy: &ExecutionPolicy) {
        debug_assert!(self.is_idle(), "only idle workers take jobs");
        self.state = WorkerState::Busy { job };
        self.rearm(now, policy);
    }

    /// Tear the worker down, failing its in-flight job if it holds one.
    pub fn terminate(&mut self, reason: Termination) {
        if let WorkerState::Busy { job } = std::mem::replace(&mut self.state, WorkerState::Dead) {
            let (code, message) = reason.job_error();
            job.fail(code, message);
        }
    }

    fn rearm(&mut self, now: Instant, policy: &ExecutionPolicy) {
        let timeout = match &self.state {
            WorkerState::Busy { job } => job.policy().timeout.unwrap_or(policy.heartbeat_timeout),
            _ => policy.heartbeat_timeout,
        };
        self.liveness_deadline = now + timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::job::{JobHandler, JobPolicy};

    #[derive(Default)]
    struct Recorder {
        chunks: AtomicUsize,
        errors: AtomicUsize,
        closes: AtomicUsize,
        last_code: parking_lot::Mutex<Option<ErrorCode>>,
    }

    impl JobHandler for Recorder {
        fn on_chunk(&self, _chunk: &[u8]) {
            self.chunks.fetch_add(1, Ordering::SeqCst);
        }
        fn on_error(&self, code: ErrorCode, _message: &str) {
            *self.last_code.lock() = Some(code);
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_policy() -> ExecutionPolicy {
        ExecutionPolicy {
            heartbeat_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(10),
            ..ExecutionPolicy::default()
        }
    }

    fn test_job(policy: JobPolicy) -> (Arc<Job>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let job = Arc::new(Job::new("ping", Vec::new(), policy, recorder.clone()));
        (job, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        assert!(matches!(record.state(), WorkerState::Unknown));
        assert!(record.last_heartbeat().is_none());

        record.process(WorkerEvent::Heartbeat, now, &policy);
        assert!(record.is_idle());
        assert!(record.last_heartbeat().is_some());

        let (job, recorder) = test_job(JobPolicy::default());
        assert!(job.invoked());
        record.assign(job.clone(), now, &policy);
        assert!(record.is_busy());
        assert!(record.current_job().is_some());

        record.process(WorkerEvent::Chunk(b"out".to_vec()), now, &policy);
        record.process(WorkerEvent::Choke, now, &policy);

        assert!(record.is_idle());
        assert!(record.current_job().is_none());
        assert!(job.is_complete());
        assert_eq!(recorder.chunks.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_deadline_expires_silent_worker() {
        let policy = test_policy();
        let now = Instant::now();
        let record = WorkerRecord::new(WorkerId::new(), now, &policy);

        assert!(!record.expired(now));
        assert!(record.expired(now + policy.startup_timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_fails_job_with_server_error() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        record.process(WorkerEvent::Heartbeat, now, &policy);

        let (job, recorder) = test_job(JobPolicy::default());
        job.invoked();
        record.assign(job.clone(), now, &policy);

        record.terminate(Termination::Crash);
        assert!(record.is_dead());
        assert!(job.is_complete());
        assert_eq!(*recorder.last_code.lock(), Some(ErrorCode::Server));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_job_with_resource_error() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        record.process(WorkerEvent::Heartbeat, now, &policy);

        let (job, recorder) = test_job(JobPolicy::default());
        job.invoked();
        record.assign(job, now, &policy);

        record.terminate(Termination::Shutdown);
        assert_eq!(*recorder.last_code.lock(), Some(ErrorCode::Resource));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_worker_busy_until_choke() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        record.process(WorkerEvent::Heartbeat, now, &policy);

        let (job, recorder) = test_job(JobPolicy::default());
        job.invoked();
        record.assign(job, now, &policy);

        record.process(
            WorkerEvent::Error {
                code: ErrorCode::App(4),
                message: "nope".into(),
            },
            now,
            &policy,
        );
        assert!(record.is_busy());
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);

        record.process(WorkerEvent::Choke, now, &policy);
        assert!(record.is_idle());
        // The terminal callback already fired; choke must not add another.
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_worker_drops_late_events() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        record.process(WorkerEvent::Heartbeat, now, &policy);
        record.terminate(Termination::Crash);

        record.process(WorkerEvent::Heartbeat, now, &policy);
        record.process(WorkerEvent::Choke, now, &policy);
        assert!(record.is_dead());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_overrides_heartbeat_deadline() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        record.process(WorkerEvent::Heartbeat, now, &policy);

        let (job, _) = test_job(JobPolicy::default().with_timeout(Duration::from_secs(2)));
        job.invoked();
        record.assign(job, now, &policy);

        assert!(record.expired(now + Duration::from_secs(3)));
        assert!(!record.expired(now + Duration::from_secs(1)));

        // A heartbeat while busy re-arms with the same invocation budget.
        record.process(WorkerEvent::Heartbeat, now + Duration::from_secs(1), &policy);
        assert!(!record.expired(now + Duration::from_secs(2)));
        assert!(record.expired(now + Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_payload_events_are_dropped_while_idle() {
        let policy = test_policy();
        let now = Instant::now();
        let mut record = WorkerRecord::new(WorkerId::new(), now, &policy);
        record.process(WorkerEvent::Heartbeat, now, &policy);

        record.process(WorkerEvent::Chunk(b"stray".to_vec()), now, &policy);
        record.process(WorkerEvent::Choke, now, &policy);
        assert!(record.is_idle());
    }
}
