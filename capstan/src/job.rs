use std::fmt;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::telemetry;

/// Unique identifier for a job.
///
/// Uses UUID v7 for time-ordered uniqueness.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// Create a new job ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error category delivered through [`JobHandler::on_error`].
///
/// The three named categories carry fixed wire codes matching the
/// platform's dealer codes; anything else a worker reports travels as an
/// application code and is treated as a recoverable job failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    /// Engine not active, queue full, or shutdown in progress.
    Resource,
    /// The job expired before or during scheduling.
    Deadline,
    /// Unrecoverable worker fault; promotes to engine-wide shutdown.
    Server,
    /// Application-level code reported by a worker.
    App(i32),
}

impl ErrorCode {
    const SERVER_WIRE: i32 = 500;
    const RESOURCE_WIRE: i32 = 503;
    const DEADLINE_WIRE: i32 = 506;

    /// The integer representation used on the bus.
    pub fn to_wire(self) -> i32 {
        match self {
            ErrorCode::Server => Self::SERVER_WIRE,
            ErrorCode::Resource => Self::RESOURCE_WIRE,
            ErrorCode::Deadline => Self::DEADLINE_WIRE,
            ErrorCode::App(code) => code,
        }
    }

    /// Map a wire integer back to a category.
    pub fn from_wire(code: i32) -> Self {
        match code {
            Self::SERVER_WIRE => ErrorCode::Server,
            Self::RESOURCE_WIRE => ErrorCode::Resource,
            Self::DEADLINE_WIRE => ErrorCode::Deadline,
            other => ErrorCode::App(other),
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Resource => write!(f, "resource"),
            ErrorCode::Deadline => write!(f, "deadline"),
            ErrorCode::Server => write!(f, "server"),
            ErrorCode::App(code) => write!(f, "app({code})"),
        }
    }
}

/// Callback surface a submitter attaches to a job.
///
/// Exactly one terminal callback fires per admitted job: `on_close` on
/// success or `on_error` on any failure. `on_chunk` may fire any number of
/// times before the terminal callback. Callbacks run on the engine's loop
/// thread (or synchronously on the submitting thread for admission errors)
/// and must not re-enter the engine.
pub trait JobHandler: Send + Sync {
    /// A chunk of the job's response stream.
    fn on_chunk(&self, chunk: &[u8]);

    /// The job failed; no further callbacks will fire.
    fn on_error(&self, code: ErrorCode, message: &str);

    /// The job finished; no further callbacks will fire.
    fn on_close(&self);
}

/// Per-job scheduling policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct JobPolicy {
    /// Urgent jobs are prepended to the queue.
    pub urgent: bool,
    /// Monotonic deadline; at or past it a queued job fails with a
    /// deadline error on the next sweep.
    pub deadline: Option<Instant>,
    /// Invocation budget; overrides the worker heartbeat timeout while
    /// this job is in flight.
    pub timeout: Option<Duration>,
}

impl JobPolicy {
    /// Mark the job urgent.
    pub fn urgent() -> Self {
        Self {
            urgent: true,
            ..Self::default()
        }
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set an invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lifecycle states of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    /// Admitted to the queue, not yet dispatched.
    Waiting,
    /// Dispatched to a worker.
    Processing,
    /// Terminal; no further callbacks fire.
    Complete,
}

/// One unit of work submitted to an engine.
///
/// The queue owns the job until dispatch, then the assigned worker record
/// owns it until a terminal event. Jobs compare by identity only.
pub struct Job {
    id: JobId,
    event: String,
    request: Vec<u8>,
    policy: JobPolicy,
    state: Mutex<JobState>,
    handler: Arc<dyn JobHandler>,
}

impl Job {
    /// Create a job carrying `event` and `request` for the given handler.
    pub fn new(
        event: impl Into<String>,
        request: impl Into<Vec<u8>>,
        policy: JobPolicy,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            id: JobId::new(),
            event: event.into(),
            request: request.into(),
            policy,
            state: Mutex::new(JobState::Waiting),
            handler,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn is_complete(&self) -> bool {
        self.state() == JobState::Complete
    }

    /// Observable admission hook: the job entered the queue at `position`.
    pub(crate) fn enqueued(&self, position: usize) {
        if self.is_complete() {
            return;
        }
        tracing::debug!(job = %self.id, event = %self.event, position, "job enqueued");
    }

    /// The job was handed to a worker. Returns `false` when the job is
    /// already complete (raced with the sweep) and must not be dispatched.
    pub(crate) fn invoked(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            JobState::Waiting | JobState::Processing => {
                *state = JobState::Processing;
                true
            }
            JobState::Complete => false,
        }
    }

    /// Forward a response chunk from the assigned worker.
    pub(crate) fn chunk(&self, data: &[u8]) {
        if self.is_complete() {
            tracing::debug!(job = %self.id, "dropping a chunk for a complete job");
            return;
        }
        self.handler.on_chunk(data);
    }

    /// Fail the job. Returns `true` if this call delivered the terminal
    /// callback, `false` if the job was already complete.
    pub(crate) fn fail(&self, code: ErrorCode, message: &str) -> bool {
        {
            let mut state = self.state.lock();
            if *state == JobState::Complete {
                return false;
            }
            *state = JobState::Complete;
        }
        telemetry::record_job_terminal(&self.event, &code.to_string());
        self.handler.on_error(code, message);
        true
    }

    /// Close the job successfully. Returns `true` if this call delivered
    /// the terminal callback.
    pub(crate) fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == JobState::Complete {
                return false;
            }
            *state = JobState::Complete;
        }
        telemetry::record_job_terminal(&self.event, "close");
        self.handler.on_close();
        true
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("request_len", &self.request.len())
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}
