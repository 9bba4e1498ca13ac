use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::Instant;

use crate::job::{ErrorCode, Job};

/// Message delivered to jobs reaped by the deadline sweep.
pub(crate) const EXPIRED_MESSAGE: &str = "the job has expired";

/// Double-ended job queue with urgent-front / normal-back discipline.
///
/// The queue has no capacity logic; admission control is the engine
/// façade's responsibility.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Arc<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Admit a job: urgent jobs go to the front of the queue, normal jobs
    /// to the back. The job observes its queue position (1-based).
    ///
    /// An urgent job lands behind earlier urgent jobs that are still
    /// queued, so urgent submissions preempt normal ones without
    /// reordering among themselves.
    pub fn push(&mut self, job: Arc<Job>) {
        if job.policy().urgent {
            let index = self.jobs.iter().take_while(|queued| queued.policy().urgent).count();
            self.jobs.insert(index, job);
            self.jobs[index].enqueued(index + 1);
        } else {
            self.jobs.push_back(job);
            let position = self.jobs.len();
            self.jobs[position - 1].enqueued(position);
        }
    }

    /// Peek the head of the queue.
    pub fn front(&self) -> Option<&Arc<Job>> {
        self.jobs.front()
    }

    /// Pop the head of the queue.
    pub fn pop_front(&mut self) -> Option<Arc<Job>> {
        self.jobs.pop_front()
    }

    /// Fail every queued job whose deadline is at or past `now` with a
    /// deadline error and remove it, along with jobs that completed while
    /// queued. Returns the number of jobs removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| {
            if job.is_complete() {
                return false;
            }
            match job.policy().deadline {
                Some(deadline) if deadline <= now => {
                    tracing::debug!(job = %job.id(), event = %job.event(), "job expired in queue");
                    job.fail(ErrorCode::Deadline, EXPIRED_MESSAGE);
                    false
                }
                _ => true,
            }
        });
        before - self.jobs.len()
    }

    /// Drain the queue, failing every remaining job with a resource error.
    /// Used by engine termination.
    pub fn drain_with_error(&mut self, message: &str) -> usize {
        let mut dropped = 0;
        while let Some(job) = self.jobs.pop_front() {
            job.fail(ErrorCode::Resource, message);
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::job::{JobHandler, JobPolicy};

    #[derive(Default)]
    struct Quiet {
        errors: AtomicUsize,
    }

    impl JobHandler for Quiet {
        fn on_chunk(&self, _chunk: &[u8]) {}
        fn on_error(&self, _code: ErrorCode, _message: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_close(&self) {}
    }

    fn job(name: &str, policy: JobPolicy) -> Arc<Job> {
        Arc::new(Job::new(name, Vec::new(), policy, Arc::new(Quiet::default())))
    }

    #[test]
    fn test_urgent_jobs_prepend_normal_jobs_append() {
        let mut queue = JobQueue::new();
        queue.push(job("a", JobPolicy::default()));
        queue.push(job("b", JobPolicy::default()));
        queue.push(job("u", JobPolicy::urgent()));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap().event(), "u");
        assert_eq!(queue.pop_front().unwrap().event(), "a");
        assert_eq!(queue.pop_front().unwrap().event(), "b");
    }

    #[test]
    fn test_urgent_jobs_keep_submission_order_among_themselves() {
        let mut queue = JobQueue::new();
        queue.push(job("u1", JobPolicy::urgent()));
        queue.push(job("n", JobPolicy::default()));
        queue.push(job("u2", JobPolicy::urgent()));

        assert_eq!(queue.pop_front().unwrap().event(), "u1");
        assert_eq!(queue.pop_front().unwrap().event(), "u2");
        assert_eq!(queue.pop_front().unwrap().event(), "n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_fails_expired_jobs_only() {
        let mut queue = JobQueue::new();
        let now = Instant::now();

        let expired_handler = Arc::new(Quiet::default());
        let expired = Arc::new(Job::new(
            "expired",
            Vec::new(),
            JobPolicy::default().with_deadline(now + Duration::from_millis(50)),
            expired_handler.clone(),
        ));
        let fresh = job(
            "fresh",
            JobPolicy::default().with_deadline(now + Duration::from_secs(60)),
        );
        let eternal = job("eternal", JobPolicy::default());

        queue.push(expired.clone());
        queue.push(fresh);
        queue.push(eternal);

        let removed = queue.sweep(now + Duration::from_millis(100));
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 2);
        assert!(expired.is_complete());
        assert_eq!(expired_handler.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_completed_jobs() {
        let mut queue = JobQueue::new();
        let done = job("done", JobPolicy::default());
        done.fail(ErrorCode::Resource, "cancelled");
        queue.push(done);
        queue.push(job("live", JobPolicy::default()));

        assert_eq!(queue.sweep(Instant::now()), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front().unwrap().event(), "live");
    }

    #[test]
    fn test_drain_with_error_empties_queue() {
        let mut queue = JobQueue::new();
        let handler = Arc::new(Quiet::default());
        for name in ["a", "b", "c"] {
            queue.push(Arc::new(Job::new(
                name,
                Vec::new(),
                JobPolicy::default(),
                handler.clone(),
            )));
        }

        assert_eq!(queue.drain_with_error("engine is not active"), 3);
        assert!(queue.is_empty());
        assert_eq!(handler.errors.load(Ordering::SeqCst), 3);
    }
}
