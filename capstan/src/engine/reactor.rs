use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::Bus;
use crate::job::ErrorCode;
use crate::protocol::{EngineCommand, Envelope, WorkerEvent};
use crate::telemetry;
use crate::worker::WorkerRecord;

use super::pool::{should_grow, WorkerFactory};
use super::{Core, EngineState, Shared};

/// The engine's event loop: a single task multiplexing bus messages,
/// timers and cross-thread wakeups.
///
/// Every handler takes the engine mutex for its critical section only;
/// bus sends are non-blocking, so the mutex is never held across I/O that
/// may park the task.
pub(crate) struct Reactor<B: Bus, F: WorkerFactory> {
    shared: Arc<Shared>,
    bus: Arc<B>,
    factory: Arc<F>,
}

impl<B: Bus, F: WorkerFactory> Reactor<B, F> {
    pub(crate) fn new(shared: Arc<Shared>, bus: Arc<B>, factory: Arc<F>) -> Self {
        Self {
            shared,
            bus,
            factory,
        }
    }

    pub(crate) async fn run(self) {
        let mut pump = tokio::time::interval(self.shared.config.pump_interval);
        pump.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeper = tokio::time::interval(self.shared.config.sweep_interval);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A fresh interval fires immediately; consume those ticks so the
        // first sweep happens one full period in.
        pump.tick().await;
        sweeper.tick().await;

        loop {
            tokio::select! {
                _ = self.shared.wakeup.notified() => {
                    if self.on_notify() {
                        break;
                    }
                }
                received = self.bus.recv() => match received {
                    Ok(envelope) => {
                        if self.deliver(envelope) || self.drain() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("bus receive failed: {e:#}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = pump.tick() => {
                    if self.drain() {
                        break;
                    }
                }
                _ = sweeper.tick() => {
                    if self.sweep() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(app = %self.shared.manifest.name, "loop finished");
    }

    /// Cross-thread notification: run a scheduling pass. Returns `true`
    /// once the engine stopped and the loop must exit.
    fn on_notify(&self) -> bool {
        let mut core = self.shared.core.lock();
        self.react(&mut core)
    }

    /// Pull up to `io_bulk_size` pending messages off the bus.
    fn drain(&self) -> bool {
        for _ in 0..self.shared.config.io_bulk_size {
            match self.bus.try_recv() {
                Ok(Some(envelope)) => {
                    if self.deliver(envelope) {
                        return true;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("bus receive failed: {e:#}");
                    break;
                }
            }
        }
        false
    }

    /// Feed one decoded message to its worker's state machine.
    fn deliver(&self, envelope: Envelope) -> bool {
        let mut core = self.shared.core.lock();
        let now = Instant::now();
        let policy = &self.shared.manifest.policy;

        let fatal = matches!(
            &envelope.event,
            WorkerEvent::Error {
                code: ErrorCode::Server,
                ..
            }
        );
        if fatal {
            if let WorkerEvent::Error { message, .. } = &envelope.event {
                tracing::error!(
                    app = %self.shared.manifest.name,
                    "the app seems to be broken: {message}"
                );
            }
        }

        let idle = match core.pool.get_mut(&envelope.identity) {
            Some(record) => {
                tracing::trace!(
                    worker = %envelope.identity,
                    event = envelope.event.kind(),
                    "got a worker event"
                );
                record.process(envelope.event, now, policy);
                record.is_idle()
            }
            None => {
                tracing::warn!(
                    worker = %envelope.identity,
                    event = envelope.event.kind(),
                    "dropping an event from an unknown worker"
                );
                return false;
            }
        };

        if fatal {
            self.terminate(&mut core);
            return true;
        }

        if idle {
            return self.react(&mut core);
        }
        false
    }

    /// The scheduling step: match queued jobs against idle workers and
    /// grow the pool when demand outstrips it. Returns `true` when the
    /// engine terminated.
    fn react(&self, core: &mut Core) -> bool {
        if core.state == EngineState::Stopping {
            self.terminate(core);
            return true;
        }

        let policy = &self.shared.manifest.policy;

        loop {
            let job = match core.queue.front() {
                Some(head) => Arc::clone(head),
                None => break,
            };

            if job.is_complete() {
                tracing::debug!(
                    event = %job.event(),
                    "dropping a complete job from the queue"
                );
                core.queue.pop_front();
                continue;
            }

            let command = EngineCommand::Invoke {
                event: job.event().to_string(),
                request: job.request().to_vec(),
            };

            let mut assigned = false;
            for id in core.pool.idle_ids() {
                match self.bus.send(&id, &command) {
                    Ok(()) => {
                        core.queue.pop_front();
                        job.invoked();
                        let now = Instant::now();
                        if let Some(record) = core.pool.get_mut(&id) {
                            record.assign(Arc::clone(&job), now, policy);
                        }
                        tracing::debug!(
                            worker = %id,
                            event = %job.event(),
                            "job dispatched"
                        );
                        assigned = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(worker = %id, "unable to invoke a job: {e:#}");
                    }
                }
            }

            if !assigned {
                // No reachable idle worker; grow by at most one and let
                // the next pass re-evaluate.
                if should_grow(core.pool.len(), core.queue.len(), policy) {
                    tracing::debug!(app = %self.shared.manifest.name, "enlarging the pool");
                    match self.factory.spawn() {
                        Ok(id) => {
                            core.pool
                                .insert(WorkerRecord::new(id, Instant::now(), policy));
                        }
                        Err(e) => {
                            tracing::error!("unable to spawn more workers: {e:#}");
                        }
                    }
                }
                break;
            }
        }

        telemetry::set_pool_size(
            &self.shared.manifest.name,
            core.pool.len(),
            core.pool.busy_count(),
        );
        false
    }

    /// Garbage collection: reap dead workers, expire silent ones, fail
    /// queued jobs past their deadline.
    fn sweep(&self) -> bool {
        let mut core = self.shared.core.lock();
        let now = Instant::now();

        for id in core.pool.reap_dead() {
            self.bus.forget(&id);
        }
        core.pool.expire(now);
        core.queue.sweep(now);

        telemetry::set_queue_depth(&self.shared.manifest.name, core.queue.len());
        telemetry::set_pool_size(
            &self.shared.manifest.name,
            core.pool.len(),
            core.pool.busy_count(),
        );

        // Dead workers free no capacity, so a non-empty queue after the
        // sweep may need the pool to regrow now rather than at the next
        // submission.
        if !core.queue.is_empty() || core.state == EngineState::Stopping {
            return self.react(&mut core);
        }
        false
    }

    /// Orderly termination: abort queued jobs, terminate the pool, mark
    /// the engine stopped.
    fn terminate(&self, core: &mut Core) {
        let dropped = core.queue.drain_with_error("engine is not active");
        if dropped > 0 {
            tracing::debug!(
                count = dropped,
                "dropped incomplete jobs due to the engine shutdown"
            );
        }

        for id in core.pool.alive_ids() {
            if let Err(e) = self.bus.send(&id, &EngineCommand::Terminate) {
                tracing::warn!(worker = %id, "unable to deliver termination: {e:#}");
            }
        }
        core.pool.terminate_all();
        core.pool.clear();

        core.state = EngineState::Stopped;
        tracing::info!(app = %self.shared.manifest.name, "engine stopped");
    }
}
