use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use capstan::{EngineCommand, Envelope, ErrorCode, WorkerEvent, WorkerFactory, WorkerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::bus::InProcBus;

/// The worker side of an [`InProcBus`] connection.
///
/// Tests emit bus events through it and read back the commands the engine
/// addressed to this identity.
pub struct ScriptedWorker {
    id: WorkerId,
    to_engine: mpsc::UnboundedSender<Envelope>,
    commands: tokio::sync::Mutex<mpsc::UnboundedReceiver<EngineCommand>>,
}

impl ScriptedWorker {
    pub(crate) fn new(
        id: WorkerId,
        to_engine: mpsc::UnboundedSender<Envelope>,
        commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Self {
        Self {
            id,
            to_engine,
            commands: tokio::sync::Mutex::new(commands),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    fn emit(&self, event: WorkerEvent) {
        // A send after the engine dropped its bus is simply lost, like a
        // datagram to a closed socket.
        let _ = self.to_engine.send(Envelope {
            identity: self.id,
            event,
        });
    }

    pub fn heartbeat(&self) {
        self.emit(WorkerEvent::Heartbeat);
    }

    pub fn terminate(&self) {
        self.emit(WorkerEvent::Terminate);
    }

    pub fn chunk(&self, data: impl Into<Vec<u8>>) {
        self.emit(WorkerEvent::Chunk(data.into()));
    }

    pub fn error(&self, code: ErrorCode, message: impl Into<String>) {
        self.emit(WorkerEvent::Error {
            code,
            message: message.into(),
        });
    }

    pub fn choke(&self) {
        self.emit(WorkerEvent::Choke);
    }

    /// Wait for the next command the engine sends this worker.
    pub async fn next_command(&self) -> Option<EngineCommand> {
        self.commands.lock().await.recv().await
    }

    /// Non-blocking peek at the command channel.
    pub fn try_next_command(&self) -> Option<EngineCommand> {
        self.commands.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for an invoke and return its event name, completing the job
    /// by echoing the request as one chunk followed by a choke.
    pub async fn serve_one(&self) -> Option<String> {
        loop {
            match self.next_command().await? {
                EngineCommand::Invoke { event, request } => {
                    self.chunk(request);
                    self.choke();
                    return Some(event);
                }
                EngineCommand::Terminate => return None,
            }
        }
    }
}

/// Worker factory that connects [`ScriptedWorker`]s to an [`InProcBus`]
/// instead of launching processes.
///
/// By default every spawned worker immediately announces itself with a
/// heartbeat; `manual` suppresses that for tests exercising the startup
/// timeout. `disable` makes every spawn fail, for tests that need a
/// worker-starved engine.
pub struct TestWorkerFactory {
    bus: Arc<InProcBus>,
    workers: Mutex<Vec<Arc<ScriptedWorker>>>,
    auto_heartbeat: bool,
    disabled: AtomicBool,
    signal: Notify,
}

impl TestWorkerFactory {
    pub fn new(bus: Arc<InProcBus>) -> Self {
        Self {
            bus,
            workers: Mutex::new(Vec::new()),
            auto_heartbeat: true,
            disabled: AtomicBool::new(false),
            signal: Notify::new(),
        }
    }

    /// A factory whose workers stay silent until the test heartbeats them.
    pub fn manual(bus: Arc<InProcBus>) -> Self {
        Self {
            auto_heartbeat: false,
            ..Self::new(bus)
        }
    }

    /// Make every subsequent spawn fail.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.disabled.store(false, Ordering::SeqCst);
    }

    /// Handles of every worker spawned so far, in spawn order.
    pub fn spawned(&self) -> Vec<Arc<ScriptedWorker>> {
        self.workers.lock().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Wait until at least `count` workers exist and return the first
    /// `count` of them.
    pub async fn wait_for_workers(&self, count: usize) -> Vec<Arc<ScriptedWorker>> {
        loop {
            {
                let workers = self.workers.lock();
                if workers.len() >= count {
                    return workers.iter().take(count).cloned().collect();
                }
            }
            let notified = self.signal.notified();
            {
                let workers = self.workers.lock();
                if workers.len() >= count {
                    return workers.iter().take(count).cloned().collect();
                }
            }
            notified.await;
        }
    }
}

impl WorkerFactory for TestWorkerFactory {
    fn spawn(&self) -> anyhow::Result<WorkerId> {
        if self.disabled.load(Ordering::SeqCst) {
            anyhow::bail!("worker spawning is disabled");
        }
        let id = WorkerId::new();
        let worker = Arc::new(self.bus.connect(id));
        tracing::debug!(worker = %id, "connected a scripted worker");
        if self.auto_heartbeat {
            worker.heartbeat();
        }
        self.workers.lock().push(worker);
        self.signal.notify_waiters();
        Ok(id)
    }
}
