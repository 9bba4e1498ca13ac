use std::collections::HashMap;

use async_trait::async_trait;
use capstan::{Bus, EngineCommand, Envelope, WorkerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::worker::ScriptedWorker;

/// Channel-backed bus: workers are in-process [`ScriptedWorker`] handles
/// instead of external processes.
///
/// Envelope and command types are shared with the real transport, so
/// engine behavior observed through this bus carries over.
pub struct InProcBus {
    from_workers_tx: mpsc::UnboundedSender<Envelope>,
    from_workers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    peers: Mutex<HashMap<WorkerId, mpsc::UnboundedSender<EngineCommand>>>,
}

impl InProcBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            from_workers_tx: tx,
            from_workers_rx: tokio::sync::Mutex::new(rx),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a worker identity and return the handle that drives its
    /// side of the bus.
    pub fn connect(&self, id: WorkerId) -> ScriptedWorker {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().insert(id, tx);
        ScriptedWorker::new(id, self.from_workers_tx.clone(), rx)
    }

    /// Inject a raw envelope, e.g. from an identity the engine never
    /// spawned.
    pub fn inject(&self, envelope: Envelope) {
        let _ = self.from_workers_tx.send(envelope);
    }
}

impl Default for InProcBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for InProcBus {
    async fn recv(&self) -> anyhow::Result<Envelope> {
        let mut rx = self.from_workers_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("bus channel closed"))
    }

    fn try_recv(&self) -> anyhow::Result<Option<Envelope>> {
        // The reactor's pending recv() may hold the receiver; treat that
        // as nothing to drain, the recv() will surface the message.
        let mut rx = match self.from_workers_rx.try_lock() {
            Ok(rx) => rx,
            Err(_) => return Ok(None),
        };
        match rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow::anyhow!("bus channel closed")),
        }
    }

    fn send(&self, to: &WorkerId, command: &EngineCommand) -> anyhow::Result<()> {
        let peers = self.peers.lock();
        let tx = peers
            .get(to)
            .ok_or_else(|| anyhow::anyhow!("worker {to} has no known bus address"))?;
        tx.send(command.clone())
            .map_err(|_| anyhow::anyhow!("worker {to} is gone"))
    }

    fn forget(&self, id: &WorkerId) {
        self.peers.lock().remove(id);
    }
}
