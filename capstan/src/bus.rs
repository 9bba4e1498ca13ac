use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UnixDatagram;

use crate::protocol::{
    decode_worker_message, encode_engine_command, EngineCommand, Envelope, MAX_MESSAGE_SIZE,
};
use crate::worker::WorkerId;

/// Message channel between one engine and its workers.
///
/// The engine is the server side: it binds a per-application endpoint,
/// receives decoded worker messages and addresses workers by their routing
/// identity. All operations are non-blocking or cancellation-safe; a send
/// to an absent peer is an error the caller logs and moves past, never a
/// retry.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Wait for the next well-formed worker message. Malformed messages
    /// are logged and skipped.
    async fn recv(&self) -> anyhow::Result<Envelope>;

    /// Non-blocking receive used by the drain loop. `Ok(None)` means the
    /// bus has nothing pending.
    fn try_recv(&self) -> anyhow::Result<Option<Envelope>>;

    /// Send a command to one worker without blocking.
    fn send(&self, to: &WorkerId, command: &EngineCommand) -> anyhow::Result<()>;

    /// Forget any cached return address of a reaped worker. A no-op for
    /// transports without an address cache.
    fn forget(&self, _id: &WorkerId) {}
}

/// Unix-datagram transport.
///
/// Each logical message travels as one datagram carrying the multipart
/// frame layout of [`crate::protocol`]. The engine learns each worker's
/// return address from the first message it receives from that identity;
/// workers must bind a filesystem path of their own to be addressable.
pub struct UnixDatagramBus {
    socket: UnixDatagram,
    endpoint: PathBuf,
    peers: Mutex<HashMap<WorkerId, PathBuf>>,
}

impl UnixDatagramBus {
    /// Bind the per-application endpoint `<ipc_root>/<app>.bus`,
    /// replacing a stale socket file if one is left over.
    pub fn bind(ipc_root: &Path, app: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(ipc_root)?;
        let endpoint = ipc_root.join(format!("{app}.bus"));
        if endpoint.exists() {
            std::fs::remove_file(&endpoint)?;
        }
        let socket = UnixDatagram::bind(&endpoint)
            .map_err(|e| anyhow::anyhow!("invalid rpc endpoint {}: {e}", endpoint.display()))?;
        Ok(Self {
            socket,
            endpoint,
            peers: Mutex::new(HashMap::new()),
        })
    }

    /// The bound endpoint path, for handing to spawned workers.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    fn accept(&self, buf: &[u8], addr: tokio::net::unix::SocketAddr) -> Option<Envelope> {
        let envelope = match decode_worker_message(buf) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("dropping a malformed bus message: {e:#}");
                return None;
            }
        };
        match addr.as_pathname() {
            Some(path) => {
                self.peers
                    .lock()
                    .insert(envelope.identity, path.to_path_buf());
            }
            None => {
                // The peer is unaddressable, which only matters once the
                // engine tries to reply.
                tracing::debug!(worker = %envelope.identity, "worker socket has no pathname");
            }
        }
        Some(envelope)
    }
}

#[async_trait]
impl Bus for UnixDatagramBus {
    async fn recv(&self) -> anyhow::Result<Envelope> {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
            if let Some(envelope) = self.accept(&buf[..len], addr) {
                return Ok(envelope);
            }
        }
    }

    fn try_recv(&self) -> anyhow::Result<Option<Envelope>> {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, addr)) => {
                    if let Some(envelope) = self.accept(&buf[..len], addr) {
                        return Ok(Some(envelope));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&self, to: &WorkerId, command: &EngineCommand) -> anyhow::Result<()> {
        let target = self
            .peers
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("worker {to} has no known bus address"))?;
        let buf = encode_engine_command(command);
        if buf.len() > MAX_MESSAGE_SIZE {
            anyhow::bail!("message of {} bytes exceeds the maximum datagram size", buf.len());
        }
        let sent = self
            .socket
            .try_send_to(&buf, &target)
            .map_err(|e| anyhow::anyhow!("unable to reach worker {to}: {e}"))?;
        if sent != buf.len() {
            anyhow::bail!("short send to worker {to}: {sent} of {} bytes", buf.len());
        }
        Ok(())
    }

    fn forget(&self, id: &WorkerId) {
        self.peers.lock().remove(id);
    }
}

impl Drop for UnixDatagramBus {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.endpoint) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!("unable to remove bus endpoint: {e}");
            }
        }
    }
}
