//! Frame layout of the worker bus.
//!
//! A logical message is a sequence of binary frames packed into one
//! datagram; each frame is a `u32` little-endian length followed by that
//! many bytes. Worker-to-engine messages start with the 16-byte routing
//! identity and a command tag, engine-to-worker messages start at the tag
//! (the datagram destination already addresses the peer). Trailing frames
//! beyond a command's declared arity are a protocol violation and fail the
//! decode.

use crate::job::ErrorCode;
use crate::worker::WorkerId;

/// Upper bound on one encoded message, including all frame headers.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

const TAG_HEARTBEAT: u32 = 1;
const TAG_TERMINATE: u32 = 2;
const TAG_CHUNK: u32 = 3;
const TAG_ERROR: u32 = 4;
const TAG_CHOKE: u32 = 5;
const TAG_INVOKE: u32 = 10;

/// Event reported by a worker over the bus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkerEvent {
    /// Liveness signal; also announces a fresh worker.
    Heartbeat,
    /// The worker is shutting itself down.
    Terminate,
    /// A chunk of the current job's response stream.
    Chunk(Vec<u8>),
    /// The current job failed with the given code.
    Error { code: ErrorCode, message: String },
    /// The current job is finished and the worker is idle again.
    Choke,
}

impl WorkerEvent {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Heartbeat => "heartbeat",
            WorkerEvent::Terminate => "terminate",
            WorkerEvent::Chunk(_) => "chunk",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::Choke => "choke",
        }
    }

    fn tag(&self) -> u32 {
        match self {
            WorkerEvent::Heartbeat => TAG_HEARTBEAT,
            WorkerEvent::Terminate => TAG_TERMINATE,
            WorkerEvent::Chunk(_) => TAG_CHUNK,
            WorkerEvent::Error { .. } => TAG_ERROR,
            WorkerEvent::Choke => TAG_CHOKE,
        }
    }
}

/// One decoded worker message: who sent it and what it said.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    pub identity: WorkerId,
    pub event: WorkerEvent,
}

/// Command sent by the engine to a worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineCommand {
    /// Start processing a job.
    Invoke { event: String, request: Vec<u8> },
    /// Shut down.
    Terminate,
}

fn put_frame(buf: &mut Vec<u8>, frame: &[u8]) {
    buf.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    buf.extend_from_slice(frame);
}

struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn next(&mut self, what: &str) -> anyhow::Result<&'a [u8]> {
        if self.buf.len() < 4 {
            anyhow::bail!("truncated message: missing {what} frame");
        }
        let (header, rest) = self.buf.split_at(4);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(header);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if rest.len() < len {
            anyhow::bail!("truncated message: {what} frame shorter than declared");
        }
        let (frame, rest) = rest.split_at(len);
        self.buf = rest;
        Ok(frame)
    }

    fn finish(self, kind: &str) -> anyhow::Result<()> {
        if !self.buf.is_empty() {
            anyhow::bail!("trailing frames after {kind} message");
        }
        Ok(())
    }
}

/// Encode a worker-to-engine message, identity frame first.
pub fn encode_worker_message(identity: &WorkerId, event: &WorkerEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    put_frame(&mut buf, identity.as_bytes());
    put_frame(&mut buf, &event.tag().to_le_bytes());
    match event {
        WorkerEvent::Heartbeat | WorkerEvent::Terminate | WorkerEvent::Choke => {}
        WorkerEvent::Chunk(data) => put_frame(&mut buf, data),
        WorkerEvent::Error { code, message } => {
            put_frame(&mut buf, &code.to_wire().to_le_bytes());
            put_frame(&mut buf, message.as_bytes());
        }
    }
    buf
}

/// Decode a worker-to-engine message.
pub fn decode_worker_message(buf: &[u8]) -> anyhow::Result<Envelope> {
    let mut frames = FrameReader::new(buf);

    let identity = frames.next("identity")?;
    let identity = WorkerId::from_bytes(identity)?;

    let tag = frames.next("command tag")?;
    let tag: [u8; 4] = tag
        .try_into()
        .map_err(|_| anyhow::anyhow!("command tag frame must be 4 bytes"))?;

    let event = match u32::from_le_bytes(tag) {
        TAG_HEARTBEAT => WorkerEvent::Heartbeat,
        TAG_TERMINATE => WorkerEvent::Terminate,
        TAG_CHUNK => WorkerEvent::Chunk(frames.next("chunk payload")?.to_vec()),
        TAG_ERROR => {
            let code = frames.next("error code")?;
            let code: [u8; 4] = code
                .try_into()
                .map_err(|_| anyhow::anyhow!("error code frame must be 4 bytes"))?;
            let message = std::str::from_utf8(frames.next("error message")?)
                .map_err(|_| anyhow::anyhow!("error message is not valid utf-8"))?;
            WorkerEvent::Error {
                code: ErrorCode::from_wire(i32::from_le_bytes(code)),
                message: message.to_string(),
            }
        }
        TAG_CHOKE => WorkerEvent::Choke,
        unknown => anyhow::bail!("unknown command tag {unknown}"),
    };

    frames.finish(event.kind())?;
    Ok(Envelope { identity, event })
}

/// Encode an engine-to-worker command.
pub fn encode_engine_command(command: &EngineCommand) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    match command {
        EngineCommand::Invoke { event, request } => {
            put_frame(&mut buf, &TAG_INVOKE.to_le_bytes());
            put_frame(&mut buf, event.as_bytes());
            put_frame(&mut buf, request);
        }
        EngineCommand::Terminate => {
            put_frame(&mut buf, &TAG_TERMINATE.to_le_bytes());
        }
    }
    buf
}

/// Decode an engine-to-worker command (the worker side of the bus).
pub fn decode_engine_command(buf: &[u8]) -> anyhow::Result<EngineCommand> {
    let mut frames = FrameReader::new(buf);
    let tag = frames.next("command tag")?;
    let tag: [u8; 4] = tag
        .try_into()
        .map_err(|_| anyhow::anyhow!("command tag frame must be 4 bytes"))?;

    let command = match u32::from_le_bytes(tag) {
        TAG_INVOKE => {
            let event = std::str::from_utf8(frames.next("event name")?)
                .map_err(|_| anyhow::anyhow!("event name is not valid utf-8"))?
                .to_string();
            let request = frames.next("request payload")?.to_vec();
            EngineCommand::Invoke { event, request }
        }
        TAG_TERMINATE => EngineCommand::Terminate,
        unknown => anyhow::bail!("unknown command tag {unknown}"),
    };

    frames.finish("engine command")?;
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_message_round_trips() {
        let identity = WorkerId::new();
        let events = vec![
            WorkerEvent::Heartbeat,
            WorkerEvent::Terminate,
            WorkerEvent::Chunk(b"hello".to_vec()),
            WorkerEvent::Error {
                code: ErrorCode::Server,
                message: "boom".into(),
            },
            WorkerEvent::Error {
                code: ErrorCode::App(42),
                message: "teapot".into(),
            },
            WorkerEvent::Choke,
        ];

        for event in events {
            let buf = encode_worker_message(&identity, &event);
            let envelope = decode_worker_message(&buf).expect("round trip");
            assert_eq!(envelope.identity, identity);
            assert_eq!(envelope.event, event);
        }
    }

    #[test]
    fn test_engine_command_round_trips() {
        let commands = vec![
            EngineCommand::Invoke {
                event: "ping".into(),
                request: b"payload".to_vec(),
            },
            EngineCommand::Terminate,
        ];
        for command in commands {
            let buf = encode_engine_command(&command);
            assert_eq!(decode_engine_command(&buf).unwrap(), command);
        }
    }

    #[test]
    fn test_empty_chunk_and_request_are_legal() {
        let identity = WorkerId::new();
        let buf = encode_worker_message(&identity, &WorkerEvent::Chunk(Vec::new()));
        assert_eq!(
            decode_worker_message(&buf).unwrap().event,
            WorkerEvent::Chunk(Vec::new())
        );

        let buf = encode_engine_command(&EngineCommand::Invoke {
            event: "ping".into(),
            request: Vec::new(),
        });
        assert!(decode_engine_command(&buf).is_ok());
    }

    #[test]
    fn test_trailing_frames_rejected() {
        let identity = WorkerId::new();
        let mut buf = encode_worker_message(&identity, &WorkerEvent::Heartbeat);
        put_frame(&mut buf, b"extra");
        let err = decode_worker_message(&buf).unwrap_err();
        assert!(err.to_string().contains("trailing frames"));
    }

    #[test]
    fn test_truncated_message_rejected() {
        let identity = WorkerId::new();
        let buf = encode_worker_message(&identity, &WorkerEvent::Chunk(b"data".to_vec()));
        assert!(decode_worker_message(&buf[..buf.len() - 2]).is_err());
        assert!(decode_worker_message(&buf[..3]).is_err());
    }

    #[test]
    fn test_bad_identity_rejected() {
        let mut buf = Vec::new();
        put_frame(&mut buf, b"short");
        put_frame(&mut buf, &TAG_HEARTBEAT.to_le_bytes());
        assert!(decode_worker_message(&buf).is_err());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let identity = WorkerId::new();
        let mut buf = Vec::new();
        put_frame(&mut buf, identity.as_bytes());
        put_frame(&mut buf, &99u32.to_le_bytes());
        let err = decode_worker_message(&buf).unwrap_err();
        assert!(err.to_string().contains("unknown command tag"));
    }

    #[test]
    fn test_invalid_utf8_error_message_rejected() {
        let identity = WorkerId::new();
        let mut buf = Vec::new();
        put_frame(&mut buf, identity.as_bytes());
        put_frame(&mut buf, &TAG_ERROR.to_le_bytes());
        put_frame(&mut buf, &500i32.to_le_bytes());
        put_frame(&mut buf, &[0xff, 0xfe]);
        assert!(decode_worker_message(&buf).is_err());
    }
}
