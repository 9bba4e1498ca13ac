use capstan::{ErrorCode, JobHandler};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One observed job callback.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallbackEvent {
    Chunk(Vec<u8>),
    Error { code: ErrorCode, message: String },
    Close,
}

impl CallbackEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallbackEvent::Error { .. } | CallbackEvent::Close)
    }
}

/// Records every callback a job delivers, for test assertions.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<CallbackEvent>>,
    signal: Notify,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every callback observed so far, in delivery order.
    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    /// Concatenated chunk payloads.
    pub fn chunks(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CallbackEvent::Chunk(data) => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// The error, if the job failed.
    pub fn error(&self) -> Option<(ErrorCode, String)> {
        self.events.lock().iter().find_map(|event| match event {
            CallbackEvent::Error { code, message } => Some((*code, message.clone())),
            _ => None,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.events.lock().iter().any(|event| matches!(event, CallbackEvent::Close))
    }

    /// Number of terminal callbacks delivered. The engine contract is
    /// exactly one per admitted job.
    pub fn terminal_count(&self) -> usize {
        self.events.lock().iter().filter(|event| event.is_terminal()).count()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_count() > 0
    }

    /// Wait until the job reaches its terminal callback.
    pub async fn wait_terminal(&self) {
        loop {
            if self.is_terminal() {
                return;
            }
            let notified = self.signal.notified();
            if self.is_terminal() {
                return;
            }
            notified.await;
        }
    }

    pub fn assert_closed(&self) {
        assert!(
            self.is_closed(),
            "expected on_close, saw {:?}",
            self.events()
        );
    }

    pub fn assert_error(&self, expected: ErrorCode) {
        match self.error() {
            Some((code, _)) => assert_eq!(code, expected, "events: {:?}", self.events()),
            None => panic!("expected on_error({expected}), saw {:?}", self.events()),
        }
    }

    fn record(&self, event: CallbackEvent) {
        self.events.lock().push(event);
        self.signal.notify_waiters();
    }
}

impl JobHandler for RecordingHandler {
    fn on_chunk(&self, chunk: &[u8]) {
        self.record(CallbackEvent::Chunk(chunk.to_vec()));
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        self.record(CallbackEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    fn on_close(&self) {
        self.record(CallbackEvent::Close);
    }
}
