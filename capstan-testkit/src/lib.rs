//! Test support for capstan engines.
//!
//! The testkit replaces the two process boundaries of a real deployment
//! with in-process doubles:
//!
//! - [`InProcBus`] - a channel-backed [`Bus`](capstan::Bus) implementation
//! - [`ScriptedWorker`] - drives the worker side of the bus from a test
//! - [`TestWorkerFactory`] - a [`WorkerFactory`](capstan::WorkerFactory)
//!   that connects scripted workers instead of spawning processes
//! - [`RecordingHandler`] - captures job callbacks for assertions

mod bus;
mod handler;
mod worker;

pub use bus::InProcBus;
pub use handler::{CallbackEvent, RecordingHandler};
pub use worker::{ScriptedWorker, TestWorkerFactory};
