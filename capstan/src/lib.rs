//! Capstan - per-application worker-pool engine.
//!
//! An engine owns one logical *application*: a named unit of work executed
//! by a pool of external *worker* processes connected over a framed
//! message bus. The engine accepts jobs from arbitrary threads, schedules
//! them onto idle workers, grows the pool under load, multiplexes worker
//! I/O onto a single reactor task, and enforces deadlines and queue
//! limits.
//!
//! # Core Concepts
//!
//! - **Job**: one unit of work, carrying an event name, an opaque request
//!   payload, a [`JobPolicy`] and a [`JobHandler`] that receives response
//!   chunks and exactly one terminal callback.
//!
//! - **Worker**: an external process identified by a stable 16-byte
//!   routing identity on the bus. Its lifecycle
//!   (`unknown → idle ⇄ busy → dead`) is tracked by a [`WorkerRecord`]
//!   state machine.
//!
//! - **Bus**: the [`Bus`] trait abstracts the transport;
//!   [`UnixDatagramBus`] is the production implementation and the testkit
//!   provides an in-process one.
//!
//! - **Engine**: the [`Engine`] façade ties queue, pool and reactor
//!   together. `start`, `stop`, `enqueue` and `info` are callable from any
//!   thread; everything else runs on the loop task.
//!
//! # Quick Start
//!
//! ```ignore
//! use capstan::{Engine, Job, JobPolicy, Manifest, ProcessWorkerFactory, UnixDatagramBus};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manifest = Manifest::new("echo");
//!     let bus = Arc::new(UnixDatagramBus::bind("/run/capstan".as_ref(), &manifest.name)?);
//!     let factory = Arc::new(ProcessWorkerFactory::new(
//!         "/usr/bin/echo-worker",
//!         &manifest.name,
//!         bus.endpoint(),
//!     ));
//!
//!     let engine = Engine::builder(manifest)
//!         .with_bus(bus)
//!         .with_factory(factory)
//!         .build()?;
//!
//!     engine.start().await;
//!     // engine.enqueue(Arc::new(Job::new("ping", b"hi".to_vec(), JobPolicy::default(), handler)));
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Error Model
//!
//! Jobs fail through their handler with one of three engine-level codes:
//! `resource` (engine inactive, queue full, shutdown), `deadline` (expired
//! in the queue) or `server` (unrecoverable worker fault, which also takes
//! the whole engine down). Worker-reported application codes are forwarded
//! untouched and treated as recoverable.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support

/// Job bus transport.
///
/// The `bus` module defines the [`Bus`] trait the reactor drains and the
/// [`UnixDatagramBus`] production transport.
pub mod bus;

/// The engine façade, reactor and pool management.
///
/// The `engine` module ties the pieces together:
/// - [`Engine`] - the thread-safe façade
/// - [`EngineBuilder`] - explicit-dependency construction
/// - [`EngineConfig`] - reactor tuning knobs
/// - [`WorkerFactory`] and [`ProcessWorkerFactory`] - pool growth
pub mod engine;

/// Core job definitions.
///
/// The `job` module defines:
/// - [`Job`] - the unit of work and its state machine
/// - [`JobPolicy`] - urgency, deadline and invocation timeout
/// - [`JobHandler`] - the submitter's callback surface
/// - [`ErrorCode`] - engine and application error categories
pub mod job;

/// Application manifests.
///
/// The `manifest` module defines [`Manifest`] and [`ExecutionPolicy`],
/// including validation of the policy fields.
pub mod manifest;

/// Wire protocol of the worker bus: frames, tags and envelopes.
pub mod protocol;

/// The job queue with urgent-front discipline and deadline sweep.
pub mod queue;

/// Resource-limit capability.
///
/// The `resource` module defines the [`ResourceController`] capability,
/// the typed [`LimitValue`] parameters and the default [`NullController`].
pub mod resource;

/// Data-source plugin surface consumed by the host process.
pub mod source;

/// Worker records and their lifecycle state machine.
pub mod worker;

/// Tracing and telemetry instrumentation.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics instrumentation.
pub mod metrics;

pub use bus::{Bus, UnixDatagramBus};
pub use engine::{
    Engine, EngineBuilder, EngineConfig, EngineInfo, EngineState, PoolInfo, PoolMap,
    ProcessWorkerFactory, WorkerFactory,
};
pub use job::{ErrorCode, Job, JobHandler, JobId, JobPolicy, JobState};
pub use manifest::{ExecutionPolicy, Manifest};
pub use protocol::{EngineCommand, Envelope, WorkerEvent};
pub use queue::JobQueue;
pub use resource::{LimitValue, NullController, ResourceController, ResourceLimits};
pub use source::{Source, SourceError, SourceFactory, SourceRecord, SourceRegistry};
pub use worker::{Termination, WorkerId, WorkerRecord, WorkerState};
