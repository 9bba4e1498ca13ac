//! Echo pool example: an engine wired to in-process scripted workers.
//!
//! This example runs the whole dispatch path (enqueue, pool growth,
//! invoke, chunk, choke) without spawning real worker processes, using
//! the in-process bus from capstan-testkit. In production the bus is a
//! `UnixDatagramBus` and the factory a `ProcessWorkerFactory`.

use std::sync::Arc;

use capstan::{Engine, ErrorCode, Job, JobHandler, JobPolicy, Manifest};
use capstan_testkit::{InProcBus, TestWorkerFactory};

/// Prints every callback a job delivers.
struct PrintingHandler {
    name: String,
}

impl JobHandler for PrintingHandler {
    fn on_chunk(&self, chunk: &[u8]) {
        println!("[{}] chunk: {}", self.name, String::from_utf8_lossy(chunk));
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        println!("[{}] error {code}: {message}", self.name);
    }

    fn on_close(&self) {
        println!("[{}] closed", self.name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let bus = Arc::new(InProcBus::new());
    let factory = Arc::new(TestWorkerFactory::new(Arc::clone(&bus)));

    let engine = Engine::builder(Manifest::new("echo"))
        .with_bus(Arc::clone(&bus))
        .with_factory(Arc::clone(&factory))
        .build()?;

    engine.start().await;

    for i in 0..4 {
        let handler = Arc::new(PrintingHandler {
            name: format!("job-{i}"),
        });
        engine.enqueue(Arc::new(Job::new(
            "echo",
            format!("payload {i}").into_bytes(),
            JobPolicy::default(),
            handler,
        )));
    }

    // Serve the queue: each scripted worker echoes the request back as a
    // single chunk and chokes.
    let workers = factory.wait_for_workers(1).await;
    let worker = Arc::clone(&workers[0]);
    let serving = tokio::spawn(async move {
        while let Some(event) = worker.serve_one().await {
            println!("[worker] served '{event}'");
        }
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    println!("info: {:?}", engine.info());

    engine.stop().await;
    serving.await?;

    Ok(())
}
