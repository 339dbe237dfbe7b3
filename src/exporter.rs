//! Exporter lifecycle: subscription ownership, export-task bookkeeping, and
//! graceful start/stop with a bounded final sweep.
//!
//! An [`Exporter`] pairs an [`ExportSink`] (the backend-specific part) with
//! the lifecycle state every exporter needs: a running flag, a readiness
//! signal, a shutdown signal, the exclusive event-stream subscription, and
//! the set of in-flight export tasks. Event delivery happens on the
//! publisher's synchronous callback; each event is handed to the runtime as
//! its own task, so export completions may arrive out of emission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{EventStream, IntermediateStep, Subscription};

/// Default bound on the final wait for in-flight export tasks during stop.
/// Independent of the manager's `shutdown_timeout`.
pub const DEFAULT_SWEEP_TIMEOUT: Duration = Duration::from_secs(5);

/// The backend-specific half of an exporter.
///
/// `export` is called at most once per received event per exporter instance,
/// from a detached task, with no ordering guarantee across concurrent calls.
/// The core performs no retry; any retry/backoff belongs to the sink.
#[async_trait]
pub trait ExportSink: Send + Sync {
    fn name(&self) -> &str;

    async fn export(&self, step: Arc<IntermediateStep>) -> Result<()>;

    /// Called before the subscription is taken. Open connections here.
    async fn pre_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called during stop, before in-flight tasks are swept.
    async fn cleanup(&self) {}

    /// Synchronous hook invoked on the publisher callback for start-kind
    /// steps, before the export task is scheduled.
    fn process_start(&self, _step: &IntermediateStep) {}

    /// Synchronous hook invoked on the publisher callback for end-kind steps.
    fn process_end(&self, _step: &IntermediateStep) {}
}

/// Lifecycle owner for one sink. Created fresh per workflow run by a
/// registry factory and discarded after `stop` completes.
pub struct Exporter {
    sink: Arc<dyn ExportSink>,
    running: AtomicBool,
    ready_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    subscription: Mutex<Option<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sweep_timeout: Duration,
}

impl Exporter {
    pub fn new(sink: Arc<dyn ExportSink>) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            sink,
            running: AtomicBool::new(false),
            ready_tx,
            shutdown_tx,
            subscription: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            sweep_timeout: DEFAULT_SWEEP_TIMEOUT,
        })
    }

    pub fn with_sweep_timeout(sink: Arc<dyn ExportSink>, sweep_timeout: Duration) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            sink,
            running: AtomicBool::new(false),
            ready_tx,
            shutdown_tx,
            subscription: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            sweep_timeout,
        })
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Observe the shutdown signal; flips to `true` when `stop` begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Number of tracked export tasks. Finished tasks are pruned on each
    /// new admission and cleared by `stop`.
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Subscribe to the stream and become ready.
    ///
    /// Idempotent: starting an already-running exporter logs and no-ops.
    /// A missing stream degrades to an inert exporter (warn, no subscription,
    /// never ready) rather than an error. Readiness is signalled only on
    /// successful subscription.
    pub async fn start(self: &Arc<Self>, stream: Option<&EventStream>) -> Result<()> {
        if self.is_running() {
            debug!(exporter = %self.name(), "already running; start is a no-op");
            return Ok(());
        }
        self.sink.pre_start().await?;
        let Some(stream) = stream else {
            warn!(
                exporter = %self.name(),
                "no event stream available; exporter will not receive events"
            );
            return Ok(());
        };
        let this = Arc::clone(self);
        let subscription = stream.subscribe(move |step| this.handle_event(step));
        *self.subscription.lock().unwrap() = Some(subscription);
        self.running.store(true, Ordering::Release);
        // `send` discards the value when no receiver exists yet; readiness
        // must be recorded even before anyone is waiting on it.
        self.ready_tx.send_replace(true);
        Ok(())
    }

    /// Block until the exporter has subscribed and cannot miss events.
    pub async fn wait_ready(&self) {
        let mut ready = self.ready_tx.subscribe();
        let _ = ready.wait_for(|r| *r).await;
    }

    /// Publisher callback: route the step through the sync hooks, then admit
    /// an export task. Called serially by the event stream; must not block.
    fn handle_event(self: &Arc<Self>, step: Arc<IntermediateStep>) {
        if !self.is_running() {
            // Admission boundary: once stop has begun, no new export tasks.
            warn!(
                exporter = %self.name(),
                step = %step.name,
                "exporter not running; dropping event"
            );
            return;
        }
        if step.kind.is_start() {
            self.sink.process_start(&step);
        } else if step.kind.is_end() {
            self.sink.process_end(&step);
        }
        self.spawn_export(step);
    }

    fn spawn_export(self: &Arc<Self>, step: Arc<IntermediateStep>) {
        let sink = Arc::clone(&self.sink);
        let exporter_name = self.name().to_string();
        let handle = tokio::spawn(async move {
            if let Err(err) = sink.export(step).await {
                // Detached task: failures surface here and in logs only,
                // never into the workflow's own call path.
                warn!(exporter = %exporter_name, error = %err, "export task failed");
            }
        });
        let mut tasks = self.tasks.lock().unwrap();
        if !self.is_running() {
            // A concurrent stop may have drained the task set after the
            // admission check; a handle recorded now would never be swept.
            handle.abort();
            return;
        }
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Stop the exporter: signal shutdown, release the subscription, cancel
    /// in-flight export tasks, and sweep them under a bounded wait.
    ///
    /// Idempotent; never returns an error and never blocks past the sweep
    /// timeout.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.send_replace(true);
        self.sink.cleanup().await;
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.unsubscribe();
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for handle in &handles {
            handle.abort();
        }
        let exporter_name = self.name().to_string();
        let sweep = async {
            for handle in handles {
                match handle.await {
                    Ok(()) => {}
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        warn!(exporter = %exporter_name, error = %err, "export task panicked")
                    }
                }
            }
        };
        if timeout(self.sweep_timeout, sweep).await.is_err() {
            warn!(
                exporter = %self.name(),
                timeout = ?self.sweep_timeout,
                "in-flight export tasks did not settle within the sweep timeout"
            );
        }
    }
}
