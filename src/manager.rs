//! Per-run coordinator for every registered exporter.
//!
//! `start` snapshots the registry, runs each exporter inside its own
//! supervising task, and only returns once every exporter that started
//! cleanly is ready — guaranteeing no early event is missed. Exporters
//! registered after the snapshot are not picked up until the next
//! stop/start cycle; this is a documented limitation, not a bug.
//!
//! Shutdown is hierarchical: the manager signals a shared shutdown event,
//! each supervising task then stops its own exporter, which in turn cancels
//! and joins that exporter's in-flight export tasks. Both wait budgets fail
//! open — a stuck exporter is named in a warning, never propagated.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::{Result, TracewayError};
use crate::event::EventStream;
use crate::exporter::Exporter;
use crate::registry::ExporterRegistry;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

struct Supervised {
    name: String,
    exporter: Arc<Exporter>,
    handle: JoinHandle<Result<()>>,
}

struct ActiveRun {
    shutdown_tx: watch::Sender<bool>,
    supervised: Vec<Supervised>,
    startup_failures: Vec<String>,
}

/// One instance per workflow execution; not a process-wide singleton.
pub struct ExporterManager {
    registry: Arc<ExporterRegistry>,
    stream: EventStream,
    shutdown_timeout: Duration,
    run: Arc<Mutex<Option<ActiveRun>>>,
}

impl ExporterManager {
    pub fn new(registry: Arc<ExporterRegistry>, stream: EventStream) -> Self {
        Self {
            registry,
            stream,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            run: Arc::new(Mutex::new(None)),
        }
    }

    /// Maximum time to wait for each supervising task to stop gracefully.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.is_some()
    }

    /// Names of exporters that failed during the last `start`, if any.
    /// Cleared on `stop`.
    pub async fn startup_failures(&self) -> Vec<String> {
        self.run
            .lock()
            .await
            .as_ref()
            .map(|run| run.startup_failures.clone())
            .unwrap_or_default()
    }

    /// Instantiate every registered exporter and run each under its own
    /// supervising task. Returns once all cleanly-started exporters are
    /// ready. Re-entrancy is forbidden: a second `start` before `stop`
    /// fails with [`TracewayError::ManagerAlreadyRunning`].
    ///
    /// A single exporter failing to start does not abort the run; the
    /// failure is logged by name, recorded in `startup_failures`, and the
    /// remaining exporters keep operating.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Err(TracewayError::ManagerAlreadyRunning);
        }

        // Snapshot: exporters registered after this point are not included
        // until the next stop/start cycle.
        let exporters = self.registry.get_all().await;
        let (shutdown_tx, _) = watch::channel(false);

        let mut supervised = Vec::with_capacity(exporters.len());
        let mut readiness = Vec::with_capacity(exporters.len());
        for (name, exporter) in exporters {
            let (started_tx, started_rx) = oneshot::channel::<Result<()>>();
            let handle = tokio::spawn(Self::supervise(
                name.clone(),
                Arc::clone(&exporter),
                self.stream.clone(),
                shutdown_tx.subscribe(),
                started_tx,
            ));
            readiness.push((name.clone(), Arc::clone(&exporter), started_rx));
            supervised.push(Supervised {
                name,
                exporter,
                handle,
            });
        }

        // Readiness barrier: every exporter that started cleanly has
        // subscribed before control returns to the caller.
        let mut startup_failures = Vec::new();
        for (name, exporter, started_rx) in readiness {
            match started_rx.await {
                Ok(Ok(())) => exporter.wait_ready().await,
                Ok(Err(err)) => {
                    error!(exporter = %name, error = %err, "exporter failed to start");
                    startup_failures.push(name);
                }
                Err(_) => {
                    error!(exporter = %name, "supervising task ended before startup completed");
                    startup_failures.push(name);
                }
            }
        }

        *run = Some(ActiveRun {
            shutdown_tx,
            supervised,
            startup_failures,
        });
        Ok(())
    }

    async fn supervise(
        name: String,
        exporter: Arc<Exporter>,
        stream: EventStream,
        mut shutdown_rx: watch::Receiver<bool>,
        started_tx: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        match exporter.start(Some(&stream)).await {
            Ok(()) => {
                let _ = started_tx.send(Ok(()));
            }
            Err(err) => {
                let _ = started_tx.send(Err(TracewayError::Export(err.to_string())));
                return Err(TracewayError::ExporterStartup {
                    name,
                    source: Box::new(err),
                });
            }
        }
        // Hold the exporter's start scope open until shutdown is signalled,
        // then release it on the way out.
        let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
        debug!(exporter = %name, "shutdown signalled; stopping exporter");
        exporter.stop().await;
        Ok(())
    }

    /// Signal shutdown and join every supervising task under the configured
    /// timeout. Idempotent; always completes, never raises. Stuck exporters
    /// are aborted and named in an aggregated warning.
    pub async fn stop(&self) {
        Self::shutdown_run(&self.run, self.shutdown_timeout).await;
    }

    async fn shutdown_run(run: &Mutex<Option<ActiveRun>>, shutdown_timeout: Duration) {
        let Some(run) = run.lock().await.take() else {
            return;
        };
        run.shutdown_tx.send_replace(true);

        let mut stuck = Vec::new();
        for Supervised {
            name,
            exporter,
            mut handle,
        } in run.supervised
        {
            match timeout(shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => {
                    // Fault isolation: one exporter's failure is logged and
                    // does not abort the shutdown of the others.
                    warn!(exporter = %name, error = %err, "exporter run ended with error");
                }
                Ok(Err(join_err)) if join_err.is_cancelled() => {
                    debug!(exporter = %name, "supervising task cancelled");
                }
                Ok(Err(join_err)) => {
                    warn!(exporter = %name, error = %join_err, "supervising task panicked");
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        exporter = %name,
                        timeout = ?shutdown_timeout,
                        "exporter did not stop within the shutdown timeout and may be stuck"
                    );
                    // Backstop: release the exporter's resources directly.
                    exporter.stop().await;
                    stuck.push(name);
                }
            }
        }
        if !stuck.is_empty() {
            warn!(exporters = ?stuck, "exporters may be stuck after shutdown");
        }
    }

    /// Scoped acquisition: start, run `fut`, and always stop afterwards.
    /// This holds on success, on error, and when the composed future is
    /// dropped mid-flight (task cancelled): a drop guard then performs the
    /// shutdown on a detached task.
    pub async fn run_scoped<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.start().await?;
        let mut guard = ScopeGuard {
            run: Arc::clone(&self.run),
            shutdown_timeout: self.shutdown_timeout,
            armed: true,
        };
        let result = fut.await;
        guard.armed = false;
        self.stop().await;
        result
    }
}

/// Shuts the active run down if the scoped future never reached its own
/// stop leg.
struct ScopeGuard {
    run: Arc<Mutex<Option<ActiveRun>>>,
    shutdown_timeout: Duration,
    armed: bool,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let run = Arc::clone(&self.run);
        let shutdown_timeout = self.shutdown_timeout;
        // Cancellation drops the guard on a runtime thread; without a
        // runtime there are no supervising tasks left to stop either.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                ExporterManager::shutdown_run(&run, shutdown_timeout).await;
            });
        }
    }
}
