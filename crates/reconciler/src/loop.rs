//! Controller loop driving reconciliation passes.
//!
//! Identities arrive on a queue (spec change notifications, retry timers,
//! manual enqueues). The controller never runs two passes for one identity
//! at once: an identity enqueued while its pass is in flight is marked dirty
//! and re-run once that pass finishes. Different identities run in parallel
//! up to `max_concurrent_passes`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use shareform_core::{Error, Result, ShareIdentity};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::executor::CancelHandle;
use crate::reconciler::{PassReport, ReconcileOutcome, Reconciler};

/// Work-queue controller for share identities.
pub struct ShareController {
    reconciler: Arc<Reconciler>,
    queue_tx: mpsc::UnboundedSender<ShareIdentity>,
    queue_rx: mpsc::UnboundedReceiver<ShareIdentity>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    reports: Option<mpsc::UnboundedSender<PassReport>>,
}

/// Bookkeeping owned by the running loop.
#[derive(Default)]
struct QueueState {
    in_flight: HashMap<ShareIdentity, CancelHandle>,
    /// Identity of each running pass task, so a task that panics can be
    /// released and retried.
    tasks: HashMap<Id, ShareIdentity>,
    dirty: HashSet<ShareIdentity>,
    attempts: HashMap<ShareIdentity, u32>,
}

impl ShareController {
    /// Create a controller around `reconciler`.
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            queue_tx,
            queue_rx,
            stop_tx,
            stop_rx,
            reports: None,
        }
    }

    /// Forward every finished pass report to `reports`.
    #[must_use]
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<PassReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Get a handle to enqueue identities and stop the loop.
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            queue_tx: self.queue_tx.clone(),
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Run until stopped.
    ///
    /// On stop, in-flight passes are cancelled between actions and awaited;
    /// pending retry timers are dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the stop channel is torn down without a
    /// stop request.
    pub async fn run(self) -> Result<()> {
        let Self {
            reconciler,
            queue_tx,
            mut queue_rx,
            stop_tx: _stop_tx,
            mut stop_rx,
            reports,
        } = self;

        let permits = reconciler.config().max_concurrent_passes;
        info!(max_concurrent_passes = permits, "Starting share controller");

        let semaphore = Arc::new(Semaphore::new(permits));
        let mut passes: JoinSet<PassReport> = JoinSet::new();
        let mut timers: JoinSet<()> = JoinSet::new();
        let mut state = QueueState::default();

        let result = loop {
            tokio::select! {
                Some(identity) = queue_rx.recv() => {
                    if state.in_flight.contains_key(&identity) {
                        debug!(%identity, "Pass in flight, marking dirty");
                        state.dirty.insert(identity);
                    } else {
                        spawn_pass(&mut passes, &mut state, &reconciler, &semaphore, identity);
                    }
                }
                Some(joined) = passes.join_next_with_id(), if !passes.is_empty() => {
                    let report = match joined {
                        Ok((id, report)) => {
                            state.tasks.remove(&id);
                            report
                        }
                        Err(e) => {
                            let Some(identity) = state.release_failed_task(&e) else {
                                continue;
                            };
                            let delay = backoff(&mut state, &reconciler, &identity, Duration::ZERO);
                            schedule_retry(&mut timers, &queue_tx, identity, delay);
                            continue;
                        }
                    };
                    let identity = report.identity.clone();
                    state.in_flight.remove(&identity);
                    let delay = next_delay(&mut state, &reconciler, &report);
                    forward(reports.as_ref(), report);

                    if state.dirty.remove(&identity) {
                        spawn_pass(&mut passes, &mut state, &reconciler, &semaphore, identity);
                    } else if let Some(delay) = delay {
                        schedule_retry(&mut timers, &queue_tx, identity, delay);
                    }
                }
                Some(joined) = timers.join_next(), if !timers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Retry timer did not complete");
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break Err(Error::Cancelled);
                    }
                    if *stop_rx.borrow() {
                        break Ok(());
                    }
                }
            }
        };

        info!(in_flight = state.in_flight.len(), "Stopping share controller");
        timers.abort_all();
        for handle in state.in_flight.values() {
            handle.cancel();
        }
        while let Some(joined) = passes.join_next_with_id().await {
            match joined {
                Ok((_, report)) => forward(reports.as_ref(), report),
                Err(e) => {
                    state.release_failed_task(&e);
                }
            }
        }
        info!("Share controller stopped");
        result
    }
}

impl QueueState {
    /// Forget the pass task behind `err` and return its identity for a retry.
    /// Any dirty mark is dropped.
    fn release_failed_task(&mut self, err: &tokio::task::JoinError) -> Option<ShareIdentity> {
        let Some(identity) = self.tasks.remove(&err.id()) else {
            error!(error = %err, "Unknown reconcile task did not complete");
            return None;
        };
        error!(%identity, error = %err, "Reconcile task did not complete");
        self.in_flight.remove(&identity);
        self.dirty.remove(&identity);
        Some(identity)
    }
}

fn spawn_pass(
    passes: &mut JoinSet<PassReport>,
    state: &mut QueueState,
    reconciler: &Arc<Reconciler>,
    semaphore: &Arc<Semaphore>,
    identity: ShareIdentity,
) {
    let (handle, cancel) = CancelHandle::pair();
    state.in_flight.insert(identity.clone(), handle);
    let reconciler = Arc::clone(reconciler);
    let semaphore = Arc::clone(semaphore);
    let task = identity.clone();
    let abort = passes.spawn(async move {
        // Never closed.
        let _permit = semaphore.acquire_owned().await.ok();
        reconciler.reconcile(&task, &cancel).await
    });
    state.tasks.insert(abort.id(), identity);
}

/// Delay before the identity runs again, or `None` to wait for a change.
///
/// Failures back off exponentially per identity; any other outcome resets
/// the attempt counter.
fn next_delay(state: &mut QueueState, reconciler: &Reconciler, report: &PassReport) -> Option<Duration> {
    let ReconcileOutcome::RetryAfter(requested) = report.outcome else {
        state.attempts.remove(&report.identity);
        return None;
    };

    if !report.needs_backoff() {
        state.attempts.remove(&report.identity);
        return Some(requested);
    }

    Some(backoff(state, reconciler, &report.identity, requested))
}

/// Next exponential delay for `identity`, never shorter than `floor`.
fn backoff(state: &mut QueueState, reconciler: &Reconciler, identity: &ShareIdentity, floor: Duration) -> Duration {
    let attempt = state.attempts.entry(identity.clone()).or_insert(0);
    let delay = reconciler.config().retry_delay(*attempt).max(floor);
    *attempt = attempt.saturating_add(1);
    debug!(%identity, attempt = *attempt, delay_ms = delay.as_millis(), "Backing off");
    delay
}

fn schedule_retry(
    timers: &mut JoinSet<()>,
    queue_tx: &mpsc::UnboundedSender<ShareIdentity>,
    identity: ShareIdentity,
    delay: Duration,
) {
    let queue_tx = queue_tx.clone();
    timers.spawn(async move {
        tokio::time::sleep(delay).await;
        if queue_tx.send(identity).is_err() {
            debug!("Controller queue closed, dropping retry");
        }
    });
}

fn forward(reports: Option<&mpsc::UnboundedSender<PassReport>>, report: PassReport) {
    if let Some(tx) = reports {
        if tx.send(report).is_err() {
            debug!("Report listener is gone");
        }
    }
}

/// Handle to feed and stop a running [`ShareController`].
#[derive(Clone)]
pub struct ControllerHandle {
    queue_tx: mpsc::UnboundedSender<ShareIdentity>,
    stop_tx: watch::Sender<bool>,
}

impl ControllerHandle {
    /// Queue a pass for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` once the controller has shut down.
    pub fn enqueue(&self, identity: ShareIdentity) -> Result<()> {
        self.queue_tx.send(identity).map_err(|_| Error::Cancelled)
    }

    /// Stop the controller.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
