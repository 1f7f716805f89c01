//! Plan Executor.
//!
//! Applies a plan strictly in order, one backend call at a time. A failed
//! action does not abort the plan; only a create whose name still has an
//! unresolved delete is held back. There are no retries in here.

use std::collections::HashSet;
use std::time::Duration;

use shareform_core::{Error, ShareScope};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{ShareBackend, call_with_timeout};
use crate::types::{
    ActionKind, ActionOutcome, ActionReport, ExecutionReport, PlanAction, ReconciliationPlan,
    SkipReason,
};

/// Cooperative cancellation flag, checked between actions.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Sending half of a [`CancelSignal`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a handle and the signal it drives.
    #[must_use]
    pub fn pair() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Applies plans against a backend.
#[derive(Debug, Clone, Copy)]
pub struct PlanExecutor {
    call_timeout: Duration,
}

impl PlanExecutor {
    /// Create an executor with a per-call deadline.
    #[must_use]
    pub const fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// Execute `plan` inside `scope`.
    ///
    /// Every action gets exactly one entry in the report, in plan order.
    pub async fn execute(
        &self,
        backend: &dyn ShareBackend,
        scope: &ShareScope,
        plan: &ReconciliationPlan,
        cancel: &CancelSignal,
    ) -> ExecutionReport {
        let mut entries = Vec::with_capacity(plan.len());
        // Names whose delete did not go through; a create for them would collide.
        let mut unresolved: HashSet<String> = HashSet::new();

        for action in plan.actions() {
            let outcome = if cancel.is_cancelled() {
                ActionOutcome::Skipped(SkipReason::Cancelled)
            } else {
                self.apply(backend, scope, action, &mut unresolved).await
            };
            entries.push(ActionReport {
                action: action.clone(),
                outcome,
            });
        }

        let report = ExecutionReport { entries };
        if plan.mutating_count() > 0 {
            info!(
                %scope,
                applied = report.applied_mutations(),
                clean = report.is_clean(),
                "Plan executed"
            );
        }
        report
    }

    async fn apply(
        &self,
        backend: &dyn ShareBackend,
        scope: &ShareScope,
        action: &PlanAction,
        unresolved: &mut HashSet<String>,
    ) -> ActionOutcome {
        debug!(action = %action.description(), "Applying action");

        let result = match action.kind {
            ActionKind::NoOp => return ActionOutcome::Applied,
            ActionKind::Delete => match action.target.observed() {
                Some(share) => {
                    let deleted = call_with_timeout(
                        "delete_share",
                        self.call_timeout,
                        backend.delete_share(scope, &share.id),
                    )
                    .await;
                    match deleted {
                        Err(Error::NotFound { .. }) => {
                            debug!(share_id = %share.id, "Share already gone");
                            Ok(())
                        }
                        other => other,
                    }
                }
                None => Err(Error::invalid(
                    "plan",
                    "delete action without an observed share",
                )),
            },
            ActionKind::Create => {
                let name = action.target.name();
                if unresolved.contains(name) {
                    warn!(name, "Create blocked by an unresolved delete of the same name");
                    return ActionOutcome::Skipped(SkipReason::Blocked);
                }
                call_with_timeout(
                    "create_share",
                    self.call_timeout,
                    backend.create_share(scope, name),
                )
                .await
                .map(|record| debug!(share_id = %record.id, name, "Share created"))
            }
        };

        match result {
            Ok(()) => ActionOutcome::Applied,
            Err(e) => {
                warn!(action = %action.description(), error = %e, class = %e.class(), "Action failed");
                if action.kind == ActionKind::Delete {
                    unresolved.insert(action.target.name().to_string());
                }
                ActionOutcome::Failed {
                    class: e.class(),
                    message: e.to_string(),
                }
            }
        }
    }
}
