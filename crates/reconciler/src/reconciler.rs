//! Reconciler implementation.
//!
//! One call to [`Reconciler::reconcile`] is one full, level-triggered pass:
//! fetch desired spec, read inventory, plan, execute, report status. Nothing
//! is carried over between passes except what the status sink persists.

use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use shareform_core::{
    Error, ErrorClass, ObservedStatus, PassId, PassPhase, Result, ResultExt, ShareIdentity,
    ShareScope, ShareState, StatusCondition,
};
use tracing::{Instrument, error, info, info_span, warn};

use crate::backend::ShareBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::ReconcilerConfig;
use crate::diff;
use crate::executor::{CancelSignal, PlanExecutor};
use crate::inventory::{InventoryReader, InventorySnapshot};
use crate::source::DesiredSpecSource;
use crate::status::{StatusReporter, StatusSink};
use crate::types::{ExecutionReport, ReconciliationPlan};

/// What the caller should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change notification.
    Done,
    /// Run the identity again after this delay.
    RetryAfter(Duration),
}

/// Everything one pass observed and decided.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: PassId,
    pub identity: ShareIdentity,
    /// `None` when the pass ended before it could be classified, e.g. a
    /// transient read failure or a deleted desired spec.
    pub phase: Option<PassPhase>,
    pub plan: Option<ReconciliationPlan>,
    pub execution: Option<ExecutionReport>,
    /// Status committed by this pass, if any.
    pub status: Option<ObservedStatus>,
    pub error: Option<Error>,
    pub outcome: ReconcileOutcome,
}

impl PassReport {
    fn new(pass_id: PassId, identity: ShareIdentity) -> Self {
        Self {
            pass_id,
            identity,
            phase: None,
            plan: None,
            execution: None,
            status: None,
            error: None,
            outcome: ReconcileOutcome::Done,
        }
    }

    /// Desired and observed state matched and nothing failed.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.phase == Some(PassPhase::Converged)
    }

    /// Whether the caller should back off before the next attempt, as
    /// opposed to a plain confirmation requeue.
    #[must_use]
    pub fn needs_backoff(&self) -> bool {
        self.phase == Some(PassPhase::Degraded)
            || self
                .error
                .as_ref()
                .is_some_and(|e| e.class() == ErrorClass::Retryable)
    }
}

/// K8s-style reconciler for shares.
pub struct Reconciler {
    source: Arc<dyn DesiredSpecSource>,
    backend: Arc<dyn ShareBackend>,
    status: Arc<dyn StatusSink>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    reader: InventoryReader,
    executor: PlanExecutor,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        source: Arc<dyn DesiredSpecSource>,
        backend: Arc<dyn ShareBackend>,
        status: Arc<dyn StatusSink>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let reader = InventoryReader::new(config.call_timeout(), config.max_inventory_pages);
        let executor = PlanExecutor::new(config.call_timeout());
        Self {
            source,
            backend,
            status,
            clock,
            config,
            reader,
            executor,
        }
    }

    /// Run one reconciliation pass for `identity`.
    ///
    /// Never panics and never returns an error: every failure is folded into
    /// the report and its [`ReconcileOutcome`].
    pub async fn reconcile(&self, identity: &ShareIdentity, cancel: &CancelSignal) -> PassReport {
        let pass_id = PassId::new();
        let span = info_span!(
            "reconcile_pass",
            %pass_id,
            namespace = %identity.namespace,
            name = %identity.name
        );
        self.run_pass(PassReport::new(pass_id, identity.clone()), cancel)
            .instrument(span)
            .await
    }

    async fn run_pass(&self, mut report: PassReport, cancel: &CancelSignal) -> PassReport {
        let identity = report.identity.clone();

        let desired = match self
            .source
            .fetch(&identity)
            .await
            .and_then(|spec| spec.validate().map(|()| spec))
        {
            Ok(spec) => spec,
            Err(e) => return self.abort(report, e).await,
        };

        let scope = identity.scope();
        let snapshot = match self.read_inventory(&scope).await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.abort(report, e).await,
        };

        let plan = diff::plan(&desired, &snapshot.shares);
        let (creates, deletes, noops) = plan.kind_counts();
        info!(
            observed = snapshot.shares.len(),
            creates,
            deletes,
            noops,
            suspended = desired.suspend,
            "Plan computed"
        );

        let execution = self
            .executor
            .execute(self.backend.as_ref(), &scope, &plan, cancel)
            .await;
        let phase = classify_pass(&plan, &execution, desired.suspend);
        let needs_recheck = execution.applied_mutations() > 0 || execution.has_failures();
        let mut message = condition_message(phase, &execution);
        report.plan = Some(plan);
        report.execution = Some(execution);

        if cancel.is_cancelled() {
            warn!("Pass cancelled, leaving status untouched");
            report.phase = Some(PassPhase::Degraded);
            report.error = Some(Error::Cancelled);
            report.outcome = ReconcileOutcome::RetryAfter(self.config.retry_base());
            return report;
        }

        let current = if needs_recheck {
            match self.read_inventory(&scope).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    report.phase = Some(PassPhase::Degraded);
                    return self.abort(report, e).await;
                }
            }
        } else {
            snapshot
        };

        let errored = errored_targets(&current, &desired.share_name);
        if !errored.is_empty() {
            warn!(share_ids = ?errored, "Target share is in Error state");
            message = format!(
                "{message}; target share in Error state: {}",
                errored.join(", ")
            );
        }

        let condition = StatusCondition::new(phase, message, self.clock.now());
        match StatusReporter
            .report(self.status.as_ref(), &identity, &desired, &current, condition)
            .await
            .log_on_error("commit_status")
        {
            Ok(status) => report.status = Some(status),
            Err(e) => {
                report.phase = Some(phase);
                return self.abort(report, e).await;
            }
        }

        report.phase = Some(phase);
        report.outcome = match phase {
            PassPhase::Converged | PassPhase::Suspended | PassPhase::Failed => {
                ReconcileOutcome::Done
            }
            PassPhase::Progressing => ReconcileOutcome::RetryAfter(self.config.progress_requeue()),
            PassPhase::Degraded => ReconcileOutcome::RetryAfter(self.config.retry_base()),
        };
        info!(%phase, outcome = ?report.outcome, "Pass finished");
        report
    }

    async fn read_inventory(&self, scope: &ShareScope) -> Result<InventorySnapshot> {
        self.reader
            .list_shares(self.backend.as_ref(), scope, self.clock.as_ref())
            .await
            .log_on_error("list_shares")
    }

    /// End the pass early on `err`, deciding between retry and terminal.
    async fn abort(&self, mut report: PassReport, err: Error) -> PassReport {
        let identity = report.identity.clone();

        report.outcome = if err.is_not_found() {
            info!(%identity, error = %err, "Desired spec or scope is gone, clearing status");
            match self.status.clear(&identity).await.log_on_error("clear_status") {
                Ok(()) => ReconcileOutcome::Done,
                Err(_) => ReconcileOutcome::RetryAfter(self.config.retry_base()),
            }
        } else if err.is_retryable() {
            warn!(%identity, error = %err, "Pass aborted, will retry");
            ReconcileOutcome::RetryAfter(self.config.retry_base())
        } else {
            error!(%identity, error = %err, "Pass failed terminally, operator attention needed");
            let condition = StatusCondition::new(PassPhase::Failed, err.to_string(), self.clock.now());
            report.phase = Some(PassPhase::Failed);
            // Done even if this write fails; the next spec change re-runs the pass.
            self.status
                .record_condition(&identity, condition)
                .await
                .into_option_logged("record_condition");
            ReconcileOutcome::Done
        };

        report.error = Some(err);
        report
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

fn classify_pass(plan: &ReconciliationPlan, execution: &ExecutionReport, suspended: bool) -> PassPhase {
    if !execution.is_clean() {
        PassPhase::Degraded
    } else if suspended {
        PassPhase::Suspended
    } else if plan.is_noop_only() {
        PassPhase::Converged
    } else {
        PassPhase::Progressing
    }
}

fn condition_message(phase: PassPhase, execution: &ExecutionReport) -> String {
    match phase {
        PassPhase::Converged => "shares match the desired spec".to_string(),
        PassPhase::Suspended => "reconciliation suspended; no changes applied".to_string(),
        PassPhase::Progressing => format!(
            "{} change(s) applied, awaiting confirmation",
            execution.applied_mutations()
        ),
        PassPhase::Degraded | PassPhase::Failed => execution.summary(),
    }
}

/// Ids of target-named shares the backend reports as `Error`. The planner
/// keeps them, so only the condition message surfaces them.
fn errored_targets(snapshot: &InventorySnapshot, share_name: &str) -> Vec<String> {
    snapshot
        .named(share_name)
        .filter(|share| share.state == ShareState::Error)
        .map(|share| share.id.to_string())
        .sorted()
        .collect()
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    source: Option<Arc<dyn DesiredSpecSource>>,
    backend: Option<Arc<dyn ShareBackend>>,
    status: Option<Arc<dyn StatusSink>>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: None,
            backend: None,
            status: None,
            clock: Arc::new(SystemClock),
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the desired-spec source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn DesiredSpecSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the storage backend handle.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ShareBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the status sink.
    #[must_use]
    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when a collaborator is missing or the
    /// configuration does not validate.
    pub fn build(self) -> Result<Reconciler> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| Error::invalid_config("desired spec source is required"))?;
        let backend = self
            .backend
            .ok_or_else(|| Error::invalid_config("share backend is required"))?;
        let status = self
            .status
            .ok_or_else(|| Error::invalid_config("status sink is required"))?;
        Ok(Reconciler::new(source, backend, status, self.clock, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
