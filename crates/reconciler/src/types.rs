//! Plan and execution report types.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use shareform_core::{ErrorClass, ObservedShare, SharePolicy};

/// What a plan action does to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Create,
    Delete,
    NoOp,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
            Self::NoOp => write!(f, "no-op"),
        }
    }
}

/// Subject of a plan action: an existing share, or the desired target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanTarget {
    Observed(ObservedShare),
    Desired { share_name: String },
}

impl PlanTarget {
    /// Share name the action refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Observed(share) => &share.name,
            Self::Desired { share_name } => share_name,
        }
    }

    /// The observed share, if this action refers to one.
    #[must_use]
    pub const fn observed(&self) -> Option<&ObservedShare> {
        match self {
            Self::Observed(share) => Some(share),
            Self::Desired { .. } => None,
        }
    }
}

/// Why the planner chose an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionReason {
    /// Created before the reference time under `policy`.
    Stale(SharePolicy),
    /// No current share carries the target name.
    MissingTarget,
    /// An older share with a name another, newer share also has.
    DuplicateName,
    /// Same as `DuplicateName`, but kept: there is no reference time, so
    /// nothing is removed.
    DuplicateUnanchored,
    /// Desired spec is suspended.
    Suspended,
    /// Share is fine as it is.
    Current,
    /// Backend is already removing the share.
    DeletionInProgress,
}

impl std::fmt::Display for ActionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale(policy) => write!(f, "stale per policy {policy}"),
            Self::MissingTarget => write!(f, "missing target"),
            Self::DuplicateName => write!(f, "duplicate name"),
            Self::DuplicateUnanchored => write!(f, "duplicate name; no reference time"),
            Self::Suspended => write!(f, "suspended"),
            Self::Current => write!(f, "current"),
            Self::DeletionInProgress => write!(f, "deletion in progress"),
        }
    }
}

/// One step of a reconciliation plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanAction {
    pub target: PlanTarget,
    pub kind: ActionKind,
    pub reason: ActionReason,
}

impl PlanAction {
    /// Create the desired share.
    pub fn create(share_name: impl Into<String>, reason: ActionReason) -> Self {
        Self {
            target: PlanTarget::Desired {
                share_name: share_name.into(),
            },
            kind: ActionKind::Create,
            reason,
        }
    }

    /// Delete an observed share.
    #[must_use]
    pub fn delete(share: ObservedShare, reason: ActionReason) -> Self {
        Self {
            target: PlanTarget::Observed(share),
            kind: ActionKind::Delete,
            reason,
        }
    }

    /// Leave an observed share alone.
    #[must_use]
    pub fn noop(share: ObservedShare, reason: ActionReason) -> Self {
        Self {
            target: PlanTarget::Observed(share),
            kind: ActionKind::NoOp,
            reason,
        }
    }

    /// Whether the action issues a backend mutation.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        !matches!(self.kind, ActionKind::NoOp)
    }

    /// Human readable summary for logs.
    #[must_use]
    pub fn description(&self) -> String {
        match &self.target {
            PlanTarget::Observed(share) => {
                format!("{} share {} ({}): {}", self.kind, share.name, share.id, self.reason)
            }
            PlanTarget::Desired { share_name } => {
                format!("{} share {share_name}: {}", self.kind, self.reason)
            }
        }
    }
}

/// Ordered actions for one pass.
///
/// Deletes always come before creates, so a replacement never races the
/// backend's name-uniqueness constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    actions: Vec<PlanAction>,
}

impl ReconciliationPlan {
    /// Build a plan from already ordered actions.
    #[must_use]
    pub const fn new(actions: Vec<PlanAction>) -> Self {
        Self { actions }
    }

    #[must_use]
    pub fn actions(&self) -> &[PlanAction] {
        &self.actions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions that mutate the backend.
    #[must_use]
    pub fn mutating_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_mutating()).count()
    }

    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_noop_only(&self) -> bool {
        self.mutating_count() == 0
    }

    /// Count of actions per kind as `(create, delete, noop)`.
    #[must_use]
    pub fn kind_counts(&self) -> (usize, usize, usize) {
        let counts = self.actions.iter().counts_by(|a| a.kind);
        (
            counts.get(&ActionKind::Create).copied().unwrap_or_default(),
            counts.get(&ActionKind::Delete).copied().unwrap_or_default(),
            counts.get(&ActionKind::NoOp).copied().unwrap_or_default(),
        )
    }
}

/// Why an action was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// A delete for the same name did not succeed earlier in the plan.
    Blocked,
    /// The pass was cancelled before reaching this action.
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one plan action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    Failed { class: ErrorClass, message: String },
    Skipped(SkipReason),
}

impl ActionOutcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Outcome of one action of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub action: PlanAction,
    pub outcome: ActionOutcome,
}

/// Per-action outcomes of a plan, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub entries: Vec<ActionReport>,
}

impl ExecutionReport {
    /// Any action failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.outcome, ActionOutcome::Failed { .. }))
    }

    /// Any action was skipped.
    #[must_use]
    pub fn has_skips(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.outcome, ActionOutcome::Skipped(_)))
    }

    /// Nothing failed and nothing was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.has_failures() && !self.has_skips()
    }

    /// Mutations that the backend confirmed.
    #[must_use]
    pub fn applied_mutations(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.action.is_mutating() && e.outcome.is_applied())
            .count()
    }

    /// Failed actions with their messages.
    pub fn failures(&self) -> impl Iterator<Item = &ActionReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, ActionOutcome::Failed { .. }))
    }

    /// Outcome recorded for the action at plan position `index`.
    #[must_use]
    pub fn outcome_at(&self, index: usize) -> Option<&ActionOutcome> {
        self.entries.get(index).map(|e| &e.outcome)
    }

    /// One-line summary used in status conditions.
    #[must_use]
    pub fn summary(&self) -> String {
        let applied = self.entries.iter().filter(|e| e.outcome.is_applied()).count();
        let failed = self.failures().count();
        let skipped = self
            .entries
            .iter()
            .filter(|e| matches!(e.outcome, ActionOutcome::Skipped(_)))
            .count();
        let mut text = format!("{applied} applied, {failed} failed, {skipped} skipped");
        if let Some(first) = self.failures().next() {
            if let ActionOutcome::Failed { message, .. } = &first.outcome {
                text.push_str(&format!("; first failure: {}: {message}", first.action.description()));
            }
        }
        text
    }
}
