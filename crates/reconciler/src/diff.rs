//! Diff Engine: desired spec + inventory snapshot -> ordered plan.
//!
//! Pure and deterministic. The input order of `observed` does not matter;
//! shares are sorted by `(name, created_at, id)` before planning, so the
//! same inputs always yield the same plan.

use std::collections::HashMap;

use itertools::Itertools;
use shareform_core::{DesiredShareConfig, ObservedShare, ShareState};

use crate::staleness::{Staleness, classify};
use crate::types::{ActionReason, PlanAction, ReconciliationPlan};

/// Compute the plan that converges `observed` towards `desired`.
///
/// - Suspended specs get one `NoOp` per observed share and nothing else.
/// - Per name, the most recently created share that is not already being
///   deleted is the live candidate. Every other one is deleted as a
///   duplicate, whatever its age, but only when a reference time exists;
///   without one, duplicates are left alone.
/// - Candidates classified stale are deleted.
/// - The target name gets a `Create` when no current candidate carries it.
///
/// The result lists deletes first, then the create, then the no-ops.
#[must_use]
pub fn plan(desired: &DesiredShareConfig, observed: &[ObservedShare]) -> ReconciliationPlan {
    let ordered = observed
        .iter()
        .sorted_by(|a, b| {
            (a.name.as_str(), a.created_at, &a.id).cmp(&(b.name.as_str(), b.created_at, &b.id))
        })
        .collect_vec();

    if desired.suspend {
        return ReconciliationPlan::new(
            ordered
                .into_iter()
                .map(|share| PlanAction::noop(share.clone(), ActionReason::Suspended))
                .collect(),
        );
    }

    let candidates = live_candidates(&ordered);

    let mut deletes = Vec::new();
    let mut noops = Vec::new();
    let mut target_is_current = false;

    for share in ordered {
        if share.state == ShareState::Deleting {
            noops.push(PlanAction::noop(share.clone(), ActionReason::DeletionInProgress));
            continue;
        }

        let is_candidate = candidates
            .get(share.name.as_str())
            .is_some_and(|candidate| candidate.id == share.id);
        if !is_candidate {
            if desired.creation_time_seconds.is_some() {
                deletes.push(PlanAction::delete(share.clone(), ActionReason::DuplicateName));
            } else {
                noops.push(PlanAction::noop(share.clone(), ActionReason::DuplicateUnanchored));
            }
            continue;
        }

        match classify(share, desired.creation_time_seconds, desired.share_policy) {
            Staleness::Stale => {
                deletes.push(PlanAction::delete(
                    share.clone(),
                    ActionReason::Stale(desired.share_policy),
                ));
            }
            Staleness::Current => {
                if share.name == desired.share_name {
                    target_is_current = true;
                }
                noops.push(PlanAction::noop(share.clone(), ActionReason::Current));
            }
        }
    }

    let mut actions = deletes;
    if !target_is_current {
        actions.push(PlanAction::create(
            desired.share_name.clone(),
            ActionReason::MissingTarget,
        ));
    }
    actions.extend(noops);

    ReconciliationPlan::new(actions)
}

/// Newest share per name among those not already being deleted. Ties on
/// creation time go to the larger id.
fn live_candidates<'a>(ordered: &[&'a ObservedShare]) -> HashMap<&'a str, &'a ObservedShare> {
    ordered
        .iter()
        .copied()
        .filter(|share| share.state != ShareState::Deleting)
        .map(|share| (share.name.as_str(), share))
        .into_group_map()
        .into_iter()
        .filter_map(|(name, group)| {
            group
                .into_iter()
                .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
                .map(|newest| (name, newest))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionKind, PlanTarget};
    use shareform_core::SharePolicy;

    fn share(id: &str, name: &str, created_at: i64) -> ObservedShare {
        ObservedShare::new(id, name, ShareState::Available, created_at)
    }

    fn kinds(plan: &ReconciliationPlan) -> Vec<ActionKind> {
        plan.actions().iter().map(|a| a.kind).collect()
    }

    /// Given a stale target share under Replace
    /// When planning
    /// Then it is deleted and recreated, delete first
    #[test]
    fn stale_target_is_replaced() {
        let desired = DesiredShareConfig::new("s1")
            .with_creation_time(1000)
            .with_policy(SharePolicy::Replace);
        let plan = plan(&desired, &[share("s1", "s1", 500)]);

        assert_eq!(kinds(&plan), vec![ActionKind::Delete, ActionKind::Create]);
        let reasons = plan
            .actions()
            .iter()
            .map(|a| a.reason.to_string())
            .collect_vec();
        assert_eq!(reasons, vec!["stale per policy Replace", "missing target"]);
    }

    #[test]
    fn allow_policy_keeps_old_share() {
        let desired = DesiredShareConfig::new("s1")
            .with_creation_time(1000)
            .with_policy(SharePolicy::Allow);
        let plan = plan(&desired, &[share("s1", "s1", 500)]);

        assert_eq!(kinds(&plan), vec![ActionKind::NoOp]);
    }

    #[test]
    fn missing_target_is_created() {
        let desired = DesiredShareConfig::new("s1");
        let plan = plan(&desired, &[]);

        assert_eq!(kinds(&plan), vec![ActionKind::Create]);
        assert_eq!(
            plan.actions().first().map(|a| a.target.clone()),
            Some(PlanTarget::Desired {
                share_name: "s1".into()
            })
        );
    }

    #[test]
    fn suspended_plan_is_all_noops() {
        let desired = DesiredShareConfig::new("s1")
            .with_creation_time(1000)
            .with_policy(SharePolicy::Replace)
            .with_suspend(true);
        let plan = plan(&desired, &[share("a", "s1", 1), share("b", "s1", 2)]);

        assert_eq!(kinds(&plan), vec![ActionKind::NoOp, ActionKind::NoOp]);
        assert!(
            plan.actions()
                .iter()
                .all(|a| a.reason == ActionReason::Suspended)
        );
    }

    #[test]
    fn suspended_with_empty_inventory_creates_nothing() {
        let desired = DesiredShareConfig::new("s1").with_suspend(true);
        assert!(plan(&desired, &[]).is_empty());
    }

    /// Given two current shares with the target name and a reference time
    /// When planning
    /// Then the older one is deleted as a duplicate and the newer one kept
    #[test]
    fn duplicates_keep_newest() {
        let desired = DesiredShareConfig::new("s1").with_creation_time(5);
        let plan = plan(&desired, &[share("new", "s1", 20), share("old", "s1", 10)]);

        assert_eq!(kinds(&plan), vec![ActionKind::Delete, ActionKind::NoOp]);
        let first = plan.actions().first();
        assert_eq!(first.map(|a| a.reason), Some(ActionReason::DuplicateName));
        assert_eq!(
            first.and_then(|a| a.target.observed()).map(|s| s.id.as_str()),
            Some("old")
        );
    }

    /// Given duplicate names and no reference time
    /// When planning
    /// Then nothing is deleted and the older duplicate is only flagged
    #[test]
    fn duplicates_without_reference_time_are_kept() {
        let desired = DesiredShareConfig::new("s1").with_policy(SharePolicy::Allow);
        let plan = plan(&desired, &[share("a", "s1", 10), share("b", "s1", 20)]);

        assert_eq!(kinds(&plan), vec![ActionKind::NoOp, ActionKind::NoOp]);
        let reasons = plan.actions().iter().map(|a| a.reason).collect_vec();
        assert_eq!(
            reasons,
            vec![ActionReason::DuplicateUnanchored, ActionReason::Current]
        );
    }

    #[test]
    fn stale_duplicates_are_all_deleted_then_recreated() {
        let desired = DesiredShareConfig::new("s1")
            .with_creation_time(1000)
            .with_policy(SharePolicy::Replace);
        let plan = plan(&desired, &[share("a", "s1", 10), share("b", "s1", 20)]);

        assert_eq!(
            kinds(&plan),
            vec![ActionKind::Delete, ActionKind::Delete, ActionKind::Create]
        );
    }

    #[test]
    fn deleting_share_is_left_alone_and_not_counted_as_target() {
        let desired = DesiredShareConfig::new("s1");
        let deleting = ObservedShare::new("a", "s1", ShareState::Deleting, 10);
        let plan = plan(&desired, &[deleting]);

        assert_eq!(kinds(&plan), vec![ActionKind::Create, ActionKind::NoOp]);
        assert_eq!(
            plan.actions().get(1).map(|a| a.reason),
            Some(ActionReason::DeletionInProgress)
        );
    }

    #[test]
    fn stale_non_target_shares_are_deleted() {
        let desired = DesiredShareConfig::new("s1")
            .with_creation_time(1000)
            .with_policy(SharePolicy::Replace);
        let plan = plan(&desired, &[share("x", "legacy", 5), share("s1", "s1", 2000)]);

        assert_eq!(kinds(&plan), vec![ActionKind::Delete, ActionKind::NoOp]);
        assert_eq!(plan.actions().first().map(|a| a.target.name()), Some("legacy"));
    }

    #[test]
    fn input_order_does_not_change_plan() {
        let desired = DesiredShareConfig::new("s1")
            .with_creation_time(1000)
            .with_policy(SharePolicy::Replace);
        let shares = vec![share("a", "s1", 10), share("b", "s2", 2000), share("c", "s1", 3000)];
        let mut reversed = shares.clone();
        reversed.reverse();

        assert_eq!(plan(&desired, &shares), plan(&desired, &reversed));
    }
}
