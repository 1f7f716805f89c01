//! Property-based tests for the planner using proptest.
//!
//! Properties verified:
//! - Planning is deterministic for the same inputs
//! - No creation time means no deletes at all
//! - The Allow policy never classifies a share as stale
//! - Deletes precede the create of the same name
//! - Suspended specs only produce no-ops

use proptest::prelude::*;
use shareform_core::{DesiredShareConfig, ObservedShare, SharePolicy, ShareState};
use shareform_reconciler::{ActionKind, Staleness, classify, diff::plan};

fn arb_state() -> impl Strategy<Value = ShareState> {
    prop_oneof![
        Just(ShareState::Available),
        Just(ShareState::Creating),
        Just(ShareState::Deleting),
        Just(ShareState::Error),
    ]
}

fn arb_policy() -> impl Strategy<Value = SharePolicy> {
    prop_oneof![Just(SharePolicy::Replace), Just(SharePolicy::Allow)]
}

fn arb_name() -> impl Strategy<Value = String> {
    prop_oneof![Just("s1"), Just("s2"), Just("legacy")].prop_map(str::to_string)
}

/// Inventories with unique ids, as the reader guarantees.
fn arb_inventory() -> impl Strategy<Value = Vec<ObservedShare>> {
    prop::collection::vec((arb_name(), arb_state(), 0_i64..3_000), 0..8).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (name, state, created_at))| {
                ObservedShare::new(format!("id-{i}"), name, state, created_at)
            })
            .collect()
    })
}

fn arb_desired() -> impl Strategy<Value = DesiredShareConfig> {
    (
        arb_name(),
        prop::option::of(0_i64..3_000),
        arb_policy(),
        any::<bool>(),
    )
        .prop_map(|(name, creation_time, policy, suspend)| {
            let desired = DesiredShareConfig::new(name)
                .with_policy(policy)
                .with_suspend(suspend);
            match creation_time {
                Some(seconds) => desired.with_creation_time(seconds),
                None => desired,
            }
        })
}

// ==========================================================================
// PROPERTY: Determinism
// ==========================================================================

proptest! {
    /// Property: planning twice, and planning a shuffled inventory, gives the
    /// same plan.
    #[test]
    fn prop_plan_is_deterministic(desired in arb_desired(), observed in arb_inventory()) {
        let first = plan(&desired, &observed);
        let second = plan(&desired, &observed);
        prop_assert_eq!(&first, &second);

        let mut reversed = observed.clone();
        reversed.reverse();
        prop_assert_eq!(&first, &plan(&desired, &reversed));
    }
}

// ==========================================================================
// PROPERTY: Safety default
// ==========================================================================

proptest! {
    /// Property: without a creation time no delete of any kind is planned,
    /// duplicates included.
    #[test]
    fn prop_no_reference_time_never_deletes(
        desired in arb_desired(),
        observed in arb_inventory(),
    ) {
        let desired = DesiredShareConfig { creation_time_seconds: None, ..desired };
        let result = plan(&desired, &observed);

        for action in result.actions() {
            prop_assert!(
                action.kind != ActionKind::Delete,
                "unexpected delete: {}",
                action.description()
            );
        }
    }
}

// ==========================================================================
// PROPERTY: Policy gating
// ==========================================================================

proptest! {
    /// Property: Allow never yields Stale, whatever the timestamps.
    #[test]
    fn prop_allow_policy_is_always_current(
        created_at in any::<i64>(),
        reference in prop::option::of(any::<i64>()),
        state in arb_state(),
    ) {
        let share = ObservedShare::new("id", "s1", state, created_at);
        prop_assert_eq!(classify(&share, reference, SharePolicy::Allow), Staleness::Current);
    }
}

// ==========================================================================
// PROPERTY: Ordering
// ==========================================================================

proptest! {
    /// Property: every delete of a name comes before a create of that name.
    #[test]
    fn prop_delete_precedes_create_of_same_name(
        desired in arb_desired(),
        observed in arb_inventory(),
    ) {
        let result = plan(&desired, &observed);
        let actions = result.actions();

        let create_at = actions.iter().position(|a| a.kind == ActionKind::Create);
        if let Some(create_at) = create_at {
            let create_name = actions.get(create_at).map(|a| a.target.name().to_string());
            for (index, action) in actions.iter().enumerate() {
                if action.kind == ActionKind::Delete
                    && Some(action.target.name().to_string()) == create_name
                {
                    prop_assert!(index < create_at);
                }
            }
        }
    }
}

// ==========================================================================
// PROPERTY: Suspend
// ==========================================================================

proptest! {
    /// Property: suspended specs only plan no-ops, one per observed share.
    #[test]
    fn prop_suspended_plan_is_noop_only(desired in arb_desired(), observed in arb_inventory()) {
        let desired = desired.with_suspend(true);
        let result = plan(&desired, &observed);

        prop_assert!(result.is_noop_only());
        prop_assert_eq!(result.len(), observed.len());
    }
}
