//! Staleness Classifier.

use shareform_core::{ObservedShare, SharePolicy};

/// Whether a share predates the desired reference point under a policy
/// that replaces old shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Staleness {
    Stale,
    Current,
}

/// Classify `share` against the reference time and policy.
///
/// A share is stale iff the policy is `Replace`, a reference time exists,
/// and the share was created strictly before it. Missing reference time
/// means no share is ever stale.
#[must_use]
pub fn classify(
    share: &ObservedShare,
    reference_time_seconds: Option<i64>,
    policy: SharePolicy,
) -> Staleness {
    match (policy, reference_time_seconds) {
        (SharePolicy::Replace, Some(reference)) if share.created_at < reference => {
            Staleness::Stale
        }
        _ => Staleness::Current,
    }
}
