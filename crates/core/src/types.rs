//! Share data model.
//!
//! `DesiredShareConfig` is owned by the external spec store and is read-only
//! here. `ShareRecord` is what a backend hands back on the wire;
//! `ObservedShare` is the validated, closed form the planner works with.
//! `ObservedStatus` is the only durable state shared between passes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;
use crate::result::Result;

/// Key of a desired-spec object: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShareIdentity {
    pub namespace: String,
    pub name: String,
}

impl ShareIdentity {
    /// Create a new identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The ownership boundary this identity's shares live in.
    #[must_use]
    pub fn scope(&self) -> ShareScope {
        ShareScope {
            namespace: self.namespace.clone(),
            owner: self.name.clone(),
        }
    }
}

impl std::fmt::Display for ShareIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Namespace/owner boundary for listing shares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareScope {
    pub namespace: String,
    pub owner: String,
}

impl ShareScope {
    /// Create a new scope.
    pub fn new(namespace: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            owner: owner.into(),
        }
    }

    /// Whether a backend record belongs to this scope.
    #[must_use]
    pub fn contains(&self, record: &ShareRecord) -> bool {
        record.namespace == self.namespace && record.owner == self.owner
    }
}

impl std::fmt::Display for ShareScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.owner)
    }
}

/// Backend-assigned share identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(String);

impl ShareId {
    /// Wrap an identifier handed out by a backend.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh identifier, for backends that let the caller choose.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShareId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one reconciliation pass, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(Ulid);

impl PassId {
    /// Create a new random pass ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PassId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How stale shares already present are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SharePolicy {
    /// Stale shares are removed and recreated.
    Replace,
    /// Existing shares stay regardless of age.
    #[default]
    Allow,
}

impl std::fmt::Display for SharePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "Replace"),
            Self::Allow => write!(f, "Allow"),
        }
    }
}

/// Backend-reported lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareState {
    Available,
    Creating,
    Deleting,
    Error,
}

impl ShareState {
    /// Live shares are the ones a reader can use now or shortly.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Available | Self::Creating)
    }

    /// Stable wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Creating => "Creating",
            Self::Deleting => "Deleting",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for ShareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareState {
    type Err = Error;

    /// Backends differ in casing, so matching ignores it. Anything outside
    /// the four known states is rejected.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "creating" => Ok(Self::Creating),
            "deleting" => Ok(Self::Deleting),
            "error" => Ok(Self::Error),
            other => Err(Error::invalid(
                "backend response",
                format!("unknown share state '{other}'"),
            )),
        }
    }
}

/// Desired configuration for one share identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredShareConfig {
    /// Name of the canonical share instance.
    #[serde(alias = "share")]
    pub share_name: String,
    /// Staleness anchor in epoch seconds. Absent means nothing is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time_seconds: Option<i64>,
    #[serde(default)]
    pub share_policy: SharePolicy,
    /// Read-only pass when set; status is still refreshed.
    #[serde(default)]
    pub suspend: bool,
    /// Hints recorded at authoring time. Informational only.
    #[serde(default)]
    pub existing_shares: Vec<String>,
}

impl DesiredShareConfig {
    /// Create a config targeting `share_name` with conservative defaults.
    pub fn new(share_name: impl Into<String>) -> Self {
        Self {
            share_name: share_name.into(),
            ..Self::default()
        }
    }

    /// Set the staleness anchor.
    #[must_use]
    pub const fn with_creation_time(mut self, seconds: i64) -> Self {
        self.creation_time_seconds = Some(seconds);
        self
    }

    /// Set the stale-share policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: SharePolicy) -> Self {
        self.share_policy = policy;
        self
    }

    /// Set the suspend flag.
    #[must_use]
    pub const fn with_suspend(mut self, suspend: bool) -> Self {
        self.suspend = suspend;
        self
    }

    /// Set the existing-share hints.
    #[must_use]
    pub fn with_existing_shares(mut self, names: Vec<String>) -> Self {
        self.existing_shares = names;
        self
    }

    /// Check required fields.
    ///
    /// Any `creationTimeSeconds` is accepted, including instants before the
    /// epoch.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` when the share name is blank.
    pub fn validate(&self) -> Result<()> {
        if self.share_name.trim().is_empty() {
            return Err(Error::invalid("desired spec", "shareName must not be empty"));
        }
        Ok(())
    }
}

/// A share as a backend reports it, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub owner: String,
    pub state: String,
    /// Creation time in epoch seconds.
    pub created_at: i64,
}

/// A validated share from an inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedShare {
    pub id: ShareId,
    pub name: String,
    pub state: ShareState,
    /// Creation time in epoch seconds.
    pub created_at: i64,
}

impl ObservedShare {
    /// Create an observed share.
    pub fn new(id: impl Into<String>, name: impl Into<String>, state: ShareState, created_at: i64) -> Self {
        Self {
            id: ShareId::new(id),
            name: name.into(),
            state,
            created_at,
        }
    }

    /// Reference used in status.
    #[must_use]
    pub fn reference(&self) -> ShareRef {
        ShareRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

impl TryFrom<ShareRecord> for ObservedShare {
    type Error = Error;

    fn try_from(record: ShareRecord) -> Result<Self> {
        if record.id.trim().is_empty() {
            return Err(Error::invalid(
                "backend response",
                format!("share '{}' has an empty id", record.name),
            ));
        }
        let state = record.state.parse::<ShareState>()?;
        Ok(Self {
            id: ShareId::new(record.id),
            name: record.name,
            state,
            created_at: record.created_at,
        })
    }
}

/// Reference to a live share, as written into status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShareRef {
    pub id: ShareId,
    pub name: String,
}

/// Classification of the last pass, visible through the status sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassPhase {
    /// Nothing to do, nothing failed.
    Converged,
    /// Every planned mutation applied; waiting for confirmation.
    Progressing,
    /// Some actions failed or were skipped.
    Degraded,
    /// Read-only pass.
    Suspended,
    /// Terminal error; operator attention needed.
    Failed,
}

impl std::fmt::Display for PassPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "Converged"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Suspended => write!(f, "Suspended"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition attached to an observed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    pub phase: PassPhase,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl StatusCondition {
    /// Create a condition.
    pub fn new(phase: PassPhase, message: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            phase,
            message: message.into(),
            observed_at,
        }
    }
}

/// Durable observed-state summary for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    /// Live shares as of the last successful pass.
    #[serde(default, alias = "ok")]
    pub live_shares: Vec<ShareRef>,
    /// Time of the last successful inventory read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_share_state: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StatusCondition>,
}
