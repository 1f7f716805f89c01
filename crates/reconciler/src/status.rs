//! Status Reporter and status sinks.
//!
//! `ObservedStatus` is replaced as a whole. A sink either commits the full
//! object or keeps the previous one; readers never see a half-written status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shareform_core::{
    DesiredShareConfig, Error, ObservedStatus, Result, ShareIdentity, StatusCondition,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::inventory::InventorySnapshot;

/// Persistence collaborator for observed status, keyed by identity.
///
/// Single writer per identity, last write wins.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Current status, if any was ever committed.
    async fn load(&self, identity: &ShareIdentity) -> Result<Option<ObservedStatus>>;

    /// Replace the status of `identity` atomically.
    async fn commit(&self, identity: &ShareIdentity, status: ObservedStatus) -> Result<()>;

    /// Set only the condition, leaving live shares and the read timestamp
    /// as they are.
    async fn record_condition(
        &self,
        identity: &ShareIdentity,
        condition: StatusCondition,
    ) -> Result<()>;

    /// Drop the status of `identity`.
    async fn clear(&self, identity: &ShareIdentity) -> Result<()>;
}

/// In-memory status sink.
#[derive(Default)]
pub struct InMemoryStatusSink {
    statuses: RwLock<HashMap<ShareIdentity, ObservedStatus>>,
    commit_failures: Mutex<Vec<Error>>,
}

impl InMemoryStatusSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next commit with `error`, keeping the previous status.
    pub async fn fail_next_commit(&self, error: Error) {
        self.commit_failures.lock().await.push(error);
    }

    /// Current status without going through the trait.
    pub async fn get(&self, identity: &ShareIdentity) -> Option<ObservedStatus> {
        self.statuses.read().await.get(identity).cloned()
    }
}

#[async_trait]
impl StatusSink for InMemoryStatusSink {
    async fn load(&self, identity: &ShareIdentity) -> Result<Option<ObservedStatus>> {
        Ok(self.get(identity).await)
    }

    async fn commit(&self, identity: &ShareIdentity, status: ObservedStatus) -> Result<()> {
        if let Some(error) = self.commit_failures.lock().await.pop() {
            return Err(error);
        }
        self.statuses.write().await.insert(identity.clone(), status);
        Ok(())
    }

    async fn record_condition(
        &self,
        identity: &ShareIdentity,
        condition: StatusCondition,
    ) -> Result<()> {
        self.statuses
            .write()
            .await
            .entry(identity.clone())
            .or_default()
            .condition = Some(condition);
        Ok(())
    }

    async fn clear(&self, identity: &ShareIdentity) -> Result<()> {
        self.statuses.write().await.remove(identity);
        Ok(())
    }
}

/// Status sink that keeps one JSON document per identity under a root
/// directory: `<root>/<namespace>/<name>.status.json`.
///
/// Writes go to a sibling temp file first and are renamed into place.
pub struct JsonFileStatusSink {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStatusSink {
    /// Store statuses under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the status document for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` when the namespace or name is not a single
    /// plain path segment, so no identity can escape `root`.
    pub fn path_for(&self, identity: &ShareIdentity) -> Result<PathBuf> {
        let namespace = plain_segment("namespace", &identity.namespace)?;
        let name = plain_segment("name", &identity.name)?;
        Ok(self
            .root
            .join(namespace)
            .join(format!("{name}.status.json")))
    }

    async fn read_file(path: &Path) -> Result<Option<ObservedStatus>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::transient("load_status", e.to_string())),
        }
    }

    async fn write_file(path: &Path, status: &ObservedStatus) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(status)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::status_write_failed(dir, e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::status_write_failed(&tmp, e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::status_write_failed(path, e.to_string()))
    }
}

fn plain_segment<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::invalid(
            "status path",
            format!("identity {field} '{value}' is not a plain path segment"),
        ));
    }
    Ok(value)
}

#[async_trait]
impl StatusSink for JsonFileStatusSink {
    async fn load(&self, identity: &ShareIdentity) -> Result<Option<ObservedStatus>> {
        Self::read_file(&self.path_for(identity)?).await
    }

    async fn commit(&self, identity: &ShareIdentity, status: ObservedStatus) -> Result<()> {
        let path = self.path_for(identity)?;
        let _guard = self.write_lock.lock().await;
        Self::write_file(&path, &status).await
    }

    async fn record_condition(
        &self,
        identity: &ShareIdentity,
        condition: StatusCondition,
    ) -> Result<()> {
        let path = self.path_for(identity)?;
        let _guard = self.write_lock.lock().await;
        let mut status = Self::read_file(&path).await?.unwrap_or_default();
        status.condition = Some(condition);
        Self::write_file(&path, &status).await
    }

    async fn clear(&self, identity: &ShareIdentity) -> Result<()> {
        let path = self.path_for(identity)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::status_write_failed(path, e.to_string())),
        }
    }
}

/// Builds an `ObservedStatus` from a snapshot and commits it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReporter;

impl StatusReporter {
    /// Summarise `snapshot` for `identity` and commit it through `sink`.
    ///
    /// Names listed in `existingShares` that the snapshot does not contain
    /// are logged as drift; they never influence the status itself.
    ///
    /// # Errors
    ///
    /// Propagates the sink's commit error. The previous status stays in
    /// place in that case.
    pub async fn report(
        &self,
        sink: &dyn StatusSink,
        identity: &ShareIdentity,
        desired: &DesiredShareConfig,
        snapshot: &InventorySnapshot,
        condition: StatusCondition,
    ) -> Result<ObservedStatus> {
        for hint in &desired.existing_shares {
            if snapshot.named(hint).next().is_none() {
                warn!(%identity, share = %hint, "existingShares lists a share the backend does not report");
            }
        }

        let mut live_shares = snapshot
            .shares
            .iter()
            .filter(|share| share.state.is_live())
            .map(shareform_core::ObservedShare::reference)
            .collect::<Vec<_>>();
        live_shares.sort();

        let status = ObservedStatus {
            live_shares,
            recent_share_state: Some(snapshot.read_at),
            condition: Some(condition),
        };

        sink.commit(identity, status.clone()).await?;
        debug!(%identity, live = status.live_shares.len(), "Status committed");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use chrono::{DateTime, Utc};
    use shareform_core::{ObservedShare, PassPhase, ShareScope, ShareState};

    fn identity() -> ShareIdentity {
        ShareIdentity::new("ns", "fmt")
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn snapshot(shares: Vec<ObservedShare>) -> InventorySnapshot {
        InventorySnapshot {
            scope: ShareScope::new("ns", "fmt"),
            shares,
            read_at: at(100),
        }
    }

    fn converged() -> StatusCondition {
        StatusCondition::new(PassPhase::Converged, "ok", at(100))
    }

    #[tokio::test]
    async fn report_lists_only_live_shares() {
        let sink = InMemoryStatusSink::new();
        let snapshot = snapshot(vec![
            ObservedShare::new("b", "s1", ShareState::Creating, 2),
            ObservedShare::new("a", "s0", ShareState::Available, 1),
            ObservedShare::new("c", "s2", ShareState::Deleting, 3),
            ObservedShare::new("d", "s3", ShareState::Error, 4),
        ]);

        let status = StatusReporter
            .report(&sink, &identity(), &DesiredShareConfig::new("s1"), &snapshot, converged())
            .await
            .unwrap();

        let ids = status
            .live_shares
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(status.recent_share_state, Some(at(100)));
        assert_eq!(sink.get(&identity()).await, Some(status));
    }

    #[tokio::test]
    async fn failed_commit_keeps_previous_status() {
        let sink = InMemoryStatusSink::new();
        let first = StatusReporter
            .report(
                &sink,
                &identity(),
                &DesiredShareConfig::new("s1"),
                &snapshot(vec![ObservedShare::new("a", "s1", ShareState::Available, 1)]),
                converged(),
            )
            .await
            .unwrap();

        sink.fail_next_commit(Error::transient("commit_status", "busy"))
            .await;
        let second = StatusReporter
            .report(&sink, &identity(), &DesiredShareConfig::new("s1"), &snapshot(vec![]), converged())
            .await;

        assert!(second.is_err());
        assert_eq!(sink.get(&identity()).await, Some(first));
    }

    #[tokio::test]
    async fn record_condition_leaves_live_shares_untouched() {
        let sink = InMemoryStatusSink::new();
        let committed = StatusReporter
            .report(
                &sink,
                &identity(),
                &DesiredShareConfig::new("s1"),
                &snapshot(vec![ObservedShare::new("a", "s1", ShareState::Available, 1)]),
                converged(),
            )
            .await
            .unwrap();

        let failed = StatusCondition::new(PassPhase::Failed, "bad spec", at(200));
        sink.record_condition(&identity(), failed.clone()).await.unwrap();

        let status = sink.get(&identity()).await.unwrap();
        assert_eq!(status.live_shares, committed.live_shares);
        assert_eq!(status.recent_share_state, committed.recent_share_state);
        assert_eq!(status.condition, Some(failed));
    }

    #[tokio::test]
    async fn json_file_sink_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonFileStatusSink::new(dir.path());

        assert_eq!(sink.load(&identity()).await.unwrap(), None);

        let status = StatusReporter
            .report(
                &sink,
                &identity(),
                &DesiredShareConfig::new("s1"),
                &snapshot(vec![ObservedShare::new("a", "s1", ShareState::Available, 1)]),
                converged(),
            )
            .await
            .unwrap();

        assert_eq!(sink.load(&identity()).await.unwrap(), Some(status));
        let path = sink.path_for(&identity()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        sink.clear(&identity()).await.unwrap();
        assert_eq!(sink.load(&identity()).await.unwrap(), None);
        sink.clear(&identity()).await.unwrap();
    }

    /// Given identities whose parts are not plain path segments
    /// When committing through the file sink
    /// Then the write is rejected and nothing lands outside the root
    #[tokio::test]
    async fn json_file_sink_rejects_escaping_identities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("statuses");
        let sink = JsonFileStatusSink::new(&root);

        for identity in [
            ShareIdentity::new("..", "fmt"),
            ShareIdentity::new("ns", "../../escape"),
            ShareIdentity::new("ns/inner", "fmt"),
            ShareIdentity::new("", "fmt"),
        ] {
            let result = sink.commit(&identity, ObservedStatus::default()).await;
            assert!(
                matches!(result, Err(Error::Invalid { .. })),
                "{identity} was accepted"
            );
        }
        assert!(!dir.path().join("escape.status.json").exists());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn json_file_sink_records_condition_without_prior_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = JsonFileStatusSink::new(dir.path());
        let failed = StatusCondition::new(PassPhase::Failed, "bad spec", at(5));

        sink.record_condition(&identity(), failed.clone()).await.unwrap();

        let status = sink.load(&identity()).await.unwrap().unwrap();
        assert!(status.live_shares.is_empty());
        assert_eq!(status.condition, Some(failed));
    }
}
