//! Desired-spec source.

use std::collections::HashMap;

use async_trait::async_trait;
use shareform_core::{DesiredShareConfig, Error, Result, ShareIdentity};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

/// Where desired specs come from. Each call returns a fresh read.
#[async_trait]
pub trait DesiredSpecSource: Send + Sync {
    /// Current desired spec of `identity`.
    ///
    /// Returns `Error::NotFound` once the spec has been deleted.
    async fn fetch(&self, identity: &ShareIdentity) -> Result<DesiredShareConfig>;
}

/// In-memory spec store that announces every change on a channel.
#[derive(Default)]
pub struct InMemoryDesiredSpecSource {
    specs: RwLock<HashMap<ShareIdentity, DesiredShareConfig>>,
    notifier: Option<mpsc::UnboundedSender<ShareIdentity>>,
}

impl InMemoryDesiredSpecSource {
    /// Create an empty store with no change notifications.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce changed identities on `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<ShareIdentity>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Create or replace the spec of `identity`.
    pub async fn put(&self, identity: ShareIdentity, spec: DesiredShareConfig) {
        self.specs.write().await.insert(identity.clone(), spec);
        self.notify(identity);
    }

    /// Edit the spec of `identity` in place. Returns false when absent.
    pub async fn modify<F>(&self, identity: &ShareIdentity, f: F) -> bool
    where
        F: FnOnce(&mut DesiredShareConfig),
    {
        let found = {
            let mut specs = self.specs.write().await;
            specs.get_mut(identity).map(f).is_some()
        };
        if found {
            self.notify(identity.clone());
        }
        found
    }

    /// Delete the spec of `identity`.
    pub async fn remove(&self, identity: &ShareIdentity) {
        self.specs.write().await.remove(identity);
        self.notify(identity.clone());
    }

    fn notify(&self, identity: ShareIdentity) {
        if let Some(tx) = &self.notifier {
            if tx.send(identity).is_err() {
                debug!("Spec change listener is gone");
            }
        }
    }
}

#[async_trait]
impl DesiredSpecSource for InMemoryDesiredSpecSource {
    async fn fetch(&self, identity: &ShareIdentity) -> Result<DesiredShareConfig> {
        self.specs
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("desired spec {identity}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given a store wired to a notifier
    /// When a spec is put, modified and removed
    /// Then every change is announced and fetch reflects it
    #[tokio::test]
    async fn changes_are_announced_and_visible() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = InMemoryDesiredSpecSource::new().with_notifier(tx);
        let identity = ShareIdentity::new("ns", "fmt");

        source
            .put(identity.clone(), DesiredShareConfig::new("s1"))
            .await;
        assert_eq!(rx.recv().await, Some(identity.clone()));

        assert!(source.modify(&identity, |spec| spec.suspend = true).await);
        assert_eq!(rx.recv().await, Some(identity.clone()));
        assert_eq!(source.fetch(&identity).await.map(|s| s.suspend), Ok(true));

        source.remove(&identity).await;
        assert_eq!(rx.recv().await, Some(identity.clone()));
        assert!(matches!(
            source.fetch(&identity).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn modify_missing_spec_is_a_no_op() {
        let source = InMemoryDesiredSpecSource::new();
        let identity = ShareIdentity::new("ns", "missing");
        assert!(!source.modify(&identity, |spec| spec.suspend = true).await);
    }
}
