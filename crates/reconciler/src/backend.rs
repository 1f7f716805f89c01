//! Remote storage backend capability.
//!
//! The reconciler never reaches for a global client: every component takes a
//! `&dyn ShareBackend` handle for the duration of one call.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shareform_core::{Error, Result, ShareId, ShareRecord, ShareScope, ShareState};
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// One page of a share listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharePage {
    pub records: Vec<ShareRecord>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Operations the reconciler needs from a storage backend.
///
/// Each call either succeeds or returns a typed failure; provisioning and
/// deprovisioning are atomic from the caller's point of view.
#[async_trait]
pub trait ShareBackend: Send + Sync {
    /// List one page of shares inside `scope`.
    async fn list_shares(&self, scope: &ShareScope, page_token: Option<&str>) -> Result<SharePage>;

    /// Provision a share named `name` inside `scope`.
    async fn create_share(&self, scope: &ShareScope, name: &str) -> Result<ShareRecord>;

    /// Deprovision the share `id` inside `scope`.
    async fn delete_share(&self, scope: &ShareScope, id: &ShareId) -> Result<()>;
}

/// Run one backend call under a deadline. Elapsed deadlines are transient.
pub(crate) async fn call_with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::transient(
            operation,
            format!("timed out after {}ms", limit.as_millis()),
        )),
    }
}

/// Backend operation kinds, for fault injection and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    List,
    Create,
    Delete,
}

/// A call observed by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    List { scope: ShareScope, page_token: Option<String> },
    Create { scope: ShareScope, name: String },
    Delete { scope: ShareScope, id: ShareId },
}

struct InjectedFault {
    op: BackendOp,
    /// Calls of `op` that still succeed before this fault fires.
    skip: usize,
    error: Error,
}

#[derive(Default)]
struct Inner {
    shares: Vec<ShareRecord>,
    missing_scopes: HashSet<ShareScope>,
    faults: Vec<InjectedFault>,
    calls: Vec<BackendCall>,
    latency: HashMap<BackendOp, Duration>,
}

impl Inner {
    /// Pop the fault due for this call of `op`, counting down the others.
    fn take_fault(&mut self, op: BackendOp) -> Option<Error> {
        let due = self
            .faults
            .iter()
            .position(|fault| fault.op == op && fault.skip == 0);
        for fault in self.faults.iter_mut().filter(|f| f.op == op && f.skip > 0) {
            fault.skip = fault.skip.saturating_sub(1);
        }
        due.map(|index| self.faults.remove(index).error)
    }
}

/// In-memory backend for tests and local runs.
///
/// Enforces name uniqueness among live shares of a scope, pages listings,
/// and can inject failures and latency per operation.
pub struct InMemoryShareBackend {
    inner: RwLock<Inner>,
    page_size: usize,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryShareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryShareBackend {
    /// Create an empty backend with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            page_size: 50,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for creation timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Page listings with `page_size` records per page (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Seed a raw record, bypassing validation.
    pub async fn insert(&self, record: ShareRecord) {
        self.inner.write().await.shares.push(record);
    }

    /// Seed a well-formed share in `scope`.
    pub async fn seed(
        &self,
        scope: &ShareScope,
        id: &str,
        name: &str,
        state: ShareState,
        created_at: i64,
    ) {
        self.insert(ShareRecord {
            id: id.to_string(),
            name: name.to_string(),
            namespace: scope.namespace.clone(),
            owner: scope.owner.clone(),
            state: state.as_str().to_string(),
            created_at,
        })
        .await;
    }

    /// Make listings of `scope` fail with `NotFound`.
    pub async fn remove_scope(&self, scope: &ShareScope) {
        self.inner.write().await.missing_scopes.insert(scope.clone());
    }

    /// Fail the next call of `op` with `error`.
    pub async fn fail_next(&self, op: BackendOp, error: Error) {
        self.fail_nth(op, 0, error).await;
    }

    /// Let `skip` calls of `op` succeed, then fail the following one.
    pub async fn fail_nth(&self, op: BackendOp, skip: usize, error: Error) {
        self.inner
            .write()
            .await
            .faults
            .push(InjectedFault { op, skip, error });
    }

    /// Delay every call of `op` by `delay`.
    pub async fn set_latency(&self, op: BackendOp, delay: Duration) {
        self.inner.write().await.latency.insert(op, delay);
    }

    /// Snapshot of every record currently held, all scopes.
    pub async fn records(&self) -> Vec<ShareRecord> {
        self.inner.read().await.shares.clone()
    }

    /// Calls received so far, in order.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.inner.read().await.calls.clone()
    }

    /// Number of create/delete calls received so far.
    pub async fn mutation_count(&self) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|call| !matches!(call, BackendCall::List { .. }))
            .count()
    }

    async fn simulate_latency(&self, op: BackendOp) {
        let delay = self.inner.read().await.latency.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ShareBackend for InMemoryShareBackend {
    async fn list_shares(&self, scope: &ShareScope, page_token: Option<&str>) -> Result<SharePage> {
        self.simulate_latency(BackendOp::List).await;
        let mut inner = self.inner.write().await;
        inner.calls.push(BackendCall::List {
            scope: scope.clone(),
            page_token: page_token.map(str::to_string),
        });
        if let Some(error) = inner.take_fault(BackendOp::List) {
            return Err(error);
        }
        if inner.missing_scopes.contains(scope) {
            return Err(Error::not_found(format!("scope {scope}")));
        }

        let offset = match page_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                Error::invalid("page token", format!("'{token}' is not an offset"))
            })?,
        };

        // Listing is namespace-wide; owner filtering is the caller's job.
        let visible = inner
            .shares
            .iter()
            .filter(|record| record.namespace == scope.namespace)
            .cloned()
            .collect::<Vec<_>>();
        let records = visible
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect::<Vec<_>>();
        let next = offset.saturating_add(records.len());
        let next_page_token = (next < visible.len()).then(|| next.to_string());

        Ok(SharePage {
            records,
            next_page_token,
        })
    }

    async fn create_share(&self, scope: &ShareScope, name: &str) -> Result<ShareRecord> {
        self.simulate_latency(BackendOp::Create).await;
        let mut inner = self.inner.write().await;
        inner.calls.push(BackendCall::Create {
            scope: scope.clone(),
            name: name.to_string(),
        });
        if let Some(error) = inner.take_fault(BackendOp::Create) {
            return Err(error);
        }
        if inner.missing_scopes.contains(scope) {
            return Err(Error::not_found(format!("scope {scope}")));
        }

        let taken = inner.shares.iter().any(|record| {
            scope.contains(record)
                && record.name == name
                && record
                    .state
                    .parse::<ShareState>()
                    .map_or(true, ShareState::is_live)
        });
        if taken {
            return Err(Error::conflict(name, "a live share with this name exists"));
        }

        let record = ShareRecord {
            id: ShareId::generate().to_string(),
            name: name.to_string(),
            namespace: scope.namespace.clone(),
            owner: scope.owner.clone(),
            state: ShareState::Available.as_str().to_string(),
            created_at: self.clock.now().timestamp(),
        };
        debug!(share_id = %record.id, name, "in-memory share created");
        inner.shares.push(record.clone());
        Ok(record)
    }

    async fn delete_share(&self, scope: &ShareScope, id: &ShareId) -> Result<()> {
        self.simulate_latency(BackendOp::Delete).await;
        let mut inner = self.inner.write().await;
        inner.calls.push(BackendCall::Delete {
            scope: scope.clone(),
            id: id.clone(),
        });
        if let Some(error) = inner.take_fault(BackendOp::Delete) {
            return Err(error);
        }

        let position = inner
            .shares
            .iter()
            .position(|record| scope.contains(record) && record.id == id.as_str());
        match position {
            Some(index) => {
                inner.shares.remove(index);
                debug!(share_id = %id, "in-memory share deleted");
                Ok(())
            }
            None => Err(Error::not_found(format!("share {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    fn scope() -> ShareScope {
        ShareScope::new("ns", "fmt")
    }

    #[tokio::test]
    async fn create_rejects_duplicate_live_name() {
        let backend = InMemoryShareBackend::new();
        backend
            .seed(&scope(), "a", "s1", ShareState::Available, 10)
            .await;

        let result = backend.create_share(&scope(), "s1").await;
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[tokio::test]
    async fn create_allowed_when_existing_is_deleting() {
        let backend = InMemoryShareBackend::new();
        backend
            .seed(&scope(), "a", "s1", ShareState::Deleting, 10)
            .await;

        assert!(backend.create_share(&scope(), "s1").await.is_ok());
    }

    #[tokio::test]
    async fn listing_is_paged() {
        let backend = InMemoryShareBackend::new().with_page_size(2);
        for i in 0..3 {
            backend
                .seed(&scope(), &format!("id{i}"), "s1", ShareState::Available, i)
                .await;
        }

        let first = backend.list_shares(&scope(), None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));

        let second = backend
            .list_shares(&scope(), first.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn fail_nth_skips_earlier_calls() {
        let backend = InMemoryShareBackend::new();
        backend
            .fail_nth(BackendOp::List, 1, Error::transient("list_shares", "boom"))
            .await;

        assert!(backend.list_shares(&scope(), None).await.is_ok());
        assert!(backend.list_shares(&scope(), None).await.is_err());
        assert!(backend.list_shares(&scope(), None).await.is_ok());
    }

    #[tokio::test]
    async fn delete_unknown_share_is_not_found() {
        let backend = InMemoryShareBackend::new();
        let result = backend.delete_share(&scope(), &ShareId::new("nope")).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn call_with_timeout_reports_transient() {
        let result: Result<()> = call_with_timeout("list_shares", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Transient { .. })));
    }
}
