//! Inventory Reader: point-in-time snapshot of the shares in a scope.
//!
//! No caching. Every pass reads again, and a listing either yields every page
//! or fails as a whole.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use shareform_core::{Error, ObservedShare, Result, ShareScope};
use tracing::{debug, warn};

use crate::backend::{ShareBackend, call_with_timeout};
use crate::clock::Clock;

/// Shares observed in one scope at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub scope: ShareScope,
    pub shares: Vec<ObservedShare>,
    /// When the last page was received.
    pub read_at: DateTime<Utc>,
}

impl InventorySnapshot {
    /// Shares whose name is `name`.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ObservedShare> + 'a {
        self.shares.iter().filter(move |share| share.name == name)
    }
}

/// Reads the inventory of a scope through a backend handle.
#[derive(Debug, Clone, Copy)]
pub struct InventoryReader {
    call_timeout: Duration,
    max_pages: usize,
}

impl InventoryReader {
    /// Create a reader with a per-page deadline and a page cap.
    #[must_use]
    pub const fn new(call_timeout: Duration, max_pages: usize) -> Self {
        Self {
            call_timeout,
            max_pages,
        }
    }

    /// List every share in `scope`.
    ///
    /// Records outside `scope` are dropped with a warning. Records with an
    /// unknown state make the whole read fail.
    ///
    /// # Errors
    ///
    /// - `Transient` on timeout, backend failure mid-listing, or when the
    ///   listing shifted under us (an id seen on two pages)
    /// - `NotFound` when the scope itself is gone
    /// - `Invalid` on an unparseable record or a runaway page chain
    pub async fn list_shares(
        &self,
        backend: &dyn ShareBackend,
        scope: &ShareScope,
        clock: &dyn Clock,
    ) -> Result<InventorySnapshot> {
        let mut shares = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0_usize;

        loop {
            if pages >= self.max_pages {
                return Err(Error::invalid(
                    "backend response",
                    format!("share listing exceeded {} pages", self.max_pages),
                ));
            }
            pages = pages.saturating_add(1);

            let page = call_with_timeout(
                "list_shares",
                self.call_timeout,
                backend.list_shares(scope, page_token.as_deref()),
            )
            .await?;

            for record in page.records {
                if !scope.contains(&record) {
                    warn!(
                        %scope,
                        share_id = %record.id,
                        record_namespace = %record.namespace,
                        record_owner = %record.owner,
                        "Backend returned a share outside the requested scope, ignoring it"
                    );
                    continue;
                }
                let share = ObservedShare::try_from(record)?;
                if !seen.insert(share.id.clone()) {
                    return Err(Error::transient(
                        "list_shares",
                        format!("share {} appeared twice while paging", share.id),
                    ));
                }
                shares.push(share);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(%scope, shares = shares.len(), pages, "Inventory read");

        Ok(InventorySnapshot {
            scope: scope.clone(),
            shares,
            read_at: clock.now(),
        })
    }
}
