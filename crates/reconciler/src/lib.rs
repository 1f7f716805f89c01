//! Level-triggered reconciliation of storage shares.
//!
//! This crate keeps the shares owned by a desired spec converged with that
//! spec, in the style of a Kubernetes controller:
//!
//! - **Desired spec**: which share should exist and how stale shares are treated
//! - **Inventory**: what the backend reports right now, read fresh every pass
//! - **Plan**: ordered create/delete/no-op actions closing the gap
//! - **Status**: a summary of what was observed, replaced as a whole
//!
//! # Passes
//!
//! Each [`Reconciler::reconcile`] call:
//! 1. Fetches the desired spec
//! 2. Reads the full inventory of the owner's scope
//! 3. Plans actions, deletes before creates
//! 4. Executes the plan, tolerating individual failures
//! 5. Re-reads the inventory and commits the observed status
//!
//! and returns `Done` or `RetryAfter`. Nothing is remembered between passes,
//! so re-running a pass at any frequency is safe.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shareform_core::{DesiredShareConfig, ShareIdentity};
//! use shareform_reconciler::{
//!     InMemoryDesiredSpecSource, InMemoryShareBackend, InMemoryStatusSink,
//!     ReconcilerBuilder, ShareController,
//! };
//!
//! #[tokio::main]
//! async fn main() -> shareform_core::Result<()> {
//!     let source = Arc::new(InMemoryDesiredSpecSource::new());
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_source(source.clone())
//!         .with_backend(Arc::new(InMemoryShareBackend::new()))
//!         .with_status_sink(Arc::new(InMemoryStatusSink::new()))
//!         .build()?;
//!
//!     let controller = ShareController::new(Arc::new(reconciler));
//!     let handle = controller.handle();
//!
//!     let identity = ShareIdentity::new("default", "nightly");
//!     source.put(identity.clone(), DesiredShareConfig::new("nightly-share")).await;
//!     handle.enqueue(identity)?;
//!
//!     // Run until stopped
//!     // controller.run().await
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod diff;
pub mod executor;
pub mod inventory;
pub mod r#loop;
pub mod reconciler;
pub mod source;
pub mod staleness;
pub mod status;
pub mod types;

// Re-export main types
pub use backend::{BackendCall, BackendOp, InMemoryShareBackend, ShareBackend, SharePage};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ReconcilerConfig;
pub use executor::{CancelHandle, CancelSignal, PlanExecutor};
pub use inventory::{InventoryReader, InventorySnapshot};
pub use r#loop::{ControllerHandle, ShareController};
pub use reconciler::{PassReport, ReconcileOutcome, Reconciler, ReconcilerBuilder};
pub use source::{DesiredSpecSource, InMemoryDesiredSpecSource};
pub use staleness::{Staleness, classify};
pub use status::{InMemoryStatusSink, JsonFileStatusSink, StatusReporter, StatusSink};
pub use types::{
    ActionKind, ActionOutcome, ActionReason, ActionReport, ExecutionReport, PlanAction,
    PlanTarget, ReconciliationPlan, SkipReason,
};
