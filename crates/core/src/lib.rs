//! Core types and errors for shareform.
//!
//! This crate has no I/O. It defines the share data model shared by
//! backends, status sinks and the reconciler, plus the error taxonomy every
//! component reports through.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod result;
pub mod types;

pub use error::{Error, ErrorClass};
pub use result::{Result, ResultExt};
pub use types::{
    DesiredShareConfig, ObservedShare, ObservedStatus, PassId, PassPhase, ShareId,
    ShareIdentity, SharePolicy, ShareRecord, ShareRef, ShareScope, ShareState,
    StatusCondition,
};
