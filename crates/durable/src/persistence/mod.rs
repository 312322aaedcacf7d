//! Persistence layer for workflow runs
//!
//! This module provides:
//! - [`RunStore`] trait for run records and their append-only history
//! - [`InMemoryRunStore`] backing the engine in a single process

mod memory;
mod store;

pub use memory::InMemoryRunStore;
pub use store::{
    NewRun, PendingActivity, PendingActivityState, RunFilter, RunRecord, RunStore, StoreError,
    WorkflowStatus,
};
