//! Workflow abstractions and types
//!
//! This module contains the core workflow primitives:
//! - [`Workflow`] trait for defining async workflow bodies
//! - [`WorkflowContext`] for scheduling activities and observing cancellation
//! - [`with_cleanup`] for cleanup that survives cancellation
//! - [`WorkflowEvent`] enum for run history

mod cleanup;
mod context;
mod definition;
mod event;
mod options;

pub(crate) use cleanup::panic_message;
pub use cleanup::with_cleanup;
pub use context::{TraceContext, WorkflowContext, WorkflowExecution, WorkflowInfo};
pub use definition::{Workflow, WorkflowError};
pub use event::{HistoryEvent, TimeoutType, WorkflowEvent};
pub use options::ActivityOptions;
pub(crate) use options::millis;
