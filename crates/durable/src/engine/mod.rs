//! Workflow engine
//!
//! The engine module provides the [`Client`] used to start and cancel runs,
//! the [`Registry`] of implementations served by workers, and the internal
//! dispatch machinery that enforces activity timeouts and forwards
//! cancellation.

mod client;
mod executor;
mod registry;
mod task_list;

pub use client::{Client, EngineError, StartWorkflowOptions};
pub(crate) use executor::Engine;
pub use registry::{Registry, RegistryError};
pub(crate) use task_list::{ActivityTask, TaskList, WorkflowTask};
