//! # Cancelflow Durable Engine
//!
//! An in-process workflow engine for long-running, cancellable work.
//!
//! ## Features
//!
//! - **Async workflows**: workflow bodies are plain async functions that schedule activities
//! - **Heartbeats**: activities report liveness and are timed out when they stop
//! - **Cancellation propagation**: cancelling a run cancels every activity it is waiting on
//! - **Detached cleanup**: [`with_cleanup`] runs cleanup on a context the run's cancellation cannot reach
//! - **Run history**: every step is recorded as an append-only event
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Client                              │
//! │  (starts, cancels and inspects runs)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  (task lists, activity dispatch, timeouts, RunStore)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Worker                              │
//! │  (runs workflow bodies and activities from one task list)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use cancelflow_durable::prelude::*;
//!
//! struct MyWorkflow;
//!
//! #[async_trait]
//! impl Workflow for MyWorkflow {
//!     const TYPE: &'static str = "my_workflow";
//!     type Input = MyInput;
//!     type Output = MyOutput;
//!
//!     async fn run(&self, ctx: WorkflowContext, input: MyInput) -> Result<MyOutput, WorkflowError> {
//!         let ctx = ctx.with_activity_options(
//!             ActivityOptions::default().with_heartbeat(Duration::from_secs(10)),
//!         );
//!         with_cleanup(
//!             &ctx,
//!             async { ctx.execute_activity::<MyActivity>(input.step).await },
//!             |cleanup_ctx| async move {
//!                 cleanup_ctx.execute_activity::<MyCleanup>(()).await?;
//!                 Ok(())
//!             },
//!         )
//!         .await
//!     }
//! }
//! ```

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError, HeartbeatError};
    pub use crate::engine::{Client, EngineError, Registry, StartWorkflowOptions};
    pub use crate::persistence::{InMemoryRunStore, RunFilter, RunRecord, RunStore, WorkflowStatus};
    pub use crate::worker::{Worker, WorkerConfig, WorkerError};
    pub use crate::workflow::{
        with_cleanup, ActivityOptions, TimeoutType, Workflow, WorkflowContext, WorkflowError,
        WorkflowEvent,
    };
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError};
pub use engine::{Client, EngineError, Registry, StartWorkflowOptions};
pub use persistence::{InMemoryRunStore, RunStore, StoreError, WorkflowStatus};
pub use worker::{Worker, WorkerConfig, WorkerError, WorkerStatus};
pub use workflow::{
    with_cleanup, ActivityOptions, TimeoutType, Workflow, WorkflowContext, WorkflowError,
    WorkflowEvent,
};
