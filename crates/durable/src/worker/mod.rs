//! Worker for workflow and activity execution
//!
//! A [`Worker`] serves one task list. It runs every workflow body it receives
//! on its own tokio task and executes activities in a bounded number of
//! slots.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Worker                              │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐  │
//! │  │  Workflow poll loop  │      │    Activity poll loop    │  │
//! │  └──────────┬───────────┘      └────────────┬─────────────┘  │
//! │             │                               │                │
//! │             ▼                               ▼                │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐  │
//! │  │  Workflow bodies     │      │ Activities (Semaphore-   │  │
//! │  │  (one task per run)  │      │ limited, heartbeating)   │  │
//! │  └──────────────────────┘      └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cancelflow_durable::prelude::*;
//!
//! let client = Client::in_memory();
//!
//! let mut registry = Registry::new();
//! registry
//!     .register_workflow(ProcessOrder)
//!     .register_activity(ChargeCard);
//!
//! let worker = Worker::new(
//!     &client,
//!     "orders",
//!     registry,
//!     WorkerConfig::default().with_max_concurrent_activities(20),
//! );
//! worker.start()?;
//!
//! // Graceful shutdown
//! worker.shutdown().await?;
//! ```

mod pool;

pub use pool::{Worker, WorkerConfig, WorkerError, WorkerStatus};
