//! Activity abstractions
//!
//! Activities are units of work that are executed by workers. They:
//! - Can send heartbeats to indicate liveness
//! - Support cancellation via tokens inherited from the scheduling workflow
//! - Report cancellation as a result value, not as an error

mod context;
mod definition;

pub use context::{ActivityContext, ActivityInfo, CancellationHandle, HeartbeatError, HeartbeatPayload};
pub use definition::{error_types, Activity, ActivityError};
