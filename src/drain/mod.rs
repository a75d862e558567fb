//! Drain engine: evicts the pods of a cordoned node
//!
//! Draining is done client side: pods bound to the node are classified
//! (DaemonSet, unmanaged, completed, ...), the evictable ones are evicted
//! through the Eviction API so PodDisruptionBudgets are respected, and every
//! pod ends up in the report as evicted, skipped or failed with a reason.

pub mod classify;
mod engine;
pub mod report;
pub mod request;
pub mod retry;
mod shutdown;

pub use classify::{classify, disposition, BlockReason, Disposition, PodClass, SkipReason};
pub use engine::DrainEngine;
pub use report::{
    BlockedPod, DrainPlan, DrainReport, EvictedPod, FailedPod, FailureReason, PodRef, SkippedPod,
};
pub use request::{DrainRequest, EvictionState};
pub use retry::RetryPolicy;
pub use shutdown::{Shutdown, ShutdownTrigger};
