//! Per-pod eviction state machine
//!
//! ```text
//! Pending -> EvictionRequested -> Succeeded
//!                              -> Retrying -> EvictionRequested
//!                              -> PermanentlyFailed
//! ```

use serde::Serialize;

use super::report::{EvictedPod, FailedPod, FailureReason, PodRef};
use crate::cluster::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EvictionState {
    Pending,
    EvictionRequested,
    Retrying,
    Succeeded,
    PermanentlyFailed,
}

/// Record of one pod's eviction, owned by the worker handling that pod
#[derive(Clone, Debug)]
pub struct DrainRequest {
    pub pod: PodRef,
    pub state: EvictionState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Where a finished eviction attempt leads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Done,
    RetryLater,
    GiveUp(FailureReason),
}

impl DrainRequest {
    pub fn new(pod: PodRef) -> Self {
        Self {
            pod,
            state: EvictionState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Move to `EvictionRequested`; only legal from `Pending` or `Retrying`
    pub fn begin_attempt(&mut self) {
        debug_assert!(
            matches!(self.state, EvictionState::Pending | EvictionState::Retrying),
            "eviction for {} already in flight",
            self.pod
        );
        self.state = EvictionState::EvictionRequested;
        self.attempts += 1;
    }

    /// Record the API response for the attempt in flight
    pub fn complete_attempt(
        &mut self,
        result: Result<(), ApiError>,
        retry_allowed: bool,
    ) -> Transition {
        match result {
            // A pod that is already gone counts as evicted
            Ok(()) | Err(ApiError::NotFound(_)) => {
                self.state = EvictionState::Succeeded;
                Transition::Done
            }
            Err(err) if err.is_transient() => {
                self.last_error = Some(err.to_string());
                if retry_allowed {
                    self.state = EvictionState::Retrying;
                    Transition::RetryLater
                } else {
                    self.state = EvictionState::PermanentlyFailed;
                    Transition::GiveUp(FailureReason::RetriesExhausted)
                }
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.state = EvictionState::PermanentlyFailed;
                Transition::GiveUp(FailureReason::Rejected)
            }
        }
    }

    pub fn into_evicted(self) -> EvictedPod {
        EvictedPod {
            pod: self.pod,
            attempts: self.attempts,
        }
    }

    pub fn into_failed(self, reason: FailureReason) -> FailedPod {
        FailedPod {
            pod: self.pod,
            reason,
            attempts: self.attempts,
            last_error: self.last_error,
        }
    }
}
