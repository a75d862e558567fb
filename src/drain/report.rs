//! Drain results

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Serialize;

use super::classify::{BlockReason, SkipReason};

/// Identity of a pod on the drained node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl From<&Pod> for PodRef {
    fn from(pod: &Pod) -> Self {
        Self {
            namespace: pod.namespace().unwrap_or_else(|| "default".to_string()),
            name: pod.name_any(),
            uid: pod.uid(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EvictedPod {
    pub pod: PodRef,
    pub attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedPod {
    pub pod: PodRef,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockedPod {
    pub pod: PodRef,
    pub reason: BlockReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// Policy forbids evicting the pod
    Blocked(BlockReason),
    /// Transient errors persisted through every allowed attempt
    RetriesExhausted,
    /// The API server refused the eviction outright
    Rejected,
    /// The global deadline elapsed before the pod was gone
    DeadlineExceeded,
    /// The operator interrupted the drain
    Cancelled,
}

impl FailureReason {
    /// The pod was still being worked on when the drain stopped
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPod {
    pub pod: PodRef,
    pub reason: FailureReason,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What a drain would do, computed without touching any pod
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainPlan {
    pub node: String,
    pub evict: Vec<PodRef>,
    pub skipped: Vec<SkippedPod>,
    pub blocked: Vec<BlockedPod>,
}

/// Outcome of draining one node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub node: String,
    pub succeeded: Vec<EvictedPod>,
    pub skipped: Vec<SkippedPod>,
    pub failed: Vec<FailedPod>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl DrainReport {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ..Default::default()
        }
    }

    /// Every pod that was not skipped has been evicted
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.timed_out && !self.cancelled
    }

    /// Pods left behind because the drain stopped early
    pub fn unresolved(&self) -> impl Iterator<Item = &FailedPod> {
        self.failed.iter().filter(|f| f.reason.is_unresolved())
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "node {}: {} evicted, {} skipped, {} failed",
            self.node,
            self.succeeded.len(),
            self.skipped.len(),
            self.failed.len()
        );
        if self.timed_out {
            summary.push_str(" (timed out)");
        }
        if self.cancelled {
            summary.push_str(" (cancelled)");
        }
        summary
    }

    /// Order every list by pod identity so output does not depend on completion order
    pub(crate) fn sort(&mut self) {
        self.succeeded.sort_by(|a, b| a.pod.cmp(&b.pod));
        self.skipped.sort_by(|a, b| a.pod.cmp(&b.pod));
        self.failed.sort_by(|a, b| a.pod.cmp(&b.pod));
    }
}
