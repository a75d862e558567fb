//! Error types for the node retirement workflow

use std::time::Duration;

use thiserror::Error;

use crate::cluster::ApiError;
use crate::drain::DrainReport;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad input from the caller, never retried
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No node carries the requested hostname
    #[error("Unable to find node with name {0}")]
    NotFound(String),

    /// More than one node carries the requested hostname
    #[error("Node name {name} is ambiguous, matches: {}", .matches.join(", "))]
    Ambiguous { name: String, matches: Vec<String> },

    /// The node lookup itself failed
    #[error("Cluster API unavailable while resolving node: {0}")]
    UpstreamUnavailable(#[source] ApiError),

    /// Optimistic concurrency retries were exhausted
    #[error("Conflict updating node {node} after {attempts} attempt(s)")]
    Conflict { node: String, attempts: u32 },

    /// Rate limited or temporarily unavailable API server
    #[error("Transient cluster API error: {0}")]
    TransientUpstream(String),

    /// Forbidden or malformed request
    #[error("Cluster API rejected request: {0}")]
    PermanentUpstream(String),

    /// Some pods could not be evicted
    #[error("Drain incomplete: {failed} pod(s) failed, {succeeded} evicted, {skipped} skipped")]
    PartialDrainFailure {
        succeeded: usize,
        skipped: usize,
        failed: usize,
    },

    /// Global drain deadline elapsed with pods still on the node
    #[error("Drain timed out after {:.1}s with {unresolved} pod(s) unresolved", .timeout.as_secs_f64())]
    Timeout { timeout: Duration, unresolved: usize },

    /// Operator interrupted the drain
    #[error("Drain cancelled with {unresolved} pod(s) unresolved")]
    Cancelled { unresolved: usize },

    /// Invalid configuration file or values
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Building the Kubernetes client failed
    #[error("Kubernetes client error: {0}")]
    KubeError(#[from] kube::Error),
}

impl Error {
    /// True when re-running the same step may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. }
                | Error::TransientUpstream(_)
                | Error::UpstreamUnavailable(_)
                | Error::Timeout { .. }
        )
    }

    /// Process exit code for this error: 2 for invalid invocation, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => 2,
            _ => 1,
        }
    }

    /// Short machine readable kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::NotFound(_) => "NotFound",
            Error::Ambiguous { .. } => "Ambiguous",
            Error::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Error::Conflict { .. } => "Conflict",
            Error::TransientUpstream(_) => "TransientUpstream",
            Error::PermanentUpstream(_) => "PermanentUpstream",
            Error::PartialDrainFailure { .. } => "PartialDrainFailure",
            Error::Timeout { .. } => "Timeout",
            Error::Cancelled { .. } => "Cancelled",
            Error::ConfigError(_) => "ConfigError",
            Error::KubeError(_) => "KubeError",
        }
    }

    /// Summarize an unclean drain report, `None` when every pod was handled
    pub fn from_drain_report(report: &DrainReport, timeout: Duration) -> Option<Self> {
        if report.is_success() {
            return None;
        }
        let unresolved = report.unresolved().count();
        if report.timed_out {
            Some(Error::Timeout {
                timeout,
                unresolved,
            })
        } else if report.cancelled {
            Some(Error::Cancelled { unresolved })
        } else {
            Some(Error::PartialDrainFailure {
                succeeded: report.succeeded.len(),
                skipped: report.skipped.len(),
                failed: report.failed.len(),
            })
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            // Node lookups report NotFound with the node name themselves
            ApiError::NotFound(_) => Error::PermanentUpstream(err.to_string()),
            ApiError::Conflict(msg) => Error::TransientUpstream(format!("conflict: {msg}")),
            ApiError::RateLimited(_) | ApiError::Unavailable(_) => {
                Error::TransientUpstream(err.to_string())
            }
            ApiError::Forbidden(_) | ApiError::Invalid(_) => {
                Error::PermanentUpstream(err.to_string())
            }
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
