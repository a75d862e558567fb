//! Cluster API boundary
//!
//! The workflow only talks to the cluster through [`ClusterApi`], so the
//! resolver, cordon controller and drain engine can be exercised against an
//! in-memory cluster in tests. [`KubeCluster`] is the production
//! implementation backed by `kube::Api`.

mod kube_api;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use thiserror::Error;

pub use kube_api::KubeCluster;

/// Label carrying the node's hostname, used to resolve a node by name
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Failure of a single cluster API call, classified by how callers should react
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The object does not exist (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency collision on resourceVersion (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Throttled, or a PodDisruptionBudget does not allow the eviction yet (HTTP 429)
    #[error("too many requests: {0}")]
    RateLimited(String),

    /// Server-side or transport failure (HTTP 5xx, connection errors)
    #[error("API server unavailable: {0}")]
    Unavailable(String),

    /// Caller is not allowed to perform the request (HTTP 403)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed request or undecodable response
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    /// Classify an HTTP status code returned by the API server
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            429 => Self::RateLimited(message),
            403 => Self::Forbidden(message),
            500..=599 => Self::Unavailable(message),
            _ => Self::Invalid(message),
        }
    }

    /// True when the same request may succeed if retried later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unavailable(_))
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::from_status(resp.code, resp.message),
            kube::Error::SerdeError(e) => Self::Invalid(e.to_string()),
            kube::Error::BuildRequest(e) => Self::Invalid(e.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// The cluster primitives the retirement workflow is built from.
///
/// Implementations must be safe to call concurrently: the drain engine
/// issues evictions for several pods at once.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List nodes matching a label selector
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ApiError>;

    /// Fetch a node by name
    async fn get_node(&self, name: &str) -> Result<Node, ApiError>;

    /// Set `spec.unschedulable`, failing with [`ApiError::Conflict`] when
    /// `expected_version` no longer matches the stored resourceVersion
    async fn patch_node_schedulable(
        &self,
        name: &str,
        unschedulable: bool,
        expected_version: Option<&str>,
    ) -> Result<Node, ApiError>;

    /// List every pod bound to the node
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ApiError>;

    /// Create an eviction for the pod
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError>;

    /// Fetch a pod, `None` if it no longer exists
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ApiError>;
}
