//! Cordon controller
//!
//! Toggles `spec.unschedulable` with a conditional update on the node's
//! resourceVersion so a concurrent write by the node lifecycle controller or
//! the kubelet is never clobbered.

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cluster::{ApiError, ClusterApi};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CordonState {
    Cordoned,
    Uncordoned,
}

impl CordonState {
    /// Current state of a node as last read from the API
    pub fn of(node: &Node) -> Self {
        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if unschedulable {
            CordonState::Cordoned
        } else {
            CordonState::Uncordoned
        }
    }

    fn unschedulable(self) -> bool {
        self == CordonState::Cordoned
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CordonOutcome {
    /// The node was already in the desired state; nothing was written
    Unchanged,
    /// The node was patched
    Changed,
}

/// A node confirmed unschedulable.
///
/// Only [`cordon`] constructs this, and the drain engine requires it, so pods
/// cannot be evicted from a node that was not cordoned first.
#[derive(Clone, Debug)]
pub struct CordonedNode {
    name: String,
    outcome: CordonOutcome,
}

impl CordonedNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn was_already_cordoned(&self) -> bool {
        self.outcome == CordonOutcome::Unchanged
    }

    #[cfg(test)]
    pub(crate) fn assume_cordoned(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: CordonOutcome::Unchanged,
        }
    }
}

/// Drive `node` to `desired`, retrying the read-modify-write on version conflicts.
///
/// At most `max_conflict_retries` conflicts are absorbed before failing with
/// [`Error::Conflict`].
#[instrument(skip(api, node), fields(node = %node.name_any()))]
pub async fn set_schedulable(
    api: &dyn ClusterApi,
    node: &Node,
    desired: CordonState,
    max_conflict_retries: u32,
) -> Result<CordonOutcome> {
    let name = node.name_any();
    let mut current = node.clone();
    let mut conflicts = 0u32;

    loop {
        if CordonState::of(&current) == desired {
            info!("Node {} already {:?}", name, desired);
            return Ok(CordonOutcome::Unchanged);
        }

        let version = current.metadata.resource_version.clone();
        match api
            .patch_node_schedulable(&name, desired.unschedulable(), version.as_deref())
            .await
        {
            Ok(updated) => {
                if CordonState::of(&updated) != desired {
                    return Err(Error::PermanentUpstream(format!(
                        "patch of node {name} did not persist {desired:?}"
                    )));
                }
                info!("Node {} is now {:?}", name, desired);
                return Ok(CordonOutcome::Changed);
            }
            Err(ApiError::Conflict(msg)) => {
                conflicts += 1;
                if conflicts > max_conflict_retries {
                    return Err(Error::Conflict {
                        node: name,
                        attempts: conflicts,
                    });
                }
                warn!(
                    "Conflict updating node {} (attempt {}): {}; re-reading",
                    name, conflicts, msg
                );
                current = api
                    .get_node(&name)
                    .await
                    .map_err(|e| node_error(&name, e))?;
            }
            Err(e) => return Err(node_error(&name, e)),
        }
    }
}

/// A node that disappears mid-update is reported by name
fn node_error(name: &str, err: ApiError) -> Error {
    match err {
        ApiError::NotFound(_) => Error::NotFound(name.to_string()),
        other => other.into(),
    }
}

/// Mark the node unschedulable
pub async fn cordon(
    api: &dyn ClusterApi,
    node: &Node,
    max_conflict_retries: u32,
) -> Result<CordonedNode> {
    let outcome = set_schedulable(api, node, CordonState::Cordoned, max_conflict_retries).await?;
    Ok(CordonedNode {
        name: node.name_any(),
        outcome,
    })
}

/// Mark the node schedulable again
pub async fn uncordon(
    api: &dyn ClusterApi,
    node: &Node,
    max_conflict_retries: u32,
) -> Result<CordonOutcome> {
    set_schedulable(api, node, CordonState::Uncordoned, max_conflict_retries).await
}
