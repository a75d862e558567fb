//! `ClusterApi` backed by a live API server through kube-rs

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, EvictParams, ListParams, Patch, PatchParams},
    Client,
};
use serde_json::json;
use tracing::debug;

use super::{ApiError, ClusterApi};

/// Cluster handle shared by every stage of the workflow.
///
/// Cloning is cheap; all clones share the underlying connection pool.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Merge patch toggling `spec.unschedulable`.
///
/// Carrying `metadata.resourceVersion` turns the patch into a conditional
/// update: the API server rejects it with 409 if the node changed since it
/// was read.
fn schedulable_patch(unschedulable: bool, expected_version: Option<&str>) -> serde_json::Value {
    let mut patch = json!({
        "spec": {
            "unschedulable": unschedulable
        }
    });
    if let Some(version) = expected_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }
    patch
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ApiError> {
        debug!("Listing nodes with selector {}", label_selector);
        let list = self
            .nodes()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ApiError> {
        Ok(self.nodes().get(name).await?)
    }

    async fn patch_node_schedulable(
        &self,
        name: &str,
        unschedulable: bool,
        expected_version: Option<&str>,
    ) -> Result<Node, ApiError> {
        let patch = schedulable_patch(unschedulable, expected_version);
        Ok(self
            .nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ApiError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
            .await?;
        Ok(list.items)
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.pods(namespace)
            .evict(name, &EvictParams::default())
            .await?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ApiError> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }
}
