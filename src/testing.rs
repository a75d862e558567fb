//! In-memory cluster for unit tests
//!
//! Records every call in order and tracks evictions in flight, so tests can
//! assert on ordering and concurrency invariants.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, Node, NodeSpec, Pod, PodSpec, PodStatus, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;

use crate::cluster::{ApiError, ClusterApi, HOSTNAME_LABEL};
use crate::cordon::CordonState;

type PodKey = (String, String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    ListNodes(String),
    GetNode(String),
    PatchNode { name: String, unschedulable: bool },
    ListPods(String),
    Evict { namespace: String, name: String },
    GetPod { namespace: String, name: String },
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    pods: BTreeMap<PodKey, Pod>,
    calls: Vec<Call>,
    list_nodes_error: Option<ApiError>,
    list_pods_error: Option<ApiError>,
    patch_conflicts: u32,
    evict_failures: HashMap<PodKey, VecDeque<ApiError>>,
    in_flight: HashMap<PodKey, usize>,
    max_in_flight_per_pod: usize,
    in_flight_total: usize,
    max_in_flight_total: usize,
    evictions_from_schedulable_node: usize,
    lingering_polls: u32,
    terminating: HashMap<PodKey, (Pod, u32)>,
}

#[derive(Default)]
pub(crate) struct MockCluster {
    state: Mutex<State>,
    evict_delay: Duration,
}

impl MockCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_node(self, node: Node) -> Self {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().nodes.insert(name, node);
        self
    }

    pub(crate) fn with_pod(self, pod: Pod) -> Self {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().unwrap().pods.insert(key, pod);
        self
    }

    pub(crate) fn with_list_nodes_error(self, err: ApiError) -> Self {
        self.state.lock().unwrap().list_nodes_error = Some(err);
        self
    }

    pub(crate) fn with_list_pods_error(self, err: ApiError) -> Self {
        self.state.lock().unwrap().list_pods_error = Some(err);
        self
    }

    /// Fail the next `n` node patches with a conflict, as if another writer got there first
    pub(crate) fn with_patch_conflicts(self, n: u32) -> Self {
        self.state.lock().unwrap().patch_conflicts = n;
        self
    }

    /// Fail evictions of one pod with these errors, in order, before succeeding
    pub(crate) fn with_evict_failures(self, namespace: &str, name: &str, errors: Vec<ApiError>) -> Self {
        self.state
            .lock()
            .unwrap()
            .evict_failures
            .insert((namespace.to_string(), name.to_string()), errors.into());
        self
    }

    /// Every eviction call takes this long to answer
    pub(crate) fn with_evict_delay(mut self, delay: Duration) -> Self {
        self.evict_delay = delay;
        self
    }

    /// Evicted pods stay visible to `get_pod` for `polls` lookups
    pub(crate) fn with_lingering_pods(self, polls: u32) -> Self {
        self.state.lock().unwrap().lingering_polls = polls;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn evict_attempts(&self, namespace: &str, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(c, Call::Evict { namespace: ns, name: n } if ns == namespace && n == name)
            })
            .count()
    }

    pub(crate) fn node(&self, name: &str) -> Node {
        self.state.lock().unwrap().nodes[name].clone()
    }

    pub(crate) fn cordon_state(&self, name: &str) -> CordonState {
        CordonState::of(&self.node(name))
    }

    pub(crate) fn pod_exists(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .pods
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Simulate a write to the node by some other client
    pub(crate) fn bump_resource_version(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(name) {
            bump(node);
        }
    }

    pub(crate) fn max_in_flight_per_pod(&self) -> usize {
        self.state.lock().unwrap().max_in_flight_per_pod
    }

    pub(crate) fn max_in_flight_total(&self) -> usize {
        self.state.lock().unwrap().max_in_flight_total
    }

    pub(crate) fn evictions_from_schedulable_node(&self) -> usize {
        self.state.lock().unwrap().evictions_from_schedulable_node
    }
}

fn bump(node: &mut Node) {
    let next = node
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    node.metadata.resource_version = Some(next.to_string());
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListNodes(label_selector.to_string()));
        if let Some(err) = state.list_nodes_error.clone() {
            return Err(err);
        }
        let (key, value) = label_selector
            .split_once('=')
            .ok_or_else(|| ApiError::Invalid(format!("bad selector {label_selector}")))?;
        Ok(state
            .nodes
            .values()
            .filter(|n| {
                n.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetNode(name.to_string()));
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("nodes \"{name}\" not found")))
    }

    async fn patch_node_schedulable(
        &self,
        name: &str,
        unschedulable: bool,
        expected_version: Option<&str>,
    ) -> Result<Node, ApiError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.calls.push(Call::PatchNode {
            name: name.to_string(),
            unschedulable,
        });

        let node = state
            .nodes
            .get_mut(name)
            .ok_or_else(|| ApiError::NotFound(format!("nodes \"{name}\" not found")))?;

        if state.patch_conflicts > 0 {
            state.patch_conflicts -= 1;
            bump(node);
            return Err(ApiError::Conflict(
                "the object has been modified".to_string(),
            ));
        }
        if let Some(expected) = expected_version {
            if node.metadata.resource_version.as_deref() != Some(expected) {
                return Err(ApiError::Conflict(format!(
                    "resourceVersion {expected} is stale"
                )));
            }
        }

        node.spec.get_or_insert_with(Default::default).unschedulable = Some(unschedulable);
        bump(node);
        Ok(node.clone())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListPods(node_name.to_string()));
        if let Some(err) = state.list_pods_error.clone() {
            return Err(err);
        }
        Ok(state
            .pods
            .values()
            .filter(|p| {
                p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name)
            })
            .cloned()
            .collect())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let key = (namespace.to_string(), name.to_string());
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.calls.push(Call::Evict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
            let count = state.in_flight.entry(key.clone()).or_default();
            *count += 1;
            let count = *count;
            state.max_in_flight_per_pod = state.max_in_flight_per_pod.max(count);
            state.in_flight_total += 1;
            state.max_in_flight_total = state.max_in_flight_total.max(state.in_flight_total);
        }

        if !self.evict_delay.is_zero() {
            tokio::time::sleep(self.evict_delay).await;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if let Some(count) = state.in_flight.get_mut(&key) {
            *count -= 1;
        }
        state.in_flight_total -= 1;

        if let Some(err) = state
            .evict_failures
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }

        let pod = state
            .pods
            .remove(&key)
            .ok_or_else(|| ApiError::NotFound(format!("pods \"{name}\" not found")))?;

        let node_cordoned = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_ref())
            .and_then(|n| state.nodes.get(n))
            .map(|n| CordonState::of(n) == CordonState::Cordoned)
            .unwrap_or(false);
        if !node_cordoned {
            state.evictions_from_schedulable_node += 1;
        }

        if state.lingering_polls > 0 {
            let polls = state.lingering_polls;
            state.terminating.insert(key, (pod, polls));
        }
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ApiError> {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetPod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        let lingering = match state.terminating.get_mut(&key) {
            Some((pod, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(pod.clone())
            }
            _ => None,
        };
        if lingering.is_some() {
            return Ok(lingering);
        }
        state.terminating.remove(&key);
        Ok(state.pods.get(&key).cloned())
    }
}

pub(crate) fn make_node(name: &str, hostname: &str, unschedulable: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [(HOSTNAME_LABEL.to_string(), hostname.to_string())]
                    .into_iter()
                    .collect(),
            ),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(unschedulable),
            ..Default::default()
        }),
        status: None,
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum PodOwner {
    None,
    Controller(&'static str),
    NonController(&'static str),
}

pub(crate) fn make_pod(namespace: &str, name: &str, node: &str, owner: PodOwner) -> Pod {
    let owner_references = match owner {
        PodOwner::None => None,
        PodOwner::Controller(kind) | PodOwner::NonController(kind) => Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: format!("{name}-owner"),
            uid: format!("uid-{name}-owner"),
            controller: Some(matches!(owner, PodOwner::Controller(_))),
            ..Default::default()
        }]),
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            owner_references,
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

pub(crate) fn with_phase(mut pod: Pod, phase: &str) -> Pod {
    pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
    pod
}

pub(crate) fn with_emptydir(mut pod: Pod) -> Pod {
    pod.spec
        .get_or_insert_with(Default::default)
        .volumes
        .get_or_insert_with(Vec::new)
        .push(Volume {
            name: "scratch".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    pod
}
