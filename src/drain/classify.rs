//! Pod classification and drain policy

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

use crate::config::DrainConfig;

/// Annotation the kubelet puts on mirror pods of static manifests
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// How a pod's lifecycle is managed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum PodClass {
    /// Phase `Succeeded` or `Failed`
    Completed,
    /// Static pod mirrored by the kubelet; not evictable through the API
    Mirror,
    DaemonSet,
    ReplicaSet,
    StatefulSet,
    /// Controlled by some other kind (Job, a custom operator, ...)
    OtherController(String),
    /// No controlling owner: nothing recreates it after eviction
    Unmanaged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Completed,
    Mirror,
    DaemonSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    /// Unmanaged pod and `force` not set
    Unmanaged,
    /// Pod uses emptyDir and `delete_emptydir_data` not set
    LocalStorage,
}

/// What the drain engine does with a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Evict,
    Skip(SkipReason),
    Block(BlockReason),
}

pub fn classify(pod: &Pod) -> PodClass {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if matches!(phase, Some("Succeeded") | Some("Failed")) {
        return PodClass::Completed;
    }

    let is_mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    if is_mirror {
        return PodClass::Mirror;
    }

    let controller = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)));

    match controller.map(|r| r.kind.as_str()) {
        Some("DaemonSet") => PodClass::DaemonSet,
        Some("ReplicaSet") => PodClass::ReplicaSet,
        Some("StatefulSet") => PodClass::StatefulSet,
        Some(kind) => PodClass::OtherController(kind.to_string()),
        None => PodClass::Unmanaged,
    }
}

/// True if any volume of the pod is an emptyDir
pub fn uses_emptydir(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .is_some_and(|volumes| volumes.iter().any(|v| v.empty_dir.is_some()))
}

/// Apply the drain policy to a pod
pub fn disposition(pod: &Pod, config: &DrainConfig) -> Disposition {
    match classify(pod) {
        PodClass::Completed => return Disposition::Skip(SkipReason::Completed),
        PodClass::Mirror => return Disposition::Skip(SkipReason::Mirror),
        PodClass::DaemonSet if !config.evict_daemonsets => {
            return Disposition::Skip(SkipReason::DaemonSet)
        }
        PodClass::Unmanaged if !config.force => {
            return Disposition::Block(BlockReason::Unmanaged)
        }
        _ => {}
    }

    if uses_emptydir(pod) && !config.delete_emptydir_data {
        return Disposition::Block(BlockReason::LocalStorage);
    }
    Disposition::Evict
}
