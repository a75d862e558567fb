//! Drain engine
//!
//! Lists the pods bound to a cordoned node, applies the drain policy and
//! evicts the remaining pods with bounded parallelism. Each pod is owned by
//! exactly one worker for its whole lifetime, so a pod never has two
//! evictions in flight.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::{stream, StreamExt};
use kube::ResourceExt;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::classify::{disposition, Disposition};
use super::report::{BlockedPod, DrainPlan, DrainReport, FailedPod, FailureReason, PodRef, SkippedPod};
use super::request::{DrainRequest, Transition};
use super::retry::{jittered, RetryPolicy};
use super::shutdown::Shutdown;
use crate::cluster::ClusterApi;
use crate::config::DrainConfig;
use crate::cordon::CordonedNode;
use crate::error::Result;

enum PodOutcome {
    Evicted(DrainRequest),
    Failed(FailedPod),
}

pub struct DrainEngine<'a> {
    api: &'a dyn ClusterApi,
    config: DrainConfig,
    retry: RetryPolicy,
}

impl<'a> DrainEngine<'a> {
    pub fn new(api: &'a dyn ClusterApi, config: DrainConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self { api, config, retry }
    }

    /// Classify every pod on the node without evicting anything
    #[instrument(skip(self))]
    pub async fn plan(&self, node_name: &str) -> Result<DrainPlan> {
        let pods = self.api.list_pods_on_node(node_name).await?;

        // Key by identity so a duplicated list entry cannot spawn two workers
        let unique: BTreeMap<PodRef, _> = pods.iter().map(|p| (PodRef::from(p), p)).collect();

        let mut plan = DrainPlan {
            node: node_name.to_string(),
            ..Default::default()
        };
        for (pod_ref, pod) in unique {
            match disposition(pod, &self.config) {
                Disposition::Evict => plan.evict.push(pod_ref),
                Disposition::Skip(reason) => {
                    debug!("Not draining pod {}: {:?}", pod.name_any(), reason);
                    plan.skipped.push(SkippedPod {
                        pod: pod_ref,
                        reason,
                    })
                }
                Disposition::Block(reason) => {
                    warn!("Refusing to evict pod {}: {:?}", pod_ref, reason);
                    plan.blocked.push(BlockedPod {
                        pod: pod_ref,
                        reason,
                    })
                }
            }
        }

        info!(
            "Drain plan for {}: {} to evict, {} skipped, {} blocked",
            node_name,
            plan.evict.len(),
            plan.skipped.len(),
            plan.blocked.len()
        );
        Ok(plan)
    }

    /// Evict every evictable pod from the node.
    ///
    /// Per-pod failures never abort the batch; they land in the report. Only a
    /// failure to list the node's pods is returned as an error.
    #[instrument(skip(self, node, shutdown), fields(node = %node.name()))]
    pub async fn drain(&self, node: &CordonedNode, shutdown: Shutdown) -> Result<DrainReport> {
        let deadline = deadline_after(self.config.timeout());
        let plan = self.plan(node.name()).await?;

        let mut report = DrainReport::new(node.name());
        report.skipped = plan.skipped;
        report.failed = plan
            .blocked
            .into_iter()
            .map(|b| FailedPod {
                pod: b.pod,
                reason: FailureReason::Blocked(b.reason),
                attempts: 0,
                last_error: None,
            })
            .collect();

        let outcomes: Vec<PodOutcome> = stream::iter(plan.evict)
            .map(|pod| self.drain_pod(pod, deadline, shutdown.clone()))
            .buffer_unordered(self.config.parallelism.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                PodOutcome::Evicted(request) => report.succeeded.push(request.into_evicted()),
                PodOutcome::Failed(failed) => {
                    match failed.reason {
                        FailureReason::DeadlineExceeded => report.timed_out = true,
                        FailureReason::Cancelled => report.cancelled = true,
                        _ => {}
                    }
                    report.failed.push(failed)
                }
            }
        }
        report.sort();

        if report.is_success() {
            info!("Drain complete: {}", report.summary());
        } else {
            warn!("Drain incomplete: {}", report.summary());
        }
        Ok(report)
    }

    async fn drain_pod(&self, pod: PodRef, deadline: Instant, mut shutdown: Shutdown) -> PodOutcome {
        let mut request = DrainRequest::new(pod);

        loop {
            if let Some(reason) = stop_reason(deadline, &shutdown) {
                return PodOutcome::Failed(request.into_failed(reason));
            }

            request.begin_attempt();
            debug!("Evicting pod {} (attempt {})", request.pod, request.attempts);
            let result = self
                .api
                .evict_pod(&request.pod.namespace, &request.pod.name)
                .await;
            let retry_allowed = self.retry.allows_retry(request.attempts);

            match request.complete_attempt(result, retry_allowed) {
                Transition::Done => break,
                Transition::RetryLater => {
                    let delay = jittered(self.retry.delay_for(request.attempts));
                    warn!(
                        "Eviction of pod {} failed: {}. Retrying in {:.2}s",
                        request.pod,
                        request.last_error.as_deref().unwrap_or_default(),
                        delay.as_secs_f64()
                    );
                    pause(delay, deadline, &mut shutdown).await;
                }
                Transition::GiveUp(reason) => {
                    error!(
                        "Giving up on pod {} after {} attempt(s): {}",
                        request.pod,
                        request.attempts,
                        request.last_error.as_deref().unwrap_or_default()
                    );
                    return PodOutcome::Failed(request.into_failed(reason));
                }
            }
        }

        info!("Evicted pod {}", request.pod);
        if self.config.wait_for_deletion {
            if let Err(reason) = self.wait_for_deletion(&request.pod, deadline, &mut shutdown).await {
                request.last_error = Some("evicted but not yet deleted".to_string());
                return PodOutcome::Failed(request.into_failed(reason));
            }
        }
        PodOutcome::Evicted(request)
    }

    /// Poll until the pod is gone, or replaced by a new pod with the same name
    async fn wait_for_deletion(
        &self,
        pod: &PodRef,
        deadline: Instant,
        shutdown: &mut Shutdown,
    ) -> std::result::Result<(), FailureReason> {
        loop {
            match self.api.get_pod(&pod.namespace, &pod.name).await {
                Ok(None) => {
                    debug!("Pod {} deleted", pod);
                    return Ok(());
                }
                Ok(Some(current)) if pod.uid.is_some() && current.uid() != pod.uid => {
                    debug!("Pod {} replaced by a new instance", pod);
                    return Ok(());
                }
                Ok(Some(_)) => debug!("Pod {} not yet deleted", pod),
                Err(e) => warn!("Could not determine if pod {} was deleted: {}", pod, e),
            }

            if let Some(reason) = stop_reason(deadline, shutdown) {
                return Err(reason);
            }
            pause(self.config.deletion_poll_interval(), deadline, shutdown).await;
        }
    }
}

/// Roughly 30 years, used when the configured timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

fn stop_reason(deadline: Instant, shutdown: &Shutdown) -> Option<FailureReason> {
    if shutdown.is_triggered() {
        Some(FailureReason::Cancelled)
    } else if Instant::now() >= deadline {
        Some(FailureReason::DeadlineExceeded)
    } else {
        None
    }
}

/// Sleep for `delay`, waking early at the deadline or on cancellation
async fn pause(delay: Duration, deadline: Instant, shutdown: &mut Shutdown) {
    let wake = (Instant::now() + delay).min(deadline);
    tokio::select! {
        _ = sleep_until(wake) => {}
        _ = shutdown.wait() => {}
    }
}
