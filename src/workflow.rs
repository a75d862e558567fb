//! Node retirement workflow
//!
//! Resolve, then cordon, then drain. Resolution and cordon failures abort the
//! run since draining an unconfirmed or schedulable node is unsafe. The node
//! stays cordoned on any later failure; reverting it is an explicit
//! [`uncordon_node`] call.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::cluster::ClusterApi;
use crate::config::DrainConfig;
use crate::cordon::{self, CordonOutcome};
use crate::drain::{DrainEngine, DrainPlan, DrainReport, Shutdown};
use crate::error::{Error, Result};
use crate::resolver::resolve_node;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub kind: &'static str,
    pub message: String,
}

/// Structured result of one invocation
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetireReport {
    /// Name as supplied by the operator
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_node: Option<String>,
    pub resolved: bool,
    pub cordoned: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_result: Option<DrainReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<DrainPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    exit_code: i32,
}

impl RetireReport {
    fn new(node: &str, dry_run: bool) -> Self {
        Self {
            node: node.to_string(),
            resolved_node: None,
            resolved: false,
            cordoned: false,
            dry_run,
            drain_result: None,
            plan: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: 0,
        }
    }

    fn finish(mut self, failure: Option<Error>) -> Self {
        if let Some(err) = failure {
            error!("{}", err);
            self.exit_code = err.exit_code();
            self.error = Some(ErrorSummary {
                kind: err.kind(),
                message: err.to_string(),
            });
        }
        self.finished_at = Some(Utc::now());
        self
    }

    /// 0 on success, 1 on operational failure, 2 on invalid invocation
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Human readable rendering, one line per pod
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let target = self.resolved_node.as_deref().unwrap_or(&self.node);
        let _ = writeln!(
            out,
            "node {}: resolved={} cordoned={}{}",
            target,
            self.resolved,
            self.cordoned,
            if self.dry_run { " (dry run)" } else { "" }
        );

        if let Some(plan) = &self.plan {
            for pod in &plan.evict {
                let _ = writeln!(out, "  would evict  {pod}");
            }
            for s in &plan.skipped {
                let _ = writeln!(out, "  would skip   {} ({:?})", s.pod, s.reason);
            }
            for b in &plan.blocked {
                let _ = writeln!(out, "  blocked      {} ({:?})", b.pod, b.reason);
            }
        }

        if let Some(drain) = &self.drain_result {
            for e in &drain.succeeded {
                let _ = writeln!(out, "  evicted      {} (attempts: {})", e.pod, e.attempts);
            }
            for s in &drain.skipped {
                let _ = writeln!(out, "  skipped      {} ({:?})", s.pod, s.reason);
            }
            for f in &drain.failed {
                let _ = write!(out, "  failed       {} ({:?}, attempts: {})", f.pod, f.reason, f.attempts);
                if let Some(last) = &f.last_error {
                    let _ = write!(out, ": {last}");
                }
                out.push('\n');
            }
            let _ = writeln!(out, "{}", drain.summary());
        }

        if let Some(err) = &self.error {
            let _ = writeln!(out, "error: {}", err.message);
        }
        out
    }
}

/// Retire the node named `name`: resolve, cordon, then drain it.
///
/// Never panics or returns early without a report; failures are recorded in
/// the report together with the exit code.
#[instrument(skip(api, config, shutdown))]
pub async fn retire_node(
    api: &dyn ClusterApi,
    name: &str,
    config: &DrainConfig,
    shutdown: Shutdown,
) -> RetireReport {
    let mut report = RetireReport::new(name, config.dry_run);
    let outcome = run_retirement(api, name, config, shutdown, &mut report).await;
    report.finish(outcome.err())
}

async fn run_retirement(
    api: &dyn ClusterApi,
    name: &str,
    config: &DrainConfig,
    shutdown: Shutdown,
    report: &mut RetireReport,
) -> Result<()> {
    config.validate()?;

    let node = resolve_node(api, name).await?;
    let node_name = node.name_any();
    report.resolved = true;
    report.resolved_node = Some(node_name.clone());

    let engine = DrainEngine::new(api, config.clone());

    if config.dry_run {
        let plan = engine.plan(&node_name).await?;
        let blocked = plan.blocked.len();
        let failure = (blocked > 0).then(|| Error::PartialDrainFailure {
            succeeded: 0,
            skipped: plan.skipped.len(),
            failed: blocked,
        });
        report.plan = Some(plan);
        return failure.map_or(Ok(()), Err);
    }

    let cordoned = cordon::cordon(api, &node, config.conflict_retries).await?;
    report.cordoned = true;
    if cordoned.was_already_cordoned() {
        info!("Node {} was already cordoned, continuing drain", node_name);
    }

    let drain = engine.drain(&cordoned, shutdown).await?;
    let failure = Error::from_drain_report(&drain, config.timeout());
    report.drain_result = Some(drain);
    failure.map_or(Ok(()), Err)
}

/// Make a previously retired node schedulable again
#[instrument(skip(api, config))]
pub async fn uncordon_node(api: &dyn ClusterApi, name: &str, config: &DrainConfig) -> RetireReport {
    let mut report = RetireReport::new(name, false);
    let outcome = run_uncordon(api, name, config, &mut report).await;
    report.finish(outcome.err())
}

async fn run_uncordon(
    api: &dyn ClusterApi,
    name: &str,
    config: &DrainConfig,
    report: &mut RetireReport,
) -> Result<()> {
    let node = resolve_node(api, name).await?;
    report.resolved = true;
    report.resolved_node = Some(node.name_any());
    // Until the patch lands the node is whatever it was
    report.cordoned = cordon::CordonState::of(&node) == cordon::CordonState::Cordoned;

    let outcome = cordon::uncordon(api, &node, config.conflict_retries).await?;
    report.cordoned = false;
    if outcome == CordonOutcome::Unchanged {
        info!("Node {} was already schedulable", node.name_any());
    }
    Ok(())
}
