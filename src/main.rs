use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use node_retire::cluster::KubeCluster;
use node_retire::drain::Shutdown;
use node_retire::resolver::validate_node_name;
use node_retire::telemetry::{self, LogFormat};
use node_retire::{retire_node, uncordon_node, DrainConfig, Error, Result, RetireReport};
use tracing::{error, info, warn};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nBuild Date: ",
    env!("BUILD_DATE"),
    "\nGit SHA: ",
    env!("GIT_SHA")
);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Cordon and drain a Kubernetes node so it can be decommissioned
#[derive(Parser, Debug)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Args {
    /// Node to retire, matched against the kubernetes.io/hostname label
    #[arg(long, env = "NODE_RETIRE_NAME")]
    name: String,

    /// Evict pods that are not managed by a controller
    #[arg(long, env = "NODE_RETIRE_FORCE")]
    force: bool,

    /// Evict DaemonSet pods instead of leaving them on the node
    #[arg(long, env = "NODE_RETIRE_EVICT_DAEMONSETS")]
    evict_daemonsets: bool,

    /// Evict pods using emptyDir volumes; their local data is lost
    #[arg(long, env = "NODE_RETIRE_DELETE_EMPTYDIR_DATA")]
    delete_emptydir_data: bool,

    /// Deadline for the whole drain, in seconds
    #[arg(long, env = "NODE_RETIRE_TIMEOUT")]
    timeout: Option<f64>,

    /// Eviction attempts per pod
    #[arg(long, env = "NODE_RETIRE_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Evictions in flight at once
    #[arg(long, env = "NODE_RETIRE_PARALLELISM")]
    parallelism: Option<usize>,

    /// Do not wait for evicted pods to be deleted
    #[arg(long, env = "NODE_RETIRE_NO_WAIT")]
    no_wait: bool,

    /// Print the drain plan without cordoning or evicting
    #[arg(long, env = "NODE_RETIRE_DRY_RUN", conflicts_with = "uncordon")]
    dry_run: bool,

    /// Make a previously retired node schedulable again
    #[arg(long, env = "NODE_RETIRE_UNCORDON")]
    uncordon: bool,

    /// TOML file with drain settings; flags take precedence
    #[arg(long, env = "NODE_RETIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Kubeconfig file, defaults to the in-cluster or KUBECONFIG configuration
    #[arg(long, env = "NODE_RETIRE_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, env = "NODE_RETIRE_CONTEXT")]
    context: Option<String>,

    #[arg(long, env = "NODE_RETIRE_OUTPUT", value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[arg(long, env = "NODE_RETIRE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    /// Config file values, then flag overrides
    fn drain_config(&self) -> Result<DrainConfig> {
        let mut config = match &self.config {
            Some(path) => DrainConfig::from_file(path)?,
            None => DrainConfig::default(),
        };

        config.force |= self.force;
        config.evict_daemonsets |= self.evict_daemonsets;
        config.delete_emptydir_data |= self.delete_emptydir_data;
        config.dry_run |= self.dry_run;
        if self.no_wait {
            config.wait_for_deletion = false;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    telemetry::init_tracing(args.log_format);

    let code = match run(&args).await {
        Ok(report) => {
            println!("{}", render(&report, args.output));
            report.exit_code()
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: &Args) -> Result<RetireReport> {
    // Bad input exits 2 even when no cluster is reachable
    validate_node_name(&args.name)?;
    let config = args.drain_config()?;

    info!(
        "Starting node-retire v{} for node {}",
        env!("CARGO_PKG_VERSION"),
        args.name
    );

    let client = build_client(args).await?;
    info!("Connected to Kubernetes cluster");
    let cluster = KubeCluster::new(client);

    if args.uncordon {
        return Ok(uncordon_node(&cluster, &args.name, &config).await);
    }

    let (trigger, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping drain. The node stays cordoned");
            trigger.trigger();
        }
    });

    Ok(retire_node(&cluster, &args.name, &config, shutdown).await)
}

async fn build_client(args: &Args) -> Result<kube::Client> {
    let options = KubeConfigOptions {
        context: args.context.clone(),
        ..Default::default()
    };

    let config = match (&args.kubeconfig, &args.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::ConfigError(format!("cannot read kubeconfig {}: {e}", path.display()))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| Error::ConfigError(format!("invalid kubeconfig: {e}")))?
        }
        (None, Some(_)) => kube::Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::ConfigError(format!("invalid kubeconfig: {e}")))?,
        (None, None) => kube::Config::infer()
            .await
            .map_err(|e| Error::ConfigError(format!("no Kubernetes configuration found: {e}")))?,
    };

    Ok(kube::Client::try_from(config)?)
}

fn render(report: &RetireReport, output: OutputFormat) -> String {
    let rendered = match output {
        OutputFormat::Text => return report.render_text(),
        OutputFormat::Json => serde_json::to_string_pretty(report).map_err(|e| e.to_string()),
        OutputFormat::Yaml => serde_yaml::to_string(report).map_err(|e| e.to_string()),
    };
    rendered.unwrap_or_else(|e| {
        warn!("Failed to serialize report, falling back to text: {}", e);
        report.render_text()
    })
}
