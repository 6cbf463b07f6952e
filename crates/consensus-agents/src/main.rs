use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use consensus_agents::{build_pool, check_endpoint, AgentsConfig};
use coordination::{
    format_review_request, BackendRegistry, EngineConfig, EngineSnapshot, ExecutionMode,
    OrchestrationEngine, PerformanceHint, RoutingConfig, RunStatus, SessionState, SnapshotHandle,
    Task,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Complexity {
    Simple,
    Medium,
    Complex,
    Architectural,
}

impl From<Complexity> for ExecutionMode {
    fn from(c: Complexity) -> Self {
        match c {
            Complexity::Simple => ExecutionMode::Simple,
            Complexity::Medium => ExecutionMode::Medium,
            Complexity::Complex => ExecutionMode::Complex,
            Complexity::Architectural => ExecutionMode::Architectural,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Performance {
    Fast,
    Balanced,
    Thorough,
}

impl From<Performance> for PerformanceHint {
    fn from(p: Performance) -> Self {
        match p {
            Performance::Fast => PerformanceHint::Fast,
            Performance::Balanced => PerformanceHint::Balanced,
            Performance::Thorough => PerformanceHint::Thorough,
        }
    }
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task description to route and execute
    task: String,

    /// Force a routing category instead of classifying the description
    #[arg(long)]
    category: Option<String>,

    /// Force an execution mode
    #[arg(long, value_enum)]
    complexity: Option<Complexity>,

    /// Bias backend selection toward latency or cost
    #[arg(long, value_enum)]
    performance: Option<Performance>,

    /// Run a single named backend in simple mode
    #[arg(long = "override")]
    override_backend: Option<String>,

    /// Routing TOML (overrides CONSENSUS_ROUTING_CONFIG)
    #[arg(long)]
    routing: Option<PathBuf>,

    /// Probe every endpoint before running
    #[arg(long, default_value_t = false)]
    check: bool,
}

impl Args {
    fn to_task(&self) -> Task {
        let mut task = Task::new(self.task.clone());
        if let Some(category) = &self.category {
            task = task.with_category(category.clone());
        }
        if let Some(complexity) = self.complexity {
            task = task.with_complexity(complexity.into());
        }
        if let Some(performance) = self.performance {
            task = task.with_performance(performance.into());
        }
        if let Some(backend) = &self.override_backend {
            task = task.with_override(backend.clone());
        }
        task
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AgentsConfig::default();

    if args.check {
        for (id, endpoint) in &config.endpoints {
            if !check_endpoint(endpoint).await {
                warn!(backend = %id, url = %endpoint.url, "Endpoint not reachable");
            }
        }
    }

    let routing = match args.routing.as_ref().or(config.routing_path.as_ref()) {
        Some(path) => RoutingConfig::load(path)
            .with_context(|| format!("Failed to load routing config {}", path.display()))?,
        None => RoutingConfig::default(),
    };
    let snapshot = EngineSnapshot::new(BackendRegistry::default(), routing)
        .context("Routing config does not match the backend registry")?;
    let pool = build_pool(&config)?;
    let engine = OrchestrationEngine::new(SnapshotHandle::new(snapshot), pool, EngineConfig::from_env());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    info!(backends = config.endpoints.len(), "Consensus runner starting");
    let (result, _session) = engine
        .run_with_cancel(args.to_task(), &SessionState::default(), cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.needs_human_review {
        eprintln!("{}", format_review_request(&result));
    }
    if result.status == RunStatus::Failed {
        bail!("No backend succeeded: {}", result.failure_reasons.join("; "));
    }
    Ok(())
}
