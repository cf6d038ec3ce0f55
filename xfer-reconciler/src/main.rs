//! xfer-reconciler: run reconciliations against the in-memory control plane.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xfer_reconciler::{
    InMemoryServerApi, ReconcilerConfig, ReconciliationContext, ResourceRequest, ServerReconciler,
    ServerSpec, StepResult,
};

/// Transfer server reconciler
#[derive(Parser, Debug)]
#[command(name = "xfer-reconciler", version, about)]
struct Args {
    /// JSON reconciler config (defaults apply to missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip in-process sleeps and re-invoke immediately
    #[arg(long, env = "XFER_TEST_MODE")]
    test_mode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive one reconciliation against a simulated control plane
    Simulate {
        /// Flow to run
        #[arg(value_enum)]
        action: Action,

        /// JSON resource request
        #[arg(long)]
        request: PathBuf,

        /// Give up after this many invocations
        #[arg(long, default_value = "100")]
        max_invocations: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Action {
    Create,
    Update,
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xfer_reconciler=info".into()),
        )
        // stdout carries the resulting spec
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ReconcilerConfig::load(path)?,
        None => ReconcilerConfig::default(),
    };
    if args.test_mode {
        config.test_mode = true;
    }

    match args.command {
        Command::Simulate {
            action,
            request,
            max_invocations,
        } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("reading request {}", request.display()))?;
            let request: ResourceRequest = serde_json::from_str(&raw)
                .with_context(|| format!("parsing request {}", request.display()))?;
            simulate(config, action, request, max_invocations).await
        }
    }
}

async fn simulate(
    config: ReconcilerConfig,
    action: Action,
    mut request: ResourceRequest,
    max_invocations: u32,
) -> Result<()> {
    let api = Arc::new(InMemoryServerApi::new());
    let reconciler = ServerReconciler::new(api, config);
    info!("Simulating {:?}", action);

    // Update and delete need an existing server.
    if matches!(action, Action::Update | Action::Delete) {
        let existing = request
            .previous
            .clone()
            .unwrap_or_else(|| request.desired.clone());
        let seed = ResourceRequest {
            desired: existing,
            tags: request.previous_tags.clone(),
            ..Default::default()
        };
        let spec = drive(&reconciler, Action::Create, &seed, max_invocations)
            .await
            .context("seeding existing server")?
            .context("seeding returned no server")?;
        info!("Seeded server {:?}", spec.server_id);

        request.desired.server_id = spec.server_id.clone();
        if let Some(previous) = request.previous.as_mut() {
            previous.server_id = spec.server_id.clone();
        }
    }

    match drive(&reconciler, action, &request, max_invocations).await? {
        Some(spec) => println!("{}", serde_json::to_string_pretty(&spec)?),
        None => println!("{{}}"),
    }
    Ok(())
}

/// Re-invoke `action` until it completes or fails, honouring the requested
/// delays unless in test mode.
async fn drive(
    reconciler: &ServerReconciler,
    action: Action,
    request: &ResourceRequest,
    max_invocations: u32,
) -> Result<Option<ServerSpec>> {
    let test_mode = reconciler.config().test_mode;
    let mut context: Option<ReconciliationContext> = None;

    for invocation in 1..=max_invocations {
        let result = match action {
            Action::Create => reconciler.create(request, context.take()).await.map(Some),
            Action::Update => reconciler.update(request, context.take()).await.map(Some),
            Action::Delete => reconciler.delete(request, context.take()).await.map(|()| None),
        };

        match result {
            StepResult::Complete(spec) => {
                info!("{:?} complete after {} invocations", action, invocation);
                return Ok(spec);
            }
            StepResult::InProgress { delay, context: next } => {
                info!(
                    "Invocation {}: in progress, phase {:?}, re-invoking in {}s",
                    invocation,
                    next.phase,
                    delay.as_secs()
                );
                if !test_mode && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                context = Some(next);
            }
            StepResult::Failed(failure) => {
                error!("{:?} failed: {}", action, failure);
                bail!("{:?} failed: {}", action, failure);
            }
        }
    }

    bail!("{:?} did not finish within {} invocations", action, max_invocations)
}
