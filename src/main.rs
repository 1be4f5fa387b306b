//! Overcommit operator - admission-time CPU/memory overcommit enforcement
//!
//! One binary, four roles. The `controller` role reconciles the Overcommit
//! singleton and deploys the other three as managed workloads running the
//! same image with a different subcommand.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio::sync::watch;
use tracing::info;

use overcommit_operator::controller::{overcommit, overcommit_class, Context};
use overcommit_operator::crd::{self, Overcommit, OvercommitClass};
use overcommit_operator::telemetry::{init_telemetry, TelemetryConfig};
use overcommit_operator::webhook::{
    self, class_store, MutatorState, ValidatorState,
};

/// Cluster-level admission control plane for CPU/memory overcommit
#[derive(Parser, Debug)]
#[command(name = "overcommit-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Overcommit singleton controller (default)
    ///
    /// Installs the issuer, both webhook stacks and the class sub-controller,
    /// and keeps them converged.
    Controller,

    /// Run the OvercommitClass sub-controller
    ///
    /// Deployed by the singleton controller; drives each class's dedicated
    /// webhook stack.
    ClassController,

    /// Serve the policy-object validating admission endpoint
    ClassValidator(WebhookArgs),

    /// Serve the pod mutating admission endpoint
    PodMutator(WebhookArgs),
}

#[derive(Args, Debug)]
struct WebhookArgs {
    /// Bind address for the HTTPS server
    #[arg(long, default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// Path to the TLS certificate (mounted from the cert-manager secret)
    #[arg(long, default_value = "/etc/webhook/tls/tls.crt")]
    tls_cert: String,

    /// Path to the TLS private key
    #[arg(long, default_value = "/etc/webhook/tls/tls.key")]
    tls_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    if cli.crd {
        // CRD YAML for both resources; cert-manager owns its own CRDs
        print!("{}", serde_yaml::to_string(&Overcommit::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&OvercommitClass::crd())?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
        Some(Commands::ClassController) => run_class_controller().await,
        Some(Commands::ClassValidator(args)) => run_class_validator(args).await,
        Some(Commands::PodMutator(args)) => run_pod_mutator(args).await,
    }
}

/// Run the Overcommit singleton reconciler
async fn run_controller() -> anyhow::Result<()> {
    info!("overcommit controller starting");
    let client = Client::try_default().await?;
    let ctx = Arc::new(Context::new(client.clone()));

    let overcommits: Api<Overcommit> = Api::all(client);

    Controller::new(overcommits, WatcherConfig::default())
        .shutdown_on_signal()
        .run(overcommit::reconcile, overcommit::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Overcommit reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Overcommit reconciliation error"),
            }
        })
        .await;

    info!("overcommit controller shutting down");
    Ok(())
}

/// Run the OvercommitClass reconciler
async fn run_class_controller() -> anyhow::Result<()> {
    info!("overcommit class controller starting");
    let client = Client::try_default().await?;
    let ctx = Arc::new(Context::new(client.clone()));

    let classes: Api<OvercommitClass> = Api::all(client);

    Controller::new(classes, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            overcommit_class::reconcile,
            overcommit_class::error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "OvercommitClass reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "OvercommitClass reconciliation error"),
            }
        })
        .await;

    info!("overcommit class controller shutting down");
    Ok(())
}

/// Serve the validating admission endpoint
async fn run_class_validator(args: WebhookArgs) -> anyhow::Result<()> {
    info!("class validator starting");
    let client = Client::try_default().await?;

    let tls_config = webhook::load_tls_config(&args.tls_cert, &args.tls_key)?;
    let state = Arc::new(ValidatorState { client });
    let router = webhook::validator_router(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(shutdown_signal(shutdown_tx));

    webhook::serve_tls(args.addr, tls_config, router, shutdown_rx).await?;

    info!("class validator shut down gracefully");
    Ok(())
}

/// Serve the mutating admission endpoint
async fn run_pod_mutator(args: WebhookArgs) -> anyhow::Result<()> {
    info!("pod mutator starting");
    let client = Client::try_default().await?;

    let label = match std::env::var("OVERCOMMIT_LABEL") {
        Ok(label) if !label.is_empty() => label,
        _ => crd::overcommit_label(&client).await,
    };
    info!(label = %label, "using policy label");

    let store = class_store(client).await?;

    let tls_config = webhook::load_tls_config(&args.tls_cert, &args.tls_key)?;
    let state = Arc::new(MutatorState { label, store });
    let router = webhook::mutator_router(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(shutdown_signal(shutdown_tx));

    webhook::serve_tls(args.addr, tls_config, router, shutdown_rx).await?;

    info!("pod mutator shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
        info!("received CTRL+C, starting graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}
