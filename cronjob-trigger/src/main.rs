//! Runs the kubeless cronjob trigger controller until it receives SIGINT or SIGTERM
use anyhow::{Context, Result};
use clap::Parser;
use cronjob_trigger_core::ControllerConfig;
use cronjob_trigger_runtime::Controller;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Namespace holding the kubeless configuration
    #[arg(long, env = "KUBELESS_NAMESPACE", default_value = "kubeless")]
    kubeless_namespace: String,
    /// Name of the kubeless ConfigMap
    #[arg(long, env = "KUBELESS_CONFIG", default_value = "kubeless-config")]
    config_name: String,
    /// Number of triggers reconciled concurrently
    #[arg(long, default_value_t = 1)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn")))
        .init();
    let args = Args::parse();

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;
    let config = load_config(client.clone(), &args.kubeless_namespace, &args.config_name).await?;
    tracing::info!(
        namespace = config.functions_namespace.as_deref().unwrap_or("<all>"),
        image = %config.provision_image,
        "starting cronjob trigger controller"
    );

    Controller::new(client, config)
        .workers(args.workers)
        .run(shutdown_signal())
        .await?;
    tracing::info!("controller stopped");
    Ok(())
}

async fn load_config(client: Client, namespace: &str, name: &str) -> Result<ControllerConfig> {
    let cm = Api::<ConfigMap>::namespaced(client, namespace)
        .get(name)
        .await
        .with_context(|| format!("failed to read configmap {namespace}/{name}"))?;
    ControllerConfig::from_config_map(&cm).with_context(|| format!("invalid configmap {namespace}/{name}"))
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
