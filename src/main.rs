//! Per-job deployment runner entry point.
//!
//! Reads the job configuration from its fixed path, connects to the
//! control-plane agent and the container engine, and executes exactly one
//! action. SIGINT/SIGTERM abandon in-flight work; partially materialized
//! artifacts stay labeled for the next run to discover.

use anyhow::Context;

use deploy_runner::agent::AgentClient;
use deploy_runner::config::{Configuration, CONFIG_PATH};
use deploy_runner::platform;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Configuration::load(CONFIG_PATH)
        .with_context(|| format!("load configuration from {CONFIG_PATH}"))?;

    let agent = AgentClient::from_env().context("configure agent client")?;

    let backend = platform::select_platform(&config.platform, agent).await?;

    tracing::info!(
        job = %config.job,
        run = %config.run,
        action = %config.action,
        "starting runner"
    );

    tokio::select! {
        result = backend.run(config) => {
            result?;
            tracing::info!("runner finished");
            Ok(())
        }
        _ = shutdown_signal() => {
            tracing::warn!("interrupted; leaving partial state labeled for the next run");
            std::process::exit(130);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("failed to install SIGTERM handler: {err}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
