// Hop relay: session pairing, signal forwarding and health endpoint.

mod config;
mod health;
mod server;

use std::path::PathBuf;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("hop-relay {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                let Some(p) = args.next() else {
                    bail!("--config needs a path");
                };
                config_path = Some(PathBuf::from(p));
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load(config_path.as_deref())?;
    tracing::info!(
        version = VERSION,
        relay = %cfg.relay_addr(),
        health = %cfg.health_addr(),
        idle_timeout_secs = cfg.directory.idle_timeout_secs,
        "starting hop-relay"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = server::RelayState::shared(cfg.directory.clone());
        let relay_listener = TcpListener::bind(cfg.relay_addr())
            .await
            .with_context(|| format!("binding relay port {}", cfg.relay_addr()))?;
        let health_listener = TcpListener::bind(cfg.health_addr())
            .await
            .with_context(|| format!("binding health port {}", cfg.health_addr()))?;

        let relay_task = tokio::spawn(server::run_relay(relay_listener, state.clone()));
        let health_task = tokio::spawn(health::run_health(health_listener, state.clone()));
        let sweep_task = tokio::spawn(server::run_sweeper(state));

        tokio::select! {
            res = shutdown_signal() => res?,
            res = relay_task => {
                res.context("relay task panicked")?.context("relay listener failed")?;
            }
            res = health_task => {
                res.context("health task panicked")?.context("health listener failed")?;
            }
        }
        sweep_task.abort();
        tracing::info!("shutting down");
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
