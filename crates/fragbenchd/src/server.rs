//! Server mode: the REST API over one device.
//!
//! In this mode, the daemon:
//! 1. Connects to the configured device, or starts detached when none is
//!    reachable (device routes then answer `503`)
//! 2. Builds the API state: store, pipeline, metrics switch, job slot
//! 3. Serves HTTP until Ctrl-C, then cancels the running job and drains
//!    open connections

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use fragbench_api::{ApiState, build_router};
use fragbench_core::BenchConfig;
use fragbench_device::{AdbClient, BashShell, DeviceHandle};

use crate::commands::connect_device;

pub async fn run_server(config: BenchConfig, port: u16) -> anyhow::Result<()> {
    info!("fragbench daemon starting");
    tokio::fs::create_dir_all(&config.paths.workspace).await?;
    info!(path = %config.paths.workspace.display(), "workspace ready");

    // ── Device ─────────────────────────────────────────────────
    let (device, adb) = match connect_device(&config).await {
        Ok((device, adb)) => (device, adb),
        Err(e) => {
            warn!(error = %e, "no device connected, starting detached");
            let handle = DeviceHandle::detached(e.to_string(), config.paths.remote_volume.clone());
            (handle, AdbClient::from_config(&config.device))
        }
    };

    let host = Arc::new(BashShell::from_config(&config.host));
    let state = ApiState::new(config, device, host, Some(adb));
    let jobs = state.jobs.clone();

    // ── API server ─────────────────────────────────────────────
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            if let Some(job) = jobs.cancel().await {
                info!(job = job.id, kind = ?job.kind, "running job cancelled");
            }
        })
        .await?;

    info!("fragbench daemon stopped");
    Ok(())
}
