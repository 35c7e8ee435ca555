//! fragbenchd: the fragbench daemon.
//!
//! One binary for the REST server and for one-shot benchmark commands
//! against the connected device:
//! - `serve`: REST API over the device, store and pipeline
//! - `sweep`: fill step by step and measure every query at each step
//! - `step`: measure one step at the current occupancy
//! - `redo-host`: replay host executions of a stored run
//! - `fill` / `drain`: converge occupancy to a target
//! - `metrics`: print one Prometheus sample
//!
//! # Usage
//!
//! ```text
//! fragbenchd --config fragbench.toml serve --port 3000
//! fragbenchd sweep --interval 10 --target 90
//! ```

mod commands;
mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fragbench_core::BenchConfig;

#[derive(Parser)]
#[command(name = "fragbenchd", about = "Android media database fragmentation benchmark")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "fragbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Port to listen on, overriding `[server] port`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run a full occupancy sweep under a new run id.
    Sweep {
        /// Step width in percent.
        #[arg(long)]
        interval: u32,

        /// Last step in percent.
        #[arg(long)]
        target: u32,
    },

    /// Measure one step of a run at the current occupancy.
    Step {
        #[arg(long)]
        run: String,

        #[arg(long)]
        step: u32,

        /// Queries to run; the whole catalog when omitted.
        #[arg(long = "query")]
        queries: Vec<String>,
    },

    /// Delete and replay the host executions of a run.
    RedoHost {
        #[arg(long)]
        run: String,

        #[arg(long = "query")]
        queries: Vec<String>,
    },

    /// Copy image batches until occupancy reaches the target.
    Fill {
        #[arg(long)]
        target: f64,
    },

    /// Remove image batches until occupancy falls to the target.
    Drain {
        #[arg(long)]
        target: f64,
    },

    /// Sample device metrics once and print them in Prometheus format.
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fragbenchd=debug,fragbench=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = BenchConfig::load_or_default(&cli.config)?;

    match cli.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            server::run_server(config, port).await
        }
        Command::Sweep { interval, target } => commands::sweep(config, interval, target).await,
        Command::Step { run, step, queries } => commands::step(config, &run, step, &queries).await,
        Command::RedoHost { run, queries } => commands::redo_host(config, &run, &queries).await,
        Command::Fill { target } => commands::fill(config, target).await,
        Command::Drain { target } => commands::drain(config, target).await,
        Command::Metrics => commands::metrics(config).await,
    }
}
