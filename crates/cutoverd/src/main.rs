//! cutoverd: the Cutover daemon.
//!
//! Single binary that assembles the controller:
//! - State store and audit log (redb)
//! - Fleet registry
//! - Health monitor and synthetic checks
//! - Cutover state machine
//! - REST API
//!
//! # Usage
//!
//! ```text
//! cutoverd serve --config cutover.toml --port 8480 --data-dir /var/lib/cutover
//! cutoverd plan --strategy linear --step-percentage 25 --interval-minutes 5
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cutover_core::{CutoverConfig, RoutingStrategy, TrafficStep};
use cutover_rollout::{CutoverController, compute_schedule};
use cutover_state::StateStore;

const DEFAULT_PORT: u16 = 8480;
const DEFAULT_DATA_DIR: &str = "/var/lib/cutover";
const DEFAULT_LOG_FILTER: &str = "info,cutoverd=debug,cutover=debug";

#[derive(Parser)]
#[command(name = "cutoverd", about = "Blue/green deployment cutover controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and its REST API.
    Serve {
        /// Path to cutover.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides `[server] port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state. Overrides `[server] data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the traffic schedule a strategy would produce.
    Plan {
        #[arg(long, value_enum)]
        strategy: StrategyArg,

        /// Canary: share of traffic sent to green during the bake.
        #[arg(long, default_value = "10")]
        percentage: u8,

        /// Canary: bake time in minutes.
        #[arg(long, default_value = "10")]
        bake_minutes: u64,

        /// Linear: share of traffic added per step.
        #[arg(long, default_value = "10")]
        step_percentage: u8,

        /// Linear: minutes between steps.
        #[arg(long, default_value = "1")]
        interval_minutes: u64,

        /// Print the schedule as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Canary,
    Linear,
    AllAtOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let config = match &config {
                Some(path) => CutoverConfig::from_file(path)?,
                None => CutoverConfig::default(),
            };
            init_tracing(config.log_filter(), config.log_json())?;

            let port = port.or(config.port()).unwrap_or(DEFAULT_PORT);
            let data_dir = data_dir
                .or_else(|| config.data_dir().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
            run_serve(config, port, data_dir).await
        }
        Command::Plan {
            strategy,
            percentage,
            bake_minutes,
            step_percentage,
            interval_minutes,
            json,
        } => {
            init_tracing(None, false)?;
            let strategy = match strategy {
                StrategyArg::Canary => RoutingStrategy::Canary {
                    percentage,
                    bake_minutes,
                },
                StrategyArg::Linear => RoutingStrategy::Linear {
                    step_percentage,
                    interval_minutes,
                },
                StrategyArg::AllAtOnce => RoutingStrategy::AllAtOnce,
            };
            let steps = compute_schedule(&strategy)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                print!("{}", render_plan(&strategy, &steps));
            }
            Ok(())
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the config filter.
fn init_tracing(filter: Option<&str>, json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter.unwrap_or(DEFAULT_LOG_FILTER))?,
    };

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn render_plan(strategy: &RoutingStrategy, steps: &[TrafficStep]) -> String {
    let mut out = format!("strategy: {}\n", strategy.label());
    for step in steps {
        out.push_str(&format!(
            "  step {:>2}  green {:>3}%  at +{}s  hold {}s\n",
            step.index + 1,
            step.target,
            step.offset_secs,
            step.hold_secs
        ));
    }
    out
}

async fn run_serve(config: CutoverConfig, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("Cutover daemon starting");

    let health_settings = config.health()?;
    let controller_settings = config.controller();

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("cutover.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let controller = CutoverController::builder(store)
        .health_settings(health_settings)
        .settings(controller_settings)
        .build()?;
    info!(
        fleets = controller.registry().list().len(),
        "controller initialized"
    );

    let resumed = controller.resume().await?;
    if resumed > 0 {
        info!(resumed, "resumed in-progress deployments");
    }

    // ── Start API server ───────────────────────────────────────

    let router = cutover_api::build_router(controller.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    controller.shutdown().await;

    info!("Cutover daemon stopped");
    Ok(())
}
