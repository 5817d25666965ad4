//! rigsyncd — the rig synchronization daemon.
//!
//! Runs one node of an observatory cluster:
//! - Device status router and application supervisor
//! - Leader: replication listener and weather-gated scheduler auto-start
//! - Follower: leader receiver and the focus/align/capture stage loop
//! - Periodic status log
//!
//! # Usage
//!
//! ```text
//! rigsyncd --simulate leader --port 8888 --auto-start
//! rigsyncd --simulate follower --host leader.local \
//!     --strategy sequence-by-target --sequence ~/sequences/default.esq
//! ```

mod cli;
mod config;
mod simulate;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use rigsync_bus::AutomationBus;
use rigsync_cluster::{Follower, Leader, Node};
use rigsync_router::{ProcessControl, RouterConfig, StatusRouter};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::config::NodeFileConfig;

const DEFAULT_LOG_FILTER: &str = "info,rigsyncd=debug,rigsync=debug";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => NodeFileConfig::from_file(path)?,
        None => NodeFileConfig::default(),
    };
    init_tracing(cli.log_json || file.log_json.unwrap_or(false));

    if !cli.simulate {
        bail!("no automation bus binding is available in this build; run with --simulate");
    }
    let sim = simulate::observatory();
    let bus: Arc<dyn AutomationBus> = sim.clone();
    let process: Arc<dyn ProcessControl> = Arc::new(simulate::SimulatedProcess::new(sim));
    let status_interval = Duration::from_secs(cli.status_interval.max(1));

    match cli.command {
        Command::Leader(args) => {
            let settings = file.leader(&args);
            let router = Arc::new(StatusRouter::new(
                bus,
                RouterConfig::default().with_pre_cool_temp(settings.pre_cool_temp),
            ));
            let leader = Arc::new(Leader::new(router, settings.leader).with_process(process.clone()));
            run_leader(leader, process, status_interval).await
        }
        Command::Follower(args) => {
            let settings = file.follower(&args)?;
            let strategy = settings.strategy.build().await?;
            let router = Arc::new(StatusRouter::new(
                bus,
                RouterConfig::default()
                    .with_pre_cool_temp(settings.pre_cool_temp)
                    .with_local_thermal_policy(false),
            ));
            let follower = Arc::new(Follower::new(router, settings.follower, strategy));
            run_follower(follower, process, status_interval).await
        }
    }
}

async fn run_leader(
    leader: Arc<Leader>,
    process: Arc<dyn ProcessControl>,
    status_interval: Duration,
) -> anyhow::Result<()> {
    let listen = leader.config().listen;
    info!(%listen, auto_start = leader.config().auto_start, "rigsyncd starting as leader");
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding replication listener on {listen}"))?;

    let node = Node::Leader(leader.clone());
    run_node(node, process, status_interval, move |shutdown| {
        vec![tokio::spawn(async move {
            if let Err(e) = leader.serve(listener, shutdown).await {
                error!(error = %e, "replication listener failed");
            }
        })]
    })
    .await
}

async fn run_follower(
    follower: Arc<Follower>,
    process: Arc<dyn ProcessControl>,
    status_interval: Duration,
) -> anyhow::Result<()> {
    info!(
        leader = %follower.config().leader,
        strategy = follower.strategy_name(),
        suffix = %follower.config().suffix,
        "rigsyncd starting as follower"
    );
    let node = Node::Follower(follower.clone());
    run_node(node, process, status_interval, move |shutdown| {
        vec![
            tokio::spawn(follower.clone().run_receiver(shutdown.clone())),
            tokio::spawn(follower.run_stage_loop(shutdown)),
        ]
    })
    .await
}

/// Supervise the node, start its role tasks and run until Ctrl-C.
async fn run_node<F>(
    node: Node,
    process: Arc<dyn ProcessControl>,
    status_interval: Duration,
    role_tasks: F,
) -> anyhow::Result<()>
where
    F: FnOnce(watch::Receiver<bool>) -> Vec<JoinHandle<()>>,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = vec![
        node.router()
            .supervise(node.hooks(), process, shutdown_rx.clone()),
    ];
    tasks.extend(role_tasks(shutdown_rx.clone()));
    tasks.push(tokio::spawn(log_status(node, status_interval, shutdown_rx)));

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "task ended abnormally");
        }
    }
    info!("rigsyncd stopped");
    Ok(())
}

async fn log_status(node: Node, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => match node.status().await {
                Ok(status) => match serde_json::to_string(&status) {
                    Ok(json) => info!(role = ?node.role(), status = %json, "node status"),
                    Err(e) => warn!(error = %e, "cannot serialize node status"),
                },
                Err(e) => debug!(error = %e, "node status unavailable"),
            },
            _ = shutdown.changed() => break,
        }
    }
}
