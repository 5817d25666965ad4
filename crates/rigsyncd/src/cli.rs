//! Command-line interface.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::StrategyKind;

#[derive(Parser)]
#[command(name = "rigsyncd", about = "Observatory rig synchronization daemon")]
pub struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Run against a simulated in-memory observatory.
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Interval in seconds between status log lines.
    #[arg(long, global = true, default_value = "60")]
    pub status_interval: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Lead the cluster: replicate this rig's state to followers.
    Leader(LeaderArgs),
    /// Follow a leader: frame and capture the same target.
    Follower(FollowerArgs),
}

#[derive(Args, Debug)]
pub struct LeaderArgs {
    /// Address to accept followers on.
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Replication port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Start the scheduler whenever the weather turns OK.
    #[arg(long)]
    pub auto_start: bool,

    /// Schedule file loaded once the rig is ready.
    #[arg(long)]
    pub schedule: Option<PathBuf>,

    /// Pre-cool target temperature in °C.
    #[arg(long, allow_negative_numbers = true)]
    pub pre_cool_temp: Option<f64>,
}

#[derive(Args, Debug)]
pub struct FollowerArgs {
    /// Leader host name or address.
    #[arg(long)]
    pub host: Option<String>,

    /// Leader replication port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Appended to mirrored job and target names.
    #[arg(long)]
    pub suffix: Option<String>,

    /// Sync the mount to each plate solve while aligning.
    #[arg(long)]
    pub auto_sync: Option<bool>,

    /// Autofocus before aligning.
    #[arg(long)]
    pub auto_focus: Option<bool>,

    /// How leader jobs become local work.
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Default sequence; per-target sequences are looked up beside it.
    #[arg(long)]
    pub sequence: Option<PathBuf>,

    /// Schedule template with ${NAME}, ${RA}, ${DEC}, ${PA}, ${SEQUENCE}.
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Directory for generated schedules and sequences.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Pre-cool target temperature in °C.
    #[arg(long, allow_negative_numbers = true)]
    pub pre_cool_temp: Option<f64>,
}
