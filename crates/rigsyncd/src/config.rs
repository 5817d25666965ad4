//! rigsyncd.toml configuration.
//!
//! Every field is optional; command-line flags override file values.
//!
//! ```toml
//! port = 8888
//! pre_cool_temp = -15.0
//!
//! [leader]
//! auto_start = true
//! schedule = "/home/astro/current_schedule.esl"
//!
//! [follower]
//! host = "leader.local"
//! strategy = "sequence-by-target"
//! sequence = "/home/astro/sequences/default.esq"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use rigsync_cluster::{FollowerConfig, GeneratedSchedule, JobStrategy, LeaderConfig, SequenceByTarget};
use serde::Deserialize;

use crate::cli::{FollowerArgs, LeaderArgs};

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_PRE_COOL_TEMP: f64 = -15.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeFileConfig {
    pub port: Option<u16>,
    pub pre_cool_temp: Option<f64>,
    pub log_json: Option<bool>,
    pub leader: LeaderFileConfig,
    pub follower: FollowerFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaderFileConfig {
    pub bind: Option<IpAddr>,
    pub auto_start: Option<bool>,
    pub schedule: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FollowerFileConfig {
    pub host: Option<String>,
    pub suffix: Option<String>,
    pub auto_sync: Option<bool>,
    pub auto_focus: Option<bool>,
    pub strategy: Option<StrategyKind>,
    pub sequence: Option<PathBuf>,
    pub template: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// Job strategy of a follower. There is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    SequenceByTarget,
    GeneratedSchedule,
}

impl NodeFileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: NodeFileConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    fn pre_cool_temp(&self, flag: Option<f64>) -> f64 {
        flag.or(self.pre_cool_temp).unwrap_or(DEFAULT_PRE_COOL_TEMP)
    }

    pub fn leader(&self, args: &LeaderArgs) -> LeaderSettings {
        let file = &self.leader;
        let bind = args
            .bind
            .or(file.bind)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = args.port.or(self.port).unwrap_or(DEFAULT_PORT);

        let mut leader = LeaderConfig::new(SocketAddr::new(bind, port))
            .with_auto_start(args.auto_start || file.auto_start.unwrap_or(false));
        if let Some(schedule) = args.schedule.clone().or_else(|| file.schedule.clone()) {
            leader = leader.with_schedule(schedule);
        }
        LeaderSettings {
            leader,
            pre_cool_temp: self.pre_cool_temp(args.pre_cool_temp),
        }
    }

    pub fn follower(&self, args: &FollowerArgs) -> anyhow::Result<FollowerSettings> {
        let file = &self.follower;
        let Some(host) = args.host.clone().or_else(|| file.host.clone()) else {
            bail!("a follower needs the leader host (--host or [follower] host)");
        };
        let port = args.port.or(self.port).unwrap_or(DEFAULT_PORT);

        let mut follower = FollowerConfig::new(format!("{host}:{port}"));
        if let Some(suffix) = args.suffix.clone().or_else(|| file.suffix.clone()) {
            follower = follower.with_suffix(suffix);
        }
        if let Some(auto_sync) = args.auto_sync.or(file.auto_sync) {
            follower = follower.with_auto_sync(auto_sync);
        }
        if let Some(auto_focus) = args.auto_focus.or(file.auto_focus) {
            follower = follower.with_auto_focus(auto_focus);
        }

        let Some(kind) = args.strategy.or(file.strategy) else {
            bail!("a follower needs a job strategy (--strategy or [follower] strategy)");
        };
        let strategy = match kind {
            StrategyKind::SequenceByTarget => {
                let Some(sequence) = args.sequence.clone().or_else(|| file.sequence.clone()) else {
                    bail!("sequence-by-target needs a sequence file (--sequence)");
                };
                StrategySettings::SequenceByTarget { sequence }
            }
            StrategyKind::GeneratedSchedule => {
                let Some(work_dir) = args.work_dir.clone().or_else(|| file.work_dir.clone()) else {
                    bail!("generated-schedule needs a work directory (--work-dir)");
                };
                StrategySettings::GeneratedSchedule {
                    work_dir,
                    template: args.template.clone().or_else(|| file.template.clone()),
                }
            }
        };

        Ok(FollowerSettings {
            follower,
            strategy,
            pre_cool_temp: self.pre_cool_temp(args.pre_cool_temp),
        })
    }
}

/// Resolved leader options.
#[derive(Debug, Clone)]
pub struct LeaderSettings {
    pub leader: LeaderConfig,
    pub pre_cool_temp: f64,
}

/// Resolved follower options.
#[derive(Debug, Clone)]
pub struct FollowerSettings {
    pub follower: FollowerConfig,
    pub strategy: StrategySettings,
    pub pre_cool_temp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategySettings {
    SequenceByTarget {
        sequence: PathBuf,
    },
    GeneratedSchedule {
        work_dir: PathBuf,
        template: Option<PathBuf>,
    },
}

impl StrategySettings {
    pub async fn build(&self) -> anyhow::Result<Arc<dyn JobStrategy>> {
        Ok(match self {
            StrategySettings::SequenceByTarget { sequence } => {
                Arc::new(SequenceByTarget::beside(sequence))
            }
            StrategySettings::GeneratedSchedule { work_dir, template } => {
                std::fs::create_dir_all(work_dir)
                    .with_context(|| format!("creating work dir {}", work_dir.display()))?;
                let strategy = GeneratedSchedule::new(work_dir);
                match template {
                    Some(path) => Arc::new(
                        strategy
                            .with_template_file(path)
                            .await
                            .with_context(|| format!("loading template {}", path.display()))?,
                    ),
                    None => Arc::new(strategy),
                }
            }
        })
    }
}
