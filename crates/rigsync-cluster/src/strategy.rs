//! How a follower turns what the leader is doing into local work.
//!
//! - [`SequenceByTarget`] follows the leader's capture target. It looks up
//!   a prepared sequence named after the target in a directory, optionally
//!   falling back to a default sequence, and files local frames under
//!   `<target>_<suffix>`. A `<sequence>.rot` file overrides the framing
//!   angle.
//! - [`GeneratedSchedule`] follows the leader's scheduler job. It writes a
//!   local schedule and sequence from the job, scaling exposures by the
//!   focal-ratio difference.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rigsync_router::StatusRouter;
use rigsync_state::{
    DEFAULT_SCHEDULE_TEMPLATE, ScheduleJob, adjust_exposures, normalize_pa, render_schedule,
    sequence_file_name,
};
use tracing::{debug, info, warn};

use crate::error::{JobError, JobResult};

/// Target name used while the leader has not reported one.
pub const UNKNOWN_TARGET: &str = "Unknown";

/// What the leader is working on, as last mirrored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaderWork {
    /// Target the leader's capture module files frames under.
    pub target: Option<String>,
    /// The leader scheduler's active job.
    pub job: Option<ScheduleJob>,
}

/// Local job materialized for the leader's work.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedJob {
    pub name: String,
    pub sequence: PathBuf,
    pub schedule: Option<PathBuf>,
    /// Framing angle that replaces the leader's, when set.
    pub position_angle: Option<f64>,
}

#[async_trait]
pub trait JobStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Identity of the local work `work` calls for. A new key makes the
    /// follower prepare again; `None` means there is nothing to follow.
    fn work_key(&self, work: &LeaderWork) -> Option<String>;

    /// Build and load the local job mirroring `work`.
    async fn prepare(
        &self,
        router: &StatusRouter,
        work: &LeaderWork,
        suffix: &str,
    ) -> JobResult<PreparedJob>;

    /// Reload the capture queue once it has run dry.
    async fn reload(&self, router: &StatusRouter, prepared: &PreparedJob) -> JobResult<()> {
        if router.load_sequence(&prepared.sequence).await? {
            Ok(())
        } else {
            Err(JobError::Rejected(prepared.sequence.clone()))
        }
    }
}

// ── Sequence by target ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SequenceByTarget {
    dir: PathBuf,
    fallback: Option<PathBuf>,
}

impl SequenceByTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fallback: None,
        }
    }

    /// Look up targets next to `sequence`, loading `sequence` itself for
    /// targets without their own file.
    pub fn beside(sequence: impl Into<PathBuf>) -> Self {
        let sequence = sequence.into();
        let dir = sequence
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            dir,
            fallback: Some(sequence),
        }
    }

    /// Sequence file for `target`, matching names case-insensitively with
    /// spaces and dashes read as underscores.
    async fn find_sequence(&self, target: &str) -> JobResult<Option<PathBuf>> {
        let wanted = sequence_file_name(target);
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JobError::io(&self.dir)(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(JobError::io(&self.dir))? {
            let path = entry.path();
            let is_sequence = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("esq"));
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if is_sequence && sequence_file_name(stem) == wanted {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// `<sequence>.rot`, e.g. `m31.esq.rot`.
fn rotation_path(sequence: &Path) -> PathBuf {
    let mut path = OsString::from(sequence.as_os_str());
    path.push(".rot");
    PathBuf::from(path)
}

/// Read a `.rot` override. A missing or unparsable file means no override.
async fn read_rotation(path: &Path) -> Option<f64> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(pa) => Some(normalize_pa(pa)),
            Err(_) => {
                warn!(path = %path.display(), "ignoring malformed rotation override");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read rotation override");
            None
        }
    }
}

#[async_trait]
impl JobStrategy for SequenceByTarget {
    fn name(&self) -> &'static str {
        "sequence-by-target"
    }

    fn work_key(&self, work: &LeaderWork) -> Option<String> {
        work.target.clone().filter(|target| !target.trim().is_empty())
    }

    async fn prepare(
        &self,
        router: &StatusRouter,
        work: &LeaderWork,
        suffix: &str,
    ) -> JobResult<PreparedJob> {
        let target = self
            .work_key(work)
            .unwrap_or_else(|| UNKNOWN_TARGET.to_string());
        let sequence = match self.find_sequence(&target).await? {
            Some(sequence) => sequence,
            None => match &self.fallback {
                Some(fallback) => {
                    debug!(%target, fallback = %fallback.display(), "no target sequence, using default");
                    fallback.clone()
                }
                None => return Err(JobError::NoSequence(target)),
            },
        };
        let position_angle = read_rotation(&rotation_path(&sequence)).await;

        if !router.load_sequence(&sequence).await? {
            return Err(JobError::Rejected(sequence));
        }
        let name = format!("{target}_{suffix}");
        router.set_capture_target(&name).await?;
        info!(
            %target,
            sequence = %sequence.display(),
            pa_override = position_angle,
            "target sequence loaded"
        );
        Ok(PreparedJob {
            name,
            sequence,
            schedule: None,
            position_angle,
        })
    }
}

// ── Generated schedule ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GeneratedSchedule {
    template: String,
    work_dir: PathBuf,
}

impl GeneratedSchedule {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: DEFAULT_SCHEDULE_TEMPLATE.to_string(),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Use the schedule template stored at `path`.
    pub async fn with_template_file(self, path: &Path) -> JobResult<Self> {
        let template = tokio::fs::read_to_string(path)
            .await
            .map_err(JobError::io(path))?;
        Ok(self.with_template(template))
    }

    /// Leader sequence content: shipped with the job, or read from the
    /// same path when storage is shared.
    async fn sequence_content(job: &ScheduleJob) -> JobResult<String> {
        if let Some(content) = &job.sequence_content {
            return Ok(content.clone());
        }
        let path = job.sequence.strip_prefix("file://").unwrap_or(&job.sequence);
        if path.is_empty() {
            return Err(JobError::NoSequence(job.name.clone()));
        }
        tokio::fs::read_to_string(path)
            .await
            .map_err(|_| JobError::NoSequence(job.name.clone()))
    }
}

#[async_trait]
impl JobStrategy for GeneratedSchedule {
    fn name(&self) -> &'static str {
        "generated-schedule"
    }

    fn work_key(&self, work: &LeaderWork) -> Option<String> {
        work.job
            .as_ref()
            .map(|job| format!("{}@{}", job.name, job.sequence))
    }

    async fn prepare(
        &self,
        router: &StatusRouter,
        work: &LeaderWork,
        suffix: &str,
    ) -> JobResult<PreparedJob> {
        let job = work.job.as_ref().ok_or(JobError::NoJob)?;
        let name = job.follower_name(suffix);
        let mut content = Self::sequence_content(job).await?;
        let local_ratio = router.focal_ratio().await;
        if let (Some(leader), Some(local)) = (job.focal_ratio, local_ratio) {
            content = adjust_exposures(&content, leader, local);
        }

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(JobError::io(&self.work_dir))?;
        let sequence = self.work_dir.join(sequence_file_name(&name));
        tokio::fs::write(&sequence, &content)
            .await
            .map_err(JobError::io(&sequence))?;

        let local = ScheduleJob {
            name: name.clone(),
            sequence: sequence.display().to_string(),
            sequence_content: None,
            focal_ratio: local_ratio,
            ..job.clone()
        };
        let schedule = sequence.with_extension("esl");
        tokio::fs::write(&schedule, render_schedule(&self.template, &local))
            .await
            .map_err(JobError::io(&schedule))?;

        if !router.load_schedule(&schedule).await? {
            return Err(JobError::Rejected(schedule));
        }
        if !router.load_sequence(&sequence).await? {
            return Err(JobError::Rejected(sequence));
        }
        info!(
            job = %name,
            leader_ratio = job.focal_ratio,
            local_ratio,
            "generated local schedule"
        );
        Ok(PreparedJob {
            name,
            sequence,
            schedule: Some(schedule),
            position_angle: None,
        })
    }
}
