//! Schedule jobs and the ESL schedule format.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// One target + exposure-sequence unit of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleJob {
    pub name: String,
    /// J2000 right ascension in hours.
    pub ra: f64,
    /// J2000 declination in degrees.
    pub dec: f64,
    pub position_angle: f64,
    /// Path or URL of the exposure sequence.
    pub sequence: String,
    /// Focal ratio of the optical train the job was planned on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_ratio: Option<f64>,
    /// Sequence file content, attached by the leader before replication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_content: Option<String>,
}

/// Shape of the scheduler's `currentJobJson` property.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusJob {
    name: String,
    #[serde(default, rename = "targetRA")]
    target_ra: f64,
    #[serde(default, rename = "targetDEC")]
    target_dec: f64,
    #[serde(default)]
    pa: f64,
    #[serde(default)]
    sequence: String,
}

impl ScheduleJob {
    /// Parse the scheduler's JSON description of its active job.
    pub fn from_bus_json(json: &str) -> StateResult<Self> {
        let job: BusJob =
            serde_json::from_str(json).map_err(|e| StateError::Deserialize(e.to_string()))?;
        Ok(Self {
            name: job.name,
            ra: job.target_ra,
            dec: job.target_dec,
            position_angle: job.pa,
            sequence: job.sequence,
            focal_ratio: None,
            sequence_content: None,
        })
    }

    pub fn with_focal_ratio(mut self, ratio: Option<f64>) -> Self {
        self.focal_ratio = ratio.filter(|r| *r > 0.0);
        self
    }

    pub fn with_sequence_content(mut self, content: Option<String>) -> Self {
        self.sequence_content = content;
        self
    }

    /// Name of the job mirrored on a follower: `<name>_<suffix>`, file-safe.
    pub fn follower_name(&self, suffix: &str) -> String {
        local_name(&self.name, suffix)
    }

    /// Whether two jobs describe the same leader job.
    pub fn same_identity(&self, other: &ScheduleJob) -> bool {
        self.name == other.name && self.sequence == other.sequence
    }
}

/// Lower-case `name`, replace spaces and dashes with `_`, append `_<suffix>`.
pub fn local_name(name: &str, suffix: &str) -> String {
    let base = file_safe(name);
    if suffix.is_empty() {
        base
    } else {
        format!("{base}_{}", file_safe(suffix))
    }
}

pub(crate) fn file_safe(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

// ── ESL schedule documents ─────────────────────────────────────────

static JOB_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Job>(.*?)</Job>").expect("static regex"));

fn tag<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}");
    let start = block.find(&open)?;
    let after_open = start + block[start..].find('>')? + 1;
    let close = format!("</{name}>");
    let end = after_open + block[after_open..].find(&close)?;
    Some(block[after_open..end].trim())
}

fn number(block: &str, name: &str, index: usize) -> StateResult<f64> {
    let raw = tag(block, name).ok_or_else(|| StateError::Parse {
        job: index,
        reason: format!("missing <{name}>"),
    })?;
    raw.parse().map_err(|_| StateError::Parse {
        job: index,
        reason: format!("<{name}> is not a number: {raw}"),
    })
}

/// Parse the jobs of an ESL schedule document.
///
/// Only name, coordinates, position angle and sequence are read; a missing
/// position angle defaults to 0.
pub fn parse_schedule(xml: &str) -> StateResult<Vec<ScheduleJob>> {
    let mut jobs = Vec::new();
    for (index, caps) in JOB_BLOCK.captures_iter(xml).enumerate() {
        let block = &caps[1];
        let name = tag(block, "Name").ok_or_else(|| StateError::Parse {
            job: index,
            reason: "missing <Name>".into(),
        })?;
        let position_angle = match tag(block, "PositionAngle") {
            Some(_) => number(block, "PositionAngle", index)?,
            None => 0.0,
        };
        jobs.push(ScheduleJob {
            name: unescape(name),
            ra: number(block, "J2000RA", index)?,
            dec: number(block, "J2000DE", index)?,
            position_angle,
            sequence: tag(block, "Sequence").map(unescape).unwrap_or_default(),
            focal_ratio: None,
            sequence_content: None,
        });
    }
    Ok(jobs)
}

/// Schedule template used when no template file is configured.
pub const DEFAULT_SCHEDULE_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SchedulerList version='1.6'>
<Profile>Default</Profile>
<Job>
<Name>${NAME}</Name>
<Priority>10</Priority>
<Coordinates>
<J2000RA>${RA}</J2000RA>
<J2000DE>${DEC}</J2000DE>
</Coordinates>
<PositionAngle>${PA}</PositionAngle>
<Sequence>${SEQUENCE}</Sequence>
<StartupCondition>
<Condition>ASAP</Condition>
</StartupCondition>
<Constraints>
</Constraints>
<CompletionCondition>
<Condition>Loop</Condition>
</CompletionCondition>
<Steps>
<Step>Track</Step>
</Steps>
</Job>
<ErrorHandlingStrategy value='1'>
<delay>0</delay>
</ErrorHandlingStrategy>
<StartupProcedure>
</StartupProcedure>
<ShutdownProcedure>
</ShutdownProcedure>
</SchedulerList>
"#;

/// Fill `${NAME}`, `${RA}`, `${DEC}`, `${PA}` and `${SEQUENCE}` in a
/// schedule template.
pub fn render_schedule(template: &str, job: &ScheduleJob) -> String {
    template
        .replace("${NAME}", &escape(&job.name))
        .replace("${RA}", &job.ra.to_string())
        .replace("${DEC}", &job.dec.to_string())
        .replace("${PA}", &job.position_angle.to_string())
        .replace("${SEQUENCE}", &escape(&job.sequence))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
