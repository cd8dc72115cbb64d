//! PBS job types.

use std::fmt;

use chrono::{DateTime, Utc};
use qlaunch_parsers::{MemorySize, Walltime};

/// Identifier returned by a successful `qsub`, e.g. `12345.server` or
/// `12345[].server` for an array job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    /// Full id as printed by qsub.
    pub id: String,
    /// Numeric sequence part.
    pub sequence: u64,
    /// Server suffix, if qsub printed one.
    pub server: Option<String>,
    /// Whether the id names an array parent (`[]`).
    pub is_array: bool,
}

impl JobHandle {
    /// Id of one task of an array job, e.g. `12345[3].server`.
    ///
    /// None for a job that is not an array.
    pub fn task_id(&self, index: u32) -> Option<String> {
        if !self.is_array {
            return None;
        }
        Some(match &self.server {
            Some(server) => format!("{}[{}].{}", self.sequence, index, server),
            None => format!("{}[{}]", self.sequence, index),
        })
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// PBS job state, from the single-letter `job_state` code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PbsJobState {
    /// Q
    Queued,
    /// R
    Running,
    /// H
    Held,
    /// E: exiting after having run.
    Exiting,
    /// C (Torque)
    Completed,
    /// F (PBS Pro)
    Finished,
    /// S
    Suspended,
    /// W: waiting for its start time.
    Waiting,
    /// T: being moved to a new location.
    Transit,
    /// B: array job with at least one subjob started.
    ArrayBegun,
    /// X: finished subjob.
    SubjobFinished,
    /// U: suspended because the workstation became busy.
    UserBusy,
    Unknown(String),
}

impl PbsJobState {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "Q" => Self::Queued,
            "R" => Self::Running,
            "H" => Self::Held,
            "E" => Self::Exiting,
            "C" => Self::Completed,
            "F" => Self::Finished,
            "S" => Self::Suspended,
            "W" => Self::Waiting,
            "T" => Self::Transit,
            "B" => Self::ArrayBegun,
            "X" => Self::SubjobFinished,
            "U" => Self::UserBusy,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the job will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Finished | Self::SubjobFinished
        )
    }
}

impl fmt::Display for PbsJobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Held => "held",
            Self::Exiting => "exiting",
            Self::Completed => "completed",
            Self::Finished => "finished",
            Self::Suspended => "suspended",
            Self::Waiting => "waiting",
            Self::Transit => "transit",
            Self::ArrayBegun => "array begun",
            Self::SubjobFinished => "subjob finished",
            Self::UserBusy => "suspended (busy)",
            Self::Unknown(code) => return write!(f, "unknown ({})", code),
        };
        f.write_str(label)
    }
}

/// PBS job information from `qstat -f`.
#[derive(Debug, Clone, PartialEq)]
pub struct PbsJob {
    /// Full job id
    pub job_id: String,

    pub name: Option<String>,

    /// `user@host`
    pub owner: Option<String>,

    pub state: PbsJobState,

    pub queue: Option<String>,

    /// Set once the job has exited
    pub exit_status: Option<i32>,

    pub walltime_used: Option<Walltime>,

    pub mem_used: Option<MemorySize>,

    pub walltime_limit: Option<Walltime>,

    /// Requested array range, e.g. `1-14`
    pub array_indices: Option<String>,

    pub submit_time: Option<DateTime<Utc>>,

    pub start_time: Option<DateTime<Utc>>,
}

impl PbsJob {
    pub(crate) fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            name: None,
            owner: None,
            state: PbsJobState::Unknown(String::new()),
            queue: None,
            exit_status: None,
            walltime_used: None,
            mem_used: None,
            walltime_limit: None,
            array_indices: None,
            submit_time: None,
            start_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        let codes = "QRHECFSWTBXU";
        let states: Vec<PbsJobState> = codes
            .chars()
            .map(|c| PbsJobState::from_code(&c.to_string()))
            .collect();
        assert!(!states.iter().any(|s| matches!(s, PbsJobState::Unknown(_))));
        assert_eq!(PbsJobState::from_code("R"), PbsJobState::Running);
        assert_eq!(
            PbsJobState::from_code("Z"),
            PbsJobState::Unknown("Z".to_string())
        );
        assert!(PbsJobState::from_code("C").is_terminal());
        assert!(!PbsJobState::from_code("Q").is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PbsJobState::Queued.to_string(), "queued");
        assert_eq!(
            PbsJobState::Unknown("Z".to_string()).to_string(),
            "unknown (Z)"
        );
    }
}
