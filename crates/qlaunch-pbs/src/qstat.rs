//! Query job status via `qstat -f`.

use camino::Utf8PathBuf;
use qlaunch_parsers::{
    CommandError, non_empty_string, parse_exit_status, parse_memory, parse_pbs_timestamp,
    parse_walltime, run_command, split_attribute,
};
use thiserror::Error;
use tokio::process::Command;

use crate::types::{PbsJob, PbsJobState};

#[derive(Error, Debug)]
pub enum QstatError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Job {0} not found in qstat output")]
    NotFound(String),
}

const JOB_ID_PREFIX: &str = "Job Id:";

/// Parse the full listing printed by `qstat -f`.
///
/// Each job starts with a `Job Id:` line followed by indented
/// `attribute = value` lines. Long values are wrapped onto tab-indented
/// continuation lines, which are joined back.
pub fn parse_qstat_full(output: &str) -> Vec<PbsJob> {
    let mut jobs = Vec::new();
    let mut current: Option<(PbsJob, Vec<(String, String)>)> = None;

    for line in output.lines() {
        if let Some(id) = line.trim_start().strip_prefix(JOB_ID_PREFIX) {
            if let Some((job, attrs)) = current.take() {
                jobs.push(finish_job(job, attrs));
            }
            current = Some((PbsJob::new(id.trim()), Vec::new()));
            continue;
        }
        let Some((_, attrs)) = current.as_mut() else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('\t') {
            if let Some((_, value)) = attrs.last_mut() {
                value.push_str(line.trim());
            }
            continue;
        }
        match split_attribute(line) {
            Some((key, value)) => attrs.push((key.to_string(), value.to_string())),
            None => tracing::warn!("Skipping unrecognised qstat line: {}", line.trim()),
        }
    }
    if let Some((job, attrs)) = current.take() {
        jobs.push(finish_job(job, attrs));
    }
    jobs
}

fn finish_job(mut job: PbsJob, attrs: Vec<(String, String)>) -> PbsJob {
    for (key, value) in attrs {
        match key.as_str() {
            "Job_Name" => job.name = non_empty_string(&value),
            "Job_Owner" => job.owner = non_empty_string(&value),
            "job_state" => job.state = PbsJobState::from_code(&value),
            "queue" => job.queue = non_empty_string(&value),
            // Torque spells it exit_status, PBS Pro Exit_status
            "exit_status" | "Exit_status" => job.exit_status = parse_exit_status(&value),
            "resources_used.walltime" => job.walltime_used = parse_walltime(&value).ok(),
            "resources_used.mem" => job.mem_used = parse_memory(&value).ok(),
            "Resource_List.walltime" => job.walltime_limit = parse_walltime(&value).ok(),
            "job_array_request" | "array_indices_submitted" => {
                job.array_indices = non_empty_string(&value)
            }
            "ctime" => job.submit_time = parse_pbs_timestamp(&value),
            "start_time" | "stime" => job.start_time = parse_pbs_timestamp(&value),
            _ => {}
        }
    }
    job
}

/// `qstat -f <id>`.
#[derive(Debug, Clone)]
pub struct Qstat {
    program: Utf8PathBuf,
}

impl Default for Qstat {
    fn default() -> Self {
        Self::new("qstat")
    }
}

impl Qstat {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Full status of one job.
    pub async fn query_job(&self, job_id: &str) -> Result<PbsJob, QstatError> {
        let mut cmd = Command::new(self.program.as_std_path());
        cmd.args(["-f", job_id]);

        let stdout = run_command(&mut cmd, self.program.as_str()).await?;
        let jobs = parse_qstat_full(&stdout);
        tracing::debug!("qstat returned {} job block(s) for {}", jobs.len(), job_id);

        // qstat may expand an array parent; prefer the exact id
        let mut jobs = jobs.into_iter().peekable();
        let first = jobs.peek().cloned();
        jobs.find(|j| j.job_id == job_id)
            .or(first)
            .ok_or_else(|| QstatError::NotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use qlaunch_parsers::{MemorySize, MemoryUnit, Walltime};

    const TORQUE_OUTPUT: &str = indoc! {"
        Job Id: 4242[].yeti-svc
            Job_Name = c5_k2sc
            Job_Owner = astro@yeti-login.cluster.edu
            resources_used.mem = 1843200kb
            resources_used.walltime = 01:12:40
            job_state = R
            queue = batch
            Error_Path = localhost:/vega/astro/users/k2/logs/
            ctime = Mon Oct 19 09:15:02 2026
            Resource_List.walltime = 04:00:00
            job_array_request = 1-14
            start_time = Mon Oct 19 09:20:11 2026

        Job Id: 4243.yeti-svc
            Job_Name = c5_k2sff
            job_state = C
            exit_status = 1
    "};

    #[test]
    fn test_parse_torque_blocks() {
        let jobs = parse_qstat_full(TORQUE_OUTPUT);
        assert_eq!(jobs.len(), 2);

        let array = &jobs[0];
        assert_eq!(array.job_id, "4242[].yeti-svc");
        assert_eq!(array.name.as_deref(), Some("c5_k2sc"));
        assert_eq!(array.owner.as_deref(), Some("astro@yeti-login.cluster.edu"));
        assert_eq!(array.state, PbsJobState::Running);
        assert_eq!(array.queue.as_deref(), Some("batch"));
        assert_eq!(array.walltime_used, Some(Walltime::from_hms(1, 12, 40)));
        assert_eq!(array.walltime_limit, Some(Walltime::from_hms(4, 0, 0)));
        assert_eq!(
            array.mem_used,
            Some(MemorySize::new(1843200, MemoryUnit::Kilobytes))
        );
        assert_eq!(array.array_indices.as_deref(), Some("1-14"));
        assert!(array.submit_time.is_some());
        assert!(array.start_time.is_some());
        assert_eq!(array.exit_status, None);

        let done = &jobs[1];
        assert_eq!(done.state, PbsJobState::Completed);
        assert_eq!(done.exit_status, Some(1));
    }

    #[test]
    fn test_parse_continuation_lines() {
        let output = "Job Id: 77.pbs01\n    Job_Name = c5_k2sc\n    Variable_List = PBS_O_HOME=/home/astro,\n\tPBS_O_WORKDIR=/vega\n    Exit_status = 0\n    job_state = F\n";
        let jobs = parse_qstat_full(output);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state, PbsJobState::Finished);
        assert_eq!(jobs[0].exit_status, Some(0));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_qstat_full("").is_empty());
        assert!(parse_qstat_full("    job_state = R\n").is_empty());
    }

    #[cfg(unix)]
    mod fake {
        use super::*;
        use camino::Utf8Path;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn fake_qstat(dir: &Utf8Path, body: &str) -> Utf8PathBuf {
            let path = dir.join("qstat");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_query_job() {
            let temp = TempDir::new().unwrap();
            let dir = Utf8Path::from_path(temp.path()).unwrap();
            let listing = dir.join("listing.txt");
            std::fs::write(&listing, TORQUE_OUTPUT).unwrap();
            let qstat = Qstat::new(fake_qstat(dir, &format!("cat '{}'", listing)));

            let job = qstat.query_job("4243.yeti-svc").await.unwrap();
            assert_eq!(job.name.as_deref(), Some("c5_k2sff"));

            // unknown ids fall back to the first block qstat printed
            let job = qstat.query_job("4242").await.unwrap();
            assert_eq!(job.job_id, "4242[].yeti-svc");
        }

        #[tokio::test]
        async fn test_query_unknown_job() {
            let temp = TempDir::new().unwrap();
            let dir = Utf8Path::from_path(temp.path()).unwrap();
            let qstat = Qstat::new(fake_qstat(
                dir,
                "echo 'qstat: Unknown Job Id 99.yeti-svc' >&2\nexit 153",
            ));
            assert!(matches!(
                qstat.query_job("99.yeti-svc").await,
                Err(QstatError::Command(CommandError::Failed { .. }))
            ));

            let empty = Qstat::new(fake_qstat(dir, "exit 0"));
            assert!(matches!(
                empty.query_job("99.yeti-svc").await,
                Err(QstatError::NotFound(_))
            ));
        }
    }
}
