//! PBS integration for qlaunch.
//!
//! Submit job scripts via qsub, query job status via `qstat -f`, and run task
//! command lines locally.

pub mod process;
pub mod qstat;
pub mod qsub;
pub mod types;

pub use process::{ExternalProcess, LocalProcess, ProcessError};
pub use qstat::{Qstat, QstatError, parse_qstat_full};
pub use qsub::{JobScheduler, Qsub, SubmitError, parse_job_id};
pub use types::{JobHandle, PbsJob, PbsJobState};
