//! Built-in launchers for the K2 campaign 5 light-curve analyses.

use camino::Utf8PathBuf;
use qlaunch_parsers::{MemorySize, Walltime};
use serde::{Deserialize, Serialize};

use crate::command::CommandLine;
use crate::descriptor::{DescriptorError, Dialect, JobDescriptorBuilder, LogPath, MailEvents};
use crate::launcher::{LaunchError, Launcher, LauncherBuilder};
use crate::shard::{OutputNaming, ShardMode};

pub const K2SFF: &str = "k2sff";
pub const K2SC: &str = "k2sc";

/// Names of the built-in launchers.
pub const PRESET_NAMES: [&str; 2] = [K2SFF, K2SC];

fn default_log_host() -> String {
    "localhost".to_string()
}

/// Site values shared by every launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    /// Group list charged for the job (`-W group_list=`).
    pub account: Option<String>,
    pub mail_to: Option<String>,
    /// Directory receiving both stdout and stderr logs.
    pub log_dir: Option<Utf8PathBuf>,
    #[serde(default = "default_log_host")]
    pub log_host: String,
    /// Directory the job `cd`s into before running its command.
    pub work_dir: Option<Utf8PathBuf>,
    pub dialect: Dialect,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            account: None,
            mail_to: None,
            log_dir: None,
            log_host: default_log_host(),
            work_dir: None,
            dialect: Dialect::default(),
        }
    }
}

impl Defaults {
    /// Fill in account, mail address and log paths on a descriptor builder.
    pub fn apply(
        &self,
        mut builder: JobDescriptorBuilder,
    ) -> Result<JobDescriptorBuilder, DescriptorError> {
        if let Some(account) = &self.account {
            builder = builder.account(account);
        }
        if let Some(address) = &self.mail_to {
            builder = builder.mail_to(address);
        }
        if let Some(dir) = &self.log_dir {
            let path = LogPath::on_host(&self.log_host, dir.clone())?;
            builder = builder.stdout(path.clone()).stderr(path);
        }
        Ok(builder)
    }

    /// Dialect and working directory on a launcher builder.
    pub fn apply_launcher(&self, mut builder: LauncherBuilder) -> LauncherBuilder {
        builder = builder.dialect(self.dialect);
        if let Some(dir) = &self.work_dir {
            builder = builder.work_dir(dir.clone());
        }
        builder
    }
}

/// Single K2SFF period analysis job.
pub fn k2sff(defaults: &Defaults) -> Result<Launcher, LaunchError> {
    let descriptor = defaults
        .apply(
            JobDescriptorBuilder::new("c5_k2sff")
                .nodes(1)
                .walltime(Walltime::from_hms(24, 0, 0))
                .mem(MemorySize::megabytes(4000))
                .mail_events(MailEvents::ALL)
                .export_env(true),
        )?
        .build()?;
    let command = CommandLine::python("c5_k2sff_analysis.py", Vec::<String>::new())?;

    defaults
        .apply_launcher(Launcher::builder(K2SFF, descriptor, command))
        .output_naming(OutputNaming::ArraySuffix)
        .build()
}

/// K2SC analysis as a 14-task array.
///
/// Every task runs the same command; `c5_analysis.py` picks its 50-entry slice
/// of the list from the array index in its environment.
pub fn k2sc(defaults: &Defaults) -> Result<Launcher, LaunchError> {
    let descriptor = defaults
        .apply(
            JobDescriptorBuilder::new("c5_k2sc")
                .nodes(1)
                .walltime(Walltime::from_hms(4, 0, 0))
                .mem(MemorySize::megabytes(4000))
                .mail_events(MailEvents::NONE)
                .array("1-14".parse()?)
                .export_env(true),
        )?
        .build()?;
    let command = CommandLine::python(
        "c5_analysis.py",
        ["../data/all_k2sc_files.lst", "c5_tables/c5_k2sc_output.csv"],
    )?;

    defaults
        .apply_launcher(Launcher::builder(K2SC, descriptor, command))
        .shard_mode(ShardMode::Environment)
        .build()
}

/// Look up a built-in launcher by name.
pub fn preset(name: &str, defaults: &Defaults) -> Option<Result<Launcher, LaunchError>> {
    match name {
        K2SFF => Some(k2sff(defaults)),
        K2SC => Some(k2sc(defaults)),
        _ => None,
    }
}
