//! CLI argument parsing for qlaunch.

use camino::Utf8PathBuf;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use qlaunch_core::{CONFIG_ENV, ShardMode};

#[derive(Parser, Debug)]
#[command(name = "qlaunch", version)]
#[command(about = "Render, check and submit PBS job scripts")]
pub struct Args {
    /// Config file (defaults to ./qlaunch.json when present)
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<Utf8PathBuf>,

    /// qsub executable
    #[arg(long, global = true, default_value = "qsub")]
    pub qsub: Utf8PathBuf,

    /// qstat executable
    #[arg(long, global = true, default_value = "qstat")]
    pub qstat: Utf8PathBuf,

    /// More log output (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List known launchers
    List,

    /// Write a launcher's job script
    Render {
        launcher: String,

        /// Output file instead of stdout
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Parse and validate an existing job script
    Check {
        script: Utf8PathBuf,

        /// How array tasks split their work (inferred when omitted)
        #[arg(long)]
        mode: Option<ShardMode>,
    },

    /// Show every task instance a launcher creates
    Tasks { launcher: String },

    /// Show how array tasks map onto an input list
    Plan(PlanArgs),

    /// Render a launcher's script and submit it with qsub
    Submit {
        launcher: String,

        /// Render and log without calling qsub
        #[arg(long)]
        dry_run: bool,

        /// Directory the script is written to
        #[arg(long, default_value = ".")]
        script_dir: Utf8PathBuf,
    },

    /// Run a task's command locally
    Run {
        launcher: String,

        /// Array index to run
        #[arg(long, conflicts_with = "all")]
        task: Option<u32>,

        /// Run every array task in order
        #[arg(long)]
        all: bool,
    },

    /// Query a submitted job with qstat
    Status { job_id: String },
}

#[derive(ClapArgs, Debug)]
pub struct PlanArgs {
    pub launcher: String,

    #[command(flatten)]
    pub source: PlanSource,

    /// Base output table; prints the dated file each task writes
    #[arg(long)]
    pub output: Option<String>,
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
pub struct PlanSource {
    /// List file with a `filename` column
    #[arg(long)]
    pub list: Option<Utf8PathBuf>,

    /// Number of entries to plan for
    #[arg(long)]
    pub entries: Option<usize>,
}
