//! Core job model for qlaunch.
//!
//! Typed PBS job descriptors, `#PBS` directive rendering and parsing, the
//! command line each job runs, array sharding, and the launchers built from
//! presets or `qlaunch.json`.

pub mod command;
pub mod config;
pub mod descriptor;
pub mod directive;
pub mod launcher;
pub mod presets;
pub mod shard;

pub use command::{Arg, CommandLine, CommandLineError, ScriptBody};
pub use config::{CONFIG_ENV, CONFIG_FILE_NAME, Config, ConfigError, LauncherEntry};
pub use descriptor::{
    ArrayRange, DescriptorError, Dialect, JobDescriptor, JobDescriptorBuilder, JobName, LogPath,
    MailEvent, MailEvents, ResourceList,
};
pub use directive::{DirectiveError, ParsedScript, parse_script, render_directives};
pub use launcher::{LaunchError, Launcher, LauncherBuilder, TaskInstance};
pub use presets::Defaults;
pub use shard::{
    Coverage, OutputNaming, ShardError, ShardMode, ShardPlan, read_list_entries,
};
