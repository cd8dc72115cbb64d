//! Shared parsing utilities for PBS resource values and scheduler output.
//!
//! This crate provides the value parsers used by qlaunch-core when reading
//! job directives and by qlaunch-pbs when reading qsub/qstat output.

pub mod command;
pub mod memory;
pub mod time;

pub use command::{CommandError, describe_status, run_command, run_inherited};
pub use memory::{MemoryError, MemorySize, MemoryUnit, parse_memory};
pub use time::{
    Walltime, WalltimeError, format_walltime, parse_exit_status, parse_pbs_timestamp,
    parse_walltime,
};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "N/A" || trimmed == "UNKNOWN" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a `key = value` attribute line as printed by `qstat -f`.
pub fn split_attribute(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(" = ")?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}
