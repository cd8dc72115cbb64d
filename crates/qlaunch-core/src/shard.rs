//! Mapping array tasks onto slices of an input file list.
//!
//! Task `i >= 1` owns entries `[(i - 1) * size, min(i * size, total))`. Index
//! 0 stands for a run outside an array and owns the whole list.

use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::ArrayRange;

/// How the tasks of an array job tell their work apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardMode {
    /// Every task runs the identical command and nothing differentiates them.
    #[default]
    Replicate,
    /// Identical command; the program reads the array index from its environment.
    Environment,
    /// The array index is appended to the command line.
    Argument,
}

impl fmt::Display for ShardMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Replicate => write!(f, "replicate"),
            Self::Environment => write!(f, "environment"),
            Self::Argument => write!(f, "argument"),
        }
    }
}

impl FromStr for ShardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replicate" => Ok(Self::Replicate),
            "environment" | "env" => Ok(Self::Environment),
            "argument" | "arg" => Ok(Self::Argument),
            other => Err(format!(
                "unknown shard mode {:?}, expected replicate, environment or argument",
                other
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Failed to read list file {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("List file {path} has no {column:?} column")]
    MissingColumn { path: Utf8PathBuf, column: String },
    #[error("List file {path} line {line}: expected {expected} columns, found {found}")]
    ShortRow {
        path: Utf8PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
}

/// Fixed-size slicing of a list across array tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    shard_size: NonZeroUsize,
}

impl Default for ShardPlan {
    fn default() -> Self {
        Self {
            shard_size: NonZeroUsize::new(Self::DEFAULT_SHARD_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl ShardPlan {
    /// Entries per task used by the light-curve analyses.
    pub const DEFAULT_SHARD_SIZE: usize = 50;

    /// Returns None for a zero shard size.
    pub fn new(shard_size: usize) -> Option<Self> {
        NonZeroUsize::new(shard_size).map(|shard_size| Self { shard_size })
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size.get()
    }

    /// Slice of a `total`-entry list owned by task `index`.
    pub fn range_for(&self, index: u32, total: usize) -> Range<usize> {
        if index == 0 {
            return 0..total;
        }
        let size = self.shard_size.get();
        let start = (index as usize - 1).saturating_mul(size).min(total);
        let end = (index as usize).saturating_mul(size).min(total);
        start..end
    }

    /// Tasks needed so that every entry is owned by one.
    pub fn tasks_needed(&self, total: usize) -> usize {
        total.div_ceil(self.shard_size.get())
    }

    /// How well an array range covers a `total`-entry list.
    pub fn coverage(&self, array: &ArrayRange, total: usize) -> Coverage {
        let first = self.range_for(array.start(), total).start;
        let last = self.range_for(array.end(), total).end;
        let covered = last.saturating_sub(first);

        let idle_tasks = array
            .indices()
            .filter(|i| self.range_for(*i, total).is_empty())
            .count();

        Coverage {
            total,
            uncovered: total - covered,
            idle_tasks,
        }
    }
}

/// Result of [`ShardPlan::coverage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub total: usize,
    /// Entries no task processes.
    pub uncovered: usize,
    /// Tasks whose slice is empty.
    pub idle_tasks: usize,
}

impl Coverage {
    pub fn is_exact(&self) -> bool {
        self.uncovered == 0 && self.idle_tasks == 0
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_exact() {
            return write!(f, "all {} entries covered", self.total);
        }
        let mut parts = Vec::new();
        if self.uncovered > 0 {
            parts.push(format!(
                "{} of {} entries not processed by any task",
                self.uncovered, self.total
            ));
        }
        if self.idle_tasks > 0 {
            parts.push(format!("{} tasks have no entries", self.idle_tasks));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// How a task's dated output table is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputNaming {
    /// `<stem>_<date>.csv`, with `_<index>` appended for array tasks.
    #[default]
    IndexSuffix,
    /// `<stem>_<date>_array<index>.csv` for every run, `_array0` outside an array.
    ArraySuffix,
}

impl OutputNaming {
    /// Output table written by task `index` on `date`, derived from `base`.
    pub fn file_name(&self, base: &str, date: NaiveDate, index: u32) -> String {
        let stem = base.strip_suffix(".csv").unwrap_or(base);
        let dated = format!("{}_{}", stem, date.format("%Y-%m-%d"));
        match self {
            Self::IndexSuffix if index == 0 => format!("{}.csv", dated),
            Self::IndexSuffix => format!("{}_{}.csv", dated, index),
            Self::ArraySuffix => format!("{}_array{}.csv", dated, index),
        }
    }
}

impl fmt::Display for OutputNaming {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IndexSuffix => write!(f, "index-suffix"),
            Self::ArraySuffix => write!(f, "array-suffix"),
        }
    }
}

/// Read the `filename` column of a whitespace-delimited list file.
///
/// The first non-comment line is the header. Blank lines and `#` comments are
/// skipped.
pub fn read_list_entries(path: &Utf8Path) -> Result<Vec<String>, ShardError> {
    read_list_column(path, "filename")
}

/// Read one named column of a whitespace-delimited list file.
pub fn read_list_column(path: &Utf8Path, column: &str) -> Result<Vec<String>, ShardError> {
    let content = fs::read_to_string(path).map_err(|source| ShardError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    let missing = || ShardError::MissingColumn {
        path: path.to_path_buf(),
        column: column.to_string(),
    };
    let (_, header) = rows.next().ok_or_else(missing)?;
    let names: Vec<&str> = header.split_whitespace().collect();
    let col = names.iter().position(|n| *n == column).ok_or_else(missing)?;

    let mut entries = Vec::new();
    for (line, row) in rows {
        let fields: Vec<&str> = row.split_whitespace().collect();
        match fields.get(col) {
            Some(value) => entries.push(value.to_string()),
            None => {
                return Err(ShardError::ShortRow {
                    path: path.to_path_buf(),
                    line,
                    expected: names.len(),
                    found: fields.len(),
                });
            }
        }
    }

    tracing::debug!("Read {} entries from {}", entries.len(), path);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_range_for() {
        let plan = ShardPlan::default();
        assert_eq!(plan.range_for(1, 699), 0..50);
        assert_eq!(plan.range_for(2, 699), 50..100);
        assert_eq!(plan.range_for(14, 699), 650..699);
        assert_eq!(plan.range_for(15, 699), 699..699);
        assert_eq!(plan.range_for(0, 699), 0..699);
    }

    #[test]
    fn test_tasks_needed() {
        let plan = ShardPlan::default();
        assert_eq!(plan.tasks_needed(699), 14);
        assert_eq!(plan.tasks_needed(700), 14);
        assert_eq!(plan.tasks_needed(701), 15);
        assert_eq!(plan.tasks_needed(0), 0);
        assert!(ShardPlan::new(0).is_none());
    }

    #[test]
    fn test_coverage() {
        let plan = ShardPlan::default();
        let array = ArrayRange::new(1, 14).unwrap();

        assert!(plan.coverage(&array, 699).is_exact());
        assert!(plan.coverage(&array, 700).is_exact());

        let short = plan.coverage(&array, 750);
        assert_eq!(short.uncovered, 50);
        assert_eq!(short.idle_tasks, 0);

        let excess = plan.coverage(&array, 120);
        assert_eq!(excess.uncovered, 0);
        assert_eq!(excess.idle_tasks, 11);

        let late = plan.coverage(&ArrayRange::new(3, 14).unwrap(), 699);
        assert_eq!(late.uncovered, 100);
    }

    #[test]
    fn test_coverage_display() {
        let plan = ShardPlan::default();
        let array = ArrayRange::new(1, 14).unwrap();
        assert_eq!(
            plan.coverage(&array, 699).to_string(),
            "all 699 entries covered"
        );
        assert_eq!(
            plan.coverage(&array, 750).to_string(),
            "50 of 750 entries not processed by any task"
        );
    }

    #[test]
    fn test_output_naming_index_suffix() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let naming = OutputNaming::IndexSuffix;
        assert_eq!(
            naming.file_name("c5_tables/c5_k2sc_output.csv", date, 3),
            "c5_tables/c5_k2sc_output_2026-10-19_3.csv"
        );
        assert_eq!(
            naming.file_name("c5_tables/c5_k2sc_output.csv", date, 0),
            "c5_tables/c5_k2sc_output_2026-10-19.csv"
        );
    }

    #[test]
    fn test_output_naming_array_suffix() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let naming = OutputNaming::ArraySuffix;
        assert_eq!(
            naming.file_name("c5_tables/c5_k2sff_output.csv", date, 0),
            "c5_tables/c5_k2sff_output_2026-10-19_array0.csv"
        );
        assert_eq!(
            naming.file_name("c5_tables/c5_k2sff_output", date, 4),
            "c5_tables/c5_k2sff_output_2026-10-19_array4.csv"
        );
        assert_eq!(
            serde_json::from_str::<OutputNaming>("\"array-suffix\"").unwrap(),
            naming
        );
    }

    #[test]
    fn test_shard_mode_parse() {
        assert_eq!("environment".parse::<ShardMode>(), Ok(ShardMode::Environment));
        assert_eq!("ARG".parse::<ShardMode>(), Ok(ShardMode::Argument));
        assert!("sharded".parse::<ShardMode>().is_err());
        assert_eq!(ShardMode::Replicate.to_string(), "replicate");
    }

    #[test]
    fn test_read_list_entries() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("files.lst");
        fs::write(
            &path,
            "# K2SC campaign 5\nfilename epic\nhlsp_k2sc_211748286.fits 211748286\n\nhlsp_k2sc_211748287.fits 211748287\n",
        )
        .unwrap();

        let entries = read_list_entries(&path).unwrap();
        assert_eq!(
            entries,
            vec!["hlsp_k2sc_211748286.fits", "hlsp_k2sc_211748287.fits"]
        );
    }

    #[test]
    fn test_read_list_errors() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();

        let missing = read_list_entries(&dir.join("nope.lst"));
        assert!(matches!(missing, Err(ShardError::Io { .. })));

        let no_column = dir.join("bad.lst");
        fs::write(&no_column, "epic\n1\n").unwrap();
        assert!(matches!(
            read_list_entries(&no_column),
            Err(ShardError::MissingColumn { .. })
        ));

        let short = dir.join("short.lst");
        fs::write(&short, "epic filename\n1\n").unwrap();
        assert!(matches!(
            read_list_entries(&short),
            Err(ShardError::ShortRow { line: 2, .. })
        ));
    }
}
