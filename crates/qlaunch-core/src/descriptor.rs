//! PBS job descriptor types.
//!
//! A [`JobDescriptor`] is the typed form of a job script's `#PBS` header. It
//! can only be obtained through [`JobDescriptorBuilder::build`], which checks
//! every value before anything is rendered or submitted.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use qlaunch_parsers::{MemorySize, Walltime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest job name PBS accepts.
pub const MAX_JOB_NAME_LEN: usize = 236;

/// Largest array accepted, well above any server's `max_array_size`.
pub const MAX_ARRAY_TASKS: u32 = 100_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Invalid job name {name:?}: {reason}")]
    InvalidJobName { name: String, reason: &'static str },
    #[error("Invalid account {0:?}")]
    InvalidAccount(String),
    #[error("Invalid mail address {0:?}")]
    InvalidMailAddress(String),
    #[error("Node count must be at least 1")]
    ZeroNodes,
    #[error("Processors per node must be at least 1")]
    ZeroPpn,
    #[error("Walltime is required")]
    MissingWalltime,
    #[error("Walltime must be greater than zero")]
    ZeroWalltime,
    #[error("Memory request must be greater than zero")]
    ZeroMemory,
    #[error("Malformed array range {0:?}, expected <start>-<end>[%<slots>]")]
    MalformedArrayRange(String),
    #[error("Invalid array range {start}-{end}: {reason}")]
    InvalidArrayRange {
        start: u32,
        end: u32,
        reason: &'static str,
    },
    #[error("Array slot limit must be at least 1")]
    ZeroSlotLimit,
    #[error("Unknown mail events {0:?}, expected a combination of a, b, e or n")]
    InvalidMailEvents(String),
    #[error("Log path {0:?} must be absolute")]
    RelativeLogPath(String),
    #[error("Log path {0:?} has an empty host")]
    EmptyLogHost(String),
    #[error("Invalid log host {0:?}")]
    InvalidLogHost(String),
    #[error("Log path {0:?} contains whitespace")]
    WhitespaceInLogPath(String),
}

/// Scheduler flavour a script is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Torque / OpenPBS style: `-t` arrays, `PBS_ARRAYID`.
    #[default]
    Torque,
    /// PBS Professional: `-J` arrays, `PBS_ARRAY_INDEX`.
    #[serde(rename = "pbspro")]
    PbsPro,
}

impl Dialect {
    /// Directive flag introducing an array range.
    pub fn array_flag(&self) -> &'static str {
        match self {
            Self::Torque => "-t",
            Self::PbsPro => "-J",
        }
    }

    /// Environment variable holding a task's array index.
    pub fn array_index_var(&self) -> &'static str {
        match self {
            Self::Torque => "PBS_ARRAYID",
            Self::PbsPro => "PBS_ARRAY_INDEX",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Torque => write!(f, "torque"),
            Self::PbsPro => write!(f, "pbspro"),
        }
    }
}

/// Validated job name (`-N`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> Result<Self, DescriptorError> {
        let name = name.into();
        let invalid = |reason| DescriptorError::InvalidJobName {
            name: name.clone(),
            reason,
        };

        let Some(first) = name.chars().next() else {
            return Err(invalid("name is empty"));
        };
        if !first.is_ascii_alphabetic() {
            return Err(invalid("must start with a letter"));
        }
        if name.len() > MAX_JOB_NAME_LEN {
            return Err(invalid("longer than 236 characters"));
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c == ':' || c == '@')
        {
            return Err(invalid("contains whitespace, ':' or '@'"));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single mail notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailEvent {
    Abort,
    Begin,
    End,
}

/// Set of mail events (`-m`). The empty set renders as `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MailEvents {
    abort: bool,
    begin: bool,
    end: bool,
}

impl MailEvents {
    pub const NONE: Self = Self {
        abort: false,
        begin: false,
        end: false,
    };

    pub const ALL: Self = Self {
        abort: true,
        begin: true,
        end: true,
    };

    pub fn contains(&self, event: MailEvent) -> bool {
        match event {
            MailEvent::Abort => self.abort,
            MailEvent::Begin => self.begin,
            MailEvent::End => self.end,
        }
    }

    pub fn insert(&mut self, event: MailEvent) {
        match event {
            MailEvent::Abort => self.abort = true,
            MailEvent::Begin => self.begin = true,
            MailEvent::End => self.end = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    pub fn events(&self) -> Vec<MailEvent> {
        [MailEvent::Abort, MailEvent::Begin, MailEvent::End]
            .into_iter()
            .filter(|e| self.contains(*e))
            .collect()
    }
}

impl FromIterator<MailEvent> for MailEvents {
    fn from_iter<I: IntoIterator<Item = MailEvent>>(iter: I) -> Self {
        let mut events = Self::NONE;
        for event in iter {
            events.insert(event);
        }
        events
    }
}

impl fmt::Display for MailEvents {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("n");
        }
        if self.abort {
            f.write_str("a")?;
        }
        if self.begin {
            f.write_str("b")?;
        }
        if self.end {
            f.write_str("e")?;
        }
        Ok(())
    }
}

impl FromStr for MailEvents {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "n" {
            return Ok(Self::NONE);
        }
        if s.is_empty() {
            return Err(DescriptorError::InvalidMailEvents(s.to_string()));
        }
        s.chars()
            .map(|c| match c {
                'a' => Ok(MailEvent::Abort),
                'b' => Ok(MailEvent::Begin),
                'e' => Ok(MailEvent::End),
                _ => Err(DescriptorError::InvalidMailEvents(s.to_string())),
            })
            .collect()
    }
}

/// Array job index range (`-t 1-14` / `-J 1-14`), inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRange {
    start: u32,
    end: u32,
    slot_limit: Option<u32>,
}

impl ArrayRange {
    /// Indices start at 1 and the range may not be reversed.
    pub fn new(start: u32, end: u32) -> Result<Self, DescriptorError> {
        if start == 0 {
            return Err(DescriptorError::InvalidArrayRange {
                start,
                end,
                reason: "indices start at 1",
            });
        }
        if end < start {
            return Err(DescriptorError::InvalidArrayRange {
                start,
                end,
                reason: "end is before start",
            });
        }
        if end - start >= MAX_ARRAY_TASKS {
            return Err(DescriptorError::InvalidArrayRange {
                start,
                end,
                reason: "more than 100000 tasks",
            });
        }
        Ok(Self {
            start,
            end,
            slot_limit: None,
        })
    }

    /// Limit how many tasks may run at once (`%N`).
    pub fn with_slot_limit(mut self, slots: u32) -> Result<Self, DescriptorError> {
        if slots == 0 {
            return Err(DescriptorError::ZeroSlotLimit);
        }
        self.slot_limit = Some(slots);
        Ok(self)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn slot_limit(&self) -> Option<u32> {
        self.slot_limit
    }

    /// Number of tasks the scheduler creates.
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: u32) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for ArrayRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)?;
        if let Some(slots) = self.slot_limit {
            write!(f, "%{}", slots)?;
        }
        Ok(())
    }
}

impl FromStr for ArrayRange {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let malformed = || DescriptorError::MalformedArrayRange(s.to_string());

        let (range, slots) = match s.split_once('%') {
            Some((range, slots)) => (range, Some(slots)),
            None => (s, None),
        };
        let (start, end) = range.split_once('-').ok_or_else(malformed)?;
        let number = |v: &str| {
            if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            v.parse::<u32>().map_err(|_| malformed())
        };

        let range = Self::new(number(start)?, number(end)?)?;
        match slots {
            Some(slots) => range.with_slot_limit(number(slots)?),
            None => Ok(range),
        }
    }
}

/// Output or error log location (`-o` / `-e`), usually `localhost:/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogPath {
    host: Option<String>,
    path: Utf8PathBuf,
}

impl LogPath {
    /// Log path qualified with a host.
    pub fn on_host(
        host: impl Into<String>,
        path: impl Into<Utf8PathBuf>,
    ) -> Result<Self, DescriptorError> {
        let host = host.into();
        let path = path.into();
        if host.is_empty() {
            return Err(DescriptorError::EmptyLogHost(format!(":{}", path)));
        }
        // The first ':' separates host from path
        if host.contains(|c: char| c == ':' || c == '/' || c.is_whitespace()) {
            return Err(DescriptorError::InvalidLogHost(host));
        }
        Self::check_absolute(&path)?;
        Ok(Self {
            host: Some(host),
            path,
        })
    }

    /// Log path on the submission host.
    pub fn local(path: impl Into<Utf8PathBuf>) -> Result<Self, DescriptorError> {
        let path = path.into();
        Self::check_absolute(&path)?;
        Ok(Self { host: None, path })
    }

    // PBS paths are POSIX paths regardless of where qlaunch runs
    fn check_absolute(path: &Utf8PathBuf) -> Result<(), DescriptorError> {
        if !path.as_str().starts_with('/') {
            return Err(DescriptorError::RelativeLogPath(path.to_string()));
        }
        if path.as_str().contains(char::is_whitespace) {
            return Err(DescriptorError::WhitespaceInLogPath(path.to_string()));
        }
        Ok(())
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl fmt::Display for LogPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}:{}", host, self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

impl FromStr for LogPath {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('/') {
            return Self::local(s);
        }
        match s.split_once(':') {
            Some((host, path)) => Self::on_host(host, path),
            None => Self::local(s),
        }
    }
}

/// Resource request (`-l`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceList {
    pub nodes: NonZeroU32,
    pub ppn: Option<NonZeroU32>,
    pub walltime: Walltime,
    pub mem: Option<MemorySize>,
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "nodes={}", self.nodes)?;
        if let Some(ppn) = self.ppn {
            write!(f, ":ppn={}", ppn)?;
        }
        write!(f, ",walltime={}", self.walltime)?;
        if let Some(mem) = self.mem {
            write!(f, ",mem={}", mem)?;
        }
        Ok(())
    }
}

/// Typed PBS job descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    name: JobName,
    account: Option<String>,
    resources: ResourceList,
    mail_to: Option<String>,
    mail_events: MailEvents,
    array: Option<ArrayRange>,
    export_env: bool,
    stdout: Option<LogPath>,
    stderr: Option<LogPath>,
}

impl JobDescriptor {
    pub fn builder(name: impl Into<String>) -> JobDescriptorBuilder {
        JobDescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &JobName {
        &self.name
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn resources(&self) -> &ResourceList {
        &self.resources
    }

    pub fn mail_to(&self) -> Option<&str> {
        self.mail_to.as_deref()
    }

    pub fn mail_events(&self) -> MailEvents {
        self.mail_events
    }

    pub fn array(&self) -> Option<&ArrayRange> {
        self.array.as_ref()
    }

    pub fn export_env(&self) -> bool {
        self.export_env
    }

    pub fn stdout(&self) -> Option<&LogPath> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&LogPath> {
        self.stderr.as_ref()
    }

    /// Number of job instances the scheduler creates for this descriptor.
    pub fn task_count(&self) -> u32 {
        self.array.map(|a| a.len()).unwrap_or(1)
    }
}

/// Builder for [`JobDescriptor`].
#[derive(Debug, Clone)]
pub struct JobDescriptorBuilder {
    name: String,
    account: Option<String>,
    nodes: u32,
    ppn: Option<u32>,
    walltime: Option<Walltime>,
    mem: Option<MemorySize>,
    mail_to: Option<String>,
    mail_events: MailEvents,
    array: Option<ArrayRange>,
    export_env: bool,
    stdout: Option<LogPath>,
    stderr: Option<LogPath>,
}

impl JobDescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account: None,
            nodes: 1,
            ppn: None,
            walltime: None,
            mem: None,
            mail_to: None,
            mail_events: MailEvents::NONE,
            array: None,
            export_env: false,
            stdout: None,
            stderr: None,
        }
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn ppn(mut self, ppn: u32) -> Self {
        self.ppn = Some(ppn);
        self
    }

    pub fn walltime(mut self, walltime: Walltime) -> Self {
        self.walltime = Some(walltime);
        self
    }

    pub fn mem(mut self, mem: MemorySize) -> Self {
        self.mem = Some(mem);
        self
    }

    pub fn mail_to(mut self, address: impl Into<String>) -> Self {
        self.mail_to = Some(address.into());
        self
    }

    pub fn mail_events(mut self, events: MailEvents) -> Self {
        self.mail_events = events;
        self
    }

    pub fn array(mut self, array: ArrayRange) -> Self {
        self.array = Some(array);
        self
    }

    pub fn export_env(mut self, export: bool) -> Self {
        self.export_env = export;
        self
    }

    pub fn stdout(mut self, path: LogPath) -> Self {
        self.stdout = Some(path);
        self
    }

    pub fn stderr(mut self, path: LogPath) -> Self {
        self.stderr = Some(path);
        self
    }

    /// Validate every field and produce the descriptor.
    pub fn build(self) -> Result<JobDescriptor, DescriptorError> {
        let name = JobName::new(self.name)?;

        if let Some(account) = &self.account {
            if account.is_empty() || account.chars().any(char::is_whitespace) {
                return Err(DescriptorError::InvalidAccount(account.clone()));
            }
        }
        if let Some(address) = &self.mail_to {
            validate_mail_address(address)?;
        }

        let nodes = NonZeroU32::new(self.nodes).ok_or(DescriptorError::ZeroNodes)?;
        let ppn = match self.ppn {
            Some(ppn) => Some(NonZeroU32::new(ppn).ok_or(DescriptorError::ZeroPpn)?),
            None => None,
        };
        let walltime = self.walltime.ok_or(DescriptorError::MissingWalltime)?;
        if walltime.is_zero() {
            return Err(DescriptorError::ZeroWalltime);
        }
        if self.mem.is_some_and(|m| m.is_zero()) {
            return Err(DescriptorError::ZeroMemory);
        }

        Ok(JobDescriptor {
            name,
            account: self.account,
            resources: ResourceList {
                nodes,
                ppn,
                walltime,
                mem: self.mem,
            },
            mail_to: self.mail_to,
            mail_events: self.mail_events,
            array: self.array,
            export_env: self.export_env,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

fn validate_mail_address(address: &str) -> Result<(), DescriptorError> {
    let invalid = || DescriptorError::InvalidMailAddress(address.to_string());
    if address.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(invalid());
    }
    match address.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() && !host.contains('@') => {
            Ok(())
        }
        _ => Err(invalid()),
    }
}
