//! Render a [`JobDescriptor`] as `#PBS` directives and read it back.
//!
//! Only the directives qlaunch emits are understood. Anything else in a
//! script header is an error rather than being passed through silently.

use std::collections::HashSet;

use qlaunch_parsers::{MemoryError, WalltimeError, parse_memory, parse_walltime};
use thiserror::Error;

use crate::descriptor::{
    ArrayRange, DescriptorError, Dialect, JobDescriptor, JobDescriptorBuilder, LogPath, MailEvents,
};

/// Marker that starts every directive line.
pub const DIRECTIVE_PREFIX: &str = "#PBS";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("line {line}: unsupported directive {flag}")]
    UnsupportedFlag { line: usize, flag: String },
    #[error("line {line}: {flag} needs a value")]
    MissingValue { line: usize, flag: String },
    #[error("line {line}: {flag} takes no value")]
    UnexpectedValue { line: usize, flag: String },
    #[error("line {line}: {flag} given more than once")]
    Duplicate { line: usize, flag: String },
    #[error("line {line}: unsupported -W option {value:?}, only group_list is understood")]
    UnsupportedWOption { line: usize, value: String },
    #[error("line {line}: unknown resource {key:?}")]
    UnknownResource { line: usize, key: String },
    #[error("line {line}: resource {key:?} requested more than once")]
    DuplicateResource { line: usize, key: String },
    #[error("line {line}: malformed resource term {term:?}")]
    MalformedResource { line: usize, term: String },
    #[error("line {line}: {source}")]
    Walltime {
        line: usize,
        #[source]
        source: WalltimeError,
    },
    #[error("line {line}: {source}")]
    Memory {
        line: usize,
        #[source]
        source: MemoryError,
    },
    #[error("line {line}: {source}")]
    Value {
        line: usize,
        #[source]
        source: DescriptorError,
    },
    #[error("both -t and -J array directives present")]
    MixedDialects,
    #[error("job name (-N) is missing")]
    MissingName,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// A job script split into its typed header and executable body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScript {
    pub descriptor: JobDescriptor,
    /// Dialect implied by the array directive, if the script has one.
    pub dialect: Option<Dialect>,
    /// Lines after the directive header, starting at the first executable line.
    pub body: Vec<String>,
}

/// Emit one directive per line in a fixed order.
pub fn render_directives(desc: &JobDescriptor, dialect: Dialect) -> String {
    let mut lines = vec![format!("{} -N {}", DIRECTIVE_PREFIX, desc.name())];
    if let Some(account) = desc.account() {
        lines.push(format!("{} -W group_list={}", DIRECTIVE_PREFIX, account));
    }
    lines.push(format!("{} -l {}", DIRECTIVE_PREFIX, desc.resources()));
    if let Some(address) = desc.mail_to() {
        lines.push(format!("{} -M {}", DIRECTIVE_PREFIX, address));
    }
    lines.push(format!("{} -m {}", DIRECTIVE_PREFIX, desc.mail_events()));
    if desc.export_env() {
        lines.push(format!("{} -V", DIRECTIVE_PREFIX));
    }
    if let Some(path) = desc.stdout() {
        lines.push(format!("{} -o {}", DIRECTIVE_PREFIX, path));
    }
    if let Some(path) = desc.stderr() {
        lines.push(format!("{} -e {}", DIRECTIVE_PREFIX, path));
    }
    if let Some(array) = desc.array() {
        lines.push(format!(
            "{} {} {}",
            DIRECTIVE_PREFIX,
            dialect.array_flag(),
            array
        ));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Parse a job script header.
///
/// A leading shebang, blank lines and plain `#` comments are skipped. Like
/// qsub, directive parsing stops at the first executable line; that line and
/// everything after it is returned as the body.
pub fn parse_script(text: &str) -> Result<ParsedScript, DirectiveError> {
    let mut state = HeaderState::default();
    let mut body_start = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if idx == 0 && line.starts_with("#!") {
            continue;
        }
        if line.is_empty() {
            continue;
        }
        // Directives only count at column 1; "#PBSX" is an ordinary comment
        if let Some(rest) = raw.trim_end().strip_prefix(DIRECTIVE_PREFIX) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                state.apply(line_no, rest.trim())?;
                continue;
            }
        }
        if line.starts_with('#') {
            continue;
        }
        body_start = Some(idx);
        break;
    }

    let body = match body_start {
        Some(start) => text.lines().skip(start).map(str::to_string).collect(),
        None => Vec::new(),
    };
    let dialect = state.dialect;
    let descriptor = state.finish()?;

    Ok(ParsedScript {
        descriptor,
        dialect,
        body,
    })
}

#[derive(Default)]
struct HeaderState {
    name: Option<String>,
    account: Option<String>,
    nodes: Option<u32>,
    ppn: Option<u32>,
    walltime: Option<qlaunch_parsers::Walltime>,
    mem: Option<qlaunch_parsers::MemorySize>,
    mail_to: Option<String>,
    mail_events: Option<MailEvents>,
    array: Option<ArrayRange>,
    dialect: Option<Dialect>,
    export_env: bool,
    stdout: Option<LogPath>,
    stderr: Option<LogPath>,
    seen_flags: HashSet<String>,
    seen_resources: HashSet<String>,
}

impl HeaderState {
    fn apply(&mut self, line: usize, directive: &str) -> Result<(), DirectiveError> {
        let (flag, value) = match directive.split_once(char::is_whitespace) {
            Some((flag, value)) => (flag, value.trim()),
            None => (directive, ""),
        };

        // Resource lists may be spread over several -l lines
        if flag != "-l" && !self.seen_flags.insert(flag.to_string()) {
            return Err(DirectiveError::Duplicate {
                line,
                flag: flag.to_string(),
            });
        }

        let needs_value = |value: &str| {
            if value.is_empty() {
                Err(DirectiveError::MissingValue {
                    line,
                    flag: flag.to_string(),
                })
            } else {
                Ok(())
            }
        };
        let value_err = |source: DescriptorError| DirectiveError::Value { line, source };

        match flag {
            "-N" => {
                needs_value(value)?;
                self.name = Some(value.to_string());
            }
            "-W" => {
                needs_value(value)?;
                let account = value.strip_prefix("group_list=").ok_or_else(|| {
                    DirectiveError::UnsupportedWOption {
                        line,
                        value: value.to_string(),
                    }
                })?;
                self.account = Some(account.to_string());
            }
            "-l" => {
                needs_value(value)?;
                self.apply_resources(line, value)?;
            }
            "-M" => {
                needs_value(value)?;
                self.mail_to = Some(value.to_string());
            }
            "-m" => {
                needs_value(value)?;
                self.mail_events = Some(value.parse().map_err(value_err)?);
            }
            "-V" => {
                if !value.is_empty() {
                    return Err(DirectiveError::UnexpectedValue {
                        line,
                        flag: flag.to_string(),
                    });
                }
                self.export_env = true;
            }
            "-o" => {
                needs_value(value)?;
                self.stdout = Some(value.parse().map_err(value_err)?);
            }
            "-e" => {
                needs_value(value)?;
                self.stderr = Some(value.parse().map_err(value_err)?);
            }
            "-t" | "-J" => {
                needs_value(value)?;
                let dialect = if flag == "-t" {
                    Dialect::Torque
                } else {
                    Dialect::PbsPro
                };
                if self.dialect.is_some() {
                    return Err(DirectiveError::MixedDialects);
                }
                self.dialect = Some(dialect);
                self.array = Some(value.parse().map_err(value_err)?);
            }
            other => {
                return Err(DirectiveError::UnsupportedFlag {
                    line,
                    flag: other.to_string(),
                });
            }
        }
        Ok(())
    }

    fn apply_resources(&mut self, line: usize, value: &str) -> Result<(), DirectiveError> {
        for term in value.split(',') {
            let term = term.trim();
            let (key, val) = term
                .split_once('=')
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| DirectiveError::MalformedResource {
                    line,
                    term: term.to_string(),
                })?;

            if !self.seen_resources.insert(key.to_string()) {
                return Err(DirectiveError::DuplicateResource {
                    line,
                    key: key.to_string(),
                });
            }

            match key {
                "nodes" => {
                    let (nodes, ppn) = parse_nodes(val).ok_or_else(|| {
                        DirectiveError::MalformedResource {
                            line,
                            term: term.to_string(),
                        }
                    })?;
                    self.nodes = Some(nodes);
                    self.ppn = ppn;
                }
                "walltime" => {
                    self.walltime = Some(
                        parse_walltime(val)
                            .map_err(|source| DirectiveError::Walltime { line, source })?,
                    );
                }
                "mem" => {
                    self.mem = Some(
                        parse_memory(val).map_err(|source| DirectiveError::Memory { line, source })?,
                    );
                }
                other => {
                    return Err(DirectiveError::UnknownResource {
                        line,
                        key: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<JobDescriptor, DirectiveError> {
        let name = self.name.ok_or(DirectiveError::MissingName)?;
        let mut builder = JobDescriptorBuilder::new(name).export_env(self.export_env);

        if let Some(account) = self.account {
            builder = builder.account(account);
        }
        if let Some(nodes) = self.nodes {
            builder = builder.nodes(nodes);
        }
        if let Some(ppn) = self.ppn {
            builder = builder.ppn(ppn);
        }
        if let Some(walltime) = self.walltime {
            builder = builder.walltime(walltime);
        }
        if let Some(mem) = self.mem {
            builder = builder.mem(mem);
        }
        if let Some(address) = self.mail_to {
            builder = builder.mail_to(address);
        }
        if let Some(events) = self.mail_events {
            builder = builder.mail_events(events);
        }
        if let Some(array) = self.array {
            builder = builder.array(array);
        }
        if let Some(path) = self.stdout {
            builder = builder.stdout(path);
        }
        if let Some(path) = self.stderr {
            builder = builder.stderr(path);
        }

        Ok(builder.build()?)
    }
}

/// `nodes=<n>` or `nodes=<n>:ppn=<p>`.
fn parse_nodes(value: &str) -> Option<(u32, Option<u32>)> {
    let number = |v: &str| {
        if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
            None
        } else {
            v.parse::<u32>().ok()
        }
    };
    match value.split_once(':') {
        Some((nodes, ppn)) => Some((number(nodes)?, Some(number(ppn.strip_prefix("ppn=")?)?))),
        None => Some((number(value)?, None)),
    }
}
