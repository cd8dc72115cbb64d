//! The command line a job runs once the scheduler grants resources.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::descriptor::Dialect;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandLineError {
    #[error("Command token {0:?} contains a NUL byte")]
    NulByte(String),
    #[error("Command line needs a program and a script, got {0:?}")]
    TooShort(String),
    #[error("Unbalanced quoting in command line {0:?}")]
    Unbalanced(String),
    #[error("Expected exactly one command line after the directives, found {0}")]
    CommandCount(usize),
}

/// One positional argument of a command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    /// Passed through unchanged.
    Literal(String),
    /// Replaced by the running task's array index.
    ArrayIndex,
}

impl Arg {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Value of this argument for a concrete task.
    fn expand(&self, index: Option<u32>) -> Option<String> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::ArrayIndex => index.map(|i| i.to_string()),
        }
    }
}

/// `<program> <script> [args...]`, e.g. `python c5_analysis.py a.lst out.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    script: String,
    args: Vec<Arg>,
}

impl CommandLine {
    pub fn new(
        program: impl Into<String>,
        script: impl Into<String>,
        args: Vec<Arg>,
    ) -> Result<Self, CommandLineError> {
        let cmd = Self {
            program: program.into(),
            script: script.into(),
            args,
        };
        for token in [&cmd.program, &cmd.script]
            .into_iter()
            .chain(cmd.args.iter().filter_map(|a| match a {
                Arg::Literal(v) => Some(v),
                Arg::ArrayIndex => None,
            }))
        {
            if token.contains('\0') {
                return Err(CommandLineError::NulByte(token.clone()));
            }
        }
        Ok(cmd)
    }

    /// `python <script> [args...]`.
    pub fn python<I, S>(script: impl Into<String>, args: I) -> Result<Self, CommandLineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            "python",
            script,
            args.into_iter().map(|a| Arg::Literal(a.into())).collect(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn uses_array_index(&self) -> bool {
        self.args.contains(&Arg::ArrayIndex)
    }

    /// Copy of this command with the array index appended as the last argument.
    pub fn with_array_index(&self) -> Self {
        let mut cmd = self.clone();
        cmd.args.push(Arg::ArrayIndex);
        cmd
    }

    /// Concrete argv for one job instance.
    ///
    /// `index` is the task's array index, or None for a non-array job. An
    /// [`Arg::ArrayIndex`] without an index expands to nothing.
    pub fn argv(&self, index: Option<u32>) -> Vec<String> {
        let mut argv = vec![self.program.clone(), self.script.clone()];
        argv.extend(self.args.iter().filter_map(|a| a.expand(index)));
        argv
    }

    /// Shell form of the command line, with the array index as a variable
    /// reference for the given dialect.
    pub fn render(&self, dialect: Dialect) -> Result<String, CommandLineError> {
        let index_ref = format!("${{{}}}", dialect.array_index_var());
        let mut tokens = Vec::with_capacity(self.args.len() + 2);
        tokens.push(quote(&self.program)?);
        tokens.push(quote(&self.script)?);
        for arg in &self.args {
            match arg {
                Arg::Literal(value) => tokens.push(quote(value)?),
                Arg::ArrayIndex => tokens.push(index_ref.clone()),
            }
        }
        Ok(tokens.join(" "))
    }

    /// Parse a rendered command line.
    ///
    /// `${PBS_ARRAYID}`, `$PBS_ARRAYID` (and the PBS Pro spellings) become
    /// [`Arg::ArrayIndex`].
    pub fn parse(line: &str) -> Result<Self, CommandLineError> {
        let tokens =
            shlex::split(line).ok_or_else(|| CommandLineError::Unbalanced(line.to_string()))?;
        let mut tokens = tokens.into_iter();
        let (Some(program), Some(script)) = (tokens.next(), tokens.next()) else {
            return Err(CommandLineError::TooShort(line.to_string()));
        };
        let args = tokens
            .map(|t| {
                if is_index_reference(&t) {
                    Arg::ArrayIndex
                } else {
                    Arg::Literal(t)
                }
            })
            .collect();
        Self::new(program, script, args)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let argv = self.argv(None);
        write!(f, "{}", argv.join(" "))?;
        if self.uses_array_index() {
            write!(f, " <array-index>")?;
        }
        Ok(())
    }
}

fn quote(token: &str) -> Result<String, CommandLineError> {
    shlex::try_quote(token)
        .map(|q| q.into_owned())
        .map_err(|_| CommandLineError::NulByte(token.to_string()))
}

fn is_index_reference(token: &str) -> bool {
    [Dialect::Torque, Dialect::PbsPro].iter().any(|d| {
        let var = d.array_index_var();
        token == format!("${}", var) || token == format!("${{{}}}", var)
    })
}

/// Executable part of a job script: an optional `cd` and one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBody {
    pub work_dir: Option<Utf8PathBuf>,
    pub command: CommandLine,
}

impl ScriptBody {
    pub fn render(&self, dialect: Dialect) -> Result<String, CommandLineError> {
        let mut out = String::new();
        if let Some(dir) = &self.work_dir {
            out.push_str(&format!("cd {}\n", quote(dir.as_str())?));
        }
        out.push_str(&self.command.render(dialect)?);
        out.push('\n');
        Ok(out)
    }

    /// Parse the lines following the directive header.
    ///
    /// Blank lines and comments are skipped; the remainder must be an optional
    /// `cd <dir>` followed by exactly one command line.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self, CommandLineError> {
        let mut lines: Vec<&str> = lines
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();

        let mut work_dir = None;
        if let Some(first) = lines.first() {
            if let Some(dir) = first.strip_prefix("cd ") {
                let dir = shlex::split(dir)
                    .filter(|parts| parts.len() == 1)
                    .and_then(|mut parts| parts.pop())
                    .ok_or_else(|| CommandLineError::Unbalanced(first.to_string()))?;
                work_dir = Some(Utf8PathBuf::from(dir));
                lines.remove(0);
            }
        }

        match lines.as_slice() {
            [line] => Ok(Self {
                work_dir,
                command: CommandLine::parse(line)?,
            }),
            other => Err(CommandLineError::CommandCount(other.len())),
        }
    }
}
