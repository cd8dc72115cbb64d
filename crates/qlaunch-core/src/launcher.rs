//! A named, validated job: descriptor, command and how array tasks split work.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use qlaunch_parsers::{MemoryError, WalltimeError};
use thiserror::Error;

use crate::command::{CommandLine, CommandLineError, ScriptBody};
use crate::descriptor::{ArrayRange, DescriptorError, Dialect, JobDescriptor};
use crate::directive::{DirectiveError, ParsedScript, parse_script, render_directives};
use crate::shard::{OutputNaming, ShardMode, ShardPlan};

/// Interpreter line written at the top of every job script.
pub const SHEBANG: &str = "#!/bin/bash";

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Walltime(#[from] WalltimeError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    CommandLine(#[from] CommandLineError),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error(
        "Launcher {name}: array of {tasks} tasks would run {tasks} identical copies; \
         use shard mode \"environment\" or \"argument\""
    )]
    UnshardedArray { name: String, tasks: u32 },
    #[error("Launcher {name}: command uses the array index but the job has no array")]
    IndexWithoutArray { name: String },
    #[error("Launcher {name}: shard mode \"replicate\" conflicts with an array index argument")]
    ReplicateWithIndex { name: String },
    #[error("Launcher {name}: array slot limits are not supported by the {dialect} dialect")]
    SlotLimitUnsupported { name: String, dialect: Dialect },
    #[error("Launcher {name}: shard size must be at least 1")]
    ZeroShardSize { name: String },
    #[error("Launcher {name} is an array job ({array}); a task index is required")]
    MissingTaskIndex { name: String, array: ArrayRange },
    #[error("Launcher {name} is not an array job; task index {index} is meaningless")]
    NotAnArray { name: String, index: u32 },
    #[error("Task {index} is outside the array range {array} of launcher {name}")]
    TaskOutOfRange {
        name: String,
        index: u32,
        array: ArrayRange,
    },
}

/// One job instance the scheduler will create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInstance {
    /// Array index, None for a non-array job.
    pub index: Option<u32>,
    pub argv: Vec<String>,
    /// Extra environment the scheduler sets for this instance.
    pub env: Vec<(String, String)>,
}

impl fmt::Display for TaskInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{:>4}", i)?,
            None => write!(f, "{:>4}", "-")?,
        }
        for (key, value) in &self.env {
            write!(f, " {}={}", key, value)?;
        }
        write!(f, " {}", self.argv.join(" "))
    }
}

/// Validated launcher, ready to render or submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    name: String,
    descriptor: JobDescriptor,
    command: CommandLine,
    shard_mode: ShardMode,
    shard_plan: ShardPlan,
    dialect: Dialect,
    work_dir: Option<Utf8PathBuf>,
    output_naming: OutputNaming,
}

impl Launcher {
    pub fn builder(
        name: impl Into<String>,
        descriptor: JobDescriptor,
        command: CommandLine,
    ) -> LauncherBuilder {
        LauncherBuilder {
            name: name.into(),
            descriptor,
            command,
            shard_mode: ShardMode::default(),
            shard_size: ShardPlan::DEFAULT_SHARD_SIZE,
            dialect: Dialect::default(),
            work_dir: None,
            output_naming: OutputNaming::default(),
        }
    }

    /// Rebuild a launcher from an existing job script.
    ///
    /// Without an explicit mode, a command referencing the array index is
    /// `Argument`, a multi-task array otherwise `Environment`, and anything
    /// else `Replicate`.
    pub fn from_script(
        name: impl Into<String>,
        text: &str,
        shard_mode: Option<ShardMode>,
    ) -> Result<Self, LaunchError> {
        let ParsedScript {
            descriptor,
            dialect,
            body,
        } = parse_script(text)?;
        let body = ScriptBody::parse(&body)?;

        let mode = shard_mode.unwrap_or_else(|| {
            if body.command.uses_array_index() {
                ShardMode::Argument
            } else if descriptor.task_count() > 1 {
                ShardMode::Environment
            } else {
                ShardMode::Replicate
            }
        });

        let mut builder = Self::builder(name, descriptor, body.command)
            .shard_mode(mode)
            .dialect(dialect.unwrap_or_default());
        if let Some(dir) = body.work_dir {
            builder = builder.work_dir(dir);
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    /// Command as it runs, including a trailing index in `Argument` mode.
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn shard_mode(&self) -> ShardMode {
        self.shard_mode
    }

    pub fn shard_plan(&self) -> ShardPlan {
        self.shard_plan
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn work_dir(&self) -> Option<&Utf8Path> {
        self.work_dir.as_deref()
    }

    pub fn output_naming(&self) -> OutputNaming {
        self.output_naming
    }

    /// Full job script: shebang, directives, blank line, body.
    pub fn render_script(&self) -> Result<String, LaunchError> {
        let body = ScriptBody {
            work_dir: self.work_dir.clone(),
            command: self.command.clone(),
        };
        Ok(format!(
            "{}\n{}\n{}",
            SHEBANG,
            render_directives(&self.descriptor, self.dialect),
            body.render(self.dialect)?
        ))
    }

    fn check_index(&self, index: Option<u32>) -> Result<(), LaunchError> {
        match (self.descriptor.array(), index) {
            (Some(array), None) => Err(LaunchError::MissingTaskIndex {
                name: self.name.clone(),
                array: *array,
            }),
            (Some(array), Some(i)) if !array.contains(i) => Err(LaunchError::TaskOutOfRange {
                name: self.name.clone(),
                index: i,
                array: *array,
            }),
            (None, Some(i)) => Err(LaunchError::NotAnArray {
                name: self.name.clone(),
                index: i,
            }),
            _ => Ok(()),
        }
    }

    /// Concrete argv for one task, or for the single job when `index` is None.
    pub fn task_argv(&self, index: Option<u32>) -> Result<Vec<String>, LaunchError> {
        self.check_index(index)?;
        Ok(self.command.argv(index))
    }

    /// Environment the scheduler sets for one task.
    pub fn task_env(&self, index: Option<u32>) -> Result<Vec<(String, String)>, LaunchError> {
        self.check_index(index)?;
        Ok(index
            .map(|i| vec![(self.dialect.array_index_var().to_string(), i.to_string())])
            .unwrap_or_default())
    }

    pub fn task(&self, index: Option<u32>) -> Result<TaskInstance, LaunchError> {
        Ok(TaskInstance {
            index,
            argv: self.task_argv(index)?,
            env: self.task_env(index)?,
        })
    }

    /// Every instance the scheduler creates, in index order.
    pub fn tasks(&self) -> Vec<TaskInstance> {
        let indices: Vec<Option<u32>> = match self.descriptor.array() {
            Some(array) => array.indices().map(Some).collect(),
            None => vec![None],
        };
        let var = self.dialect.array_index_var();
        indices
            .into_iter()
            .map(|index| TaskInstance {
                index,
                argv: self.command.argv(index),
                env: index
                    .map(|i| vec![(var.to_string(), i.to_string())])
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Whether any two tasks receive different argv.
    pub fn argv_varies_by_task(&self) -> bool {
        self.descriptor.task_count() > 1 && self.command.uses_array_index()
    }
}

/// Builder for [`Launcher`].
#[derive(Debug, Clone)]
pub struct LauncherBuilder {
    name: String,
    descriptor: JobDescriptor,
    command: CommandLine,
    shard_mode: ShardMode,
    shard_size: usize,
    dialect: Dialect,
    work_dir: Option<Utf8PathBuf>,
    output_naming: OutputNaming,
}

impl LauncherBuilder {
    pub fn shard_mode(mut self, mode: ShardMode) -> Self {
        self.shard_mode = mode;
        self
    }

    pub fn shard_size(mut self, size: usize) -> Self {
        self.shard_size = size;
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn output_naming(mut self, naming: OutputNaming) -> Self {
        self.output_naming = naming;
        self
    }

    pub fn build(self) -> Result<Launcher, LaunchError> {
        let name = self.name;
        let tasks = self.descriptor.task_count();
        let has_array = self.descriptor.array().is_some();
        let shard_plan =
            ShardPlan::new(self.shard_size).ok_or_else(|| LaunchError::ZeroShardSize {
                name: name.clone(),
            })?;

        if self.dialect == Dialect::PbsPro
            && self
                .descriptor
                .array()
                .is_some_and(|a| a.slot_limit().is_some())
        {
            return Err(LaunchError::SlotLimitUnsupported {
                name,
                dialect: self.dialect,
            });
        }

        let mut command = self.command;
        match self.shard_mode {
            ShardMode::Replicate if command.uses_array_index() => {
                return Err(LaunchError::ReplicateWithIndex { name });
            }
            ShardMode::Replicate if tasks > 1 => {
                return Err(LaunchError::UnshardedArray { name, tasks });
            }
            ShardMode::Argument if !command.uses_array_index() => {
                command = command.with_array_index();
            }
            _ => {}
        }
        if command.uses_array_index() && !has_array {
            return Err(LaunchError::IndexWithoutArray { name });
        }

        tracing::debug!(
            "Launcher {}: {} task(s), shard mode {}, dialect {}",
            name,
            tasks,
            self.shard_mode,
            self.dialect
        );

        Ok(Launcher {
            name,
            descriptor: self.descriptor,
            command,
            shard_mode: self.shard_mode,
            shard_plan,
            dialect: self.dialect,
            work_dir: self.work_dir,
            output_naming: self.output_naming,
        })
    }
}
