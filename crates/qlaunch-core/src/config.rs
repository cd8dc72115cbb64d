//! JSON configuration: site defaults plus user-defined launchers.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use qlaunch_parsers::{parse_memory, parse_walltime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{Arg, CommandLine};
use crate::descriptor::{Dialect, JobDescriptorBuilder, MailEvent};
use crate::launcher::{LaunchError, Launcher};
use crate::presets::{self, Defaults, PRESET_NAMES};
use crate::shard::{OutputNaming, ShardMode, ShardPlan};

/// File looked for in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "qlaunch.json";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "QLAUNCH_CONFIG";

/// Argument token replaced by the running task's array index.
pub const ARRAY_INDEX_TOKEN: &str = "{array_index}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Json {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Launcher {name:?}: {source}")]
    Launcher {
        name: String,
        #[source]
        source: LaunchError,
    },
    #[error("Unknown launcher {name:?} (known: {known})")]
    UnknownLauncher { name: String, known: String },
}

fn default_nodes() -> u32 {
    1
}

fn default_export_env() -> bool {
    true
}

fn default_program() -> String {
    "python".to_string()
}

fn default_shard_size() -> usize {
    ShardPlan::DEFAULT_SHARD_SIZE
}

/// One launcher as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherEntry {
    /// PBS job name; the launcher's key when omitted.
    pub job_name: Option<String>,
    pub account: Option<String>,
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    pub ppn: Option<u32>,
    pub walltime: String,
    pub mem: Option<String>,
    pub mail_to: Option<String>,
    #[serde(default)]
    pub mail_events: Vec<MailEvent>,
    pub array: Option<String>,
    #[serde(default = "default_export_env")]
    pub export_env: bool,
    #[serde(default = "default_program")]
    pub program: String,
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub shard_mode: ShardMode,
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,
    #[serde(default)]
    pub output_naming: OutputNaming,
    pub work_dir: Option<Utf8PathBuf>,
    pub log_dir: Option<Utf8PathBuf>,
    pub dialect: Option<Dialect>,
}

impl LauncherEntry {
    /// Validate the entry and build its launcher, falling back to `defaults`.
    pub fn to_launcher(&self, name: &str, defaults: &Defaults) -> Result<Launcher, LaunchError> {
        let site = Defaults {
            account: self.account.clone().or_else(|| defaults.account.clone()),
            mail_to: self.mail_to.clone().or_else(|| defaults.mail_to.clone()),
            log_dir: self.log_dir.clone().or_else(|| defaults.log_dir.clone()),
            log_host: defaults.log_host.clone(),
            work_dir: self.work_dir.clone().or_else(|| defaults.work_dir.clone()),
            dialect: self.dialect.unwrap_or(defaults.dialect),
        };

        let job_name = self.job_name.as_deref().unwrap_or(name);
        let mut builder = JobDescriptorBuilder::new(job_name)
            .nodes(self.nodes)
            .walltime(parse_walltime(&self.walltime)?)
            .mail_events(self.mail_events.iter().copied().collect())
            .export_env(self.export_env);
        if let Some(ppn) = self.ppn {
            builder = builder.ppn(ppn);
        }
        if let Some(mem) = &self.mem {
            builder = builder.mem(parse_memory(mem)?);
        }
        if let Some(array) = &self.array {
            builder = builder.array(array.parse()?);
        }
        let descriptor = site.apply(builder)?.build()?;

        let args = self
            .args
            .iter()
            .map(|a| {
                if a == ARRAY_INDEX_TOKEN {
                    Arg::ArrayIndex
                } else {
                    Arg::literal(a.as_str())
                }
            })
            .collect();
        let command = CommandLine::new(&self.program, &self.script, args)?;

        site.apply_launcher(Launcher::builder(name, descriptor, command))
            .shard_mode(self.shard_mode)
            .shard_size(self.shard_size)
            .output_naming(self.output_naming)
            .build()
    }
}

/// Parsed `qlaunch.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub defaults: Defaults,
    pub launchers: BTreeMap<String, LauncherEntry>,
}

impl Config {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            "Loaded config {} with {} launcher(s)",
            path,
            config.launchers.len()
        );
        Ok(config)
    }

    /// Load `explicit` if given, else `<dir>/qlaunch.json` if it exists,
    /// else fall back to built-in defaults.
    pub fn discover(
        explicit: Option<&Utf8Path>,
        dir: &Utf8Path,
    ) -> Result<(Self, Option<Utf8PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let local = dir.join(CONFIG_FILE_NAME);
        if local.is_file() {
            return Ok((Self::load(&local)?, Some(local)));
        }
        tracing::debug!("No config file found, using built-in defaults");
        Ok((Self::default(), None))
    }

    /// Every known launcher name, presets included, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = PRESET_NAMES.iter().map(|n| n.to_string()).collect();
        names.extend(self.launchers.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    /// Whether `name` is defined in the file rather than built in.
    pub fn is_configured(&self, name: &str) -> bool {
        self.launchers.contains_key(name)
    }

    /// Resolve one launcher; config entries shadow presets of the same name.
    pub fn launcher(&self, name: &str) -> Result<Launcher, ConfigError> {
        let wrap = |source| ConfigError::Launcher {
            name: name.to_string(),
            source,
        };
        if let Some(entry) = self.launchers.get(name) {
            return entry.to_launcher(name, &self.defaults).map_err(wrap);
        }
        match presets::preset(name, &self.defaults) {
            Some(launcher) => launcher.map_err(wrap),
            None => Err(ConfigError::UnknownLauncher {
                name: name.to_string(),
                known: self.names().join(", "),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use tempfile::TempDir;

    const SAMPLE: &str = indoc! {r#"
        {
          "defaults": {
            "account": "yetiastro",
            "log_dir": "/vega/astro/users/k2/logs",
            "dialect": "torque"
          },
          "launchers": {
            "k2sc_split": {
              "job_name": "c5_k2sc_split",
              "walltime": "4:00:00",
              "mem": "4000mb",
              "mail_events": ["abort"],
              "array": "1-14%4",
              "script": "c5_analysis.py",
              "args": ["../data/all_k2sc_files.lst", "{array_index}"],
              "shard_mode": "argument"
            },
            "k2sff": {
              "walltime": "12:00:00",
              "script": "c5_k2sff_analysis.py",
              "export_env": false,
              "output_naming": "array-suffix"
            }
          }
        }
    "#};

    fn sample() -> Config {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_entry_defaults() {
        let config = sample();
        let entry = &config.launchers["k2sff"];
        assert_eq!(entry.nodes, 1);
        assert_eq!(entry.program, "python");
        assert_eq!(entry.shard_mode, ShardMode::Replicate);
        assert_eq!(entry.shard_size, 50);
        assert_eq!(entry.output_naming, OutputNaming::ArraySuffix);
        assert_eq!(
            config.launchers["k2sc_split"].output_naming,
            OutputNaming::IndexSuffix
        );
        assert_eq!(config.defaults.log_host, "localhost");
    }

    #[test]
    fn test_configured_launcher() {
        let launcher = sample().launcher("k2sc_split").unwrap();
        let desc = launcher.descriptor();
        assert_eq!(desc.name().as_str(), "c5_k2sc_split");
        assert_eq!(desc.account(), Some("yetiastro"));
        assert_eq!(desc.array().map(|a| a.to_string()).as_deref(), Some("1-14%4"));
        assert_eq!(
            desc.stdout().map(|p| p.to_string()).as_deref(),
            Some("localhost:/vega/astro/users/k2/logs")
        );
        assert_eq!(
            launcher.task_argv(Some(2)).unwrap(),
            vec!["python", "c5_analysis.py", "../data/all_k2sc_files.lst", "2"]
        );
    }

    #[test]
    fn test_config_shadows_preset() {
        let config = sample();
        let launcher = config.launcher("k2sff").unwrap();
        assert_eq!(launcher.descriptor().resources().walltime.to_string(), "12:00:00");
        assert!(!launcher.descriptor().export_env());
        assert_eq!(launcher.output_naming(), OutputNaming::ArraySuffix);
        assert!(config.is_configured("k2sff"));

        // the other preset is still available
        assert!(config.launcher("k2sc").is_ok());
        assert_eq!(config.names(), vec!["k2sc", "k2sc_split", "k2sff"]);
    }

    #[test]
    fn test_unknown_launcher() {
        let err = sample().launcher("k3").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLauncher { .. }));
        assert!(err.to_string().contains("k2sc, k2sc_split, k2sff"));
    }

    #[test]
    fn test_invalid_entry_is_reported() {
        let config: Config = serde_json::from_str(indoc! {r#"
            {
              "launchers": {
                "bad": { "walltime": "4:00:00", "array": "0-14", "script": "a.py" },
                "copies": { "walltime": "4:00:00", "array": "1-14", "script": "a.py" }
              }
            }
        "#})
        .unwrap();
        assert!(matches!(
            config.launcher("bad"),
            Err(ConfigError::Launcher {
                source: LaunchError::Descriptor(_),
                ..
            })
        ));
        assert!(matches!(
            config.launcher("copies"),
            Err(ConfigError::Launcher {
                source: LaunchError::UnshardedArray { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<Config, _> =
            serde_json::from_str(r#"{ "defaults": { "acount": "x" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_discover() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();

        let (config, path) = Config::discover(None, dir).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.is_none());

        fs::write(dir.join(CONFIG_FILE_NAME), SAMPLE).unwrap();
        let (config, path) = Config::discover(None, dir).unwrap();
        assert_eq!(config.launchers.len(), 2);
        assert_eq!(path, Some(dir.join(CONFIG_FILE_NAME)));

        let missing = dir.join("other.json");
        assert!(matches!(
            Config::discover(Some(&missing), dir),
            Err(ConfigError::Io { .. })
        ));

        fs::write(&missing, "{ not json").unwrap();
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Json { .. })
        ));
    }
}
