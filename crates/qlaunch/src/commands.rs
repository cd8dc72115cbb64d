//! Subcommand implementations.

use std::fs;
use std::process::{ExitCode, ExitStatus};

use camino::{Utf8Path, Utf8PathBuf};
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use qlaunch_cli::{Args, Command, PlanArgs};
use chrono::NaiveDate;
use qlaunch_core::{Config, Launcher, ShardMode, read_list_entries};
use qlaunch_parsers::describe_status;
use qlaunch_pbs::{ExternalProcess, JobScheduler, LocalProcess, PbsJob, Qstat, Qsub};

pub async fn dispatch(args: &Args) -> Result<ExitCode> {
    let cwd = Utf8PathBuf::try_from(std::env::current_dir().into_diagnostic()?)
        .into_diagnostic()
        .wrap_err("Working directory is not valid UTF-8")?;
    let (config, source) = Config::discover(args.config.as_deref(), &cwd).into_diagnostic()?;
    if let Some(path) = &source {
        tracing::info!("Using config {}", path);
    }

    match &args.command {
        Command::List => list(&config),
        Command::Render { launcher, output } => {
            render(&config.launcher(launcher).into_diagnostic()?, output.as_deref())
        }
        Command::Check { script, mode } => check(script, *mode),
        Command::Tasks { launcher } => tasks(&config.launcher(launcher).into_diagnostic()?),
        Command::Plan(plan_args) => plan(&config, plan_args),
        Command::Submit {
            launcher,
            dry_run,
            script_dir,
        } => {
            let launcher = config.launcher(launcher).into_diagnostic()?;
            submit(&launcher, &Qsub::new(args.qsub.clone()), script_dir, *dry_run).await
        }
        Command::Run {
            launcher,
            task,
            all,
        } => {
            let launcher = config.launcher(launcher).into_diagnostic()?;
            run(&launcher, &LocalProcess, *task, *all).await
        }
        Command::Status { job_id } => {
            let job = Qstat::new(args.qstat.clone())
                .query_job(job_id)
                .await
                .into_diagnostic()?;
            print!("{}", format_job(&job));
            Ok(ExitCode::from(job_exit_code(&job)))
        }
    }
}

fn list(config: &Config) -> Result<ExitCode> {
    for name in config.names() {
        let origin = if config.is_configured(&name) {
            "config"
        } else {
            "preset"
        };
        match config.launcher(&name) {
            Ok(launcher) => println!("{:<16} {:<7} {}", name, origin, summary(&launcher)),
            Err(e) => println!("{:<16} {:<7} invalid: {}", name, origin, e),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn summary(launcher: &Launcher) -> String {
    let desc = launcher.descriptor();
    let shape = match desc.array() {
        Some(array) => format!("array {} ({})", array, launcher.shard_mode()),
        None => "single job".to_string(),
    };
    format!(
        "{}, {}, {}: {}",
        desc.name(),
        shape,
        desc.resources(),
        launcher.command()
    )
}

fn render(launcher: &Launcher, output: Option<&Utf8Path>) -> Result<ExitCode> {
    let script = launcher.render_script().into_diagnostic()?;
    match output {
        Some(path) => {
            fs::write(path, &script)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to write {}", path))?;
            tracing::info!("Wrote {}", path);
        }
        None => print!("{}", script),
    }
    Ok(ExitCode::SUCCESS)
}

fn check(script: &Utf8Path, mode: Option<ShardMode>) -> Result<ExitCode> {
    let text = fs::read_to_string(script)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", script))?;
    let name = script.file_stem().unwrap_or(script.as_str());
    let launcher = Launcher::from_script(name, &text, mode)
        .into_diagnostic()
        .wrap_err_with(|| format!("{} is not a valid job script", script))?;

    tracing::info!(
        "{}: {} task(s), shard mode {}",
        script,
        launcher.descriptor().task_count(),
        launcher.shard_mode()
    );
    print!("{}", launcher.render_script().into_diagnostic()?);
    Ok(ExitCode::SUCCESS)
}

fn tasks(launcher: &Launcher) -> Result<ExitCode> {
    for task in launcher.tasks() {
        println!("{}", task);
    }
    if launcher.shard_mode() == ShardMode::Environment && !launcher.argv_varies_by_task() {
        tracing::info!(
            "Tasks share one command line and select their slice from {}",
            launcher.dialect().array_index_var()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// One line per task: index, owned entry range and, optionally, output file.
fn plan_lines(
    launcher: &Launcher,
    total: usize,
    output: Option<&str>,
    today: NaiveDate,
) -> Vec<String> {
    let plan = launcher.shard_plan();
    let naming = launcher.output_naming();
    let indices: Vec<u32> = match launcher.descriptor().array() {
        Some(array) => array.indices().collect(),
        None => vec![0],
    };

    indices
        .into_iter()
        .map(|i| {
            let range = plan.range_for(i, total);
            let mut line = format!(
                "task {:>4}: entries {:>6}..{:<6} ({})",
                i,
                range.start,
                range.end,
                range.len()
            );
            if let Some(base) = output {
                line.push(' ');
                line.push_str(&naming.file_name(base, today, i));
            }
            line
        })
        .collect()
}

fn plan(config: &Config, args: &PlanArgs) -> Result<ExitCode> {
    let launcher = config.launcher(&args.launcher).into_diagnostic()?;
    let total = match (&args.source.list, args.source.entries) {
        (Some(path), _) => read_list_entries(path).into_diagnostic()?.len(),
        (None, Some(n)) => n,
        (None, None) => bail!("Either --list or --entries is required"),
    };

    let today = chrono::Local::now().date_naive();
    for line in plan_lines(&launcher, total, args.output.as_deref(), today) {
        println!("{}", line);
    }

    let plan = launcher.shard_plan();
    println!(
        "{} entries, {} per task, {} task(s) needed",
        total,
        plan.shard_size(),
        plan.tasks_needed(total)
    );
    if let Some(array) = launcher.descriptor().array() {
        let coverage = plan.coverage(array, total);
        if !coverage.is_exact() {
            tracing::warn!("Array {} does not match the list", array);
        }
        println!("{}", coverage);
    }
    Ok(ExitCode::SUCCESS)
}

async fn submit(
    launcher: &Launcher,
    scheduler: &impl JobScheduler,
    script_dir: &Utf8Path,
    dry_run: bool,
) -> Result<ExitCode> {
    let script = launcher.render_script().into_diagnostic()?;
    fs::create_dir_all(script_dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to create {}", script_dir))?;
    let path = script_dir.join(format!("{}.pbs", launcher.name()));
    fs::write(&path, &script)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to write {}", path))?;

    if dry_run {
        tracing::info!("Dry run: rendered {}, not submitting", path);
        println!("{}", path);
        return Ok(ExitCode::SUCCESS);
    }

    let handle = scheduler.submit(&path).await.into_diagnostic()?;
    println!("{}", handle);
    if let Some(array) = launcher.descriptor().array() {
        if let (Some(first), Some(last)) =
            (handle.task_id(array.start()), handle.task_id(array.end()))
        {
            tracing::info!("Array tasks {} through {}", first, last);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Exit code a shell would report for `status`.
fn exit_code(status: &ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(1);
        }
    }
    1
}

async fn run(
    launcher: &Launcher,
    process: &impl ExternalProcess,
    task: Option<u32>,
    all: bool,
) -> Result<ExitCode> {
    let instances = if all {
        launcher.tasks()
    } else {
        vec![launcher.task(task).into_diagnostic()?]
    };

    let mut worst = 0u8;
    for instance in &instances {
        tracing::info!("Running {}", instance);
        let status = process
            .run(&instance.argv, &instance.env, launcher.work_dir())
            .await
            .into_diagnostic()?;
        if !status.success() {
            tracing::warn!(
                "Task {} of {} failed with {}",
                instance.index.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
                launcher.name(),
                describe_status(&status)
            );
        }
        worst = worst.max(exit_code(&status));
    }
    Ok(ExitCode::from(worst))
}

fn format_job(job: &PbsJob) -> String {
    let mut out = format!("{}\n", job.job_id);
    let mut field = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            out.push_str(&format!("  {:<14} {}\n", label, value));
        }
    };
    field("name", job.name.clone());
    field("owner", job.owner.clone());
    field("state", Some(job.state.to_string()));
    field("queue", job.queue.clone());
    field("array", job.array_indices.clone());
    if job.state.is_terminal() {
        field("exit status", job.exit_status.map(|c| c.to_string()));
    }
    field(
        "walltime",
        job.walltime_used.map(|used| match job.walltime_limit {
            Some(limit) => format!("{} of {}", used, limit),
            None => used.to_string(),
        }),
    );
    field("memory", job.mem_used.map(|m| format!("{} MB", m.as_mb())));
    field("submitted", job.submit_time.map(|t| t.to_rfc3339()));
    field("started", job.start_time.map(|t| t.to_rfc3339()));
    out
}

/// Exit code for `status`: 1 once a finished job reports a nonzero exit status.
fn job_exit_code(job: &PbsJob) -> u8 {
    match job.exit_status {
        Some(code) if job.state.is_terminal() && code != 0 => 1,
        _ => 0,
    }
}
