// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use gdf::{
    alias::{AliasError, AliasStore},
    config::{load_bundles, Bundle, ConfigError, Settings},
    detect,
    engine::{
        history::HistoryManager,
        link::{ConflictStrategy, LinkError},
        oplog::{latest_log, list_logs, read_log},
        rollback::{rollback, SnapshotSelector},
    },
    exec::{AssumeYes, InquirePrompter, Prompter, SystemRunner},
    install::SystemInstaller,
    path::default_root_dir,
    platform::{GuardError, Platform},
    resolve::{resolve, ResolveError},
    risk,
    shell::{InitScript, Shell, ShellError, ShellGenerator},
    ApplyOptions, ApplyReport, Engine, EngineError, ErrorKind,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::BTreeMap,
    error::Error,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(about, subcommand_help_heading = "Commands", version)]
struct Cli {
    /// Path to repository root instead of `~/.gdf`.
    #[arg(short, long, global = true, value_name = "path")]
    pub root: Option<PathBuf>,

    /// Show debug logs.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        let root = match self.root {
            Some(root) => root,
            None => default_root_dir()?,
        };

        match self.command {
            Command::Apply(opts) => run_apply(&root, opts),
            Command::Rollback(opts) => run_rollback(&root, opts),
            Command::History(opts) => run_history(&root, opts),
            Command::Scan(opts) => run_scan(&root, opts),
            Command::Shell(opts) => run_shell(&root, opts),
            Command::Alias(opts) => run_alias(opts),
            Command::Detect(opts) => run_detect(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install packages, link dotfiles, and run hooks of app bundles.
    #[command(override_usage = "gdf apply [options] [<app>]...")]
    Apply(ApplyCommand),

    /// Undo changes recorded in an operation log.
    #[command(override_usage = "gdf rollback [options]")]
    Rollback(RollbackOptions),

    /// Show operation logs and snapshot history usage.
    #[command(override_usage = "gdf history [options]")]
    History(HistoryOptions),

    /// Check hooks and install scripts for risky commands.
    #[command(override_usage = "gdf scan [options] [<app>]...")]
    Scan(ScanOptions),

    /// Print shell init script of all app bundles.
    #[command(override_usage = "gdf shell [options] <shell>")]
    Shell(ShellOptions),

    /// Manage global aliases.
    #[command(subcommand)]
    Alias(AliasCommand),

    /// Guess app bundle name from a file path or command.
    #[command(override_usage = "gdf detect [options] <input>")]
    Detect(DetectOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyCommand {
    /// Names of app bundles to apply, all of them if none are given.
    #[arg(value_name = "app")]
    pub apps: Vec<String>,

    /// Only show what would be done.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// How to handle existing files at link targets.
    #[arg(short, long, value_name = "strategy")]
    pub strategy: Option<ConflictStrategy>,

    /// Stop at first failed app bundle.
    #[arg(short, long)]
    pub fail_fast: bool,

    /// Answer yes to every prompt.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RollbackOptions {
    /// Operation log to roll back instead of the latest one.
    #[arg(short, long, value_name = "path")]
    pub log: Option<PathBuf>,

    /// Pick which snapshot to restore for each target.
    #[arg(short, long)]
    pub interactive: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct HistoryOptions {
    /// Also list every operation of each log.
    #[arg(short, long)]
    pub operations: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ScanOptions {
    /// Names of app bundles to scan, all of them if none are given.
    #[arg(value_name = "app")]
    pub apps: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ShellOptions {
    /// Shell to generate init script for.
    #[arg(required = true, value_name = "shell")]
    pub shell: Shell,
}

#[derive(Debug, Clone, Subcommand)]
enum AliasCommand {
    /// Add or replace global alias.
    #[command(override_usage = "gdf alias add [options] <name> <command>")]
    Add(AliasAddOptions),

    /// Remove global alias.
    #[command(override_usage = "gdf alias remove [options] <name>")]
    Remove(AliasRemoveOptions),

    /// List global aliases.
    #[command(override_usage = "gdf alias list [options]")]
    List,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AliasAddOptions {
    #[arg(required = true, value_name = "name")]
    pub name: String,

    #[arg(required = true, value_name = "command")]
    pub command: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AliasRemoveOptions {
    #[arg(required = true, value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DetectOptions {
    /// Configuration file path or shell command.
    #[arg(required = true, value_name = "input")]
    pub input: String,
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match cli.run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:#}");
            exit(error_kind(&error).exit_code());
        }
    }
}

fn run_apply(root: &Path, opts: ApplyCommand) -> Result<i32> {
    let settings = Settings::load(root)?;
    let bundles = load_bundles(root)?;
    let requested = requested_or_all(opts.apps.clone(), &bundles);
    let order = resolve(&requested, &bundles)?;

    let findings = risk::scan(order.iter().copied());
    for finding in &findings {
        warn!("risky command in {finding}");
    }
    if !findings.is_empty() && !opts.yes && !opts.dry_run {
        let proceed = InquirePrompter::new()
            .confirm("apply anyway?", false)
            .unwrap_or(false);
        if !proceed {
            info!("apply cancelled");
            return Ok(1);
        }
    }

    let options = ApplyOptions {
        dry_run: opts.dry_run,
        fail_fast: opts.fail_fast || settings.fail_fast,
        shell: settings.shell,
    };
    let bar = spinner();
    let report = if opts.yes {
        apply_with(AssumeYes, root, &settings, options, &opts, &requested, &bundles, &bar)
    } else {
        let prompter = InquirePrompter::with_progress(bar.clone());
        apply_with(prompter, root, &settings, options, &opts, &requested, &bundles, &bar)
    };
    bar.finish_and_clear();

    let report = report?;
    print_report(&report);

    if report.is_success() {
        return Ok(0);
    }

    let code = report
        .bundles
        .iter()
        .flat_map(|bundle| bundle.errors.iter())
        .chain(report.errors.iter())
        .map(|err| err.kind().exit_code())
        .max()
        .unwrap_or(1);

    Ok(code)
}

#[allow(clippy::too_many_arguments)]
fn apply_with<P: Prompter>(
    prompter: P,
    root: &Path,
    settings: &Settings,
    options: ApplyOptions,
    opts: &ApplyCommand,
    requested: &[String],
    bundles: &BTreeMap<String, Bundle>,
    bar: &ProgressBar,
) -> Result<ApplyReport, EngineError> {
    let aliases = AliasStore::load(AliasStore::default_path()?)?;
    let generator = InitScript::new().with_global_aliases(aliases.aliases().clone());
    let installer = SystemInstaller::new(SystemRunner, prompter);

    let mut engine = Engine::new(root, Platform::detect(), settings, installer, SystemRunner)
        .with_generator(generator)
        .with_options(options)
        .with_progress(bar.clone());
    if let Some(strategy) = opts.strategy {
        engine = engine.with_strategy(strategy);
    }

    engine.apply(requested, bundles)
}

fn print_report(report: &ApplyReport) {
    let prefix = if report.dry_run { "would " } else { "" };
    for bundle in &report.bundles {
        println!("{}:", bundle.name);
        for action in &bundle.actions {
            println!("  {prefix}{action}");
        }
        for err in &bundle.errors {
            println!("  error: {}", render(err));
        }
    }

    for err in &report.errors {
        error!("{}", render(err));
    }

    if let Some(log) = &report.log_path {
        info!("operation log written to {}", log.display());
    }
}

fn run_rollback(root: &Path, opts: RollbackOptions) -> Result<i32> {
    let log = match opts.log {
        Some(log) => log,
        None => latest_log(root)?.ok_or_else(|| anyhow!("no operation log to roll back"))?,
    };

    let mut prompter = InquirePrompter::new();
    let selector: Option<&mut dyn SnapshotSelector> = if opts.interactive {
        Some(&mut prompter)
    } else {
        None
    };
    let result = rollback(root, &log, selector)?;

    for path in &result.restored {
        println!("restored {}", path.display());
    }
    for path in &result.removed {
        println!("removed {}", path.display());
    }
    for failure in &result.failed {
        error!("{failure}");
    }

    Ok(if result.is_success() { 0 } else { 1 })
}

fn run_history(root: &Path, opts: HistoryOptions) -> Result<i32> {
    let settings = Settings::load(root)?;
    for log in list_logs(root)? {
        let operations = read_log(&log)?;
        let name = log.file_name().unwrap_or(log.as_os_str()).to_string_lossy();
        println!("{name}: {} operations", operations.len());
        if opts.operations {
            for operation in &operations {
                println!("  {} {}", operation.kind, operation.target);
            }
        }
    }

    let history = HistoryManager::for_root(root, settings.history_max_bytes);
    println!(
        "snapshot history uses {} of {} bytes",
        history.total_bytes()?,
        history.max_bytes()
    );

    Ok(0)
}

fn run_scan(root: &Path, opts: ScanOptions) -> Result<i32> {
    let bundles = load_bundles(root)?;
    let requested = requested_or_all(opts.apps, &bundles);
    let order = resolve(&requested, &bundles)?;

    let findings = risk::scan(order.iter().copied());
    for finding in &findings {
        println!("{finding}");
    }
    info!("{} risky commands found", findings.len());

    Ok(0)
}

fn run_shell(root: &Path, opts: ShellOptions) -> Result<i32> {
    let bundles = load_bundles(root)?;
    let requested = bundles.keys().cloned().collect::<Vec<_>>();
    let order = resolve(&requested, &bundles)?;
    let aliases = AliasStore::load(AliasStore::default_path()?)?;

    let script = InitScript::new()
        .with_global_aliases(aliases.aliases().clone())
        .generate(&order, opts.shell);
    print!("{script}");

    Ok(0)
}

fn run_alias(opts: AliasCommand) -> Result<i32> {
    let mut store = AliasStore::load(AliasStore::default_path()?)?;
    match opts {
        AliasCommand::Add(opts) => {
            if let Some(old) = store.insert(&opts.name, opts.command) {
                info!("replace alias {} (was {old:?})", opts.name);
            }
            store.save()?;
        }
        AliasCommand::Remove(opts) => match store.remove(&opts.name) {
            Some(_) => store.save()?,
            None => warn!("no alias named {}", opts.name),
        },
        AliasCommand::List => {
            for (name, command) in store.aliases() {
                println!("{name}={command}");
            }
        }
    }

    Ok(0)
}

fn run_detect(opts: DetectOptions) -> Result<i32> {
    let input = opts.input.as_str();
    let name = if input.contains('/') || input.starts_with('~') || input.starts_with('.') {
        detect::from_path(input)
    } else {
        detect::from_command(input)
    };

    match name {
        Some(name) => {
            println!("{name}");
            Ok(0)
        }
        None => Err(anyhow!("cannot detect app name from {input:?}")),
    }
}

fn requested_or_all(apps: Vec<String>, bundles: &BTreeMap<String, Bundle>) -> Vec<String> {
    if apps.is_empty() {
        bundles.keys().cloned().collect()
    } else {
        apps
    }
}

fn spinner() -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner:.blue.bold} [{pos}/{len}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner().with_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

fn render(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

fn error_kind(error: &anyhow::Error) -> ErrorKind {
    for cause in error.chain() {
        if let Some(err) = cause.downcast_ref::<EngineError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<ConfigError>() {
            return match err {
                ConfigError::Read { .. } => ErrorKind::FilesystemIo,
                _ => ErrorKind::InputValidation,
            };
        }
        if cause.is::<ResolveError>()
            || cause.is::<GuardError>()
            || matches!(cause.downcast_ref::<LinkError>(), Some(LinkError::UnknownStrategy(_)))
            || matches!(cause.downcast_ref::<ShellError>(), Some(ShellError::Unsupported(_)))
            || matches!(cause.downcast_ref::<AliasError>(), Some(AliasError::Parse { .. }))
        {
            return ErrorKind::InputValidation;
        }
    }

    ErrorKind::FilesystemIo
}
