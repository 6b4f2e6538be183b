// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Apply engine.
//!
//! The [`Engine`] drives one __apply__ run: it makes the machine converge to
//! the state declared by a set of bundles. Bundles are processed one at a time
//! in dependency order, each going through these steps:
//!
//! 1. Install its package, bracketed by `pre_install` and `post_install`
//!    hooks, unless the package is already installed.
//! 2. Run `pre_link` hooks.
//! 3. Link every dotfile whose `when` guard matches the platform.
//! 4. Run `post_link` hooks.
//! 5. Run `apply` hooks if the bundle has no package.
//!
//! Each bundle is its own unit of failure. A bundle that fails does not stop
//! the bundles after it unless fail-fast is requested, and nothing is undone
//! automatically. Every mutation is recorded in the operation log, which is
//! written once all bundles are done, so the run can be rolled back later.
//!
//! # Dry Run
//!
//! In dry-run mode the engine only reads. It resolves dependencies, queries
//! installers, and inspects link targets, then reports the actions it would
//! have taken. Nothing is installed, linked, run, or logged.

pub mod history;
pub mod link;
pub mod oplog;
pub mod rollback;

use crate::{
    alias::AliasError,
    config::{Bundle, ConfigError, Dotfile, Hooks, PackageSpec, Settings},
    exec::{ExecError, ProcessRunner},
    install::{resolve_name, InstallError, Installer, Manager},
    path::{normalize, NoWayHome},
    platform::{Guard, GuardError, Platform},
    resolve::{resolve, ResolveError},
    shell::{write_script, InitScript, Shell, ShellError, ShellGenerator},
};
use history::{HistoryError, HistoryManager, Snapshot};
use link::{ConflictStrategy, LinkError, LinkOutcome, LinkPlan, Linker};
use oplog::{format_timestamp, Logger, OperationKind, OplogError};
use rollback::RollbackError;

use indicatif::ProgressBar;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Lifecycle point a hook runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    PreInstall,
    PostInstall,
    PreLink,
    PostLink,
    Apply,
}

impl HookStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreInstall => "pre_install",
            Self::PostInstall => "post_install",
            Self::PreLink => "pre_link",
            Self::PostLink => "post_link",
            Self::Apply => "apply",
        }
    }
}

impl Display for HookStage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Knobs of one apply run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Only report what would be done.
    pub dry_run: bool,

    /// Stop at first failed bundle.
    pub fail_fast: bool,

    /// Generate init script for shell once bundles are applied.
    pub shell: Option<Shell>,
}

impl From<&Settings> for ApplyOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            dry_run: false,
            fail_fast: settings.fail_fast,
            shell: settings.shell,
        }
    }
}

/// Something the engine did, or would do in dry-run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Install { package: String, manager: Manager },
    AlreadyInstalled { package: String },
    NoPackage,
    RunHook { stage: HookStage, command: String },
    Link { target: PathBuf, plan: LinkPlan },
    SkipDotfile { target: PathBuf, guard: String },
    NoTarget { source: String },
    GenerateShell { shell: Shell, path: PathBuf },
}

impl Display for Action {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Install { package, manager } => write!(fmt, "install {package} via {manager}"),
            Self::AlreadyInstalled { package } => write!(fmt, "{package} already installed"),
            Self::NoPackage => fmt.write_str("no package for this platform"),
            Self::RunHook { stage, command } => write!(fmt, "run {stage} hook `{command}`"),
            Self::Link { target, plan } => match plan {
                LinkPlan::Create => write!(fmt, "link {}", target.display()),
                LinkPlan::AlreadyLinked => write!(fmt, "{} already linked", target.display()),
                LinkPlan::Resolve(strategy) => {
                    write!(fmt, "link {} ({strategy} existing)", target.display())
                }
            },
            Self::SkipDotfile { target, guard } => {
                write!(fmt, "skip {} (when: {guard})", target.display())
            }
            Self::NoTarget { source } => write!(fmt, "skip {source} (no target for this platform)"),
            Self::GenerateShell { shell, path } => {
                write!(fmt, "generate {shell} init script at {}", path.display())
            }
        }
    }
}

/// Outcome of one bundle.
#[derive(Debug, Default)]
pub struct BundleReport {
    pub name: String,
    pub actions: Vec<Action>,
    pub errors: Vec<EngineError>,
}

impl BundleReport {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of an apply run.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub bundles: Vec<BundleReport>,

    /// Failures outside of any bundle.
    pub errors: Vec<EngineError>,

    /// Operation log written by the run, if anything was recorded.
    pub log_path: Option<PathBuf>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.bundles.iter().all(BundleReport::is_success)
    }

    pub fn failed_bundles(&self) -> impl Iterator<Item = &BundleReport> {
        self.bundles.iter().filter(|bundle| !bundle.is_success())
    }
}

/// Apply orchestrator.
///
/// Capabilities are injected: `I` installs packages, `R` runs hooks, and `G`
/// renders shell init scripts.
#[derive(Debug)]
pub struct Engine<I, R, G = InitScript>
where
    I: Installer,
    R: ProcessRunner,
    G: ShellGenerator,
{
    root: PathBuf,
    platform: Platform,
    linker: Linker,
    installer: I,
    runner: R,
    generator: G,
    options: ApplyOptions,
    progress: Option<ProgressBar>,
}

impl<I, R> Engine<I, R, InitScript>
where
    I: Installer,
    R: ProcessRunner,
{
    /// Construct new engine for repository root.
    ///
    /// Conflict strategy, history quota, and apply options come from
    /// settings.
    pub fn new(root: &Path, platform: Platform, settings: &Settings, installer: I, runner: R) -> Self {
        let root = normalize(&std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf()));
        let history = HistoryManager::for_root(&root, settings.history_max_bytes);
        let linker = Linker::new(settings.conflict_strategy, platform.clone()).with_history(history);

        Self {
            root,
            platform,
            linker,
            installer,
            runner,
            generator: InitScript::new(),
            options: settings.into(),
            progress: None,
        }
    }
}

impl<I, R, G> Engine<I, R, G>
where
    I: Installer,
    R: ProcessRunner,
    G: ShellGenerator,
{
    /// Use another shell init script generator.
    pub fn with_generator<H: ShellGenerator>(self, generator: H) -> Engine<I, R, H> {
        Engine {
            root: self.root,
            platform: self.platform,
            linker: self.linker,
            installer: self.installer,
            runner: self.runner,
            generator,
            options: self.options,
            progress: self.progress,
        }
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Override conflict strategy from settings.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        let mut linker = Linker::new(strategy, self.platform.clone());
        if let Some(history) = self.linker.history() {
            linker = linker.with_history(history.clone());
        }
        self.linker = linker;
        self
    }

    /// Report bundle progress through progress bar.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn installer(&self) -> &I {
        &self.installer
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Apply requested bundles and their dependencies.
    ///
    /// Failures of individual bundles are collected into the report rather
    /// than returned.
    ///
    /// # Errors
    ///
    /// - Return [`EngineError::Resolve`] if dependencies cannot be resolved.
    ///   Nothing is touched in that case.
    #[instrument(skip(self, requested, bundles), level = "debug")]
    pub fn apply<S>(&self, requested: &[S], bundles: &BTreeMap<String, Bundle>) -> Result<ApplyReport>
    where
        S: AsRef<str>,
    {
        let order = resolve(requested, bundles)?;
        let mut logger = Logger::new(self.options.dry_run);
        let mut report = ApplyReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        if let Some(bar) = &self.progress {
            bar.set_length(order.len() as u64);
        }

        let mut applied = Vec::with_capacity(order.len());
        for bundle in &order {
            if let Some(bar) = &self.progress {
                bar.set_message(bundle.name.clone());
            }

            let mut bundle_report = BundleReport::new(&bundle.name);
            if let Err(err) = self.apply_bundle(bundle, &mut logger, &mut bundle_report) {
                bundle_report.errors.push(err);
            }

            for err in &bundle_report.errors {
                warn!("{}: {err}", bundle.name);
            }
            let failed = !bundle_report.is_success();
            report.bundles.push(bundle_report);
            applied.push(*bundle);

            if let Some(bar) = &self.progress {
                bar.inc(1);
            }

            if failed && self.options.fail_fast {
                warn!("stop applying after {} failed", bundle.name);
                break;
            }
        }

        if let Some(shell) = self.options.shell {
            match self.generate_shell(&applied, shell, &mut logger) {
                Ok(action) => report.bundles.push(BundleReport {
                    name: format!("{shell} init"),
                    actions: vec![action],
                    errors: Vec::new(),
                }),
                Err(err) => report.errors.push(err),
            }
        }

        match logger.save(&self.root) {
            Ok(path) => report.log_path = path,
            Err(err) => report.errors.push(err.into()),
        }

        Ok(report)
    }

    fn apply_bundle(&self, bundle: &Bundle, logger: &mut Logger, report: &mut BundleReport) -> Result<()> {
        info!("apply {}", bundle.name);
        let hooks = bundle.hooks.clone().unwrap_or_default();

        if let Some(package) = &bundle.package {
            self.install_package(bundle, package, &hooks, logger, report)?;
        }

        self.run_hooks(bundle, HookStage::PreLink, &hooks.pre_link, logger, report)?;

        for dotfile in &bundle.dotfiles {
            if dotfile.target.for_platform(&self.platform).is_empty() {
                debug!("skip {} because it has no target for {}", dotfile.source, self.platform);
                report.actions.push(Action::NoTarget {
                    source: dotfile.source.clone(),
                });
                continue;
            }

            if let Some(guard) = &dotfile.when {
                if !self.guard_matches(guard)? {
                    let target = self.linker.target_of(dotfile);
                    debug!("skip {} because of guard {guard:?}", target.display());
                    report.actions.push(Action::SkipDotfile {
                        target,
                        guard: guard.clone(),
                    });
                    continue;
                }
            }

            match self.link_dotfile(bundle, dotfile, logger) {
                Ok(action) => report.actions.push(action),
                Err(err) => report.errors.push(err),
            }
        }

        if !report.is_success() {
            return Ok(());
        }

        self.run_hooks(bundle, HookStage::PostLink, &hooks.post_link, logger, report)?;

        if bundle.package.is_none() {
            for hook in &hooks.apply {
                if let Some(guard) = &hook.when {
                    if !self.guard_matches(guard)? {
                        debug!("skip apply hook {:?} because of guard {guard:?}", hook.run);
                        continue;
                    }
                }
                self.run_hook(bundle, HookStage::Apply, &hook.run, logger, report)?;
            }
        }

        Ok(())
    }

    fn install_package(
        &self,
        bundle: &Bundle,
        package: &PackageSpec,
        hooks: &Hooks,
        logger: &mut Logger,
        report: &mut BundleReport,
    ) -> Result<()> {
        let manager = self.installer.select_manager(package, &self.platform);
        if manager == Manager::NoOp {
            warn!("{} has no package for {}", bundle.name, self.platform);
            report.actions.push(Action::NoPackage);
            return Ok(());
        }

        let name = match manager {
            Manager::Custom => bundle.name.clone(),
            _ => resolve_name(package, manager)
                .unwrap_or(bundle.name.as_str())
                .to_string(),
        };

        if self.installer.is_installed(package, &self.platform) {
            debug!("{name} already installed");
            report.actions.push(Action::AlreadyInstalled { package: name });
            return Ok(());
        }

        self.run_hooks(bundle, HookStage::PreInstall, &hooks.pre_install, logger, report)?;

        if !self.options.dry_run {
            let manager = self
                .installer
                .install(package, &self.platform)
                .map_err(|err| EngineError::Install {
                    package: name.clone(),
                    source: err,
                })?;
            logger.log(
                OperationKind::PackageInstall,
                name.clone(),
                details([("manager", manager.as_str()), ("app", bundle.name.as_str())]),
            );
        }
        report.actions.push(Action::Install {
            package: name,
            manager,
        });

        self.run_hooks(bundle, HookStage::PostInstall, &hooks.post_install, logger, report)
    }

    fn run_hooks(
        &self,
        bundle: &Bundle,
        stage: HookStage,
        commands: &[String],
        logger: &mut Logger,
        report: &mut BundleReport,
    ) -> Result<()> {
        for command in commands {
            self.run_hook(bundle, stage, command, logger, report)?;
        }

        Ok(())
    }

    fn run_hook(
        &self,
        bundle: &Bundle,
        stage: HookStage,
        command: &str,
        logger: &mut Logger,
        report: &mut BundleReport,
    ) -> Result<()> {
        if !self.options.dry_run {
            info!("run {stage} hook of {}: {command}", bundle.name);
            let output = self
                .runner
                .run_shell(command)
                .map_err(|err| EngineError::Hook { stage, source: err })?;
            if !output.is_empty() {
                debug!("{output}");
            }
            logger.log(
                OperationKind::HookRun,
                stage.as_str(),
                details([("command", command), ("app", bundle.name.as_str())]),
            );
        }
        report.actions.push(Action::RunHook {
            stage,
            command: command.to_string(),
        });

        Ok(())
    }

    fn link_dotfile(&self, bundle: &Bundle, dotfile: &Dotfile, logger: &mut Logger) -> Result<Action> {
        let target = self.linker.target_of(dotfile);
        if self.options.dry_run {
            let plan = self.linker.plan(dotfile, &self.root)?;
            return Ok(Action::Link { target, plan });
        }

        let outcome = match self.linker.link(dotfile, &self.root) {
            Ok(outcome) => outcome,
            Err(err) => {
                // INVARIANT: Record snapshots of occupants even if linking failed.
                //   - Rollback can only restore what the operation log knows about.
                if let Some(snapshot) = err.snapshot() {
                    self.record_link(bundle, dotfile, &target, Some(snapshot), logger);
                }
                return Err(err.into());
            }
        };

        // INVARIANT: Only record links this run created.
        //   - An already linked target was not touched, so there is nothing to roll back.
        let plan = match outcome {
            LinkOutcome::AlreadyLinked => LinkPlan::AlreadyLinked,
            LinkOutcome::Created { snapshot } => {
                self.record_link(bundle, dotfile, &target, snapshot.as_ref(), logger);
                match snapshot {
                    Some(_) => LinkPlan::Resolve(self.linker.strategy()),
                    None => LinkPlan::Create,
                }
            }
        };

        Ok(Action::Link { target, plan })
    }

    fn record_link(
        &self,
        bundle: &Bundle,
        dotfile: &Dotfile,
        target: &Path,
        snapshot: Option<&Snapshot>,
        logger: &mut Logger,
    ) {
        let source_abs = dotfile.source_path(&self.root);
        let mut details = details([
            ("source", dotfile.source.as_str()),
            ("source_abs", &*source_abs.to_string_lossy()),
            ("app", bundle.name.as_str()),
        ]);
        if let Some(snapshot) = snapshot {
            details.extend(snapshot_details(snapshot));
        }
        logger.log(OperationKind::Link, target.to_string_lossy(), details);
    }

    fn generate_shell(&self, order: &[&Bundle], shell: Shell, logger: &mut Logger) -> Result<Action> {
        let path = shell.script_path(&self.root);
        if !self.options.dry_run {
            let script = self.generator.generate(order, shell);
            write_script(&self.root, shell, &script)?;
            logger.log(
                OperationKind::ShellGenerate,
                path.to_string_lossy(),
                details([("shell", shell.as_str())]),
            );
        }

        Ok(Action::GenerateShell { shell, path })
    }

    fn guard_matches(&self, expr: &str) -> Result<bool> {
        let guard: Guard = expr.parse().map_err(|err| EngineError::Guard {
            expr: expr.to_string(),
            source: err,
        })?;

        Ok(guard.matches(&self.platform))
    }
}

fn details<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn snapshot_details(snapshot: &Snapshot) -> BTreeMap<String, String> {
    let stored_path = snapshot.stored_path.to_string_lossy();
    let mode = snapshot.mode_octal();
    let captured_at = format_timestamp(&snapshot.captured_at);
    let link_target = snapshot
        .link_target
        .as_ref()
        .map(|target| target.to_string_lossy().into_owned())
        .unwrap_or_default();

    details([
        ("snapshot_path", stored_path.as_ref()),
        ("snapshot_kind", snapshot.kind.as_str()),
        ("snapshot_mode", mode.as_str()),
        ("snapshot_link_target", link_target.as_str()),
        ("snapshot_captured_at", captured_at.as_str()),
        ("snapshot_checksum", snapshot.checksum.as_str()),
    ])
}

/// Abstract failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputValidation,
    Conflict,
    FilesystemIo,
    QuotaExceeded,
    Subprocess,
    UserDeclined,
    SourceMissing,
    SnapshotMissing,
}

impl ErrorKind {
    /// Process exit code for failures of this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InputValidation => 2,
            _ => 1,
        }
    }
}

/// Engine error types.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration is invalid or unreadable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dependencies cannot be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Guard expression is invalid.
    #[error("invalid guard {expr:?}")]
    Guard {
        expr: String,
        #[source]
        source: GuardError,
    },

    /// Dotfile cannot be linked.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Package cannot be installed.
    #[error("failed to install package {package:?}")]
    Install {
        package: String,
        #[source]
        source: InstallError,
    },

    /// Hook fails.
    #[error("{stage} hook failed")]
    Hook {
        stage: HookStage,
        #[source]
        source: ExecError,
    },

    /// Shell init script cannot be produced.
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// Operation log cannot be written or read.
    #[error(transparent)]
    Oplog(#[from] OplogError),

    /// Rollback cannot start.
    #[error(transparent)]
    Rollback(#[from] RollbackError),

    /// Global aliases cannot be loaded or saved.
    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl EngineError {
    /// Categorize error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(ConfigError::Read { .. }) => ErrorKind::FilesystemIo,
            Self::Config(_) | Self::Resolve(_) | Self::Guard { .. } => ErrorKind::InputValidation,
            Self::Link(err) => match err {
                LinkError::SourceMissing(_) => ErrorKind::SourceMissing,
                LinkError::TargetExists(_) => ErrorKind::Conflict,
                LinkError::UnknownStrategy(_) | LinkError::NoTarget(_) => ErrorKind::InputValidation,
                LinkError::History(HistoryError::Evict { .. }) => ErrorKind::QuotaExceeded,
                LinkError::History(_) | LinkError::Place { .. } | LinkError::Io { .. } => {
                    ErrorKind::FilesystemIo
                }
            },
            Self::Install { source, .. } => match source {
                InstallError::Declined(_) => ErrorKind::UserDeclined,
                InstallError::UnknownManager(_) => ErrorKind::InputValidation,
                InstallError::Exec(ExecError::Prompt(_)) => ErrorKind::UserDeclined,
                InstallError::NoManager(_) | InstallError::Exec(_) => ErrorKind::Subprocess,
            },
            Self::Hook { .. } => ErrorKind::Subprocess,
            Self::Shell(ShellError::Unsupported(_)) => ErrorKind::InputValidation,
            Self::Rollback(RollbackError::SnapshotMissing(_)) => ErrorKind::SnapshotMissing,
            Self::Alias(AliasError::Parse { .. }) => ErrorKind::InputValidation,
            Self::Shell(_) | Self::Oplog(_) | Self::Rollback(_) | Self::Alias(_) | Self::NoWayHome(_) => {
                ErrorKind::FilesystemIo
            }
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
