// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process and user interaction capabilities.
//!
//! The engine never spawns processes or prompts the user directly. Instead,
//! it goes through a [`ProcessRunner`] and a [`Prompter`], so tests can swap
//! in doubles that record what would have happened.

use crate::engine::rollback::{SnapshotCandidate, SnapshotSelector};

use indicatif::ProgressBar;
use inquire::{Confirm, Select};
use std::{
    ffi::OsStr,
    path::Path,
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument, warn};

/// Number of output lines kept when rendering failed commands.
pub const OUTPUT_TAIL_LINES: usize = 10;

/// Run external commands.
pub trait ProcessRunner {
    /// Run program with arguments, returning combined output on success.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Run command string through the platform shell.
    fn run_shell(&self, command: &str) -> Result<String> {
        self.run("sh", &["-c", command])
    }
}

/// Runner that spawns real processes, inheriting the current environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    #[instrument(skip(self, args), level = "debug")]
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        syscall_non_interactive(program, args)
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    let command = std::iter::once(cmd.as_ref())
        .chain(args.iter().map(|arg| arg.as_os_str()))
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");

    let output = Command::new(cmd.as_ref())
        .args(&args)
        .output()
        .map_err(|err| ExecError::Spawn {
            command: command.clone(),
            source: err,
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(stdout.as_str());
    }

    if !stderr.is_empty() {
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(stderr.as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message.trim_end_matches(['\r', '\n']).to_string();

    if !output.status.success() {
        return Err(ExecError::Failed {
            command,
            status: output.status,
            output: message,
        });
    }

    debug!("{command}: {message}");
    Ok(message)
}

/// Keep only the last lines of command output.
pub fn tail(output: &str, lines: usize) -> String {
    let all = output.lines().collect::<Vec<_>>();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Ask the user questions.
pub trait Prompter {
    /// Ask yes/no question.
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;
}

/// Prompter that answers yes to everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, message: &str, _default: bool) -> Result<bool> {
        debug!("assume yes: {message}");
        Ok(true)
    }
}

/// Prompter backed by inquire.
///
/// Suspends the progress bar, if any, for the duration of each prompt.
#[derive(Debug, Default, Clone)]
pub struct InquirePrompter {
    bar: Option<ProgressBar>,
}

impl InquirePrompter {
    /// Construct new prompter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend progress bar while prompting.
    pub fn with_progress(bar: ProgressBar) -> Self {
        Self { bar: Some(bar) }
    }

    fn suspend<T>(&self, prompt: impl FnOnce() -> T) -> T {
        match &self.bar {
            Some(bar) => bar.suspend(prompt),
            None => prompt(),
        }
    }
}

impl Prompter for InquirePrompter {
    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        self.suspend(|| Confirm::new(message).with_default(default).prompt())
            .map_err(ExecError::Prompt)
    }
}

impl SnapshotSelector for InquirePrompter {
    fn select(
        &mut self,
        target: &Path,
        candidates: &[SnapshotCandidate],
    ) -> Option<SnapshotCandidate> {
        let labels = candidates
            .iter()
            .map(SnapshotCandidate::to_string)
            .collect::<Vec<_>>();
        let message = format!("restore {} from which snapshot?", target.display());
        let choice = self.suspend(|| Select::new(&message, labels).raw_prompt());

        match choice {
            Ok(choice) => candidates.get(choice.index).cloned(),
            Err(err) => {
                warn!("snapshot selection aborted: {err}");
                None
            }
        }
    }
}

/// Process and prompt error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Process cannot be spawned.
    #[error("failed to spawn {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exits unsuccessfully.
    #[error("command {command:?} failed ({status}):\n{}", tail(.output, OUTPUT_TAIL_LINES))]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    /// Prompt cannot be answered.
    #[error(transparent)]
    Prompt(#[from] inquire::InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;
