// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shell integration.
//!
//! Bundles can declare environment variables, aliases, functions, init
//! snippets, and completions. A [`ShellGenerator`] turns those into one init
//! script that the user sources from their shell's rc file:
//!
//! ```sh
//! source ~/.gdf/.generated/init.zsh
//! ```

use crate::config::Bundle;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult, Write as _},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, instrument};

/// Supported shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

impl Shell {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
        }
    }

    /// Path generated init script is written to.
    pub fn script_path(self, root: &Path) -> PathBuf {
        root.join(".generated").join(format!("init.{self}"))
    }
}

impl Display for Shell {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Shell {
    type Err = ShellError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "bash" => Ok(Self::Bash),
            "zsh" => Ok(Self::Zsh),
            "fish" => Ok(Self::Fish),
            other => Err(ShellError::Unsupported(other.to_string())),
        }
    }
}

/// Shell init script generation capability.
pub trait ShellGenerator {
    /// Render init script for bundles in the order given.
    fn generate(&self, bundles: &[&Bundle], shell: Shell) -> String;
}

/// Default init script generator.
///
/// Emits one section per bundle with shell integration, followed by a section
/// for global aliases.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitScript {
    global_aliases: BTreeMap<String, String>,
}

impl InitScript {
    /// Construct new generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include global aliases after bundle sections.
    pub fn with_global_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.global_aliases = aliases;
        self
    }
}

impl ShellGenerator for InitScript {
    fn generate(&self, bundles: &[&Bundle], shell: Shell) -> String {
        let mut script = format!("# Generated by gdf for {shell}. Do not edit.\n");

        for bundle in bundles {
            let Some(spec) = &bundle.shell else {
                continue;
            };

            let _ = writeln!(script, "\n# {}", bundle.name);
            for (key, value) in &spec.env {
                script.push_str(&export(shell, key, value));
            }

            for (name, command) in &spec.aliases {
                script.push_str(&alias(shell, name, command));
            }

            for (name, body) in &spec.functions {
                script.push_str(&function(shell, name, body));
            }

            for line in spec.init.iter().chain(spec.completions.iter()) {
                let _ = writeln!(script, "{}", line.trim_end());
            }
        }

        if !self.global_aliases.is_empty() {
            script.push_str("\n# global aliases\n");
            for (name, command) in &self.global_aliases {
                script.push_str(&alias(shell, name, command));
            }
        }

        script
    }
}

fn export(shell: Shell, key: &str, value: &str) -> String {
    let value = value.replace('\\', "\\\\").replace('"', "\\\"");
    match shell {
        Shell::Bash | Shell::Zsh => format!("export {key}=\"{value}\"\n"),
        Shell::Fish => format!("set -gx {key} \"{value}\"\n"),
    }
}

fn alias(shell: Shell, name: &str, command: &str) -> String {
    match shell {
        Shell::Bash | Shell::Zsh => format!("alias {name}='{}'\n", command.replace('\'', r"'\''")),
        Shell::Fish => format!(
            "alias {name} '{}'\n",
            command.replace('\\', r"\\").replace('\'', r"\'")
        ),
    }
}

fn function(shell: Shell, name: &str, body: &str) -> String {
    let body = body
        .trim_end()
        .lines()
        .map(|line| format!("    {line}\n"))
        .collect::<String>();
    match shell {
        Shell::Bash | Shell::Zsh => format!("{name}() {{\n{body}}}\n"),
        Shell::Fish => format!("function {name}\n{body}end\n"),
    }
}

/// Write init script to `<root>/.generated/init.<shell>`.
///
/// # Errors
///
/// - Return [`ShellError::Io`] if script cannot be written.
#[instrument(skip(root, script), level = "debug")]
pub fn write_script(root: &Path, shell: Shell, script: &str) -> Result<PathBuf> {
    let path = shell.script_path(root);
    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent).map_err(|err| ShellError::Io {
            path: parent.to_path_buf(),
            source: err,
        })?;
    }

    fs::write(&path, script).map_err(|err| ShellError::Io {
        path: path.clone(),
        source: err,
    })?;
    info!("wrote {shell} init script to {}", path.display());

    Ok(path)
}

/// Shell integration error types.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Shell name not understood.
    #[error("unsupported shell {0:?}, expected bash, zsh, or fish")]
    Unsupported(String),

    /// Init script cannot be written.
    #[error("failed to write init script {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ShellError> = std::result::Result<T, E>;
