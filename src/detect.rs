// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bundle name auto-detection.
//!
//! Guess which bundle a configuration file or a shell command belongs to, so
//! new bundles can be scaffolded without asking the user for a name.

use crate::config::is_valid_name;

use std::path::{Component, Path};

const EXTENSIONS: &[&str] = &[".conf", ".config", ".toml", ".yaml", ".yml", ".json", ".lua", ".ini"];
const SUFFIXES: &[&str] = &["_profile", "rc", "config", "profile"];
const WRAPPERS: &[&str] = &["sudo", "env", "command", "exec", "nohup", "time"];

/// Guess bundle name from path of a configuration file.
///
/// Paths under `~/.config/<tool>/` map to `<tool>`. Otherwise the first
/// hidden component is stripped of its dot, extension, and suffixes like
/// `rc` or `config`, e.g., `~/.zshrc` maps to `zsh`.
pub fn from_path(path: &str) -> Option<String> {
    let names = Path::new(path)
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if let Some(idx) = names.iter().position(|name| name == ".config") {
        if let Some(tool) = names.get(idx + 1) {
            return sanitize(strip_extension(tool));
        }
    }

    let hidden = names.iter().find(|name| name.starts_with('.') && name.len() > 1);
    let name = hidden.or(names.last())?;
    let mut stem = strip_extension(name.trim_start_matches('.'));
    for suffix in SUFFIXES {
        if let Some(base) = stem.strip_suffix(suffix).filter(|base| base.len() > 1) {
            stem = base;
            break;
        }
    }

    sanitize(stem)
}

/// Guess bundle name from a shell command.
///
/// Leading `sudo`, `env`, and similar wrappers are skipped, as are
/// environment assignments like `FOO=bar`. The program's base name is used.
pub fn from_command(command: &str) -> Option<String> {
    let program = command
        .split_whitespace()
        .find(|token| !WRAPPERS.contains(token) && !is_assignment(token) && !token.starts_with('-'))?;
    let base = Path::new(program).file_name()?.to_string_lossy().into_owned();

    sanitize(&base)
}

fn is_assignment(token: &str) -> bool {
    token.split_once('=').is_some_and(|(key, _)| {
        !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn strip_extension(name: &str) -> &str {
    EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext).filter(|base| !base.is_empty()))
        .unwrap_or(name)
}

fn sanitize(name: &str) -> Option<String> {
    let name = name
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '_' | '.' | ' ') { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>();
    let name = name
        .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
        .trim_end_matches('-');

    is_valid_name(name).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("~/.config/nvim/init.lua", Some("nvim"); "xdg config dir")]
    #[test_case("/home/u/.config/starship.toml", Some("starship"); "xdg config file")]
    #[test_case("~/.zshrc", Some("zsh"); "rc suffix")]
    #[test_case("~/.gitconfig", Some("git"); "config suffix")]
    #[test_case("~/.tmux.conf", Some("tmux"); "conf extension")]
    #[test_case("~/.bash_profile", Some("bash"); "profile suffix")]
    #[test_case("~/.ssh/config", Some("ssh"); "hidden directory")]
    #[test_case("/etc/hosts", Some("hosts"); "plain file")]
    #[test_case("~/.1234", None; "nothing usable")]
    #[test]
    fn detect_from_path(path: &str, expect: Option<&str>) {
        pretty_assertions::assert_eq!(from_path(path).as_deref(), expect);
    }

    #[test_case("git status", Some("git"); "plain")]
    #[test_case("sudo -E EDITOR=vim /usr/bin/nvim file", Some("nvim"); "wrappers and assignments")]
    #[test_case("RUST_LOG=debug cargo build", Some("cargo"); "leading assignment")]
    #[test_case("env FOO=1 docker_compose up", Some("docker-compose"); "underscore")]
    #[test_case("sudo", None; "only wrapper")]
    #[test_case("", None; "empty")]
    #[test]
    fn detect_from_command(command: &str, expect: Option<&str>) {
        pretty_assertions::assert_eq!(from_command(command).as_deref(), expect);
    }
}
