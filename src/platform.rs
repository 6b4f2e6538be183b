// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Platform description.
//!
//! The engine never probes the host on its own. Callers detect the platform
//! once, and hand the resulting [`Platform`] to everything that needs to make
//! a per-platform decision, e.g., which target path a dotfile resolves to, or
//! which package manager installs a bundle.
//!
//! # Guards
//!
//! Dotfiles and apply hooks may carry a `when` guard. A guard is a tiny
//! expression evaluated against the platform:
//!
//! - `os == macos`, `os != linux`
//! - `distro == debian`, `distro != fedora`, `distro =~ ^(arch|manjaro)$`
//! - `wsl`, `!wsl`

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    str::FromStr,
};
use tracing::debug;

/// Linux distribution family.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Distro {
    Debian,
    Fedora,
    Arch,
    #[default]
    Unknown,
    Other(String),
}

impl Distro {
    /// Classify distribution from os-release `ID` and `ID_LIKE` values.
    pub fn classify(id: &str, id_like: &str) -> Self {
        let candidates = std::iter::once(id).chain(id_like.split_whitespace());
        for candidate in candidates {
            match candidate.trim_matches('"') {
                "debian" | "ubuntu" | "linuxmint" | "pop" => return Self::Debian,
                "fedora" | "rhel" | "centos" => return Self::Fedora,
                "arch" | "manjaro" | "endeavouros" => return Self::Arch,
                _ => continue,
            }
        }

        match id.trim_matches('"') {
            "" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Debian => "debian",
            Self::Fedora => "fedora",
            Self::Arch => "arch",
            Self::Unknown => "unknown",
            Self::Other(id) => id.as_str(),
        }
    }
}

impl Display for Distro {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Host platform the engine converges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Macos,
    Linux { distro: Distro },
    Wsl { distro: Distro },
}

impl Platform {
    /// Detect current host platform.
    ///
    /// Reads `/etc/os-release` for distribution family, and `/proc/version`
    /// for WSL markers. Missing files are treated as unknown values.
    pub fn detect() -> Self {
        if std::env::consts::OS == "macos" {
            return Self::Macos;
        }

        let os_release = read_to_string("/etc/os-release").unwrap_or_default();
        let proc_version = read_to_string("/proc/version").unwrap_or_default();
        let platform = Self::from_release_info(&os_release, &proc_version);
        debug!("detected platform {platform}");

        platform
    }

    /// Build Linux platform from contents of os-release and /proc/version.
    pub fn from_release_info(os_release: &str, proc_version: &str) -> Self {
        let field = |key: &str| {
            os_release
                .lines()
                .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
                .unwrap_or_default()
        };
        let distro = Distro::classify(field("ID"), field("ID_LIKE"));

        if proc_version.to_lowercase().contains("microsoft") {
            Self::Wsl { distro }
        } else {
            Self::Linux { distro }
        }
    }

    /// Key used by per-platform target maps and package preference maps.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Macos => "macos",
            Self::Linux { .. } => "linux",
            Self::Wsl { .. } => "wsl",
        }
    }

    pub fn distro(&self) -> Option<&Distro> {
        match self {
            Self::Macos => None,
            Self::Linux { distro } | Self::Wsl { distro } => Some(distro),
        }
    }

    pub fn is_macos(&self) -> bool {
        matches!(self, Self::Macos)
    }

    pub fn is_debian(&self) -> bool {
        matches!(self.distro(), Some(Distro::Debian))
    }

    pub fn is_fedora(&self) -> bool {
        matches!(self.distro(), Some(Distro::Fedora))
    }

    pub fn is_arch(&self) -> bool {
        matches!(self.distro(), Some(Distro::Arch))
    }

    pub fn is_wsl(&self) -> bool {
        matches!(self, Self::Wsl { .. })
    }

    /// Operating system name used by `os` guards.
    pub fn os(&self) -> &'static str {
        match self {
            Self::Macos => "macos",
            Self::Linux { .. } | Self::Wsl { .. } => "linux",
        }
    }
}

impl Display for Platform {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Macos => fmt.write_str("macos"),
            Self::Linux { distro } => write!(fmt, "linux ({distro})"),
            Self::Wsl { distro } => write!(fmt, "wsl ({distro})"),
        }
    }
}

/// Parsed `when` guard expression.
#[derive(Debug, Clone)]
pub enum Guard {
    OsEq(String),
    OsNe(String),
    DistroEq(String),
    DistroNe(String),
    DistroMatch(Regex),
    Wsl,
    NotWsl,
}

impl Guard {
    /// Evaluate guard against platform.
    pub fn matches(&self, platform: &Platform) -> bool {
        let distro = platform.distro().map(Distro::as_str).unwrap_or_default();
        match self {
            Self::OsEq(os) => platform.os() == os || platform.key() == os,
            Self::OsNe(os) => platform.os() != os && platform.key() != os,
            Self::DistroEq(name) => distro == name,
            Self::DistroNe(name) => distro != name,
            Self::DistroMatch(regex) => regex.is_match(distro),
            Self::Wsl => platform.is_wsl(),
            Self::NotWsl => !platform.is_wsl(),
        }
    }
}

impl FromStr for Guard {
    type Err = GuardError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        match expr {
            "wsl" => return Ok(Self::Wsl),
            "!wsl" => return Ok(Self::NotWsl),
            _ => {}
        }

        let invalid = || GuardError::Invalid(expr.to_string());
        for op in ["==", "!=", "=~"] {
            let Some((key, value)) = expr.split_once(op) else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            if value.is_empty() {
                return Err(invalid());
            }

            return match (key.trim(), op) {
                ("os", "==") => Ok(Self::OsEq(value)),
                ("os", "!=") => Ok(Self::OsNe(value)),
                ("distro", "==") => Ok(Self::DistroEq(value)),
                ("distro", "!=") => Ok(Self::DistroNe(value)),
                ("distro", "=~") => Regex::new(&value)
                    .map(Self::DistroMatch)
                    .map_err(|err| GuardError::Regex {
                        expr: expr.to_string(),
                        source: err,
                    }),
                _ => Err(invalid()),
            };
        }

        Err(invalid())
    }
}

/// Guard parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Guard syntax not understood.
    #[error("invalid guard expression {0:?}")]
    Invalid(String),

    /// Guard regex fails to compile.
    #[error("invalid regex in guard expression {expr:?}")]
    Regex {
        expr: String,
        #[source]
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn detect_from_release_info() {
        let ubuntu = indoc! {r#"
            NAME="Ubuntu"
            ID=ubuntu
            ID_LIKE=debian
        "#};
        assert_eq!(
            Platform::from_release_info(ubuntu, "Linux version 6.1.0"),
            Platform::Linux { distro: Distro::Debian }
        );
        assert_eq!(
            Platform::from_release_info(ubuntu, "Linux version 5.15-microsoft-standard-WSL2"),
            Platform::Wsl { distro: Distro::Debian }
        );

        let rocky = indoc! {r#"
            ID="rocky"
            ID_LIKE="rhel centos fedora"
        "#};
        assert!(Platform::from_release_info(rocky, "").is_fedora());

        let alpine = "ID=alpine\n";
        assert_eq!(
            Platform::from_release_info(alpine, ""),
            Platform::Linux { distro: Distro::Other("alpine".into()) }
        );
    }

    #[test]
    fn platform_predicates() {
        let wsl = Platform::Wsl { distro: Distro::Fedora };
        assert!(wsl.is_wsl());
        assert!(wsl.is_fedora());
        assert!(!wsl.is_macos());
        assert_eq!(wsl.key(), "wsl");
        assert_eq!(wsl.os(), "linux");
        assert!(Platform::Macos.distro().is_none());
    }

    #[test_case("os == macos", Platform::Macos, true; "os equal")]
    #[test_case("os != macos", Platform::Macos, false; "os not equal")]
    #[test_case("os == linux", Platform::Wsl { distro: Distro::Debian }, true; "wsl is linux")]
    #[test_case("os == wsl", Platform::Wsl { distro: Distro::Debian }, true; "wsl key")]
    #[test_case("distro == debian", Platform::Linux { distro: Distro::Debian }, true; "distro equal")]
    #[test_case("distro != debian", Platform::Linux { distro: Distro::Arch }, true; "distro not equal")]
    #[test_case("distro =~ ^(arch|fedora)$", Platform::Linux { distro: Distro::Arch }, true; "distro regex")]
    #[test_case("wsl", Platform::Linux { distro: Distro::Arch }, false; "not wsl host")]
    #[test_case("!wsl", Platform::Linux { distro: Distro::Arch }, true; "negated wsl")]
    #[test]
    fn guard_evaluation(expr: &str, platform: Platform, expect: bool) {
        let guard: Guard = expr.parse().unwrap();
        pretty_assertions::assert_eq!(guard.matches(&platform), expect);
    }

    #[test]
    fn guard_rejects_garbage() {
        assert!(matches!("hostname == box".parse::<Guard>(), Err(GuardError::Invalid(_))));
        assert!(matches!("os ==".parse::<Guard>(), Err(GuardError::Invalid(_))));
        assert!(matches!("distro =~ (".parse::<Guard>(), Err(GuardError::Regex { .. })));
    }
}
