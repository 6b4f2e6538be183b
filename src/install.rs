// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package installation.
//!
//! Bundles declare package names per package manager. The [`Installer`]
//! capability picks the [`Manager`] that fits the current platform, and hands
//! the package off to it. Package removal is deliberately absent: rollback
//! never reverses installs.

use crate::{
    config::{CustomInstall, PackageSpec},
    exec::{ExecError, ProcessRunner, Prompter},
    platform::Platform,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// Package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manager {
    Brew,
    Apt,
    Dnf,
    Pacman,
    Custom,
    NoOp,
}

impl Manager {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brew => "brew",
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Custom => "custom",
            Self::NoOp => "none",
        }
    }

    /// Default manager of a platform.
    pub fn platform_default(platform: &Platform) -> Self {
        match platform {
            Platform::Macos => Self::Brew,
            Platform::Linux { .. } | Platform::Wsl { .. } if platform.is_debian() => Self::Apt,
            Platform::Linux { .. } | Platform::Wsl { .. } if platform.is_fedora() => Self::Dnf,
            Platform::Linux { .. } | Platform::Wsl { .. } if platform.is_arch() => Self::Pacman,
            Platform::Linux { .. } | Platform::Wsl { .. } => Self::NoOp,
        }
    }

    /// Pick manager for package spec on platform.
    ///
    /// Tries the platform's `prefer` entry, then the platform default, then a
    /// custom script. Managers without a package name are skipped.
    pub fn select(spec: &PackageSpec, platform: &Platform) -> Self {
        let preferred = spec
            .prefer
            .get(platform.key())
            .and_then(|name| name.parse::<Manager>().ok());

        let candidates = preferred
            .into_iter()
            .chain([Self::platform_default(platform), Self::Custom]);
        for manager in candidates {
            if resolve_name(spec, manager).is_some() {
                return manager;
            }
        }

        Self::NoOp
    }

    /// Command line that installs package.
    fn install_command(self, name: &str) -> Option<(&'static str, Vec<&str>)> {
        match self {
            Self::Brew => Some(("brew", vec!["install", name])),
            Self::Apt => Some(("sudo", vec!["apt-get", "install", "-y", name])),
            Self::Dnf => Some(("sudo", vec!["dnf", "install", "-y", name])),
            Self::Pacman => Some(("sudo", vec!["pacman", "-S", "--noconfirm", name])),
            Self::Custom | Self::NoOp => None,
        }
    }

    /// Command line that succeeds if package is installed.
    fn query_command(self, name: &str) -> Option<(&'static str, Vec<&str>)> {
        match self {
            Self::Brew => Some(("brew", vec!["list", "--versions", name])),
            Self::Apt => Some(("dpkg", vec!["-s", name])),
            Self::Dnf => Some(("rpm", vec!["-q", name])),
            Self::Pacman => Some(("pacman", vec!["-Qi", name])),
            Self::Custom | Self::NoOp => None,
        }
    }
}

impl Display for Manager {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Manager {
    type Err = InstallError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "brew" => Ok(Self::Brew),
            "apt" => Ok(Self::Apt),
            "dnf" => Ok(Self::Dnf),
            "pacman" => Ok(Self::Pacman),
            "custom" => Ok(Self::Custom),
            other => Err(InstallError::UnknownManager(other.to_string())),
        }
    }
}

/// Configured package name for manager, if defined.
///
/// Custom installs resolve to their script.
pub fn resolve_name(spec: &PackageSpec, manager: Manager) -> Option<&str> {
    let name = match manager {
        Manager::Brew => spec.brew.as_deref(),
        Manager::Apt => spec.apt.as_deref(),
        Manager::Dnf => spec.dnf.as_deref(),
        Manager::Pacman => spec.pacman.as_deref(),
        Manager::Custom => spec.custom.as_ref().map(|custom| custom.script.as_str()),
        Manager::NoOp => None,
    };

    name.filter(|name| !name.trim().is_empty())
}

/// Package installation capability.
pub trait Installer {
    /// Manager that would handle package spec.
    fn select_manager(&self, spec: &PackageSpec, platform: &Platform) -> Manager {
        Manager::select(spec, platform)
    }

    /// Install package.
    fn install(&self, spec: &PackageSpec, platform: &Platform) -> Result<Manager>;

    /// Check if package is already installed.
    fn is_installed(&self, spec: &PackageSpec, platform: &Platform) -> bool;
}

/// Installer that drives real package managers through a process runner.
#[derive(Debug, Clone)]
pub struct SystemInstaller<R, P>
where
    R: ProcessRunner,
    P: Prompter,
{
    runner: R,
    prompter: P,
}

impl<R, P> SystemInstaller<R, P>
where
    R: ProcessRunner,
    P: Prompter,
{
    /// Construct new installer.
    pub fn new(runner: R, prompter: P) -> Self {
        Self { runner, prompter }
    }

    fn run_custom(&self, custom: &CustomInstall) -> Result<()> {
        if custom.confirm.is_required() {
            let message = format!("run custom install script `{}`?", custom.script);
            if !self.prompter.confirm(&message, false)? {
                return Err(InstallError::Declined(custom.script.clone()));
            }
        }

        let output = self.runner.run_shell(&custom.script)?;
        debug!("{output}");

        Ok(())
    }
}

impl<R, P> Installer for SystemInstaller<R, P>
where
    R: ProcessRunner,
    P: Prompter,
{
    #[instrument(skip(self, spec, platform), level = "debug")]
    fn install(&self, spec: &PackageSpec, platform: &Platform) -> Result<Manager> {
        let manager = self.select_manager(spec, platform);
        match manager {
            Manager::NoOp => return Err(InstallError::NoManager(platform.to_string())),
            Manager::Custom => {
                if let Some(custom) = &spec.custom {
                    self.run_custom(custom)?;
                }
            }
            _ => {
                let name = resolve_name(spec, manager).unwrap_or_default();
                if let Some((program, args)) = manager.install_command(name) {
                    self.runner.run(program, &args)?;
                }
            }
        }
        info!("installed package via {manager}");

        Ok(manager)
    }

    fn is_installed(&self, spec: &PackageSpec, platform: &Platform) -> bool {
        let manager = self.select_manager(spec, platform);
        match manager {
            Manager::NoOp => false,
            Manager::Custom => spec
                .custom
                .as_ref()
                .and_then(|custom| custom.check.as_deref())
                .is_some_and(|check| self.runner.run_shell(check).is_ok()),
            _ => {
                let name = resolve_name(spec, manager).unwrap_or_default();
                manager
                    .query_command(name)
                    .is_some_and(|(program, args)| self.runner.run(program, &args).is_ok())
            }
        }
    }
}

/// Package installation error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Manager name not understood.
    #[error("unknown package manager {0:?}")]
    UnknownManager(String),

    /// No manager can install package on platform.
    #[error("no package manager available on {0}")]
    NoManager(String),

    /// User declines custom install.
    #[error("custom install `{0}` declined")]
    Declined(String),

    /// Manager process fails.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Confirm, platform::Distro};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeRunner {
        calls: RefCell<Vec<String>>,
        failing: Vec<&'static str>,
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, program: &str, args: &[&str]) -> crate::exec::Result<String> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.borrow_mut().push(line.clone());
            if self.failing.iter().any(|fail| line.starts_with(fail)) {
                return Err(ExecError::Spawn {
                    command: line,
                    source: std::io::Error::other("boom"),
                });
            }

            Ok(String::new())
        }
    }

    struct Answer(bool);

    impl Prompter for Answer {
        fn confirm(&self, _message: &str, _default: bool) -> crate::exec::Result<bool> {
            Ok(self.0)
        }
    }

    fn spec() -> PackageSpec {
        PackageSpec {
            brew: Some("git".into()),
            apt: Some("git-all".into()),
            ..Default::default()
        }
    }

    #[test_case(Platform::Macos, Manager::Brew; "macos uses brew")]
    #[test_case(Platform::Linux { distro: Distro::Debian }, Manager::Apt; "debian uses apt")]
    #[test_case(Platform::Wsl { distro: Distro::Debian }, Manager::Apt; "wsl debian uses apt")]
    #[test_case(Platform::Linux { distro: Distro::Fedora }, Manager::NoOp; "fedora without dnf name")]
    #[test]
    fn select_platform_default(platform: Platform, expect: Manager) {
        pretty_assertions::assert_eq!(Manager::select(&spec(), &platform), expect);
    }

    #[test]
    fn select_honors_preference_and_custom_fallback() {
        let mut spec = spec();
        spec.prefer.insert("linux".into(), "brew".into());
        let linux = Platform::Linux { distro: Distro::Debian };
        assert_eq!(Manager::select(&spec, &linux), Manager::Brew);

        spec.prefer.insert("linux".into(), "dnf".into());
        assert_eq!(Manager::select(&spec, &linux), Manager::Apt);

        let custom = PackageSpec {
            custom: Some(CustomInstall {
                script: "./install.sh".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(Manager::select(&custom, &Platform::Macos), Manager::Custom);
        assert_eq!(resolve_name(&custom, Manager::Custom), Some("./install.sh"));
        assert_eq!(resolve_name(&custom, Manager::Brew), None);
    }

    #[test]
    fn install_runs_manager_command() -> anyhow::Result<()> {
        let installer = SystemInstaller::new(FakeRunner::default(), Answer(true));
        let linux = Platform::Linux { distro: Distro::Debian };

        assert_eq!(installer.install(&spec(), &linux)?, Manager::Apt);
        assert_eq!(
            installer.runner.calls.borrow().as_slice(),
            ["sudo apt-get install -y git-all"]
        );

        Ok(())
    }

    #[test]
    fn is_installed_queries_manager() {
        let installer = SystemInstaller::new(
            FakeRunner {
                failing: vec!["rpm"],
                ..Default::default()
            },
            Answer(true),
        );
        assert!(installer.is_installed(&spec(), &Platform::Macos));

        let fedora = PackageSpec {
            dnf: Some("git".into()),
            ..Default::default()
        };
        assert!(!installer.is_installed(&fedora, &Platform::Linux { distro: Distro::Fedora }));
        assert_eq!(
            installer.runner.calls.borrow().as_slice(),
            ["brew list --versions git", "rpm -q git"]
        );
    }

    #[test_case(Confirm::Default, false, true; "default requires confirmation")]
    #[test_case(Confirm::Always, true, false; "confirmed")]
    #[test_case(Confirm::Never, false, false; "never asks")]
    #[test]
    fn custom_install_confirmation(confirm: Confirm, answer: bool, expect_declined: bool) {
        let spec = PackageSpec {
            custom: Some(CustomInstall {
                script: "./install.sh".into(),
                check: None,
                confirm,
            }),
            ..Default::default()
        };
        let installer = SystemInstaller::new(FakeRunner::default(), Answer(answer));
        let result = installer.install(&spec, &Platform::Macos);

        pretty_assertions::assert_eq!(matches!(result, Err(InstallError::Declined(_))), expect_declined);
        let ran = !installer.runner.calls.borrow().is_empty();
        pretty_assertions::assert_eq!(ran, !expect_declined);
    }

    #[test]
    fn install_without_manager_fails() {
        let installer = SystemInstaller::new(FakeRunner::default(), Answer(true));
        let result = installer.install(&PackageSpec::default(), &Platform::Macos);
        assert!(matches!(result, Err(InstallError::NoManager(_))));
    }
}
