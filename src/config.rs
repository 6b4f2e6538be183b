// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for configuration files that gdf uses to simplify the
//! process of serialization and deserialization. There are two kinds of
//! configuration file:
//!
//! 1. __App bundles__ at `<root>/apps/*.yaml`, one bundle per file.
//! 2. __Engine settings__ at `<root>/config.toml`, which is optional.
//!
//! # App Bundles
//!
//! A bundle groups a package, a set of dotfiles, shell integration, and
//! lifecycle hooks under a single name. Bundles may list other bundles as
//! dependencies, which are applied first.
//!
//! ```yaml
//! name: git
//! dependencies: [ssh]
//! package:
//!   brew: git
//!   apt: git
//! dotfiles:
//!   - source: git/config
//!     target: ~/.gitconfig
//!   - source: git/ignore
//!     target:
//!       default: ~/.config/git/ignore
//!       macos: ~/Library/git/ignore
//! ```

use crate::{
    engine::link::ConflictStrategy,
    engine::history::DEFAULT_MAX_BYTES,
    platform::{Guard, Platform},
    shell::Shell,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
};
use tracing::{debug, instrument};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z][a-z0-9-]*$").unwrap_or_else(|_| unreachable!("static pattern is valid"))
});

/// Check that a bundle name is a valid identifier.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// App bundle layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Bundle {
    /// Unique lowercase identifier. Defaults to file stem when loaded.
    pub name: String,

    /// Brief description of what the bundle manages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Bundles that must be applied first.
    pub dependencies: Vec<String>,

    /// Package to install.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageSpec>,

    /// Dotfiles to link into place.
    pub dotfiles: Vec<Dotfile>,

    /// Shell integration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellSpec>,

    /// Lifecycle hooks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,

    /// Plugins the bundle carries for its tool.
    pub plugins: Vec<Plugin>,

    /// Other bundles worth suggesting alongside this one.
    pub companions: Vec<String>,
}

impl Bundle {
    /// Validate bundle invariants.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] naming the offending field path.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: String, reason: &str| ConfigError::Invalid {
            bundle: self.name.clone(),
            field,
            reason: reason.to_string(),
        };

        if !is_valid_name(&self.name) {
            return Err(invalid("name".into(), "must match ^[a-z][a-z0-9-]*$"));
        }

        for (idx, dependency) in self.dependencies.iter().enumerate() {
            if !is_valid_name(dependency) {
                return Err(invalid(
                    format!("dependencies[{idx}]"),
                    "must match ^[a-z][a-z0-9-]*$",
                ));
            }
        }

        for (idx, dotfile) in self.dotfiles.iter().enumerate() {
            if dotfile.source.trim().is_empty() {
                return Err(invalid(format!("dotfiles[{idx}].source"), "must not be empty"));
            }

            if dotfile.target.is_empty() {
                return Err(invalid(format!("dotfiles[{idx}].target"), "must not be empty"));
            }

            if let Some(when) = &dotfile.when {
                when.parse::<Guard>().map_err(|err| {
                    invalid(format!("dotfiles[{idx}].when"), &err.to_string())
                })?;
            }
        }

        if let Some(hooks) = &self.hooks {
            for (idx, hook) in hooks.apply.iter().enumerate() {
                if hook.run.trim().is_empty() {
                    return Err(invalid(format!("hooks.apply[{idx}].run"), "must not be empty"));
                }

                if let Some(when) = &hook.when {
                    when.parse::<Guard>().map_err(|err| {
                        invalid(format!("hooks.apply[{idx}].when"), &err.to_string())
                    })?;
                }
            }
        }

        if let Some(custom) = self.package.as_ref().and_then(|p| p.custom.as_ref()) {
            if custom.script.trim().is_empty() {
                return Err(invalid("package.custom.script".into(), "must not be empty"));
            }
        }

        Ok(())
    }
}

impl FromStr for Bundle {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(data).map_err(ConfigError::Yaml)
    }
}

impl Display for Bundle {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_yaml::to_string(self)
                .map_err(ConfigError::Yaml)?
                .as_str(),
        )
    }
}

/// One symlink intent.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Dotfile {
    /// Path relative to `<root>/dotfiles/`.
    pub source: String,

    /// Canonical location to place symlink at.
    #[serde(default)]
    pub target: TargetSpec,

    /// Optional platform guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// File is a template.
    #[serde(default)]
    pub template: bool,

    /// File holds secrets. Advisory only.
    #[serde(default)]
    pub secret: bool,
}

impl Dotfile {
    /// Construct dotfile with single target.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: TargetSpec::Single(target.into()),
            ..Default::default()
        }
    }

    /// Absolute path of source file inside repository root.
    pub fn source_path(&self, root: &Path) -> PathBuf {
        root.join("dotfiles").join(&self.source)
    }

    /// Target path for platform with tilde expanded.
    pub fn target_path(&self, platform: &Platform) -> PathBuf {
        crate::path::expand(self.target.for_platform(platform))
    }
}

/// Target path, either shared or per platform.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetSpec {
    Single(String),
    PerPlatform(TargetMap),
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self::Single(String::new())
    }
}

impl TargetSpec {
    /// Select target for platform, falling back to `default`.
    pub fn for_platform(&self, platform: &Platform) -> &str {
        match self {
            Self::Single(target) => target.as_str(),
            Self::PerPlatform(map) => {
                let specific = match platform {
                    Platform::Macos => map.macos.as_deref(),
                    Platform::Linux { .. } => map.linux.as_deref(),
                    Platform::Wsl { .. } => map.wsl.as_deref(),
                };
                specific
                    .filter(|target| !target.is_empty())
                    .or(map.default.as_deref())
                    .unwrap_or_default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(target) => target.trim().is_empty(),
            Self::PerPlatform(map) => [&map.default, &map.macos, &map.linux, &map.wsl]
                .into_iter()
                .flatten()
                .all(|target| target.trim().is_empty()),
        }
    }
}

/// Per-platform target listing.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TargetMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wsl: Option<String>,
}

/// Package installation spec.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brew: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pacman: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomInstall>,

    /// Preferred manager per platform key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub prefer: BTreeMap<String, String>,
}

/// Custom installation script.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CustomInstall {
    pub script: String,

    /// Command whose success means the package is already installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,

    #[serde(default)]
    pub confirm: Confirm,
}

/// Confirmation policy for custom installs.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Confirm {
    /// Not specified, behaves as [`Confirm::Always`].
    #[default]
    Default,
    Always,
    Never,
}

impl Confirm {
    pub fn is_required(self) -> bool {
        !matches!(self, Self::Never)
    }
}

impl From<Option<bool>> for Confirm {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Default,
            Some(true) => Self::Always,
            Some(false) => Self::Never,
        }
    }
}

impl From<Confirm> for Option<bool> {
    fn from(value: Confirm) -> Self {
        match value {
            Confirm::Default => None,
            Confirm::Always => Some(true),
            Confirm::Never => Some(false),
        }
    }
}

/// Shell integration block.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellSpec {
    pub aliases: BTreeMap<String, String>,
    pub functions: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub init: Vec<String>,
    pub completions: Vec<String>,
}

/// Lifecycle hooks.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Hooks {
    pub pre_install: Vec<String>,
    pub post_install: Vec<String>,
    pub pre_link: Vec<String>,
    pub post_link: Vec<String>,
    pub apply: Vec<ApplyHook>,
}

/// Hook run on apply for package-less bundles.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ApplyHook {
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// Plugin record.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Plugin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Load and validate every bundle under `<root>/apps/`.
///
/// Bundles without a `name` take the stem of their file name.
///
/// # Errors
///
/// - Return [`ConfigError::Read`] if a bundle file cannot be read.
/// - Return [`ConfigError::Parse`] if a bundle file is not valid YAML.
/// - Return [`ConfigError::Invalid`] if a bundle breaks an invariant.
/// - Return [`ConfigError::Duplicate`] if two files declare the same name.
#[instrument(skip(root), level = "debug")]
pub fn load_bundles(root: &Path) -> Result<BTreeMap<String, Bundle>> {
    let pattern = root.join("apps").join("*.yaml");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(ConfigError::Pattern)?;

    let mut bundles = BTreeMap::new();
    for entry in entries {
        let path = entry.map_err(|err| ConfigError::Read {
            path: err.path().to_path_buf(),
            source: std::io::Error::new(err.error().kind(), err.error().to_string()),
        })?;
        let bundle = load_bundle(&path)?;
        debug!("loaded bundle {} from {}", bundle.name, path.display());
        if bundles.contains_key(&bundle.name) {
            return Err(ConfigError::Duplicate(bundle.name));
        }
        bundles.insert(bundle.name.clone(), bundle);
    }

    Ok(bundles)
}

/// Load and validate a single bundle file.
pub fn load_bundle(path: &Path) -> Result<Bundle> {
    let data = read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        source: err,
    })?;
    let mut bundle: Bundle = data.parse().map_err(|err| match err {
        ConfigError::Yaml(source) => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;

    if bundle.name.is_empty() {
        bundle.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    bundle.validate()?;

    Ok(bundle)
}

/// Engine settings layout.
///
/// Read from `<root>/config.toml`. Every field is optional.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Policy for targets that are already occupied.
    pub conflict_strategy: ConflictStrategy,

    /// Size bound of snapshot history.
    pub history_max_bytes: i64,

    /// Stop applying after first failed bundle.
    pub fail_fast: bool,

    /// Shell to generate init script for on apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<Shell>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::BackupAndReplace,
            history_max_bytes: DEFAULT_MAX_BYTES as i64,
            fail_fast: false,
            shell: None,
        }
    }
}

impl Settings {
    /// Load settings at `<root>/config.toml`, or defaults if missing.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not valid.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        match read_to_string(&path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Read { path, source: err }),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize settings.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize settings.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to (de)serialize bundle.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Bundle file is not valid YAML.
    #[error("failed to parse bundle file {:?}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Configuration file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bundle glob pattern is malformed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Bundle breaks invariant.
    #[error("bundle {bundle:?}: {field}: {reason}")]
    Invalid {
        bundle: String,
        field: String,
        reason: String,
    },

    /// Two bundle files declare same name.
    #[error("bundle {0:?} is defined more than once")]
    Duplicate(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
