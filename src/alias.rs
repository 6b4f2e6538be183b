// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Global alias store.
//!
//! Aliases that belong to no bundle live in `~/.gdf/aliases.yaml`:
//!
//! ```yaml
//! aliases:
//!   ll: ls -lah
//!   gs: git status
//! ```

use crate::path::{home_dir, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Layout of aliases file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
struct AliasFile {
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

/// Keyed store of global aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasStore {
    path: PathBuf,
    aliases: BTreeMap<String, String>,
}

impl AliasStore {
    /// Default location of aliases file.
    ///
    /// # Errors
    ///
    /// - Return [`AliasError::NoWayHome`] if home directory is unknown.
    pub fn default_path() -> Result<PathBuf> {
        Ok(home_dir()?.join(".gdf").join("aliases.yaml"))
    }

    /// Load aliases file at path.
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// - Return [`AliasError::Read`] if file cannot be read.
    /// - Return [`AliasError::Parse`] if file is not valid.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let aliases = match fs::read_to_string(&path) {
            Ok(data) if data.trim().is_empty() => BTreeMap::new(),
            Ok(data) => {
                let file: AliasFile = serde_yaml::from_str(&data).map_err(|err| AliasError::Parse {
                    path: path.clone(),
                    source: err,
                })?;
                file.aliases
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no aliases file at {}", path.display());
                BTreeMap::new()
            }
            Err(err) => return Err(AliasError::Read { path, source: err }),
        };

        Ok(Self { path, aliases })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// Set alias, returning previous command if any.
    pub fn insert(&mut self, name: impl Into<String>, command: impl Into<String>) -> Option<String> {
        self.aliases.insert(name.into(), command.into())
    }

    /// Remove alias, returning its command if it existed.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.aliases.remove(name)
    }

    /// Write store back atomically.
    ///
    /// Data goes to a temporary sibling that replaces the aliases file once
    /// fully written.
    ///
    /// # Errors
    ///
    /// - Return [`AliasError::Write`] if file cannot be written.
    /// - Return [`AliasError::Serialize`] if aliases cannot be serialized.
    #[instrument(skip(self), level = "debug")]
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        mkdirp::mkdirp(dir).map_err(|err| AliasError::write(dir, err))?;

        let data = serde_yaml::to_string(&AliasFile {
            aliases: self.aliases.clone(),
        })?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|err| AliasError::write(dir, err))?;
        tmp.write_all(data.as_bytes())
            .map_err(|err| AliasError::write(tmp.path(), err))?;
        tmp.persist(&self.path)
            .map_err(|err| AliasError::write(&self.path, err.error))?;
        info!("saved {} aliases to {}", self.aliases.len(), self.path.display());

        Ok(())
    }
}

/// Alias store error types.
#[derive(Debug, thiserror::Error)]
pub enum AliasError {
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Aliases file cannot be read.
    #[error("failed to read aliases file {:?}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Aliases file is malformed.
    #[error("invalid aliases file {:?}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Aliases cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_yaml::Error),

    /// Aliases file cannot be written.
    #[error("failed to write aliases file {:?}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AliasError {
    fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = AliasError> = std::result::Result<T, E>;
