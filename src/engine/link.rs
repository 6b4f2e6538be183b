// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile linking.
//!
//! Dotfiles are deployed by placing a symlink at their target path that
//! points back into `<root>/dotfiles/`. The [`Linker`] reconciles that desired
//! symlink with whatever currently occupies the target path:
//!
//! - Nothing there? Create the symlink.
//! - Already our symlink? Nothing to do.
//! - Anything else? Defer to the [`ConflictStrategy`].
//!
//! Destructive strategies capture a snapshot of the occupant before touching
//! it, if a [`HistoryManager`] is attached. The snapshot travels back to the
//! caller through [`LinkOutcome`], so it can be recorded in the operation log.

use crate::{
    config::Dotfile,
    engine::history::{HistoryError, HistoryManager, Snapshot},
    path::{absolute_link_dest, normalize},
    platform::Platform,
};

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, Metadata},
    io::ErrorKind,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Number of rotated backups kept by [`ConflictStrategy::BackupAndReplace`].
pub const MAX_BACKUPS: usize = 3;

/// Suffix of backup siblings.
pub const BACKUP_SUFFIX: &str = ".gdf.bak";

/// Suffix of symlinks staged next to their target.
pub const STAGING_SUFFIX: &str = ".gdf.new";

/// Policy for target paths that are already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Refuse to touch occupied targets.
    Error,
    /// Snapshot occupant, then remove it.
    Replace,
    /// Same as [`ConflictStrategy::Replace`].
    Force,
    /// Snapshot occupant, then rotate it into `<target>.gdf.bak`.
    BackupAndReplace,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Replace => "replace",
            Self::Force => "force",
            Self::BackupAndReplace => "backup_and_replace",
        }
    }
}

impl Display for ConflictStrategy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = LinkError;

    fn from_str(strategy: &str) -> Result<Self, Self::Err> {
        match strategy {
            "error" => Ok(Self::Error),
            "replace" => Ok(Self::Replace),
            "force" => Ok(Self::Force),
            "backup_and_replace" => Ok(Self::BackupAndReplace),
            other => Err(LinkError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Result of linking a dotfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Symlink was created, possibly after resolving a conflict.
    Created { snapshot: Option<Snapshot> },

    /// Target already is the desired symlink.
    AlreadyLinked,
}

impl LinkOutcome {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Created { snapshot } => snapshot.as_ref(),
            Self::AlreadyLinked => None,
        }
    }

    pub fn into_snapshot(self) -> Option<Snapshot> {
        match self {
            Self::Created { snapshot } => snapshot,
            Self::AlreadyLinked => None,
        }
    }
}

/// What [`Linker::link`] would do, determined without mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPlan {
    Create,
    AlreadyLinked,
    Resolve(ConflictStrategy),
}

/// Reconcile desired symlinks with the filesystem.
#[derive(Debug, Clone)]
pub struct Linker {
    strategy: ConflictStrategy,
    platform: Platform,
    history: Option<HistoryManager>,
}

impl Linker {
    /// Construct new linker.
    pub fn new(strategy: ConflictStrategy, platform: Platform) -> Self {
        Self {
            strategy,
            platform,
            history: None,
        }
    }

    /// Attach snapshot history for destructive conflict resolution.
    pub fn with_history(mut self, history: HistoryManager) -> Self {
        self.history = Some(history);
        self
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn history(&self) -> Option<&HistoryManager> {
        self.history.as_ref()
    }

    /// Target path of dotfile for linker's platform.
    pub fn target_of(&self, dotfile: &Dotfile) -> PathBuf {
        dotfile.target_path(&self.platform)
    }

    /// Link dotfile into place.
    ///
    /// The symlink is first created at [`staging_path`], then renamed over
    /// the target, so an occupant is only replaced by a symlink that exists.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::NoTarget`] if dotfile has no target for the
    ///   linker's platform.
    /// - Return [`LinkError::SourceMissing`] if the dotfile source does not
    ///   exist in the repository.
    /// - Return [`LinkError::TargetExists`] if target is occupied under
    ///   [`ConflictStrategy::Error`].
    /// - Return [`LinkError::History`] if snapshot capture fails.
    /// - Return [`LinkError::Place`] if the staged symlink cannot be moved
    ///   over the target, carrying the occupant's snapshot.
    /// - Return [`LinkError::Io`] if any other filesystem operation fails.
    #[instrument(skip(self, dotfile, root), level = "debug")]
    pub fn link(&self, dotfile: &Dotfile, root: &Path) -> Result<LinkOutcome> {
        let source = dotfile.source_path(root);
        let target = self.target_of(dotfile);

        if dotfile.secret {
            warn!(
                "{} holds secrets, make sure the repository is private",
                dotfile.source
            );
        }

        if target.as_os_str().is_empty() {
            return Err(LinkError::NoTarget(dotfile.source.clone()));
        }

        if !source.exists() {
            return Err(LinkError::SourceMissing(source));
        }

        if let Some(parent) = target.parent() {
            mkdirp::mkdirp(parent).map_err(|err| LinkError::io(parent, err))?;
        }

        let occupied = match lstat(&target)? {
            Some(metadata) if is_link_to(&target, &metadata, &source)? => {
                debug!("{} already linked", target.display());
                return Ok(LinkOutcome::AlreadyLinked);
            }
            Some(_) if self.strategy == ConflictStrategy::Error => {
                return Err(LinkError::TargetExists(target));
            }
            Some(_) => true,
            None => false,
        };

        // INVARIANT: Stage symlink before touching the occupant.
        //   - A symlink that cannot be created must never cost the user their file.
        let staging = staging_path(&target);
        stage_link(&source, &staging)?;

        let mut snapshot = None;
        if occupied {
            snapshot = match self.resolve_conflict(&target) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    discard_staging(&staging);
                    return Err(err);
                }
            };
        }

        if let Err(err) = fs::rename(&staging, &target) {
            discard_staging(&staging);
            return Err(LinkError::Place {
                target,
                snapshot: snapshot.map(Box::new),
                source: err,
            });
        }
        info!("link {} -> {}", target.display(), source.display());

        Ok(LinkOutcome::Created { snapshot })
    }

    /// Determine what [`Linker::link`] would do without touching anything.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::SourceMissing`] if the dotfile source does not
    ///   exist in the repository.
    /// - Return [`LinkError::TargetExists`] if target is occupied under
    ///   [`ConflictStrategy::Error`].
    pub fn plan(&self, dotfile: &Dotfile, root: &Path) -> Result<LinkPlan> {
        let source = dotfile.source_path(root);
        let target = self.target_of(dotfile);

        if target.as_os_str().is_empty() {
            return Err(LinkError::NoTarget(dotfile.source.clone()));
        }

        if !source.exists() {
            return Err(LinkError::SourceMissing(source));
        }

        let Some(metadata) = lstat(&target)? else {
            return Ok(LinkPlan::Create);
        };

        if is_link_to(&target, &metadata, &source)? {
            return Ok(LinkPlan::AlreadyLinked);
        }

        match self.strategy {
            ConflictStrategy::Error => Err(LinkError::TargetExists(target)),
            strategy => Ok(LinkPlan::Resolve(strategy)),
        }
    }

    /// Remove dotfile symlink if it is managed by gdf.
    ///
    /// Real files are left alone. If `root` is given, the symlink must point
    /// at the dotfile's source inside that root to be removed. Returns
    /// snapshot of removed symlink if history is attached.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::History`] if snapshot capture fails.
    /// - Return [`LinkError::Io`] if any filesystem operation fails.
    #[instrument(skip(self, dotfile, root), level = "debug")]
    pub fn unlink_managed(&self, dotfile: &Dotfile, root: Option<&Path>) -> Result<Option<Snapshot>> {
        let target = self.target_of(dotfile);
        let Some(metadata) = lstat(&target)? else {
            return Ok(None);
        };

        if !metadata.file_type().is_symlink() {
            debug!("{} is not a symlink, leave it alone", target.display());
            return Ok(None);
        }

        if let Some(root) = root.filter(|_| !dotfile.source.is_empty()) {
            let dest = fs::read_link(&target).map_err(|err| LinkError::io(&target, err))?;
            if absolute_link_dest(&target, &dest) != normalize(&dotfile.source_path(root)) {
                debug!("{} is not managed by gdf", target.display());
                return Ok(None);
            }
        }

        let snapshot = self.capture(&target)?;
        fs::remove_file(&target).map_err(|err| LinkError::io(&target, err))?;
        info!("unlink {}", target.display());

        Ok(snapshot)
    }

    /// Replace managed symlink with a plain copy of its source.
    ///
    /// Does nothing unless target is a symlink pointing at the dotfile's
    /// source. Returns whether target was restored.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Io`] if any filesystem operation fails.
    #[instrument(skip(self, dotfile, root), level = "debug")]
    pub fn restore(&self, dotfile: &Dotfile, root: &Path) -> Result<bool> {
        let source = dotfile.source_path(root);
        let target = self.target_of(dotfile);
        let Some(metadata) = lstat(&target)? else {
            return Ok(false);
        };

        if !metadata.file_type().is_symlink() {
            return Ok(false);
        }

        let dest = fs::read_link(&target).map_err(|err| LinkError::io(&target, err))?;
        if absolute_link_dest(&target, &dest) != normalize(&source) {
            debug!("{} is not managed by gdf", target.display());
            return Ok(false);
        }

        fs::remove_file(&target).map_err(|err| LinkError::io(&target, err))?;
        fs::copy(&source, &target).map_err(|err| LinkError::io(&target, err))?;
        info!("restore {} from {}", target.display(), source.display());

        Ok(true)
    }

    /// Prepare occupied target according to strategy.
    ///
    /// Replaced occupants stay in place until the staged symlink is renamed
    /// over them. Backed up occupants are moved aside.
    fn resolve_conflict(&self, target: &Path) -> Result<Option<Snapshot>> {
        match self.strategy {
            ConflictStrategy::Error => Err(LinkError::TargetExists(target.to_path_buf())),
            ConflictStrategy::Replace | ConflictStrategy::Force => {
                let snapshot = self.capture(target)?;
                info!("replace {}", target.display());
                Ok(snapshot)
            }
            ConflictStrategy::BackupAndReplace => {
                let snapshot = self.capture(target)?;
                rotate_backups(target)?;
                let backup = backup_path(target, 0);
                fs::rename(target, &backup).map_err(|err| LinkError::io(target, err))?;
                info!("back up {} to {}", target.display(), backup.display());
                Ok(snapshot)
            }
        }
    }

    fn capture(&self, target: &Path) -> Result<Option<Snapshot>> {
        match &self.history {
            Some(history) => Ok(history.capture(target)?),
            None => Ok(None),
        }
    }
}

/// Path of backup sibling at rotation position.
///
/// Position zero is `<target>.gdf.bak`, others `<target>.gdf.bak.<n>`.
pub fn backup_path(target: &Path, position: usize) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(BACKUP_SUFFIX);
    if position > 0 {
        name.push(format!(".{position}"));
    }

    PathBuf::from(name)
}

/// Path a new symlink is created at before being renamed over its target.
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(STAGING_SUFFIX);

    PathBuf::from(name)
}

fn stage_link(source: &Path, staging: &Path) -> Result<()> {
    match fs::remove_file(staging) {
        Ok(()) => debug!("removed stale {}", staging.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(LinkError::io(staging, err)),
    }

    symlink(source, staging).map_err(|err| LinkError::io(staging, err))
}

fn discard_staging(staging: &Path) {
    if let Err(err) = fs::remove_file(staging) {
        warn!("cannot remove {}: {err}", staging.display());
    }
}

fn rotate_backups(target: &Path) -> Result<()> {
    for position in (0..MAX_BACKUPS).rev() {
        let current = backup_path(target, position);
        let outcome = if position == MAX_BACKUPS - 1 {
            fs::remove_file(&current)
        } else {
            fs::rename(&current, backup_path(target, position + 1))
        };

        match outcome {
            Ok(()) => debug!("rotated {}", current.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(LinkError::io(current, err)),
        }
    }

    Ok(())
}

fn lstat(path: &Path) -> Result<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(LinkError::io(path, err)),
    }
}

fn is_link_to(target: &Path, metadata: &Metadata, source: &Path) -> Result<bool> {
    if !metadata.file_type().is_symlink() {
        return Ok(false);
    }

    let dest = fs::read_link(target).map_err(|err| LinkError::io(target, err))?;
    Ok(dest == source)
}

/// Remove file, symlink, or directory tree, tolerating absence.
pub(crate) fn remove_all(path: &Path) -> std::io::Result<()> {
    let outcome = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };

    match outcome {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Linking error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Dotfile source missing from repository.
    #[error("dotfile source {:?} does not exist", .0.display())]
    SourceMissing(PathBuf),

    /// Target occupied under error strategy.
    #[error("target {:?} already exists", .0.display())]
    TargetExists(PathBuf),

    /// Dotfile has no target on this platform.
    #[error("dotfile {0:?} has no target for this platform")]
    NoTarget(String),

    /// Staged symlink cannot be moved over target once the occupant was
    /// handled. Carries the occupant's snapshot so it stays recoverable.
    #[error("failed to place symlink at {:?}", target.display())]
    Place {
        target: PathBuf,
        snapshot: Option<Box<Snapshot>>,
        #[source]
        source: std::io::Error,
    },

    /// Conflict strategy not understood.
    #[error("unknown conflict strategy {0:?}")]
    UnknownStrategy(String),

    /// Snapshot capture fails.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Filesystem operation fails.
    #[error("link i/o failed at {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    /// Snapshot taken before the failure, if any.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Place { snapshot, .. } => snapshot.as_deref(),
            _ => None,
        }
    }

    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;
