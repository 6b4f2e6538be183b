// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rollback executor.
//!
//! Undo one apply run by walking its operation log backwards. Link operations
//! that displaced something are undone by restoring the captured snapshot.
//! Link operations that did not displace anything are undone by removing the
//! symlink, but only if it still points where the apply run left it.
//!
//! Every other operation type is skipped. Package installs are not reversed.
//!
//! A target may have been snapshotted by many apply runs. Callers can supply
//! a [`SnapshotSelector`] to pick which of those historical snapshots gets
//! restored instead of the one recorded by the log being rolled back.

use crate::{
    engine::{
        history::SnapshotKind,
        link::remove_all,
        oplog::{self, parse_timestamp, Operation, OperationKind, OplogError},
    },
    path::absolute_link_dest,
};

use chrono::{DateTime, Utc};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, Permissions},
    io::ErrorKind,
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Mode of restored files when the log carries no usable mode.
pub const DEFAULT_RESTORE_MODE: u32 = 0o644;

/// Historical snapshot eligible to restore a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCandidate {
    pub target: PathBuf,
    pub snapshot_path: PathBuf,

    /// Unknown kinds restore as plain files.
    pub snapshot_kind: Option<SnapshotKind>,
    pub snapshot_mode: String,
    pub link_target: Option<PathBuf>,
    pub captured_at: Option<DateTime<Utc>>,
    pub operation_at: DateTime<Utc>,
    pub operation_log: PathBuf,
    pub operation_index: usize,
}

impl SnapshotCandidate {
    /// Promote link operation to candidate.
    ///
    /// Returns `None` unless operation is a link that carries a snapshot.
    pub fn from_operation(operation: &Operation, log: &Path, index: usize) -> Option<Self> {
        if operation.kind != OperationKind::Link {
            return None;
        }

        let snapshot_path = operation.detail("snapshot_path")?;
        Some(Self {
            target: PathBuf::from(&operation.target),
            snapshot_path: PathBuf::from(snapshot_path),
            snapshot_kind: operation
                .detail("snapshot_kind")
                .and_then(|kind| kind.parse().ok()),
            snapshot_mode: operation.detail("snapshot_mode").unwrap_or_default().to_string(),
            link_target: operation.detail("snapshot_link_target").map(PathBuf::from),
            captured_at: operation
                .detail("snapshot_captured_at")
                .and_then(parse_timestamp),
            operation_at: operation.timestamp,
            operation_log: log.to_path_buf(),
            operation_index: index,
        })
    }

    /// Moment snapshot was taken, or the operation time if unknown.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.operation_at)
    }

    /// File mode to restore with.
    pub fn mode(&self) -> u32 {
        parse_mode(&self.snapshot_mode)
    }
}

impl Display for SnapshotCandidate {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let kind = self.snapshot_kind.map_or("file", SnapshotKind::as_str);
        let log = self
            .operation_log
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        write!(
            fmt,
            "{} {kind} (from {log})",
            self.taken_at().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Pick among historical snapshots of a target.
///
/// Returning `None` keeps the snapshot recorded by the log being rolled back.
pub trait SnapshotSelector {
    fn select(
        &mut self,
        target: &Path,
        candidates: &[SnapshotCandidate],
    ) -> Option<SnapshotCandidate>;
}

impl<F> SnapshotSelector for F
where
    F: FnMut(&Path, &[SnapshotCandidate]) -> Option<SnapshotCandidate>,
{
    fn select(
        &mut self,
        target: &Path,
        candidates: &[SnapshotCandidate],
    ) -> Option<SnapshotCandidate> {
        self(target, candidates)
    }
}

/// Summary of a rollback run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    /// Targets restored from a snapshot.
    pub restored: Vec<PathBuf>,

    /// Managed symlinks removed.
    pub removed: Vec<PathBuf>,

    /// Failures rendered as `<target>: <reason>`.
    pub failed: Vec<String>,
}

impl RollbackResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Roll back operation log.
///
/// Failure on one target never stops the others. Failures are collected into
/// [`RollbackResult::failed`].
///
/// # Errors
///
/// - Return [`RollbackError::Oplog`] if the log itself cannot be read.
#[instrument(skip(root, log, selector), level = "debug")]
pub fn rollback(
    root: &Path,
    log: &Path,
    mut selector: Option<&mut dyn SnapshotSelector>,
) -> Result<RollbackResult> {
    let operations = oplog::read_log(log)?;
    info!("roll back {} operations from {}", operations.len(), log.display());

    let mut result = RollbackResult::default();
    for (index, operation) in operations.iter().enumerate().rev() {
        if operation.kind != OperationKind::Link {
            debug!("skip {} operation on {}", operation.kind, operation.target);
            continue;
        }

        let target = PathBuf::from(&operation.target);
        let Some(primary) = SnapshotCandidate::from_operation(operation, log, index) else {
            let expected = operation.detail("source_abs").map(Path::new);
            match remove_symlink_if_managed(&target, expected) {
                Ok(true) => result.removed.push(target),
                Ok(false) => {}
                Err(err) => result.failed.push(format!("{}: {err}", target.display())),
            }
            continue;
        };

        let chosen = match selector.as_deref_mut() {
            Some(selector) => choose(root, &target, primary, selector),
            None => primary,
        };

        match restore_snapshot(&target, &chosen) {
            Ok(()) => result.restored.push(target),
            Err(err) => result.failed.push(format!("{}: {err}", target.display())),
        }
    }

    Ok(result)
}

fn choose(
    root: &Path,
    target: &Path,
    primary: SnapshotCandidate,
    selector: &mut dyn SnapshotSelector,
) -> SnapshotCandidate {
    let candidates = match find_candidates(root, target) {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!("cannot gather snapshots of {}: {err}", target.display());
            return primary;
        }
    };

    if candidates.len() <= 1 {
        return primary;
    }

    selector.select(target, &candidates).unwrap_or(primary)
}

/// Remove symlink at target if it is managed.
///
/// Anything that is not a symlink is left alone. If `expected` is given, the
/// symlink must resolve to it. Returns whether the symlink was removed.
///
/// # Errors
///
/// - Return [`RollbackError::Io`] if any filesystem operation fails.
pub fn remove_symlink_if_managed(target: &Path, expected: Option<&Path>) -> Result<bool> {
    let metadata = match fs::symlink_metadata(target) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(RollbackError::io(target, err)),
    };

    if !metadata.file_type().is_symlink() {
        debug!("{} is not a symlink, leave it alone", target.display());
        return Ok(false);
    }

    if let Some(expected) = expected {
        let dest = fs::read_link(target).map_err(|err| RollbackError::io(target, err))?;
        if absolute_link_dest(target, &dest) != absolute_link_dest(target, expected) {
            warn!(
                "{} points at {}, not removing it",
                target.display(),
                dest.display()
            );
            return Ok(false);
        }
    }

    fs::remove_file(target).map_err(|err| RollbackError::io(target, err))?;
    info!("remove {}", target.display());

    Ok(true)
}

/// Put snapshot back at target.
///
/// # Errors
///
/// - Return [`RollbackError::SnapshotMissing`] if snapshot file is gone.
/// - Return [`RollbackError::Io`] if any filesystem operation fails.
#[instrument(skip(target, candidate), level = "debug")]
pub fn restore_snapshot(target: &Path, candidate: &SnapshotCandidate) -> Result<()> {
    let stored = candidate.snapshot_path.as_path();
    if fs::symlink_metadata(stored).is_err() {
        return Err(RollbackError::SnapshotMissing(stored.to_path_buf()));
    }

    if let Some(parent) = target.parent() {
        mkdirp::mkdirp(parent).map_err(|err| RollbackError::io(parent, err))?;
    }
    remove_all(target).map_err(|err| RollbackError::io(target, err))?;

    match candidate.snapshot_kind {
        Some(SnapshotKind::Symlink) => {
            let dest = match &candidate.link_target {
                Some(dest) => dest.clone(),
                None => fs::read_to_string(stored)
                    .map(PathBuf::from)
                    .map_err(|err| RollbackError::io(stored, err))?,
            };
            symlink(&dest, target).map_err(|err| RollbackError::io(target, err))?;
            info!("restore {} -> {}", target.display(), dest.display());
        }
        Some(SnapshotKind::File) | None => {
            fs::copy(stored, target).map_err(|err| RollbackError::io(target, err))?;
            fs::set_permissions(target, Permissions::from_mode(candidate.mode()))
                .map_err(|err| RollbackError::io(target, err))?;
            info!("restore {} from {}", target.display(), stored.display());
        }
    }

    Ok(())
}

/// Gather every historical snapshot of target across all operation logs.
///
/// Newest snapshot comes first. Logs that cannot be read are skipped.
///
/// # Errors
///
/// - Return [`RollbackError::Oplog`] if the logs cannot be listed.
pub fn find_candidates(root: &Path, target: &Path) -> Result<Vec<SnapshotCandidate>> {
    let mut candidates = Vec::new();
    for log in oplog::list_logs(root)? {
        let operations = match oplog::read_log(&log) {
            Ok(operations) => operations,
            Err(err) => {
                warn!("skip unreadable log {}: {err}", log.display());
                continue;
            }
        };

        candidates.extend(
            operations
                .iter()
                .enumerate()
                .filter(|(_, operation)| Path::new(&operation.target) == target)
                .filter_map(|(index, operation)| {
                    SnapshotCandidate::from_operation(operation, &log, index)
                }),
        );
    }
    candidates.sort_by_key(|candidate| std::cmp::Reverse(candidate.taken_at()));

    Ok(candidates)
}

/// Parse octal mode string, with or without leading zero.
fn parse_mode(mode: &str) -> u32 {
    let mode = mode.trim();
    let mode = mode.strip_prefix("0o").unwrap_or(mode);
    u32::from_str_radix(mode, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .unwrap_or(DEFAULT_RESTORE_MODE)
}

/// Rollback error types.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// Operation log cannot be read.
    #[error(transparent)]
    Oplog(#[from] OplogError),

    /// Snapshot referenced by log no longer exists.
    #[error("snapshot {:?} is missing, it may have been evicted", .0.display())]
    SnapshotMissing(PathBuf),

    /// Filesystem operation fails.
    #[error("rollback i/o failed at {:?}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RollbackError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = RollbackError> = std::result::Result<T, E>;
