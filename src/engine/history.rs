// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Snapshot history.
//!
//! Before the engine destroys anything occupying a target path, it captures a
//! __snapshot__ of that path into the history directory at `<root>/.history`.
//! Each snapshot is stored as `<nanos>.snap`, where `<nanos>` is a per-process
//! monotonic nanosecond timestamp.
//!
//! # Quota
//!
//! History is bounded by a byte quota. After every capture the oldest
//! snapshots (by modification time) are evicted until the directory fits the
//! quota again. The snapshot that was just captured is never evicted, so the
//! directory may temporarily exceed the quota by that one file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File, OpenOptions, Permissions},
    io::{ErrorKind, Read, Write},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, instrument, warn};

/// Default history quota of 512 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 512 * 1024 * 1024;

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Kind of path a snapshot was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    File,
    Symlink,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Symlink => "symlink",
        }
    }
}

impl Display for SnapshotKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for SnapshotKind {
    type Err = HistoryError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "file" => Ok(Self::File),
            "symlink" => Ok(Self::Symlink),
            other => Err(HistoryError::UnknownKind(other.to_string())),
        }
    }
}

/// Durable copy of a target's pre-mutation state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub original_path: PathBuf,
    pub stored_path: PathBuf,
    pub kind: SnapshotKind,
    pub link_target: Option<PathBuf>,
    pub mode: u32,
    pub size_bytes: u64,
    pub checksum: String,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Mode rendered as zero-padded octal, e.g., "0644".
    pub fn mode_octal(&self) -> String {
        format!("{:04o}", self.mode & 0o7777)
    }
}

/// Size-bounded store of pre-mutation snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryManager {
    dir: PathBuf,
    max_bytes: u64,
}

impl HistoryManager {
    /// Construct new history manager.
    ///
    /// A quota of zero or less falls back to [`DEFAULT_MAX_BYTES`].
    pub fn new(dir: impl Into<PathBuf>, max_bytes: i64) -> Self {
        let max_bytes = match u64::try_from(max_bytes) {
            Ok(0) | Err(_) => DEFAULT_MAX_BYTES,
            Ok(bytes) => bytes,
        };

        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    /// History manager at conventional `<root>/.history` location.
    pub fn for_root(root: &Path, max_bytes: i64) -> Self {
        Self::new(root.join(".history"), max_bytes)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Capture snapshot of path.
    ///
    /// Returns `None` if nothing exists at path.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::UnsupportedMode`] if path is neither a
    ///   regular file nor a symlink.
    /// - Return [`HistoryError::Io`] if any filesystem operation fails.
    /// - Return [`HistoryError::Evict`] if quota enforcement fails.
    #[instrument(skip(self, path), level = "debug")]
    pub fn capture(&self, path: &Path) -> Result<Option<Snapshot>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(HistoryError::io(path, err)),
        };

        let file_type = metadata.file_type();
        if !file_type.is_symlink() && !file_type.is_file() {
            return Err(HistoryError::UnsupportedMode(path.to_path_buf()));
        }

        mkdirp::mkdirp(&self.dir).map_err(|err| HistoryError::io(&self.dir, err))?;

        let id = next_id().to_string();
        let stored_path = self.dir.join(format!("{id}.snap"));

        let snapshot = if file_type.is_symlink() {
            let link_target = fs::read_link(path).map_err(|err| HistoryError::io(path, err))?;
            let text = link_target.to_string_lossy().into_owned();
            let mut stored = create_new(&stored_path, 0o644)?;
            stored
                .write_all(text.as_bytes())
                .map_err(|err| HistoryError::io(&stored_path, err))?;

            Snapshot {
                id,
                original_path: path.to_path_buf(),
                stored_path: stored_path.clone(),
                kind: SnapshotKind::Symlink,
                link_target: Some(link_target),
                mode: 0o777,
                size_bytes: text.len() as u64,
                checksum: hex::encode(Sha256::digest(text.as_bytes())),
                captured_at: Utc::now(),
            }
        } else {
            let mode = metadata.permissions().mode() & 0o7777;
            let (size_bytes, checksum) = copy_with_digest(path, &stored_path, mode)?;

            Snapshot {
                id,
                original_path: path.to_path_buf(),
                stored_path: stored_path.clone(),
                kind: SnapshotKind::File,
                link_target: None,
                mode,
                size_bytes,
                checksum,
                captured_at: Utc::now(),
            }
        };

        info!(
            "captured {} snapshot of {} at {}",
            snapshot.kind,
            path.display(),
            stored_path.display()
        );
        self.enforce_quota(&stored_path)?;

        Ok(Some(snapshot))
    }

    /// Evict oldest snapshots until history fits quota.
    ///
    /// The protected path is never evicted.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::Io`] if history cannot be listed.
    /// - Return [`HistoryError::Evict`] if a snapshot cannot be deleted.
    #[instrument(skip(self, protected), level = "debug")]
    pub fn enforce_quota(&self, protected: &Path) -> Result<()> {
        self.evict_until_within_quota(protected, |path| fs::remove_file(path))
    }

    fn evict_until_within_quota<F>(&self, protected: &Path, mut remove: F) -> Result<()>
    where
        F: FnMut(&Path) -> std::io::Result<()>,
    {
        let mut entries = self.entries()?;
        let mut total: u64 = entries.iter().map(|entry| entry.size).sum();
        if total <= self.max_bytes {
            return Ok(());
        }

        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        for entry in entries {
            if total <= self.max_bytes {
                break;
            }

            if entry.path == protected {
                continue;
            }

            remove(&entry.path).map_err(|err| HistoryError::Evict {
                path: entry.path.clone(),
                source: err,
            })?;
            debug!("evicted snapshot {}", entry.path.display());
            total = total.saturating_sub(entry.size);
        }

        if total > self.max_bytes {
            warn!(
                "history at {} holds {total} bytes, over quota of {} bytes",
                self.dir.display(),
                self.max_bytes
            );
        }

        Ok(())
    }

    /// Total bytes currently held by history.
    pub fn total_bytes(&self) -> Result<u64> {
        Ok(self.entries()?.iter().map(|entry| entry.size).sum())
    }

    fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(HistoryError::io(&self.dir, err)),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|err| HistoryError::io(&self.dir, err))?;
            let metadata = entry
                .metadata()
                .map_err(|err| HistoryError::io(entry.path(), err))?;
            if !metadata.is_file() {
                continue;
            }

            entries.push(HistoryEntry {
                path: entry.path(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            });
        }

        Ok(entries)
    }
}

struct HistoryEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

fn next_id() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();

    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let id = now.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, id, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return id,
            Err(current) => last = current,
        }
    }
}

fn create_new(path: &Path, mode: u32) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|err| HistoryError::io(path, err))
}

fn copy_with_digest(from: &Path, to: &Path, mode: u32) -> Result<(u64, String)> {
    let mut source = File::open(from).map_err(|err| HistoryError::io(from, err))?;
    let mut stored = create_new(to, 0o600)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut copied = 0u64;

    loop {
        let count = source
            .read(&mut buffer)
            .map_err(|err| HistoryError::io(from, err))?;
        if count == 0 {
            break;
        }

        hasher.update(&buffer[..count]);
        stored
            .write_all(&buffer[..count])
            .map_err(|err| HistoryError::io(to, err))?;
        copied += count as u64;
    }

    fs::set_permissions(to, Permissions::from_mode(mode)).map_err(|err| HistoryError::io(to, err))?;

    Ok((copied, hex::encode(hasher.finalize())))
}

/// Snapshot history error types.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Path is neither regular file nor symlink.
    #[error("cannot snapshot {:?}: unsupported file mode", .0.display())]
    UnsupportedMode(PathBuf),

    /// Filesystem operation fails.
    #[error("snapshot i/o failed at {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Old snapshot cannot be evicted.
    #[error("failed to evict snapshot {:?} from history", path.display())]
    Evict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot kind not understood.
    #[error("unknown snapshot kind {0:?}")]
    UnknownKind(String),
}

impl HistoryError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = HistoryError> = std::result::Result<T, E>;
