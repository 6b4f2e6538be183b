// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operation log.
//!
//! Every apply run records the mutations it performs into an in-memory
//! [`Logger`]. Once the run finishes, the log is written as a pretty-printed
//! JSON array to `<root>/.operations/<YYYYMMDD-HHMMSS>.json`. Log file names
//! sort chronologically, so the latest run is always the last file name.
//! Rollback consumes these files.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Type of recorded operation.
///
/// Unknown types read from disk are kept verbatim so newer logs still load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    Link,
    PackageInstall,
    HookRun,
    ShellGenerate,
    Other(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Link => "link",
            Self::PackageInstall => "package_install",
            Self::HookRun => "hook_run",
            Self::ShellGenerate => "shell_generate",
            Self::Other(kind) => kind.as_str(),
        }
    }
}

impl From<String> for OperationKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "link" => Self::Link,
            "package_install" => Self::PackageInstall,
            "hook_run" => Self::HookRun,
            "shell_generate" => Self::ShellGenerate,
            _ => Self::Other(kind),
        }
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl Display for OperationKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// One record in the operation log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,

    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,

    pub target: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub details: BTreeMap<String, String>,
}

impl Operation {
    /// Lookup detail value, treating empty strings as absent.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Render timestamp as RFC 3339 with nanosecond precision.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse RFC 3339 timestamp into UTC.
pub fn parse_timestamp(data: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(data)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

mod rfc3339_nanos {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(timestamp))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let data = String::deserialize(deserializer)?;
        parse_timestamp(&data)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {data:?}")))
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    Option::<BTreeMap<String, String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Append-only recorder of apply operations.
#[derive(Debug, Default, Clone)]
pub struct Logger {
    dry_run: bool,
    operations: Vec<Operation>,
}

impl Logger {
    /// Construct new logger.
    ///
    /// A dry-run logger never writes anything to disk.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            operations: Vec::new(),
        }
    }

    /// Record operation stamped with current time.
    pub fn log(
        &mut self,
        kind: OperationKind,
        target: impl Into<String>,
        details: BTreeMap<String, String>,
    ) {
        let operation = Operation {
            kind,
            timestamp: Utc::now(),
            target: target.into(),
            details,
        };
        debug!("record {} operation on {}", operation.kind, operation.target);
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Write operation log into `<root>/.operations/`.
    ///
    /// Returns `None` without writing anything if the logger is in dry-run
    /// mode, or has nothing recorded.
    ///
    /// # Errors
    ///
    /// - Return [`OplogError::Io`] if the log cannot be written.
    /// - Return [`OplogError::Json`] if operations cannot be serialized.
    #[instrument(skip(self, root), level = "debug")]
    pub fn save(&self, root: &Path) -> Result<Option<PathBuf>> {
        if self.dry_run || self.operations.is_empty() {
            return Ok(None);
        }

        let dir = operations_dir(root);
        mkdirp::mkdirp(&dir).map_err(|err| OplogError::io(&dir, err))?;

        let mut data = serde_json::to_string_pretty(&self.operations)?;
        data.push('\n');

        let stem = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut suffix = 0;
        loop {
            let name = match suffix {
                0 => format!("{stem}.json"),
                n => format!("{stem}_{n:02}.json"),
            };
            let path = dir.join(name);
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o644)
                .open(&path);

            match file {
                Ok(mut file) => {
                    file.write_all(data.as_bytes())
                        .map_err(|err| OplogError::io(&path, err))?;
                    info!(
                        "saved {} operations to {}",
                        self.operations.len(),
                        path.display()
                    );
                    return Ok(Some(path));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists && suffix < 99 => {
                    suffix += 1;
                }
                Err(err) => return Err(OplogError::io(&path, err)),
            }
        }
    }
}

/// Directory holding operation logs of a repository root.
pub fn operations_dir(root: &Path) -> PathBuf {
    root.join(".operations")
}

/// Read operation log file.
///
/// # Errors
///
/// - Return [`OplogError::Io`] if the log cannot be read.
/// - Return [`OplogError::Json`] if the log is malformed.
pub fn read_log(path: &Path) -> Result<Vec<Operation>> {
    let data = fs::read_to_string(path).map_err(|err| OplogError::io(path, err))?;
    Ok(serde_json::from_str(&data)?)
}

/// List every operation log of a repository root, oldest first.
///
/// # Errors
///
/// - Return [`OplogError::Pattern`] if the root path makes an invalid glob.
pub fn list_logs(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = operations_dir(root).join("*.json");
    let mut logs = glob::glob(&pattern.to_string_lossy())?
        .filter_map(std::result::Result::ok)
        .collect::<Vec<_>>();
    logs.sort();

    Ok(logs)
}

/// Latest operation log of a repository root, if any.
pub fn latest_log(root: &Path) -> Result<Option<PathBuf>> {
    Ok(list_logs(root)?.pop())
}

/// Operation log error types.
#[derive(Debug, thiserror::Error)]
pub enum OplogError {
    /// Log file i/o fails.
    #[error("operation log i/o failed at {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Log (de)serialization fails.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Log glob pattern is malformed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

impl OplogError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = OplogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn details(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn dry_run_and_empty_never_write() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        assert_eq!(Logger::new(false).save(tmp.path())?, None);

        let mut logger = Logger::new(true);
        logger.log(OperationKind::Link, "/home/u/.x", BTreeMap::new());
        assert_eq!(logger.save(tmp.path())?, None);
        assert!(!operations_dir(tmp.path()).exists());

        Ok(())
    }

    #[test]
    fn save_writes_pretty_json() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut logger = Logger::new(false);
        logger.log(
            OperationKind::Link,
            "/home/u/.gitconfig",
            details(&[("source", "git/config")]),
        );
        logger.log(OperationKind::PackageInstall, "git", details(&[("manager", "brew")]));

        let path = logger.save(tmp.path())?.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "YYYYMMDD-HHMMSS.json".len());

        let data = fs::read_to_string(&path)?;
        assert!(data.starts_with("[\n  {\n    \"type\": \"link\""));
        assert_eq!(read_log(&path)?, logger.operations());

        Ok(())
    }

    #[test]
    fn same_second_saves_sort_after_first() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut logger = Logger::new(false);
        logger.log(OperationKind::HookRun, "post_link", BTreeMap::new());

        let first = logger.save(tmp.path())?.unwrap();
        let second = logger.save(tmp.path())?.unwrap();
        assert!(second > first);
        assert_eq!(list_logs(tmp.path())?, vec![first, second]);
        assert_eq!(latest_log(tmp.path())?, list_logs(tmp.path())?.pop());

        Ok(())
    }

    #[test]
    fn log_names_sort_chronologically() {
        let mut names = vec![
            "20240102-000000.json",
            "20240101-235959_01.json",
            "20240101-235959.json",
            "20231231-120000.json",
        ];
        names.sort();
        assert_eq!(
            names,
            vec![
                "20231231-120000.json",
                "20240101-235959.json",
                "20240101-235959_01.json",
                "20240102-000000.json",
            ]
        );
    }

    #[test]
    fn tolerate_unknown_types_and_details() -> anyhow::Result<()> {
        let data = indoc! {r#"
            [
              {
                "type": "teleport",
                "timestamp": "2024-05-01T10:00:00.123456789Z",
                "target": "/x",
                "details": {"whatever": "1"}
              },
              {
                "type": "link",
                "timestamp": "2024-05-01T10:00:01Z",
                "target": "/y"
              }
            ]
        "#};
        let operations: Vec<Operation> = serde_json::from_str(data)?;
        assert_eq!(operations[0].kind, OperationKind::Other("teleport".into()));
        assert_eq!(
            format_timestamp(&operations[0].timestamp),
            "2024-05-01T10:00:00.123456789Z"
        );
        assert_eq!(operations[1].kind, OperationKind::Link);
        assert!(operations[1].details.is_empty());
        assert_eq!(operations[1].detail("snapshot_path"), None);

        Ok(())
    }

    #[test]
    fn null_details_read_as_empty() -> anyhow::Result<()> {
        let data = indoc! {r#"
            [
              {
                "type": "shell_generate",
                "timestamp": "2024-05-01T10:00:00Z",
                "target": "/gdf/.generated/init.zsh",
                "details": null
              }
            ]
        "#};
        let operations: Vec<Operation> = serde_json::from_str(data)?;
        assert_eq!(operations[0].kind, OperationKind::ShellGenerate);
        assert!(operations[0].details.is_empty());
        assert_eq!(operations[0].detail("shell"), None);

        Ok(())
    }
}
