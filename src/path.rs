// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Component, Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to repository root.
///
/// Uses `$GDF_ROOT` if set, otherwise `~/.gdf`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_root_dir() -> Result<PathBuf> {
    match std::env::var_os("GDF_ROOT") {
        Some(root) if !root.is_empty() => Ok(PathBuf::from(root)),
        _ => home_dir().map(|home| home.join(".gdf")),
    }
}

/// Expand leading tilde of a path to the user's home directory.
///
/// Only `~` and `~/...` are expanded. Forms like `~foo` are returned as-is,
/// as is any path if the home directory cannot be determined.
pub fn expand(path: impl AsRef<str>) -> PathBuf {
    let path = path.as_ref();
    if path.is_empty() {
        return PathBuf::new();
    }

    let home = || dirs::home_dir().map(|home| home.to_string_lossy().into_owned());
    PathBuf::from(shellexpand::tilde_with_context(path, home).into_owned())
}

/// Resolve symlink destination to absolute path.
///
/// Relative destinations are joined with the directory containing the link,
/// never the current working directory. The result is lexically normalized.
pub fn absolute_link_dest(link: &Path, dest: &Path) -> PathBuf {
    if dest.is_absolute() {
        return normalize(dest);
    }

    link.parent()
        .map(|parent| normalize(&parent.join(dest)))
        .unwrap_or_else(|| normalize(dest))
}

/// Lexically remove `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normal.pop() {
                    normal.push(component);
                }
            }
            other => normal.push(other),
        }
    }

    normal
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn expand_tilde_forms() {
        assert_eq!(expand("~"), PathBuf::from("/home/blah"));
        assert_eq!(expand("~/.gitconfig"), PathBuf::from("/home/blah/.gitconfig"));
        assert_eq!(expand("~foo/.bashrc"), PathBuf::from("~foo/.bashrc"));
        assert_eq!(expand("/etc/~/x"), PathBuf::from("/etc/~/x"));
        assert_eq!(expand(""), PathBuf::new());
    }

    #[sealed_test(env = [("HOME", "/home/blah"), ("GDF_ROOT", "")])]
    fn default_root_falls_back_to_home() {
        assert_eq!(default_root_dir().unwrap(), PathBuf::from("/home/blah/.gdf"));
    }

    #[test_case("/home/u/.foo", "/abs/target", "/abs/target"; "absolute destination")]
    #[test_case("/home/u/.foo", "dotfiles/foo", "/home/u/dotfiles/foo"; "relative to link dir")]
    #[test_case("/home/u/.config/x", "../y", "/home/u/y"; "parent relative")]
    #[test_case("/home/u/.x", "./a/./b", "/home/u/a/b"; "current dir components")]
    #[test]
    fn link_destination_resolution(link: &str, dest: &str, expect: &str) {
        pretty_assertions::assert_eq!(
            absolute_link_dest(Path::new(link), Path::new(dest)),
            PathBuf::from(expect)
        );
    }
}
