// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::Sandbox;

use anyhow::Result;
use gdf::engine::{link::ConflictStrategy, oplog, rollback::rollback};
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::fs;

#[sealed_test]
fn rollback_restores_replaced_file() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("git/config", "hello")?;
    sandbox.write_bundle(
        "git",
        indoc! {"
            name: git
            dotfiles:
              - source: git/config
                target: ~/.gitconfig
        "},
    )?;
    let target = sandbox.home().join(".gitconfig");
    fs::write(&target, "old")?;

    let engine = sandbox.engine(ConflictStrategy::Replace);
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;
    let log = report.log_path.unwrap();

    let result = rollback(sandbox.root(), &log, None)?;
    assert!(result.is_success());
    assert_eq!(result.restored, vec![target.clone()]);

    let metadata = fs::symlink_metadata(&target)?;
    assert!(metadata.file_type().is_file());
    assert_eq!(fs::read_to_string(&target)?, "old");

    Ok(())
}

#[sealed_test]
fn rollback_removes_fresh_links() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("tmux/tmux.conf", "set -g mouse on")?;
    sandbox.write_bundle(
        "tmux",
        indoc! {"
            name: tmux
            dotfiles:
              - source: tmux/tmux.conf
                target: ~/.tmux.conf
        "},
    )?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    engine.apply(&["tmux"], &sandbox.bundles()?)?;
    let log = oplog::latest_log(sandbox.root())?.unwrap();

    let target = sandbox.home().join(".tmux.conf");
    let result = rollback(sandbox.root(), &log, None)?;
    assert_eq!(result.removed, vec![target.clone()]);
    assert!(fs::symlink_metadata(&target).is_err());

    Ok(())
}

#[sealed_test]
fn rollback_leaves_foreign_symlinks() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("tmux/tmux.conf", "set -g mouse on")?;
    sandbox.write_bundle(
        "tmux",
        indoc! {"
            name: tmux
            dotfiles:
              - source: tmux/tmux.conf
                target: ~/.tmux.conf
        "},
    )?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    let report = engine.apply(&["tmux"], &sandbox.bundles()?)?;
    let log = report.log_path.unwrap();

    let target = sandbox.home().join(".tmux.conf");
    let elsewhere = sandbox.home().join("elsewhere");
    fs::write(&elsewhere, "mine")?;
    fs::remove_file(&target)?;
    std::os::unix::fs::symlink(&elsewhere, &target)?;

    let result = rollback(sandbox.root(), &log, None)?;
    assert!(result.removed.is_empty());
    assert_eq!(fs::read_link(&target)?, elsewhere);

    Ok(())
}
