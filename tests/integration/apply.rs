// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::Sandbox;

use anyhow::Result;
use gdf::{
    engine::{
        link::{ConflictStrategy, LinkPlan},
        oplog::{self, OperationKind},
        Action,
    },
    install::Manager,
    ApplyOptions,
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{fs, os::unix::fs::PermissionsExt};

const GIT_BUNDLE: &str = indoc! {"
    name: git
    dotfiles:
      - source: git/config
        target: ~/.gitconfig
"};

#[sealed_test]
fn fresh_apply_links_without_snapshot() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let source = sandbox.write_dotfile("git/config", "hello")?;
    sandbox.write_bundle("git", GIT_BUNDLE)?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;
    assert!(report.is_success());

    let target = sandbox.home().join(".gitconfig");
    assert!(fs::symlink_metadata(&target)?.file_type().is_symlink());
    assert_eq!(fs::read_link(&target)?, source);
    assert_eq!(fs::read_to_string(&target)?, "hello");

    let operations = oplog::read_log(report.log_path.as_deref().unwrap())?;
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].kind, OperationKind::Link);
    assert_eq!(operations[0].detail("snapshot_path"), None);

    let history = sandbox.root().join(".history");
    assert!(!history.exists() || fs::read_dir(&history)?.next().is_none());

    Ok(())
}

#[sealed_test]
fn second_apply_is_idempotent() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("git/config", "hello")?;
    sandbox.write_bundle("git", GIT_BUNDLE)?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    engine.apply(&["git"], &sandbox.bundles()?)?;
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;

    assert!(report.is_success());
    assert_eq!(report.log_path, None);
    assert_eq!(oplog::list_logs(sandbox.root())?.len(), 1);

    Ok(())
}

#[sealed_test]
fn replace_captures_snapshot() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("git/config", "hello")?;
    sandbox.write_bundle("git", GIT_BUNDLE)?;
    let target = sandbox.home().join(".gitconfig");
    fs::write(&target, "old")?;
    fs::set_permissions(&target, fs::Permissions::from_mode(0o644))?;

    let engine = sandbox.engine(ConflictStrategy::Replace);
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;
    assert!(report.is_success());
    assert!(fs::symlink_metadata(&target)?.file_type().is_symlink());

    let operations = oplog::read_log(report.log_path.as_deref().unwrap())?;
    let link = &operations[0];
    assert_eq!(link.detail("snapshot_kind"), Some("file"));
    assert_eq!(link.detail("snapshot_mode"), Some("0644"));

    let snapshot = link.detail("snapshot_path").unwrap();
    assert!(snapshot.starts_with(&*sandbox.root().join(".history").to_string_lossy()));
    assert!(snapshot.ends_with(".snap"));
    assert_eq!(fs::read_to_string(snapshot)?, "old");

    Ok(())
}

#[sealed_test]
fn error_strategy_leaves_occupant_alone() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("git/config", "hello")?;
    sandbox.write_bundle("git", GIT_BUNDLE)?;
    let target = sandbox.home().join(".gitconfig");
    fs::write(&target, "old")?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;

    assert!(!report.is_success());
    assert_eq!(report.bundles[0].errors[0].kind(), gdf::ErrorKind::Conflict);
    assert_eq!(fs::read_to_string(&target)?, "old");

    Ok(())
}

#[sealed_test]
fn backup_rotation_keeps_three_generations() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("foo", "managed")?;
    sandbox.write_bundle(
        "foo",
        indoc! {"
            name: foo
            dotfiles:
              - source: foo
                target: ~/.foo
        "},
    )?;
    let target = sandbox.home().join(".foo");
    let engine = sandbox.engine(ConflictStrategy::BackupAndReplace);

    for contents in ["v1", "v2", "v3"] {
        let _ = fs::remove_file(&target);
        fs::write(&target, contents)?;
        let report = engine.apply(&["foo"], &sandbox.bundles()?)?;
        assert!(report.is_success());
        assert!(fs::symlink_metadata(&target)?.file_type().is_symlink());
    }

    let home = sandbox.home();
    assert_eq!(fs::read_to_string(home.join(".foo.gdf.bak"))?, "v3");
    assert_eq!(fs::read_to_string(home.join(".foo.gdf.bak.1"))?, "v2");
    assert_eq!(fs::read_to_string(home.join(".foo.gdf.bak.2"))?, "v1");
    assert!(!home.join(".foo.gdf.bak.3").exists());

    Ok(())
}

#[sealed_test]
fn hooks_run_around_links() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("zsh/zshrc", "export FOO=1")?;
    sandbox.write_bundle(
        "zsh",
        indoc! {"
            name: zsh
            package:
              apt: zsh
            dotfiles:
              - source: zsh/zshrc
                target: ~/.zshrc
            hooks:
              pre_install: [echo before]
              post_link: [echo after]
        "},
    )?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    let report = engine.apply(&["zsh"], &sandbox.bundles()?)?;
    assert!(report.is_success());
    assert_eq!(
        engine.runner().calls.borrow().as_slice(),
        ["echo before", "echo after"]
    );

    let kinds = oplog::read_log(report.log_path.as_deref().unwrap())?
        .into_iter()
        .map(|operation| operation.kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            OperationKind::HookRun,
            OperationKind::PackageInstall,
            OperationKind::Link,
            OperationKind::HookRun,
        ]
    );

    Ok(())
}

#[sealed_test]
fn dry_run_queries_installer_but_changes_nothing() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_dotfile("git/config", "hello")?;
    sandbox.write_bundle(
        "git",
        indoc! {"
            name: git
            package:
              apt: git-core
            dotfiles:
              - source: git/config
                target: ~/.gitconfig
            hooks:
              post_link: [echo after]
        "},
    )?;
    fs::write(sandbox.home().join(".gitconfig"), "mine")?;

    let engine = sandbox.engine(ConflictStrategy::BackupAndReplace).with_options(ApplyOptions {
        dry_run: true,
        ..Default::default()
    });
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;
    assert!(report.is_success());
    assert!(report.dry_run);
    assert_eq!(report.log_path, None);

    assert_eq!(engine.installer().queried.borrow().as_slice(), ["git-core"]);
    assert!(engine.installer().installed.borrow().is_empty());
    assert!(engine.runner().calls.borrow().is_empty());

    let actions = &report.bundles[0].actions;
    assert!(actions.contains(&Action::Install {
        package: "git-core".into(),
        manager: Manager::Apt,
    }));
    assert!(actions.contains(&Action::Link {
        target: sandbox.home().join(".gitconfig"),
        plan: LinkPlan::Resolve(ConflictStrategy::BackupAndReplace),
    }));

    assert_eq!(fs::read_to_string(sandbox.home().join(".gitconfig"))?, "mine");
    assert!(!sandbox.root().join(".history").exists());
    assert!(!sandbox.root().join(".operations").exists());

    Ok(())
}
