// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::Sandbox;

use anyhow::Result;
use gdf::{engine::link::ConflictStrategy, resolve::resolve, ErrorKind};
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;

#[sealed_test]
fn cycle_is_rejected() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_bundle("a", "name: a\ndependencies: [b]\n")?;
    sandbox.write_bundle("b", "name: b\ndependencies: [a]\n")?;
    let bundles = sandbox.bundles()?;

    let err = resolve(&["a"], &bundles).unwrap_err();
    assert!(err.to_string().contains("circular"));

    let engine = sandbox.engine(ConflictStrategy::Error);
    let err = engine.apply(&["a"], &bundles).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
    assert!(!sandbox.root().join(".operations").exists());

    Ok(())
}

#[sealed_test]
fn dependencies_apply_first() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_bundle(
        "git",
        indoc! {"
            name: git
            dependencies: [ssh]
            hooks:
              apply:
                - run: echo git
        "},
    )?;
    sandbox.write_bundle(
        "ssh",
        indoc! {"
            name: ssh
            hooks:
              apply:
                - run: echo ssh
        "},
    )?;

    let engine = sandbox.engine(ConflictStrategy::Error);
    let report = engine.apply(&["git"], &sandbox.bundles()?)?;

    let names = report
        .bundles
        .iter()
        .map(|bundle| bundle.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["ssh", "git"]);
    assert_eq!(engine.runner().calls.borrow().as_slice(), ["echo ssh", "echo git"]);

    Ok(())
}
