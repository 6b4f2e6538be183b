// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Static risk scanning.
//!
//! Hooks and custom install scripts are arbitrary shell strings. Before an
//! apply, they are checked for patterns that download and execute remote
//! content, so the user can review them first.

use crate::config::Bundle;

use regex::{Regex, RegexBuilder};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::LazyLock,
};

static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\b(curl|wget)\b[^\n|;]*\|\s*(sh|bash|zsh)\b",
            "pipes remote content directly into a shell",
        ),
        (
            r"\b(bash|sh|zsh)\b\s+-c\s+.*\b(curl|wget)\b",
            "executes downloaded content via shell -c",
        ),
        (
            r"\$\(.*\b(curl|wget)\b.*\)",
            "uses command substitution with remote content",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason)| {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| unreachable!("static pattern is valid"));
        (regex, reason)
    })
    .collect()
});

/// Potentially dangerous shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskFinding {
    /// Bundle the command belongs to.
    pub app: String,

    /// Field path of the command, e.g., `hooks.pre_install`.
    pub location: String,
    pub command: String,
    pub reason: String,
}

impl Display for RiskFinding {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} ({}): {}\n    {}",
            self.app, self.location, self.reason, self.command
        )
    }
}

/// Scan bundles for risky commands.
///
/// Each command produces at most one finding, for the first rule it matches.
pub fn scan<'a>(bundles: impl IntoIterator<Item = &'a Bundle>) -> Vec<RiskFinding> {
    let mut findings = Vec::new();
    for bundle in bundles {
        for (location, command) in commands(bundle) {
            if let Some(reason) = assess(command) {
                findings.push(RiskFinding {
                    app: bundle.name.clone(),
                    location,
                    command: command.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
    }

    findings
}

/// Reason a command is risky, if it is.
pub fn assess(command: &str) -> Option<&'static str> {
    RULES
        .iter()
        .find(|(regex, _)| regex.is_match(command))
        .map(|(_, reason)| *reason)
}

fn commands(bundle: &Bundle) -> Vec<(String, &str)> {
    let mut commands = Vec::new();
    if let Some(hooks) = &bundle.hooks {
        let stages = [
            ("hooks.pre_install", &hooks.pre_install),
            ("hooks.post_install", &hooks.post_install),
            ("hooks.pre_link", &hooks.pre_link),
            ("hooks.post_link", &hooks.post_link),
        ];
        for (location, hooks) in stages {
            commands.extend(hooks.iter().map(|hook| (location.to_string(), hook.as_str())));
        }

        commands.extend(
            hooks
                .apply
                .iter()
                .enumerate()
                .map(|(idx, hook)| (format!("hooks.apply[{idx}].run"), hook.run.as_str())),
        );
    }

    if let Some(custom) = bundle.package.as_ref().and_then(|package| package.custom.as_ref()) {
        commands.push(("package.custom.script".to_string(), custom.script.as_str()));
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplyHook, CustomInstall, Hooks, PackageSpec};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("curl -fsSL https://x | sh", Some("pipes remote content directly into a shell"); "curl pipe")]
    #[test_case("WGET -qO- https://x |bash", Some("pipes remote content directly into a shell"); "case insensitive")]
    #[test_case("bash -c \"$(curl -fsSL https://x)\"", Some("executes downloaded content via shell -c"); "shell dash c")]
    #[test_case("eval $(curl https://x)", Some("uses command substitution with remote content"); "substitution")]
    #[test_case("curl -o out https://x; sh out", None; "separated by semicolon")]
    #[test_case("git clone https://x", None; "harmless")]
    #[test]
    fn assess_command(command: &str, expect: Option<&str>) {
        pretty_assertions::assert_eq!(assess(command), expect);
    }

    #[test]
    fn scan_reports_location() {
        let bundle = Bundle {
            name: "rust".into(),
            hooks: Some(Hooks {
                pre_install: vec!["curl -fsSL https://x | sh".into()],
                post_link: vec!["echo done".into()],
                apply: vec![ApplyHook {
                    run: "sh -c 'wget https://y'".into(),
                    when: None,
                }],
                ..Default::default()
            }),
            package: Some(PackageSpec {
                custom: Some(CustomInstall {
                    script: "echo $(curl https://z)".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let findings = scan([&bundle]);
        assert_eq!(
            findings
                .iter()
                .map(|finding| (finding.location.as_str(), finding.reason.as_str()))
                .collect::<Vec<_>>(),
            vec![
                ("hooks.pre_install", "pipes remote content directly into a shell"),
                ("hooks.apply[0].run", "executes downloaded content via shell -c"),
                ("package.custom.script", "uses command substitution with remote content"),
            ]
        );
        assert_eq!(findings[0].app, "rust");
        assert_eq!(findings[0].command, "curl -fsSL https://x | sh");
    }
}
