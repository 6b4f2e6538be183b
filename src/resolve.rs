// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dependency resolution.
//!
//! Bundles may depend on other bundles. Before anything is applied, the
//! requested bundles and everything they reach through their dependencies are
//! put into an order where every dependency comes before its dependents.

use crate::config::Bundle;

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, instrument};

/// Order requested bundles so that dependencies come first.
///
/// Performs a depth-first post-order traversal. Dependencies are visited in
/// declared order, requested names in given order. Each reachable bundle
/// appears exactly once.
///
/// # Errors
///
/// - Return [`ResolveError::Missing`] if a name has no bundle.
/// - Return [`ResolveError::Cycle`] if dependencies form a cycle.
#[instrument(skip(requested, all), level = "debug")]
pub fn resolve<'a, S>(requested: &[S], all: &'a BTreeMap<String, Bundle>) -> Result<Vec<&'a Bundle>>
where
    S: AsRef<str>,
{
    let mut resolver = Resolver {
        all,
        visited: HashSet::new(),
        stack: Vec::new(),
        order: Vec::new(),
    };

    for name in requested {
        resolver.visit(name.as_ref(), None)?;
    }
    debug!(
        "resolved order: {}",
        resolver
            .order
            .iter()
            .map(|bundle| bundle.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(resolver.order)
}

struct Resolver<'a> {
    all: &'a BTreeMap<String, Bundle>,
    visited: HashSet<&'a str>,

    // INVARIANT: Names currently being visited, outermost first.
    stack: Vec<&'a str>,
    order: Vec<&'a Bundle>,
}

impl<'a> Resolver<'a> {
    fn visit(&mut self, name: &str, required_by: Option<&str>) -> Result<()> {
        if self.visited.contains(name) {
            return Ok(());
        }

        if let Some(start) = self.stack.iter().position(|entry| *entry == name) {
            let mut chain = self.stack[start..]
                .iter()
                .map(|entry| entry.to_string())
                .collect::<Vec<_>>();
            chain.push(name.to_string());
            return Err(ResolveError::Cycle(chain));
        }

        let Some((key, bundle)) = self.all.get_key_value(name) else {
            return Err(ResolveError::Missing {
                name: name.to_string(),
                required_by: required_by.map(str::to_string),
            });
        };

        self.stack.push(key.as_str());
        for dependency in &bundle.dependencies {
            self.visit(dependency, Some(key.as_str()))?;
        }
        self.stack.pop();

        self.visited.insert(key.as_str());
        self.order.push(bundle);

        Ok(())
    }
}

/// Dependency resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Dependencies loop back onto themselves.
    #[error("circular dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Name does not refer to any bundle.
    #[error("{}", missing_message(name, required_by.as_deref()))]
    Missing {
        name: String,
        required_by: Option<String>,
    },
}

fn missing_message(name: &str, required_by: Option<&str>) -> String {
    match required_by {
        Some(parent) => format!("bundle {name:?} required by {parent:?} does not exist"),
        None => format!("bundle {name:?} does not exist"),
    }
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn bundles(graph: &[(&str, &str)]) -> BTreeMap<String, Bundle> {
        graph
            .iter()
            .map(|(name, dependencies)| {
                let bundle = Bundle {
                    name: name.to_string(),
                    dependencies: dependencies.split_whitespace().map(str::to_string).collect(),
                    ..Default::default()
                };
                (name.to_string(), bundle)
            })
            .collect()
    }

    fn names(order: Vec<&Bundle>) -> Vec<&str> {
        order.into_iter().map(|bundle| bundle.name.as_str()).collect()
    }

    #[test_case(&["git"], vec!["ssh", "git"]; "dependency first")]
    #[test_case(&["zsh", "git"], vec!["fonts", "zsh", "ssh", "git"]; "roots in order")]
    #[test_case(&["tmux"], vec!["ssh", "fonts", "zsh", "tmux"]; "declared order")]
    #[test_case(&["git", "ssh", "git"], vec!["ssh", "git"]; "no duplicates")]
    #[test_case(&["fonts"], vec!["fonts"]; "unreachable excluded")]
    #[test]
    fn resolve_order(requested: &[&str], expect: Vec<&str>) {
        let all = bundles(&[
            ("fonts", ""),
            ("git", "ssh"),
            ("ssh", ""),
            ("tmux", "ssh zsh"),
            ("zsh", "fonts"),
        ]);
        pretty_assertions::assert_eq!(names(resolve(requested, &all).unwrap()), expect);
    }

    #[test]
    fn reject_cycle() {
        let all = bundles(&[("a", "b"), ("b", "a")]);
        let err = resolve(&["a"], &all).unwrap_err();
        assert!(matches!(&err, ResolveError::Cycle(chain) if chain == &["a", "b", "a"]));
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn reject_self_dependency() {
        let all = bundles(&[("a", "a")]);
        assert!(matches!(resolve(&["a"], &all), Err(ResolveError::Cycle(_))));
    }

    #[test]
    fn reject_missing() {
        let all = bundles(&[("git", "ssh")]);
        let err = resolve(&["git"], &all).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"bundle "ssh" required by "git" does not exist"#
        );
        assert!(matches!(resolve(&["nope"], &all), Err(ResolveError::Missing { .. })));
    }
}
