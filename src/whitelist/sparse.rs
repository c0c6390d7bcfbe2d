// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Whitelist rule handling.
//!
//! Utilities to manage the persisted whitelist of a namespace, and to match
//! paths against whitelist rules.
//!
//! # Why Sparse Checkout?
//!
//! Git comes with a feature called __sparse checkout__. It reduces a work tree
//! to a subset of tracked files, where the subset is determined by a set of
//! __sparsity rules__. The syntax of a sparsity rule is the same as the
//! gitignore syntax, with inverted semantics: nothing is included by default,
//! and each rule determines what to _include_ instead of what to exclude.
//!
//! Vendored repositories of an Odoo project carry hundreds of addons, but a
//! project only ever needs a handful of them. So we keep one whitelist per
//! namespace, listing the addon directories that should be materialized,
//! and feed it to sparse checkout.
//!
//! # Whitelist File Layout
//!
//! A whitelist is a plain text file next to its namespace directory, one rule
//! per line. Rules are unique and kept sorted, except for [`SETUP_EXEMPTION`]
//! which always comes last so that `setup/` packaging directories of vendored
//! repositories are never materialized.
//!
//! # See Also
//!
//! - [Man page sparse checkout](https://git-scm.com/docs/git-sparse-checkout)

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Exemption rule that always terminates a whitelist.
pub const SETUP_EXEMPTION: &str = "!setup/**";

/// Persisted whitelist of a namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhitelistFile {
    path: PathBuf,
}

impl WhitelistFile {
    /// Construct new whitelist file handle.
    ///
    /// Does not touch the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to whitelist file.
    pub fn as_path(&self) -> &Path {
        self.path.as_path()
    }

    /// Check if whitelist has been persisted yet.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read current rules.
    ///
    /// Returns `None` if the whitelist has not been persisted yet, which
    /// means that its namespace is not restricted at all.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::Read`] if whitelist exists, but cannot be
    ///   read.
    pub fn rules(&self) -> Result<Option<RuleEdit>> {
        match read_to_string(&self.path) {
            Ok(content) => Ok(Some(RuleEdit::from(content))),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SparseError::Read {
                source,
                path: self.path.clone(),
            }),
        }
    }

    /// Edit rules.
    ///
    /// Read current rules into [`RuleEdit`], let `editor` modify them, and
    /// write them back. Nothing is written if the editor did not change
    /// anything. If the whitelist does not exist, then it is created only if
    /// `create` is set, otherwise the editor is never called.
    ///
    /// Returns whether the file was written.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::Read`] if whitelist cannot be read.
    /// - Return [`SparseError::Write`] if whitelist cannot be written.
    pub fn edit<E>(&self, create: bool, editor: E) -> Result<bool>
    where
        E: FnOnce(&mut RuleEdit),
    {
        let mut rules = match self.rules()? {
            Some(rules) => rules,
            None if create => RuleEdit::new(),
            None => return Ok(false),
        };

        editor(&mut rules);
        if !rules.changed {
            return Ok(false);
        }

        debug!("write whitelist {}", self.path.display());
        write(&self.path, rules.to_string().as_bytes()).map_err(|source| SparseError::Write {
            source,
            path: self.path.clone(),
        })?;

        Ok(true)
    }
}

/// Whitelist rule editor.
///
/// # Invariant
///
/// - No duplicate rules.
/// - Rule insertion does not overwrite existing rules.
/// - Rendering always ends with [`SETUP_EXEMPTION`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuleEdit {
    rules: BTreeSet<String>,
    changed: bool,
}

impl RuleEdit {
    /// Construct new empty rule editor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule.
    pub fn insert_rule(&mut self, rule: impl Into<String>) {
        let rule = rule.into();
        if rule != SETUP_EXEMPTION && self.rules.insert(rule) {
            self.changed = true;
        }
    }

    /// Insert a listing of rules.
    pub fn insert_rules(&mut self, rules: impl IntoIterator<Item = impl Into<String>>) {
        for rule in rules {
            self.insert_rule(rule);
        }
    }

    /// Check if rule is present.
    pub fn contains(&self, rule: &str) -> bool {
        self.rules.contains(rule)
    }

    /// Iterate rules in sorted order, without the setup exemption.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.rules.iter().map(String::as_str)
    }

    /// Check if any rule was inserted since construction.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

impl Display for RuleEdit {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for rule in &self.rules {
            writeln!(fmt, "{rule}")?;
        }
        writeln!(fmt, "{SETUP_EXEMPTION}")
    }
}

impl From<&str> for RuleEdit {
    fn from(content: &str) -> Self {
        let rules = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty() && *line != SETUP_EXEMPTION)
            .map(str::to_owned)
            .collect::<BTreeSet<_>>();

        Self {
            rules,
            changed: false,
        }
    }
}

impl From<String> for RuleEdit {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

/// A whitelist rule matcher that inverts gitignore semantics.
///
/// Takes a gitignore rule parser, and inverts incoming patterns to match
/// sparsity patterns instead. Lazy and hacky, but it works.
#[derive(Debug, Clone)]
pub struct InvertedGitignore {
    matcher: Gitignore,
}

impl InvertedGitignore {
    /// Build matcher for rules relative to `base`.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::Pattern`] if any rule is not a valid
    ///   gitignore pattern.
    pub fn new<'a>(base: &Path, rules: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(base);
        // INVARIANT: Invert gitignore logic.
        //   - Ignore everything by default.
        //   - Invert '!' to mean to unignore.
        //   - Invert any rule without '!' to mean ignore.
        builder.add_line(None, "/*")?;
        for rule in rules.into_iter().chain([SETUP_EXEMPTION]) {
            let is_negated = rule.starts_with('!');
            let pattern = rule.trim_start_matches('!');
            let is_dir = pattern.ends_with('/');

            if is_negated {
                builder.add_line(None, pattern)?;
                if is_dir {
                    builder.add_line(None, &format!("{pattern}**"))?;
                }
            } else {
                builder.add_line(None, &format!("!{pattern}"))?;
                if is_dir {
                    builder.add_line(None, &format!("!{pattern}**"))?;
                }
            }
        }

        Ok(Self {
            matcher: builder.build()?,
        })
    }

    /// Check if path is included by the rules.
    ///
    /// Path must lie below the base of the matcher.
    pub fn path_matches(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        !self
            .matcher
            .matched_path_or_any_parents(path, path.is_dir())
            .is_ignore()
    }
}

/// Whitelist rule management error types.
#[derive(Debug, thiserror::Error)]
pub enum SparseError {
    /// Whitelist cannot be read from.
    #[error("failed to read whitelist at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Whitelist cannot be written to.
    #[error("failed to write whitelist at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Rule is not a valid pattern.
    #[error(transparent)]
    Pattern(#[from] ignore::Error),
}

/// Friendly result alias :3
pub type Result<T, E = SparseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn rule_edit_insertion() {
        let mut editor = RuleEdit::default();

        editor.insert_rule("web");
        editor.insert_rule("base");
        editor.insert_rule(SETUP_EXEMPTION);
        let result = editor.to_string();
        let expect = indoc! {r#"
            base
            web
            !setup/**
        "#};
        assert_eq!(result, expect);

        editor.insert_rules(["sale", "account"]);
        let result = editor.to_string();
        let expect = indoc! {r#"
            account
            base
            sale
            web
            !setup/**
        "#};
        assert_eq!(result, expect);

        // No duplication.
        editor.insert_rule("web");
        assert_eq!(editor.to_string(), expect);
    }

    #[test]
    fn rule_edit_tracks_changes() {
        let mut editor = RuleEdit::from("sale\n!setup/**\nbase\n");
        assert!(!editor.is_changed());
        assert_eq!(editor.iter().collect::<Vec<_>>(), vec!["base", "sale"]);

        editor.insert_rules(["sale", SETUP_EXEMPTION]);
        assert!(!editor.is_changed());

        editor.insert_rule("web");
        assert!(editor.is_changed());
    }

    #[sealed_test]
    fn whitelist_file_edit() -> anyhow::Result<()> {
        let file = WhitelistFile::new(".sparse-addons");

        assert!(!file.edit(false, |rules| rules.insert_rule("sale"))?);
        assert!(!file.exists());
        assert_eq!(file.rules()?, None);

        assert!(file.edit(true, |rules| rules.insert_rule("sale"))?);
        assert_eq!(read_to_string(".sparse-addons")?, "sale\n!setup/**\n");

        // INVARIANT: Subset of existing rules leaves file untouched.
        assert!(!file.edit(true, |rules| rules.insert_rule("sale"))?);
        assert!(file.edit(false, |rules| rules.insert_rule("base"))?);
        assert_eq!(read_to_string(".sparse-addons")?, "base\nsale\n!setup/**\n");

        Ok(())
    }

    #[sealed_test]
    fn inverted_gitignore_matching() -> anyhow::Result<()> {
        let base = std::env::current_dir()?;
        for dir in ["sale", "web", "account", "setup"] {
            std::fs::create_dir_all(base.join(dir))?;
        }

        let matcher = InvertedGitignore::new(&base, ["sale", "web"])?;
        assert!(matcher.path_matches(base.join("sale")));
        assert!(matcher.path_matches(base.join("web")));
        assert!(!matcher.path_matches(base.join("account")));
        assert!(!matcher.path_matches(base.join("setup")));

        Ok(())
    }
}
