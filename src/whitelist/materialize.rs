// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sparse checkout materialization.
//!
//! Applies persisted whitelists to the working trees of their repositories.
//! Each whitelist is linked into `$gitdir/info/sparse-checkout` of the
//! repository owning its namespace, sparse checkout gets enabled, and the
//! namespace is reset so that only whitelisted entries remain on disk.

use crate::{
    addon::{Namespace, WHITELIST_PREFIX},
    vcs::Vcs,
    whitelist::sparse::{InvertedGitignore, RuleEdit, SparseError, WhitelistFile},
};

use glob::{glob_with, MatchOptions, Pattern};
use mkdirp::mkdirp;
use std::{
    collections::BTreeMap,
    fs::{read_dir, remove_dir_all, remove_file, symlink_metadata, write},
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Find every whitelist file below `root`, sorted.
///
/// Hidden directories are not descended into.
///
/// # Errors
///
/// - Return [`MaterializeError::Pattern`] if `root` cannot be turned into a
///   search pattern.
pub fn whitelist_files(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/{WHITELIST_PREFIX}*",
        Pattern::escape(root.to_string_lossy().as_ref())
    );
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };

    let mut files = glob_with(&pattern, options)?
        .filter_map(|entry| match entry {
            Ok(path) => path.is_file().then_some(path),
            Err(error) => {
                warn!("{error}");
                None
            }
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Namespace waiting to be materialized.
#[derive(Debug, Clone)]
struct Target {
    namespace: Namespace,
    dir: PathBuf,
    whitelist: WhitelistFile,
}

/// Apply whitelists of a project to its working trees.
#[derive(Debug)]
pub struct Materializer<'a, V>
where
    V: Vcs,
{
    root: &'a Path,
    vcs: &'a V,
}

impl<'a, V> Materializer<'a, V>
where
    V: Vcs,
{
    /// Construct new materializer for project at `root`.
    ///
    /// `vcs` is re-rooted at each namespace directory before use.
    pub fn new(root: &'a Path, vcs: &'a V) -> Self {
        Self { root, vcs }
    }

    /// Materialize every whitelist of the project.
    ///
    /// Namespaces whose directory is missing, or that do not belong to a
    /// repository, are skipped with a warning. Failing version control
    /// commands are logged and do not stop the remaining namespaces.
    ///
    /// Returns materialized namespaces.
    ///
    /// # Errors
    ///
    /// - Return [`MaterializeError::Io`] if the sparse checkout file cannot be
    ///   replaced, or a pruned entry cannot be removed.
    /// - Return [`MaterializeError::Sparse`] if a whitelist cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn materialize(&self) -> Result<Vec<Namespace>> {
        let mut by_git_dir: BTreeMap<PathBuf, Vec<Target>> = BTreeMap::new();
        for path in whitelist_files(self.root)? {
            let relative = path.strip_prefix(self.root).unwrap_or(&path);
            let Some(namespace) = Namespace::from_whitelist_file(relative) else {
                continue;
            };

            let dir = self.root.join(namespace.as_path());
            if !dir.is_dir() {
                warn!("namespace {namespace} of {} does not exist", path.display());
                continue;
            }

            let Some(git_dir) = self.vcs.at(&dir).call(&["rev-parse", "--git-dir"]) else {
                warn!("namespace {namespace} is not inside of a repository");
                continue;
            };

            by_git_dir.entry(dir.join(git_dir)).or_default().push(Target {
                namespace,
                dir,
                whitelist: WhitelistFile::new(path),
            });
        }

        let mut done = Vec::new();
        for (git_dir, targets) in by_git_dir {
            let rules = self.link(&git_dir, &targets)?;
            for target in targets {
                self.apply(&target, &rules)?;
                done.push(target.namespace);
            }
        }

        Ok(done)
    }

    /// Point sparse checkout of `git_dir` at its whitelists.
    ///
    /// A single whitelist is symlinked. Several whitelists sharing one
    /// repository are combined into a generated file instead.
    fn link(&self, git_dir: &Path, targets: &[Target]) -> Result<RuleEdit> {
        let info_dir = git_dir.join("info");
        mkdirp(&info_dir).map_err(|source| MaterializeError::Io {
            source,
            path: info_dir.clone(),
        })?;

        let sparse_path = info_dir.join("sparse-checkout");
        if symlink_metadata(&sparse_path).is_ok() {
            remove_file(&sparse_path).map_err(|source| MaterializeError::Io {
                source,
                path: sparse_path.clone(),
            })?;
        }

        let mut rules = RuleEdit::new();
        for target in targets {
            if let Some(current) = target.whitelist.rules()? {
                rules.insert_rules(current.iter());
            }
        }

        match targets {
            [target] => {
                let source = std::path::absolute(target.whitelist.as_path()).map_err(|source| {
                    MaterializeError::Io {
                        source,
                        path: target.whitelist.as_path().to_path_buf(),
                    }
                })?;
                symlink(&source, &sparse_path)?;
            }
            _ => {
                write(&sparse_path, rules.to_string()).map_err(|source| MaterializeError::Io {
                    source,
                    path: sparse_path.clone(),
                })?;
            }
        }

        Ok(rules)
    }

    fn apply(&self, target: &Target, rules: &RuleEdit) -> Result<()> {
        let vcs = self.vcs.at(&target.dir);
        if vcs.call(&["config", "core.sparseCheckout", "true"]).is_none() {
            warn!("cannot enable sparse checkout for {}", target.namespace);
        }

        prune(&target.dir, rules)?;

        if vcs.call(&["reset", "--hard", "HEAD"]).is_none() {
            warn!("cannot reset {}", target.namespace);
        } else {
            info!("materialized {}", target.namespace);
        }

        Ok(())
    }
}

/// Remove entries of namespace directory that the rules do not include.
///
/// Hidden entries are left alone.
fn prune(dir: &Path, rules: &RuleEdit) -> Result<()> {
    let matcher = InvertedGitignore::new(dir, rules.iter())?;
    let entries = read_dir(dir).map_err(|source| MaterializeError::Io {
        source,
        path: dir.to_path_buf(),
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
        if is_hidden || matcher.path_matches(&path) {
            continue;
        }

        let removed = if path.is_dir() && !path.is_symlink() {
            remove_dir_all(&path)
        } else {
            remove_file(&path)
        };
        removed.map_err(|source| MaterializeError::Io { source, path })?;
    }

    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(source, link).map_err(|error| MaterializeError::Io {
        source: error,
        path: link.to_path_buf(),
    })
}

#[cfg(not(unix))]
fn symlink(source: &Path, link: &Path) -> Result<()> {
    std::fs::copy(source, link)
        .map(|_| ())
        .map_err(|error| MaterializeError::Io {
            source: error,
            path: link.to_path_buf(),
        })
}

/// Materialization error types.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// Search pattern for whitelist files is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// File system operation failed.
    #[error("failed to update {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Whitelist cannot be read or matched.
    #[error(transparent)]
    Sparse(#[from] SparseError),
}

/// Friendly result alias :3
type Result<T, E = MaterializeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::testing::ScriptedGit;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, read_link, read_to_string};

    fn touch(path: &Path) -> anyhow::Result<()> {
        create_dir_all(path)?;
        write(path.join("__manifest__.py"), "{}")?;
        Ok(())
    }

    #[sealed_test]
    fn find_whitelist_files() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        create_dir_all(root.join("vendor/oca"))?;
        create_dir_all(root.join(".git/modules"))?;
        write(root.join("vendor/oca/.sparse-web"), "")?;
        write(root.join("vendor/.sparse-ee"), "")?;
        write(root.join(".git/modules/.sparse-hidden"), "")?;
        write(root.join("vendor/sparse-nope"), "")?;

        let result = whitelist_files(&root)?;
        let expect = vec![
            root.join("vendor/.sparse-ee"),
            root.join("vendor/oca/.sparse-web"),
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test]
    fn materialize_single_whitelist() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let ns = root.join("vendor/oca/web");
        for addon in ["web_tour", "web_responsive", "web_widget", "setup"] {
            touch(&ns.join(addon))?;
        }
        write(ns.join("README.md"), "")?;
        write(ns.join(".git"), "gitdir: ../../../.git/modules/web")?;
        let git_dir = root.join(".git/modules/web");
        write(root.join("vendor/oca/.sparse-web"), "web_tour\n!setup/**\n")?;

        let git = ScriptedGit::new().respond(
            "rev-parse --git-dir",
            Some(git_dir.to_string_lossy().as_ref()),
        );
        let result = Materializer::new(&root, &git).materialize()?;
        assert_eq!(result, vec![Namespace::new("vendor/oca/web")]);

        let sparse_path = git_dir.join("info/sparse-checkout");
        assert_eq!(read_link(&sparse_path)?, root.join("vendor/oca/.sparse-web"));
        assert!(ns.join("web_tour").is_dir());
        assert!(ns.join(".git").is_file());
        assert!(!ns.join("web_responsive").exists());
        assert!(!ns.join("setup").exists());
        assert!(!ns.join("README.md").exists());

        let dir = ns.display();
        let expect = vec![
            format!("[{dir}] rev-parse --git-dir"),
            format!("[{dir}] config core.sparseCheckout true"),
            format!("[{dir}] reset --hard HEAD"),
        ];
        assert_eq!(git.calls(), expect);

        Ok(())
    }

    #[sealed_test]
    fn whitelists_sharing_repository_are_combined() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let cc = root.join("vendor/odoo/cc");
        touch(&cc.join("addons/sale"))?;
        touch(&cc.join("addons/crm"))?;
        touch(&cc.join("odoo/addons/base"))?;
        write(cc.join(".sparse-addons"), "sale\n!setup/**\n")?;
        write(cc.join("odoo/.sparse-addons"), "base\n!setup/**\n")?;
        let git_dir = root.join(".git/modules/cc");

        let git = ScriptedGit::new().respond(
            "rev-parse --git-dir",
            Some(git_dir.to_string_lossy().as_ref()),
        );
        let result = Materializer::new(&root, &git).materialize()?;
        assert_eq!(result.len(), 2);

        let sparse_path = git_dir.join("info/sparse-checkout");
        assert!(!sparse_path.is_symlink());
        assert_eq!(read_to_string(&sparse_path)?, "base\nsale\n!setup/**\n");
        assert!(cc.join("addons/sale").is_dir());
        assert!(!cc.join("addons/crm").exists());
        assert!(cc.join("odoo/addons/base").is_dir());

        Ok(())
    }

    #[sealed_test]
    fn namespace_outside_repository_is_skipped() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        touch(&root.join("vendor/oca/web/web_tour"))?;
        write(root.join("vendor/oca/.sparse-web"), "web_tour\n!setup/**\n")?;
        write(root.join("vendor/.sparse-gone"), "sale\n!setup/**\n")?;

        let git = ScriptedGit::new().fail("rev-parse --git-dir");
        let result = Materializer::new(&root, &git).materialize()?;
        assert!(result.is_empty());
        assert!(root.join("vendor/oca/web/web_tour").is_dir());

        Ok(())
    }
}
