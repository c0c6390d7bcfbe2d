// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project cloning.
//!
//! A project is cloned into the directory its URL maps to, borrowing objects
//! from the repository cache for the project and for each of its
//! submodules. Submodules only fetch the branch the project was cloned on.
//! Sparse checkouts are materialized last.

use crate::{
    addon::Namespace,
    cache::{CacheError, Mirror},
    path::GitUrl,
    vcs::Vcs,
    whitelist::materialize::{MaterializeError, Materializer},
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Knobs of a clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneOptions {
    /// Materialize sparse checkouts after cloning.
    pub whitelist: bool,

    /// Copy borrowed objects into submodules instead of referencing the cache.
    pub dissociate: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            whitelist: true,
            dissociate: false,
        }
    }
}

/// Clone projects through a repository cache.
#[derive(Debug)]
pub struct Cloner<'a, V, M>
where
    V: Vcs,
    M: Mirror,
{
    vcs: &'a V,
    mirror: &'a M,
}

impl<'a, V, M> Cloner<'a, V, M>
where
    V: Vcs,
    M: Mirror,
{
    /// Construct new cloner.
    pub fn new(vcs: &'a V, mirror: &'a M) -> Self {
        Self { vcs, mirror }
    }

    /// Clone `branch` of `url` into `target`.
    ///
    /// Submodules that cannot be cached are initialized straight from their
    /// remote. Returns namespaces that were materialized.
    ///
    /// # Errors
    ///
    /// - Return [`CloneError::TargetExists`] if `target` already exists.
    /// - Return [`CloneError::Cache`] if the project cannot be cached.
    /// - Return [`CloneError::Clone`] if cloning fails.
    /// - Return [`CloneError::Submodule`] if a submodule cannot be
    ///   initialized.
    /// - Return [`CloneError::Materialize`] if sparse checkouts cannot be
    ///   applied.
    #[instrument(skip(self, options), level = "debug")]
    pub fn clone_project(
        &self,
        branch: &str,
        url: &GitUrl,
        target: &Path,
        options: CloneOptions,
    ) -> Result<Vec<Namespace>> {
        if target.exists() {
            return Err(CloneError::TargetExists(target.to_path_buf()));
        }

        let cache = self.mirror.update(url)?;
        let cache = cache.to_string_lossy();
        let url_text = url.to_string();
        let target_text = target.to_string_lossy();
        info!("clone {url_text} ({branch}) into {target_text}");
        self.vcs
            .call(&[
                "clone",
                "-b",
                branch,
                "--reference",
                &cache,
                "--dissociate",
                &url_text,
                &target_text,
            ])
            .ok_or_else(|| CloneError::Clone(url_text.clone()))?;

        let repo = self.vcs.at(target);
        for (name, path) in submodules(&repo) {
            self.init_submodule(&repo, url, &name, &path, options.dissociate)?;
        }

        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let foreach = ["submodule", "foreach", "git"];
        let restrict: [&[&str]; 2] = [
            foreach.as_slice(),
            &["config", "remote.origin.fetch", refspec.as_str()],
        ];
        if repo.call(&restrict.concat()).is_none() {
            warn!("cannot restrict submodule fetch refspecs to {branch}");
        }
        let fetch: [&[&str]; 2] = [foreach.as_slice(), &["fetch", "--all", "--prune"]];
        if repo.call(&fetch.concat()).is_none() {
            warn!("cannot fetch submodules");
        }

        if !options.whitelist {
            return Ok(Vec::new());
        }

        Ok(Materializer::new(target, self.vcs).materialize()?)
    }

    fn init_submodule(
        &self,
        repo: &V,
        parent: &GitUrl,
        name: &str,
        path: &str,
        dissociate: bool,
    ) -> Result<()> {
        let cache = repo
            .call(&["config", "-f", ".gitmodules", &format!("submodule.{name}.url")])
            .and_then(|raw| match parent.join(&raw) {
                Ok(url) => Some(url),
                Err(error) => {
                    warn!("submodule {name}: {error}");
                    None
                }
            })
            .and_then(|url| match self.mirror.update(&url) {
                Ok(cache) => Some(cache),
                Err(error) => {
                    warn!("submodule {name} is not cached: {error}");
                    None
                }
            });

        let cache = cache.map(|cache| cache.to_string_lossy().into_owned());
        let mut args = vec!["submodule", "update"];
        if let Some(cache) = cache.as_deref() {
            args.extend(["--reference", cache]);
        }
        args.push("--init");
        if dissociate && cache.is_some() {
            args.push("--dissociate");
        }
        args.extend(["--", path]);

        info!("initialize submodule {name} at {path}");
        repo.call(&args)
            .map(|_| ())
            .ok_or_else(|| CloneError::Submodule(path.to_string()))
    }
}

/// Submodule names and paths declared by repository of `repo`.
fn submodules<V>(repo: &V) -> Vec<(String, String)>
where
    V: Vcs,
{
    let Some(listing) = repo.call(&[
        "config",
        "-f",
        ".gitmodules",
        "--get-regexp",
        r"^submodule\..*\.path$",
    ]) else {
        return Vec::new();
    };

    listing
        .lines()
        .filter_map(|line| {
            let (key, path) = line.split_once(' ')?;
            let name = key.strip_prefix("submodule.")?.strip_suffix(".path")?;
            Some((name.to_string(), path.trim().to_string()))
        })
        .collect()
}

/// Clone error types.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("clone target {:?} already exists", .0.display())]
    TargetExists(PathBuf),

    #[error("failed to clone {0}")]
    Clone(String),

    #[error("failed to initialize submodule at {0}")]
    Submodule(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

/// Friendly result alias :3
type Result<T, E = CloneError> = std::result::Result<T, E>;
