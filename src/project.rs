// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project validation.
//!
//! Every command that works on an existing project first makes sure it is
//! run from inside a Git work tree that has an origin, and, when the layout
//! is enforced, that the work tree lives where its origin URL says it
//! should: `<base_dir>/<org>/<project>`.

use crate::{
    addon::discover::{DiscoverError, Discoverer},
    config::{ConfigError, Settings},
    graph::ModuleGraph,
    path::{GitUrl, NotAGitUrl},
    vcs::{GitTree, Vcs},
};

use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Validated project checkout.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    url: GitUrl,
    settings: Settings,
}

impl Project {
    /// Locate and validate project that `vcs` is rooted in.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::NotAWorkTree`] if not inside a work tree.
    /// - Return [`ProjectError::NoOrigin`] if `remote.origin.url` is unset.
    /// - Return [`ProjectError::Url`] if the origin is not a git URL.
    /// - Return [`ProjectError::Config`] if project settings are malformed.
    /// - Return [`ProjectError::WrongLocation`] if the layout is enforced
    ///   and the work tree is not at its expected location.
    #[instrument(skip(vcs), level = "debug")]
    pub fn open<V>(vcs: &V) -> Result<Self>
    where
        V: Vcs,
    {
        if vcs.call(&["rev-parse", "--is-inside-work-tree"]).as_deref() != Some("true") {
            return Err(ProjectError::NotAWorkTree);
        }

        let url = vcs
            .call(&["config", "--local", "remote.origin.url"])
            .filter(|url| !url.is_empty())
            .ok_or(ProjectError::NoOrigin)?;
        let root = vcs
            .call(&["rev-parse", "--show-toplevel"])
            .filter(|top| !top.is_empty())
            .map(PathBuf::from)
            .ok_or(ProjectError::NotAWorkTree)?;

        let url: GitUrl = url.parse()?;
        let settings = Settings::load(&root)?;
        if settings.layout.enforce {
            let expected = url.project_dir(&settings.layout.base_dir);
            if expected != root {
                return Err(ProjectError::WrongLocation {
                    expected,
                    actual: root,
                });
            }
        }

        debug!("project {url} at {}", root.display());
        Ok(Self {
            root,
            url,
            settings,
        })
    }

    /// Top-level directory of project work tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Origin URL of project.
    pub fn url(&self) -> &GitUrl {
        &self.url
    }

    /// Project settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build module graph from committed state of project.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Discover`] if the project repository itself
    ///   cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn graph(&self) -> Result<ModuleGraph> {
        let source = GitTree::new(&self.root);
        let discoverer = Discoverer::new(&source, self.settings.whitelist.skip_paths.iter().cloned());
        Ok(ModuleGraph::from_addons(discoverer.discover()?))
    }
}

/// Project validation error types.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// Current directory is not inside of a Git work tree.
    #[error("not inside of a git work tree")]
    NotAWorkTree,

    /// Project has no origin to derive its layout from.
    #[error("project has no remote.origin.url configured")]
    NoOrigin,

    /// Project is not where its origin says it should be.
    #[error("project must live at {:?}, found it at {:?}", expected.display(), actual.display())]
    WrongLocation { expected: PathBuf, actual: PathBuf },

    #[error(transparent)]
    Url(#[from] NotAGitUrl),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discover(#[from] DiscoverError),
}

/// Friendly result alias :3
type Result<T, E = ProjectError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::testing::ScriptedGit;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::write;

    fn scripted(top: &Path) -> ScriptedGit {
        ScriptedGit::new()
            .respond("rev-parse --is-inside-work-tree", Some("true"))
            .respond(
                "config --local remote.origin.url",
                Some("git@github.com:acme/shop.git"),
            )
            .respond("rev-parse --show-toplevel", Some(&top.to_string_lossy()))
    }

    #[sealed_test]
    fn open_at_expected_location() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let top = root.join("acme/shop");
        std::fs::create_dir_all(&top)?;
        write(
            top.join(".odooup.toml"),
            format!("[layout]\nbase_dir = {:?}\n", root.display().to_string()),
        )?;

        let project = Project::open(&scripted(&top))?;
        assert_eq!(project.root(), top.as_path());
        assert_eq!(project.url().project, "shop");
        Ok(())
    }

    #[sealed_test]
    fn open_at_wrong_location() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        write(
            root.join(".odooup.toml"),
            "[layout]\nbase_dir = \"/srv/odoo\"\n",
        )?;

        let result = Project::open(&scripted(&root));
        assert!(matches!(
            result,
            Err(ProjectError::WrongLocation { expected, .. }) if expected == Path::new("/srv/odoo/acme/shop")
        ));
        Ok(())
    }

    #[sealed_test]
    fn open_anywhere_without_layout() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        write(root.join(".odooup.toml"), "[layout]\nenforce = false\n")?;

        let project = Project::open(&scripted(&root))?;
        assert_eq!(project.root(), root.as_path());
        Ok(())
    }

    #[test]
    fn open_outside_work_tree() {
        let vcs = ScriptedGit::new().fail("rev-parse --is-inside-work-tree");
        assert!(matches!(
            Project::open(&vcs),
            Err(ProjectError::NotAWorkTree)
        ));
    }

    #[test]
    fn open_without_origin() {
        let vcs = ScriptedGit::new()
            .respond("rev-parse --is-inside-work-tree", Some("true"))
            .fail("config --local remote.origin.url");
        assert!(matches!(Project::open(&vcs), Err(ProjectError::NoOrigin)));
    }
}
