// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Addon discovery.
//!
//! Walks the committed state of a project, and of every nested repository it
//! links to, looking for addon manifests. The working tree and the index are
//! never consulted, so discovery sees exactly what a fresh clone would see.
//!
//! # Layering
//!
//! The same module name may exist in several repositories, e.g., a patched
//! copy of a framework module vendored from a third-party repository. Layers
//! are applied in a fixed order so that overrides are reproducible:
//!
//! 1. Nested repositories in reverse lexicographic order of their path.
//! 2. The project repository itself, which always wins.
//!
//! A later layer replaces an earlier one on name collision.

use crate::{
    addon::{
        manifest::{self, Manifest},
        Addon, Namespace,
    },
    vcs::{EntryKind, TreeEntry, TreeSource, VcsError},
};

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Discover addons of a project.
#[derive(Debug)]
pub struct Discoverer<'a, S>
where
    S: TreeSource,
{
    source: &'a S,
    skip_paths: Vec<String>,
}

impl<'a, S> Discoverer<'a, S>
where
    S: TreeSource,
{
    /// Construct new discoverer.
    ///
    /// Manifests whose path contains any of `skip_paths` are ignored.
    pub fn new(source: &'a S, skip_paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            source,
            skip_paths: skip_paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Discover every addon of the project.
    ///
    /// Resolves layering up front, then reads and parses manifests lazily as
    /// the returned iterator advances. Each call starts over from the current
    /// committed state.
    ///
    /// # Errors
    ///
    /// - Return [`DiscoverError::Vcs`] if the project repository itself cannot
    ///   be listed. Nested repositories that cannot be listed are skipped.
    #[instrument(skip(self), level = "debug")]
    pub fn discover(&self) -> Result<Addons<'a, S>> {
        let root = PathBuf::new();
        let root_entries = self.source.list(&root)?;

        let mut sub_repos = root_entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::SubRepo)
            .map(|entry| entry.path.clone())
            .collect::<Vec<_>>();
        sub_repos.sort();

        let mut layers = Layers::default();
        for sub_repo in sub_repos.iter().rev() {
            match self.source.list(sub_repo) {
                Ok(entries) => self.collect(&mut layers, sub_repo, entries),
                Err(error) => warn!("skipping nested repository {}: {error}", sub_repo.display()),
            }
        }

        // INVARIANT: Primary tree is layered last to take highest priority.
        self.collect(&mut layers, &root, root_entries);

        Ok(Addons {
            source: self.source,
            candidates: layers.candidates.into_iter(),
        })
    }

    fn collect(&self, layers: &mut Layers, repo: &Path, entries: Vec<TreeEntry>) {
        let mut addon_dirs: BTreeMap<PathBuf, Vec<TreeEntry>> = BTreeMap::new();
        for entry in entries {
            let is_manifest = entry.kind == EntryKind::Blob
                && entry.path.file_name().is_some_and(manifest::is_manifest_name);
            if !is_manifest || self.is_skipped(&repo.join(&entry.path)) {
                continue;
            }

            let dir = entry.path.parent().map(Path::to_path_buf).unwrap_or_default();
            addon_dirs.entry(dir).or_default().push(entry);
        }

        for (dir, files) in addon_dirs {
            let Some(name) = dir.file_name().map(|name| name.to_string_lossy().into_owned()) else {
                debug!("ignoring manifest at top-level of {}", repo.display());
                continue;
            };

            let Ok(path) = manifest::locate(&dir, files.iter().map(|file| file.path.as_path()))
            else {
                continue;
            };
            let Some(entry) = files.iter().find(|file| file.path == path).cloned() else {
                continue;
            };

            let addon_dir = repo.join(&dir);
            let namespace = Namespace::new(addon_dir.parent().unwrap_or_else(|| Path::new("")));
            layers.push(Candidate {
                name,
                repo: repo.to_path_buf(),
                entry,
                namespace,
            });
        }
    }

    fn is_skipped(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.skip_paths.iter().any(|skip| path.contains(skip.as_str()))
    }
}

/// Manifest waiting to be read.
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    repo: PathBuf,
    entry: TreeEntry,
    namespace: Namespace,
}

/// Layered candidates, keyed by module name.
///
/// # Invariant
///
/// - One candidate per module name.
/// - Replacing a candidate keeps the position of the first one.
#[derive(Debug, Default)]
struct Layers {
    candidates: Vec<Candidate>,
    index: HashMap<String, usize>,
}

impl Layers {
    fn push(&mut self, candidate: Candidate) {
        match self.index.get(&candidate.name) {
            Some(&slot) => {
                debug!(
                    "module {} from {} overrides {}",
                    candidate.name, candidate.namespace, self.candidates[slot].namespace
                );
                self.candidates[slot] = candidate;
            }
            None => {
                self.index
                    .insert(candidate.name.clone(), self.candidates.len());
                self.candidates.push(candidate);
            }
        }
    }
}

/// Lazy sequence of discovered addons.
///
/// Manifests that cannot be read or parsed are skipped with a warning.
pub struct Addons<'a, S>
where
    S: TreeSource,
{
    source: &'a S,
    candidates: std::vec::IntoIter<Candidate>,
}

impl<S> Iterator for Addons<'_, S>
where
    S: TreeSource,
{
    type Item = Addon;

    fn next(&mut self) -> Option<Self::Item> {
        for candidate in self.candidates.by_ref() {
            let path = candidate.repo.join(&candidate.entry.path);
            let manifest = match self.source.read(&candidate.repo, &candidate.entry) {
                Ok(content) => content.parse::<Manifest>(),
                Err(error) => {
                    warn!("cannot read {}: {error}", path.display());
                    continue;
                }
            };

            match manifest {
                Ok(manifest) => {
                    return Some(Addon::new(candidate.name, manifest, candidate.namespace))
                }
                Err(error) => warn!("error parsing {}: {error}", path.display()),
            }
        }

        None
    }
}

/// Discovery error types.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    /// Project repository cannot be listed.
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// Friendly result alias :3
type Result<T, E = DiscoverError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory stand-in for committed trees.

    use crate::vcs::{EntryKind, Result, TreeEntry, TreeSource, VcsError};

    use git2::Oid;
    use std::{
        collections::HashMap,
        path::{Path, PathBuf},
    };

    /// Committed trees keyed by repository path.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryTree {
        pub(super) repos: HashMap<PathBuf, Vec<(PathBuf, Option<String>)>>,
    }

    impl MemoryTree {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Commit file to repository.
        pub(crate) fn file(mut self, repo: &str, path: &str, content: &str) -> Self {
            self.repos
                .entry(PathBuf::from(repo))
                .or_default()
                .push((PathBuf::from(path), Some(content.to_string())));
            self
        }

        /// Link nested repository into the project repository.
        pub(crate) fn sub_repo(mut self, path: &str) -> Self {
            self.repos
                .entry(PathBuf::new())
                .or_default()
                .push((PathBuf::from(path), None));
            self.repos.entry(PathBuf::from(path)).or_default();
            self
        }
    }

    impl TreeSource for MemoryTree {
        fn list(&self, repo: &Path) -> Result<Vec<TreeEntry>> {
            let files = self.repos.get(repo).ok_or_else(|| VcsError::Open {
                source: git2::Error::from_str("no such repository"),
                path: repo.to_path_buf(),
            })?;

            Ok(files
                .iter()
                .map(|(path, content)| TreeEntry {
                    path: path.clone(),
                    kind: match content {
                        Some(_) => EntryKind::Blob,
                        None => EntryKind::SubRepo,
                    },
                    id: Oid::zero(),
                })
                .collect())
        }

        fn read(&self, repo: &Path, entry: &TreeEntry) -> Result<String> {
            self.repos
                .get(repo)
                .and_then(|files| files.iter().find(|(path, _)| *path == entry.path))
                .and_then(|(_, content)| content.clone())
                .ok_or_else(|| VcsError::Git2(git2::Error::from_str("no such blob")))
        }
    }
}
