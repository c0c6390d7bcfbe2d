// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control boundary.
//!
//! Two ways of talking to Git live here. [`Vcs`] issues porcelain commands
//! through the Git binary and reports failure through a `None` sentinel
//! instead of an error, which is what the maintenance state machine and the
//! sparse checkout materializer consume. [`GitTree`] reads committed trees
//! and blobs through libgit2, which is what addon discovery consumes.

use git2::{ObjectType, Oid, Repository};
use std::{
    collections::VecDeque,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

/// Issue version control commands against a fixed location.
pub trait Vcs {
    /// Run a command, returning its trimmed standard output.
    ///
    /// Returns `None` if the command could not be spawned or exited with a
    /// failure status. Callers must check for it before proceeding.
    fn call(&self, args: &[&str]) -> Option<String>;

    /// Same tool, but rooted at another working directory.
    fn at(&self, dir: &Path) -> Self
    where
        Self: Sized;
}

/// Version control through the Git binary.
#[derive(Debug, Clone, Default)]
pub struct SystemGit {
    git_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
}

impl SystemGit {
    /// Construct new Git caller using current working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target explicit Git directory through `--git-dir`.
    pub fn with_git_dir(mut self, git_dir: impl Into<PathBuf>) -> Self {
        self.git_dir = Some(git_dir.into());
        self
    }
}

impl Vcs for SystemGit {
    fn call(&self, args: &[&str]) -> Option<String> {
        let mut bin_args: Vec<String> = Vec::new();
        if let Some(git_dir) = &self.git_dir {
            bin_args.push(format!("--git-dir={}", git_dir.display()));
        }
        bin_args.extend(args.iter().map(ToString::to_string));

        syscall_non_interactive("git", &bin_args, self.work_dir.as_deref())
    }

    fn at(&self, dir: &Path) -> Self {
        Self {
            git_dir: None,
            work_dir: Some(dir.to_path_buf()),
        }
    }
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: &[String],
    work_dir: Option<&Path>,
) -> Option<String> {
    debug!("{} {}", cmd.as_ref().to_string_lossy(), args.join(" "));
    let mut command = Command::new(cmd.as_ref());
    command.args(args).env("GIT_EDITOR", "true");
    if let Some(dir) = work_dir {
        command.current_dir(dir);
    }

    let output = match command.output() {
        Ok(output) => output,
        Err(error) => {
            debug!("failed to spawn {:?}: {error}", cmd.as_ref());
            return None;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(output.stderr.as_slice());
        debug!("command {:?} failed: {}", cmd.as_ref(), stderr.trim_end());
        return None;
    }

    // INVARIANT: Chomp trailing newlines.
    let stdout = String::from_utf8_lossy(output.stdout.as_slice());
    Some(stdout.trim_end_matches(['\r', '\n']).to_string())
}

/// Kind of entry found in a committed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file content.
    Blob,

    /// Gitlink to a nested repository.
    SubRepo,
}

/// Entry of a committed tree, path relative to its repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub id: Oid,
}

/// Read committed trees of a project and its nested repositories.
pub trait TreeSource {
    /// List every entry of HEAD in repository at `repo`, recursively.
    ///
    /// `repo` is relative to the project root; an empty path means the
    /// project repository itself.
    fn list(&self, repo: &Path) -> Result<Vec<TreeEntry>>;

    /// Read blob content of entry from repository at `repo`.
    fn read(&self, repo: &Path, entry: &TreeEntry) -> Result<String>;
}

/// Committed tree access through libgit2.
#[derive(Debug, Clone)]
pub struct GitTree {
    root: PathBuf,
}

impl GitTree {
    /// Construct new tree reader for project at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn open(&self, repo: &Path) -> Result<Repository> {
        let path = self.root.join(repo);
        Repository::open(&path).map_err(|source| VcsError::Open { source, path })
    }
}

impl TreeSource for GitTree {
    // Thank you Eric at https://www.hydrogen18.com/blog/list-all-files-git-repo-pygit2.html.
    fn list(&self, repo: &Path) -> Result<Vec<TreeEntry>> {
        let repository = self.open(repo)?;
        let mut entries = Vec::new();
        let commit = repository.head()?.peel_to_commit()?;
        let tree = commit.tree()?;
        let mut trees_and_paths = VecDeque::new();
        trees_and_paths.push_front((tree, PathBuf::new()));

        // Use DFS to traverse index tree.
        while let Some((tree, path)) = trees_and_paths.pop_front() {
            for tree_entry in &tree {
                let full_path = path.join(bytes_to_path(tree_entry.name_bytes()));
                match tree_entry.kind() {
                    // INVARIANT: Hit a tree? Traverse it!
                    Some(ObjectType::Tree) => {
                        let next_tree = repository.find_tree(tree_entry.id())?;
                        trees_and_paths.push_front((next_tree, full_path));
                    }
                    Some(ObjectType::Blob) => entries.push(TreeEntry {
                        path: full_path,
                        kind: EntryKind::Blob,
                        id: tree_entry.id(),
                    }),
                    // INVARIANT: Gitlinks point at commits of another repository.
                    Some(ObjectType::Commit) => entries.push(TreeEntry {
                        path: full_path,
                        kind: EntryKind::SubRepo,
                        id: tree_entry.id(),
                    }),
                    _ => continue,
                }
            }
        }

        Ok(entries)
    }

    fn read(&self, repo: &Path, entry: &TreeEntry) -> Result<String> {
        let repository = self.open(repo)?;
        let blob = repository.find_blob(entry.id)?;
        Ok(String::from_utf8_lossy(blob.content()).into_owned())
    }
}

// Thanks from:
//
// https://github.com/rust-lang/git2-rs/blob/5bc3baa9694a94db2ca9cc256b5bce8a215f9013/
// src/util.rs#L85
#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> &Path {
    use std::os::unix::prelude::*;
    Path::new(OsStr::from_bytes(bytes))
}
#[cfg(windows)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::str;
    PathBuf::from(str::from_utf8(bytes).unwrap_or_default())
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Repository cannot be opened.
    #[error("failed to open repository at {:?}", path.display())]
    Open {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = VcsError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted stand-in for the Git binary.

    use super::Vcs;
    use std::{
        cell::RefCell,
        collections::{HashMap, VecDeque},
        path::{Path, PathBuf},
        rc::Rc,
    };

    #[derive(Debug, Default)]
    struct Script {
        responses: HashMap<String, VecDeque<Option<String>>>,
        calls: Vec<String>,
    }

    /// Records every command, and answers from a script.
    ///
    /// Unscripted commands succeed with empty output. A scripted command
    /// pops its responses in order and repeats the last one forever.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ScriptedGit {
        script: Rc<RefCell<Script>>,
        dir: Option<PathBuf>,
    }

    impl ScriptedGit {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn respond(self, command: &str, output: Option<&str>) -> Self {
            self.script
                .borrow_mut()
                .responses
                .entry(command.to_string())
                .or_default()
                .push_back(output.map(ToString::to_string));
            self
        }

        pub(crate) fn fail(self, command: &str) -> Self {
            self.respond(command, None)
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.script.borrow().calls.clone()
        }
    }

    impl Vcs for ScriptedGit {
        fn call(&self, args: &[&str]) -> Option<String> {
            let command = args.join(" ");
            let mut script = self.script.borrow_mut();
            let logged = match &self.dir {
                Some(dir) => format!("[{}] {command}", dir.display()),
                None => command.clone(),
            };
            script.calls.push(logged);

            match script.responses.get_mut(&command) {
                Some(queue) if queue.len() > 1 => queue.pop_front().flatten(),
                Some(queue) => queue.front().cloned().flatten(),
                None => Some(String::new()),
            }
        }

        fn at(&self, dir: &Path) -> Self {
            Self {
                script: Rc::clone(&self.script),
                dir: Some(dir.to_path_buf()),
            }
        }
    }
}
