// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way. Project directories and cache
//! entries are both derived from the git URL of a repository, so URL parsing
//! lives here too.

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
    sync::LazyLock,
};

static GIT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<prefix>git@|https://)(?P<host>[\w.@]+)[/:](?P<org>[\w,\-/]+)/(?P<project>[\w,\-.]+?)(\.git)?/?$",
    )
    .expect("git url pattern is valid")
});

/// Determine default absolute path to the bare repository cache.
///
/// Uses XDG Base Directory path `$XDG_CACHE_HOME/odooup` as the default
/// absolute path for the cache. Does not check if the path returned actually
/// exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|path| path.join("odooup"))
        .ok_or(NoWayHome)
}

/// Parsed git remote URL.
///
/// Only the two shapes used for hosted repositories are understood:
/// `git@host:org/project.git` and `https://host/org/project.git`. The
/// organization may contain slashes for nested groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitUrl {
    pub prefix: String,
    pub host: String,
    pub org: String,
    pub project: String,
}

impl GitUrl {
    /// Directory a project cloned from this URL is expected to live in.
    ///
    /// Layout is `<base_dir>/<org>/<project>`.
    pub fn project_dir(&self, base_dir: impl Into<PathBuf>) -> PathBuf {
        base_dir.into().join(&self.org).join(&self.project)
    }

    /// Resolve a relative submodule URL (`../other.git`) against this one.
    ///
    /// Absolute URLs are parsed as is.
    ///
    /// # Errors
    ///
    /// - Return [`NotAGitUrl`] if resolution does not produce a valid URL.
    pub fn join(&self, relative: &str) -> Result<GitUrl, NotAGitUrl> {
        if !relative.starts_with('.') {
            return relative.parse();
        }

        let mut parts: Vec<&str> = self.org.split('/').collect();
        parts.push(self.project.as_str());
        for segment in relative.split('/') {
            match segment {
                "." | "" => continue,
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }

        let sep = if self.prefix.starts_with("git") { ":" } else { "/" };
        format!("{}{}{}{}", self.prefix, self.host, sep, parts.join("/")).parse()
    }
}

impl FromStr for GitUrl {
    type Err = NotAGitUrl;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let caps = GIT_URL
            .captures(url.trim())
            .ok_or_else(|| NotAGitUrl(url.to_string()))?;

        Ok(Self {
            prefix: caps["prefix"].to_string(),
            host: caps["host"].to_string(),
            org: caps["org"].to_string(),
            project: caps["project"].to_string(),
        })
    }
}

impl Display for GitUrl {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let sep = if self.prefix.starts_with("git") { ":" } else { "/" };
        write!(
            fmt,
            "{}{}{}{}/{}",
            self.prefix, self.host, sep, self.org, self.project
        )
    }
}

/// String does not look like a git remote URL.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0:?} is not a git url")]
pub struct NotAGitUrl(pub String);

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
