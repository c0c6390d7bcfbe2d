// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bare repository cache.
//!
//! Cloning the framework repository over and over is slow. Every repository
//! a project references gets a bare mirror in the cache, and clones borrow
//! objects from it through `--reference`. Entries are keyed by host,
//! organization, and project, with organization and project lowercased.

use crate::{
    config::CacheSettings,
    path::{default_cache_dir, GitUrl, NoWayHome},
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{Config, FetchOptions, RemoteCallbacks, Repository};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use mkdirp::mkdirp;
use std::{
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Refspec mirroring every branch of the source.
pub const MIRROR_REFSPEC: &str = "+refs/heads/*:refs/heads/*";

/// Provide local mirrors of remote repositories.
pub trait Mirror {
    /// Bring mirror of `url` up to date, returning its path.
    fn update(&self, url: &GitUrl) -> Result<PathBuf>;
}

/// Bare repository cache on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCache {
    dir: PathBuf,
}

impl RepoCache {
    /// Construct new cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Construct cache from settings, falling back to the XDG cache directory.
    ///
    /// # Errors
    ///
    /// - Return [`CacheError::NoWayHome`] if no cache directory is configured
    ///   and the default one cannot be determined.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        match settings.dir.as_ref() {
            Some(dir) => Ok(Self::new(dir)),
            None => Ok(Self::new(default_cache_dir()?)),
        }
    }

    /// Path of cache entry for `url`.
    pub fn entry(&self, url: &GitUrl) -> PathBuf {
        self.dir
            .join(&url.host)
            .join(url.org.to_lowercase())
            .join(url.project.to_lowercase())
    }

    /// Fetch every branch of `remote` into bare repository at `path`.
    ///
    /// Initializes the bare repository first if it does not exist yet. If any
    /// credentials are required, then the user will be prompted for them, and
    /// the progress bar is suspended for user input.
    fn fetch_into(path: &Path, remote: &str, bar: ProgressBar) -> Result<()> {
        let repository = if path.is_dir() {
            Repository::open_bare(path)?
        } else {
            mkdirp(path).map_err(|source| CacheError::Io {
                source,
                path: path.to_path_buf(),
            })?;
            Repository::init_bare(path)?
        };

        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(remote.to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = MirrorPrompter::new(bar, remote);
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let bar_size = progress.total_objects() as u64;
            let bar_pos = progress.received_objects() as u64;
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(bar_size);
                prompter.bar.set_position(bar_pos);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let mut anonymous = repository.remote_anonymous(remote)?;
        let result = anonymous.fetch(&[MIRROR_REFSPEC], Some(&mut fo), None);
        prompter.bar.finish_and_clear();
        result?;

        Ok(())
    }
}

impl Mirror for RepoCache {
    #[instrument(skip(self), level = "debug")]
    fn update(&self, url: &GitUrl) -> Result<PathBuf> {
        let path = self.entry(url);
        info!("cache {url} at {}", path.display());
        Self::fetch_into(&path, &url.to_string(), ProgressBar::new(0))?;
        Ok(path)
    }
}

/// Credential prompts for a mirror being fetched.
///
/// Prompts are shown with the fetch progress bar suspended, and name the
/// mirror that asked for them. A cancelled prompt fails the fetch.
#[derive(Debug, Clone)]
pub struct MirrorPrompter {
    pub(crate) bar: ProgressBar,
    remote: String,
}

impl MirrorPrompter {
    pub fn new(bar: ProgressBar, remote: impl Into<String>) -> Self {
        Self {
            bar,
            remote: remote.into(),
        }
    }

    /// Prompt label for `secret` of the mirrored remote.
    fn label(&self, secret: &str) -> String {
        format!("{secret} to mirror {}", self.remote)
    }

    fn ask_secret(&self, secret: &str) -> Option<String> {
        let label = self.label(secret);
        self.bar.suspend(|| {
            Password::new(&label)
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

impl Prompter for MirrorPrompter {
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        debug!("mirror of {} needs login for {url}", self.remote);
        let label = self.label("user");
        let username = self.bar.suspend(|| Text::new(&label).prompt().ok())?;
        let password = self.ask_secret("password")?;
        Some((username, password))
    }

    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        debug!("mirror of {} needs password of {username} for {url}", self.remote);
        self.ask_secret(&format!("{username} password"))
    }

    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        debug!(
            "mirror of {} needs passphrase of {}",
            self.remote,
            ssh_key_path.display()
        );
        self.ask_secret(&format!("{} passphrase", ssh_key_path.display()))
    }
}

/// Repository cache error types.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Cache directory cannot be created.
    #[error("failed to create cache entry at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Default cache directory is unknown.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
