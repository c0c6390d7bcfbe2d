// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use odooup::{
    cache::{Mirror, RepoCache},
    clone::{CloneOptions as CloneKnobs, Cloner},
    maintain::{Decision, Maintainer, Progress},
    path::GitUrl,
    vcs::SystemGit,
    whitelist::{self, materialize::Materializer},
    Project, Settings,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::{env::current_dir, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "odooup [options] <odooup-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Whitelist(opts) => run_whitelist(opts),
            Command::Materialize => run_materialize(),
            Command::Deps(opts) => run_deps(opts),
            Command::Repo(opts) => run_repo(opts),
            Command::Clone(opts) => run_clone(opts),
            Command::Cache(opts) => run_cache(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Whitelist module and its dependencies for sparse checkout.
    #[command(override_usage = "odooup whitelist [options] [module]")]
    Whitelist(WhitelistOptions),

    /// Apply existing whitelists through sparse checkout.
    #[command(override_usage = "odooup materialize")]
    Materialize,

    /// Show dependency chains of module.
    #[command(override_usage = "odooup deps <module>")]
    Deps(DepsOptions),

    /// Maintain patch branches of a development repository.
    #[command(override_usage = "odooup repo [options] <repo-command>")]
    Repo(RepoOptions),

    /// Clone project through the repository cache.
    #[command(override_usage = "odooup clone [options] <branch> <url>")]
    Clone(CloneOptions),

    /// Warm repository cache entry of url.
    #[command(override_usage = "odooup cache <url>")]
    Cache(CacheOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WhitelistOptions {
    /// Module to whitelist, every primary module if omitted.
    #[arg(value_name = "module")]
    pub module: Option<String>,

    /// Do not whitelist dependencies from the native namespace.
    #[arg(short, long, conflicts_with = "keep_native")]
    pub skip_native: bool,

    /// Whitelist dependencies from the native namespace too.
    #[arg(short, long)]
    pub keep_native: bool,
}

impl WhitelistOptions {
    /// Native namespace choice made on the command line, if any.
    fn native_choice(&self) -> Option<bool> {
        match (self.skip_native, self.keep_native) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    fn skip_native(&self) -> Result<bool> {
        match self.native_choice() {
            Some(skip) => Ok(skip),
            None => Ok(Confirm::new("Ignore native modules from sparse checkout config?")
                .with_default(true)
                .prompt()?),
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DepsOptions {
    /// Module to report on.
    #[arg(required = true, value_name = "module")]
    pub module: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RepoOptions {
    /// Git directory of development repository.
    #[arg(long, value_name = "dir")]
    pub git_dir: Option<PathBuf>,

    /// Name of development remote.
    #[arg(long, value_name = "name")]
    pub remote: Option<String>,

    #[command(subcommand)]
    pub command: RepoCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum RepoCommand {
    /// Update, rebase, and compile patch branches.
    #[command(override_usage = "odooup repo maintain [options] <branches>...")]
    Maintain(MaintainOptions),

    /// Backport patches to older series.
    #[command(subcommand)]
    Backport(BackportCommand),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MaintainOptions {
    /// Base branches to maintain.
    #[arg(required = true, value_name = "branches")]
    pub branches: Vec<String>,

    /// Fast-forward base branches and push them.
    #[arg(short, long)]
    pub update: bool,

    /// Rebase patch branches onto their base branches.
    #[arg(short, long)]
    pub rebase: bool,

    /// Compile patch branches into one branch per base.
    #[arg(short, long)]
    pub compile: bool,

    /// Shorthand for update, rebase, and compile.
    #[arg(short, long)]
    pub auto: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum BackportCommand {
    /// Backport single commit onto target branch.
    #[command(override_usage = "odooup repo backport commit <commit> <target> <name>")]
    Commit(BackportCommitOptions),

    /// Backport patch branches down the series.
    #[command(override_usage = "odooup repo backport branch <name> <branches>...")]
    Branch(BackportBranchOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BackportCommitOptions {
    /// Commit to backport.
    #[arg(required = true, value_name = "commit")]
    pub commit: String,

    /// Base branch to backport onto.
    #[arg(required = true, value_name = "target")]
    pub target: String,

    /// Patch name of backported branch.
    #[arg(required = true, value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BackportBranchOptions {
    /// Patch name to backport.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Series branches, oldest first.
    #[arg(required = true, value_name = "branches")]
    pub branches: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CloneOptions {
    /// Branch to check out.
    #[arg(required = true, value_name = "branch")]
    pub branch: String,

    /// URL of project to clone.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Skip sparse checkout of whitelisted namespaces.
    #[arg(short, long)]
    pub no_whitelist: bool,

    /// Copy cached objects into submodules.
    #[arg(short, long)]
    pub dissociate: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CacheOptions {
    /// URL of repository to cache.
    #[arg(required = true, value_name = "url")]
    pub url: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_whitelist(opts: WhitelistOptions) -> Result<()> {
    let skip_native = opts.skip_native()?;
    let git = SystemGit::new();
    let project = Project::open(&git)?;
    let graph = project.graph()?;
    let summary = whitelist::run(
        project.root(),
        &project.settings().whitelist,
        &graph,
        &git,
        opts.module.as_deref(),
        skip_native,
    )?;

    for path in summary.whitelisted.iter().chain(summary.promoted.iter()) {
        info!("updated {}", path.display());
    }
    info!("materialized {} namespaces", summary.materialized.len());

    Ok(())
}

fn run_materialize() -> Result<()> {
    let git = SystemGit::new();
    let project = Project::open(&git)?;
    let done = Materializer::new(project.root(), &git).materialize()?;
    info!("materialized {} namespaces", done.len());

    Ok(())
}

fn run_deps(opts: DepsOptions) -> Result<()> {
    let project = Project::open(&SystemGit::new())?;
    let graph = project.graph()?;
    let report = graph
        .report(&opts.module)
        .ok_or_else(|| anyhow!("module {:?} not found in dependency graph", opts.module))?;
    println!("{report}");

    Ok(())
}

fn run_repo(opts: RepoOptions) -> Result<()> {
    let settings = Settings::load(current_dir()?)?;
    let git_dir = opts.git_dir.unwrap_or(settings.repo.git_dir);
    let remote = opts.remote.unwrap_or(settings.repo.remote);
    let git = SystemGit::new().with_git_dir(git_dir);

    match opts.command {
        RepoCommand::Maintain(maintain) => {
            let mut maintainer = Maintainer::open(git, remote, maintain.branches)?;
            if maintain.update || maintain.auto {
                let progress = maintainer.update_remote()?;
                drive(&mut maintainer, progress)?;
            }
            if maintain.rebase || maintain.auto {
                let progress = maintainer.rebase_patches(None)?;
                drive(&mut maintainer, progress)?;
            }
            if maintain.compile || maintain.auto {
                let progress = maintainer.compile()?;
                drive(&mut maintainer, progress)?;
            }
            summarize(maintainer)
        }
        RepoCommand::Backport(BackportCommand::Commit(backport)) => {
            let mut maintainer = Maintainer::open(git, remote, [backport.target.clone()])?;
            let progress =
                maintainer.backport_patch(&backport.commit, &backport.target, &backport.name)?;
            drive(&mut maintainer, progress)?;
            summarize(maintainer)
        }
        RepoCommand::Backport(BackportCommand::Branch(backport)) => {
            let mut maintainer = Maintainer::open(git, remote, backport.branches)?;
            let progress = maintainer.backport_patches(Some(&backport.name))?;
            drive(&mut maintainer, progress)?;
            summarize(maintainer)
        }
    }
}

/// Ask operator about every conflict until queued work is done.
fn drive(maintainer: &mut Maintainer<SystemGit>, mut progress: Progress) -> Result<()> {
    while let Progress::NeedsDecision(checkpoint) = progress {
        warn!("{checkpoint}");
        let decision = if Confirm::new("Continue (or abort)?")
            .with_default(true)
            .prompt()?
        {
            Decision::Continue
        } else {
            Decision::Abort
        };
        progress = maintainer.resume(decision)?;
    }

    Ok(())
}

fn summarize(maintainer: Maintainer<SystemGit>) -> Result<()> {
    let report = maintainer.close()?;
    for branch in &report.pushed {
        info!("pushed {branch}");
    }
    for branch in &report.aborted {
        warn!("aborted {branch}");
    }
    for branch in &report.failed {
        warn!("failed {branch}");
    }

    Ok(())
}

fn run_clone(opts: CloneOptions) -> Result<()> {
    let settings = Settings::load(current_dir()?)?;
    let url: GitUrl = opts.url.parse()?;
    let target = url.project_dir(&settings.layout.base_dir);
    let cache = RepoCache::from_settings(&settings.cache)?;
    let knobs = CloneKnobs {
        whitelist: !opts.no_whitelist,
        dissociate: opts.dissociate,
    };

    let git = SystemGit::new();
    let done = Cloner::new(&git, &cache).clone_project(&opts.branch, &url, &target, knobs)?;
    info!("cloned into {}", target.display());
    if !done.is_empty() {
        info!("materialized {} namespaces", done.len());
    }

    Ok(())
}

fn run_cache(opts: CacheOptions) -> Result<()> {
    let settings = Settings::load(current_dir()?)?;
    let url: GitUrl = opts.url.parse()?;
    let path = RepoCache::from_settings(&settings.cache)?.update(&url)?;
    info!("cached {url} at {}", path.display());

    Ok(())
}
