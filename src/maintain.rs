// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch branch maintenance.
//!
//! A development remote carries __patch branches__ on top of the base branches
//! of each release series. A patch branch for series `10.0` on remote `dev` is
//! named `dev/10.0-<patch>`. Maintenance keeps these branches healthy:
//!
//! - __Update__ fast-forwards local base branches and pushes them to the
//!   development remote.
//! - __Rebase__ replays every patch branch onto its current base branch.
//! - __Backport__ carries patch branches from newer series to older ones, or
//!   a single upstream commit to a chosen series.
//! - __Compile__ merges every patch branch of a series into one synthetic
//!   `compiled/<series>` branch.
//!
//! # Suspension
//!
//! Rebases, cherry-picks, and merges can conflict. A conflict suspends the
//! [`Maintainer`] instead of failing: the operation returns
//! [`Progress::NeedsDecision`] carrying a [`Checkpoint`], and the caller
//! resolves the conflict by hand before calling [`Maintainer::resume`] with a
//! [`Decision`]. Only failing checkouts abort, since continuing on the wrong
//! branch could push garbage.
//!
//! # Branch Family Matching
//!
//! Patch branches are matched by the prefix `<remote>/<series>-`. Series
//! names that are prefixes of each other followed by a dash, e.g., `1.0` and
//! `1.0-lts`, cannot be told apart. Pick series names that avoid this.

use crate::vcs::Vcs;

use std::{
    collections::VecDeque,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, info, instrument, warn};

/// Marker of backported branch names.
pub const BACKPORT_FLAG: &str = "BACKPORT";

/// Kind of backport, part of the backported branch name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackportTag {
    /// Whole patch branch carried between series.
    Branch,

    /// Single commit picked from anywhere.
    Commit,
}

impl Display for BackportTag {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Branch => fmt.write_str("BRANCH"),
            Self::Commit => fmt.write_str("COMMIT"),
        }
    }
}

/// Name of a backported branch.
///
/// Strips any earlier backport marker of the same kind, then moves the branch
/// from `source` series to `target` series with a fresh marker, e.g.,
/// `dev/11.0-fix` becomes `dev/10.0-BACKPORT-BRANCH-fix`.
pub fn backport_name(
    remote: &str,
    candidate: &str,
    source: &str,
    target: &str,
    tag: BackportTag,
) -> String {
    let marker = format!("{BACKPORT_FLAG}-{tag}-");
    candidate.replace(&marker, "").replace(
        &format!("{remote}/{source}-"),
        &format!("{remote}/{target}-{marker}"),
    )
}

/// Local staging name of a remote branch, i.e., without `<remote>/`.
pub fn staging_name<'a>(remote: &str, branch: &'a str) -> Option<&'a str> {
    branch.strip_prefix(remote)?.strip_prefix('/')
}

/// Conflicting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Rebase,
    CherryPick,
    Merge,
}

impl Operation {
    fn command(self) -> &'static str {
        match self {
            Self::Rebase => "rebase",
            Self::CherryPick => "cherry-pick",
            Self::Merge => "merge",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.command())
    }
}

/// Conflict waiting for manual resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Operation that stopped.
    pub operation: Operation,

    /// Branch being rebased, picked onto, or merged.
    pub branch: String,
}

impl Display for Checkpoint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} of {} stopped on conflicts", self.operation, self.branch)
    }
}

/// Answer to a [`Checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Conflicts are resolved, carry on.
    Continue,

    /// Give up on this branch, and unwind it.
    Abort,
}

/// Outcome of running maintenance work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// All queued work is done.
    Done,

    /// Work is suspended on a conflict.
    NeedsDecision(Checkpoint),
}

/// Observable state of a maintenance session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// On the branch the session started on.
    Idle,

    /// On another branch, between operations.
    CheckedOut(String),

    /// Suspended on a conflict.
    AwaitingResolution(Checkpoint),
}

/// Branches touched during a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Branches pushed to the remote.
    pub pushed: Vec<String>,

    /// Branches given up on by decision.
    pub aborted: Vec<String>,

    /// Branches whose merge or push failed.
    pub failed: Vec<String>,
}

/// Queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    Fetch,
    Update { branch: String },
    RebaseSeries { base: String, patch: Option<String> },
    Rebase { base: String, branch: String },
    BackportSeries { from: String, to: String, name: Option<String> },
    Backport { from: String, to: String, branch: String },
    BackportCommit { commit: String, target: String, name: String },
    CompileStart { base: String },
    CompileMerge { branch: String },
    CompileFinish { base: String },
}

/// Wrap-up of a staging branch once its operation is over.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Staging {
    name: String,
    remote_name: String,
    push: Vec<String>,
    back_to: String,
}

/// Operation stopped on a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlight {
    checkpoint: Checkpoint,
    staging: Option<Staging>,
}

/// Maintenance session over one repository.
///
/// Remembers the branch it was opened on, and checks it out again on
/// [`Maintainer::close`], or on drop. A session suspended on a conflict is
/// left as is, so the conflict can still be resolved by hand.
#[derive(Debug)]
pub struct Maintainer<V>
where
    V: Vcs,
{
    vcs: V,
    remote: String,
    branches: Vec<String>,
    restore: String,
    current: String,
    queue: VecDeque<Task>,
    in_flight: Option<InFlight>,
    report: Report,
    closed: bool,
}

impl<V> Maintainer<V>
where
    V: Vcs,
{
    /// Open session on tracked base `branches` of `remote`.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::NoCurrentBranch`] if the current branch
    ///   cannot be determined.
    pub fn open(
        vcs: V,
        remote: impl Into<String>,
        branches: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let restore = vcs
            .call(&["rev-parse", "--abbrev-ref", "HEAD"])
            .filter(|branch| !branch.is_empty())
            .ok_or(MaintainError::NoCurrentBranch)?;
        let remote = remote.into();
        let branches = branches.into_iter().map(Into::into).collect::<Vec<String>>();
        info!("remote {remote}, base branches {}", branches.join(", "));

        Ok(Self {
            vcs,
            remote,
            branches,
            current: restore.clone(),
            restore,
            queue: VecDeque::new(),
            in_flight: None,
            report: Report::default(),
            closed: false,
        })
    }

    /// Current state of the session.
    pub fn state(&self) -> State {
        match &self.in_flight {
            Some(in_flight) => State::AwaitingResolution(in_flight.checkpoint.clone()),
            None if self.current == self.restore => State::Idle,
            None => State::CheckedOut(self.current.clone()),
        }
    }

    /// Branches touched so far.
    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Fast-forward every base branch and push it to the remote.
    ///
    /// Failing merges or pushes are logged, and the next branch proceeds.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::CheckoutFailed`] if a base branch cannot be
    ///   checked out.
    /// - Return [`MaintainError::DecisionPending`] if suspended.
    #[instrument(skip(self), level = "debug")]
    pub fn update_remote(&mut self) -> Result<Progress> {
        info!("update base branches");
        let mut tasks = vec![Task::Fetch];
        tasks.extend(
            self.branches
                .iter()
                .map(|branch| Task::Update { branch: branch.clone() }),
        );
        self.start(tasks)
    }

    /// Rebase patch branches onto their base branches.
    ///
    /// Rebases only `<remote>/<base>-<patch>` if `patch` is given, or every
    /// patch branch of each base branch otherwise.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::CheckoutFailed`] if a branch cannot be
    ///   checked out.
    /// - Return [`MaintainError::DecisionPending`] if suspended.
    #[instrument(skip(self), level = "debug")]
    pub fn rebase_patches(&mut self, patch: Option<&str>) -> Result<Progress> {
        info!("rebase patch branches");
        let tasks = self
            .branches
            .iter()
            .map(|base| Task::RebaseSeries {
                base: base.clone(),
                patch: patch.map(ToString::to_string),
            })
            .collect();
        self.start(tasks)
    }

    /// Backport patch branches down the series, newest to oldest.
    ///
    /// Base branches are series in declared order, oldest first. Each pair of
    /// neighbors is processed starting from the newest, so a patch travels
    /// all the way down. With `name`, only patch branches ending in it are
    /// backported.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::CheckoutFailed`] if a branch cannot be
    ///   checked out.
    /// - Return [`MaintainError::DecisionPending`] if suspended.
    #[instrument(skip(self), level = "debug")]
    pub fn backport_patches(&mut self, name: Option<&str>) -> Result<Progress> {
        info!("backport patch branches");
        let tasks = self
            .branches
            .windows(2)
            .rev()
            .map(|pair| Task::BackportSeries {
                from: pair[1].clone(),
                to: pair[0].clone(),
                name: name.map(ToString::to_string),
            })
            .collect();
        self.start(tasks)
    }

    /// Backport a single commit onto `target` as patch `name`.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::CheckoutFailed`] if `target` cannot be
    ///   checked out.
    /// - Return [`MaintainError::DecisionPending`] if suspended.
    #[instrument(skip(self), level = "debug")]
    pub fn backport_patch(&mut self, commit: &str, target: &str, name: &str) -> Result<Progress> {
        self.start(vec![Task::BackportCommit {
            commit: commit.to_string(),
            target: target.to_string(),
            name: name.to_string(),
        }])
    }

    /// Merge every patch branch of each base branch into `compiled/<base>`.
    ///
    /// A merge that is aborted by decision leaves that patch out, and the
    /// remaining patches are still merged and pushed.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::CheckoutFailed`] if a branch cannot be
    ///   checked out.
    /// - Return [`MaintainError::DecisionPending`] if suspended.
    #[instrument(skip(self), level = "debug")]
    pub fn compile(&mut self) -> Result<Progress> {
        info!("compile synthetic patch branches");
        let tasks = self
            .branches
            .iter()
            .map(|base| Task::CompileStart { base: base.clone() })
            .collect();
        self.start(tasks)
    }

    /// Resume work suspended on a conflict.
    ///
    /// [`Decision::Continue`] re-suspends on the same checkpoint if the
    /// operation still cannot continue. [`Decision::Abort`] unwinds the
    /// operation and cleans up without pushing.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::NothingToResume`] if not suspended.
    /// - Return [`MaintainError::CheckoutFailed`] if a branch cannot be
    ///   checked out afterwards.
    pub fn resume(&mut self, decision: Decision) -> Result<Progress> {
        let in_flight = self.in_flight.take().ok_or(MaintainError::NothingToResume)?;
        let command = in_flight.checkpoint.operation.command();

        match decision {
            Decision::Continue => {
                if self.vcs.call(&[command, "--continue"]).is_none() {
                    let checkpoint = in_flight.checkpoint.clone();
                    self.in_flight = Some(in_flight);
                    return Ok(Progress::NeedsDecision(checkpoint));
                }
                self.guard(|this| this.finish(&in_flight.checkpoint.branch, in_flight.staging, true))?;
            }
            Decision::Abort => {
                if self.vcs.call(&[command, "--abort"]).is_none() {
                    warn!("cannot abort {command} of {}", in_flight.checkpoint.branch);
                }
                self.guard(|this| this.finish(&in_flight.checkpoint.branch, in_flight.staging, false))?;
            }
        }

        self.run()
    }

    /// End session, checking out the branch it was opened on.
    ///
    /// # Errors
    ///
    /// - Return [`MaintainError::CheckoutFailed`] if the original branch
    ///   cannot be checked out.
    pub fn close(mut self) -> Result<Report> {
        self.closed = true;
        if let Some(in_flight) = &self.in_flight {
            warn!("leaving repository as is: {}", in_flight.checkpoint);
        } else {
            let restore = self.restore.clone();
            self.checkout(&restore)?;
        }

        Ok(std::mem::take(&mut self.report))
    }

    fn start(&mut self, tasks: Vec<Task>) -> Result<Progress> {
        if let Some(in_flight) = &self.in_flight {
            return Err(MaintainError::DecisionPending(in_flight.checkpoint.clone()));
        }

        self.queue.extend(tasks);
        self.run()
    }

    fn run(&mut self) -> Result<Progress> {
        while let Some(task) = self.queue.pop_front() {
            debug!("run {task:?}");
            if let Some(checkpoint) = self.guard(|this| this.step(task))? {
                info!("after resolving {} conflicts manually, continue or abort", checkpoint.operation);
                return Ok(Progress::NeedsDecision(checkpoint));
            }
        }

        Ok(Progress::Done)
    }

    /// Drop remaining work if `action` fails.
    fn guard<T>(&mut self, action: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = action(self);
        if result.is_err() {
            self.queue.clear();
        }
        result
    }

    fn step(&mut self, task: Task) -> Result<Option<Checkpoint>> {
        match task {
            Task::Fetch => {
                if self.vcs.call(&["fetch", "--all", "--prune"]).is_none() {
                    warn!("fetch failed, continuing with what is known locally");
                }
            }
            Task::Update { branch } => self.update(&branch)?,
            Task::RebaseSeries { base, patch } => {
                let candidates = match patch {
                    Some(patch) => vec![format!("{}/{base}-{patch}", self.remote)],
                    None => self.patch_branches(&base),
                };
                self.push_front(
                    candidates
                        .into_iter()
                        .map(|branch| Task::Rebase { base: base.clone(), branch }),
                );
            }
            Task::Rebase { base, branch } => return self.rebase(&base, &branch),
            Task::BackportSeries { from, to, name } => {
                let candidates = self
                    .patch_branches(&from)
                    .into_iter()
                    .filter(|branch| name.as_deref().is_none_or(|name| branch.ends_with(name)))
                    .collect::<Vec<_>>();
                self.push_front(candidates.into_iter().map(|branch| Task::Backport {
                    from: from.clone(),
                    to: to.clone(),
                    branch,
                }));
            }
            Task::Backport { from, to, branch } => return self.backport(&from, &to, &branch),
            Task::BackportCommit {
                commit,
                target,
                name,
            } => return self.backport_commit(&commit, &target, &name),
            Task::CompileStart { base } => {
                info!("prepare synthetic branch of {base}");
                let staging = format!("compiled/{base}");
                self.checkout_new(&staging, &format!("{}/{base}", self.remote))?;
                let mut tasks = self
                    .patch_branches(&base)
                    .into_iter()
                    .map(|branch| Task::CompileMerge { branch })
                    .collect::<Vec<_>>();
                tasks.push(Task::CompileFinish { base });
                self.push_front(tasks);
            }
            Task::CompileMerge { branch } => {
                info!("merge {branch}");
                if self.vcs.call(&["merge", "--no-ff", &branch]).is_none() {
                    return Ok(Some(self.suspend(Operation::Merge, branch, None)));
                }
            }
            Task::CompileFinish { base } => {
                let name = format!("compiled/{base}");
                let staging = Staging {
                    push: self.push_args(&["-f"], &name),
                    remote_name: format!("{}/{name}", self.remote),
                    name,
                    back_to: base,
                };
                self.finish(&staging.remote_name.clone(), Some(staging), true)?;
            }
        }

        Ok(None)
    }

    fn update(&mut self, branch: &str) -> Result<()> {
        info!("update base branch {branch}");
        self.checkout(branch)?;
        if self.vcs.call(&["merge", "--ff-only"]).is_none() {
            warn!("cannot fast-forward {branch}");
            self.report.failed.push(branch.to_string());
            return Ok(());
        }

        let remote = self.remote.clone();
        if self.vcs.call(&["push", &remote, branch]).is_none() {
            warn!("cannot push {branch} to {remote}");
            self.report.failed.push(branch.to_string());
        } else {
            self.report.pushed.push(format!("{remote}/{branch}"));
        }

        Ok(())
    }

    fn rebase(&mut self, base: &str, branch: &str) -> Result<Option<Checkpoint>> {
        let Some(name) = staging_name(&self.remote, branch).map(ToString::to_string) else {
            warn!("{branch} is not a branch of {}", self.remote);
            return Ok(None);
        };

        info!("rebase {branch}");
        self.checkout_new(&name, branch)?;
        let staging = Staging {
            push: self.push_args(&["-f"], &name),
            remote_name: branch.to_string(),
            name: name.clone(),
            back_to: base.to_string(),
        };

        if self.vcs.call(&["rebase", base, &name]).is_none() {
            return Ok(Some(self.suspend(Operation::Rebase, branch.to_string(), Some(staging))));
        }

        self.finish(branch, Some(staging), true)?;
        Ok(None)
    }

    fn backport(&mut self, from: &str, to: &str, branch: &str) -> Result<Option<Checkpoint>> {
        info!("backport {branch} to {to}");
        let upstream = format!("{}/{from}", self.remote);
        let Some(cherry) = self.vcs.call(&["cherry", &upstream, branch]) else {
            warn!("cannot compare {branch} with {upstream}");
            self.report.failed.push(branch.to_string());
            return Ok(None);
        };

        let commits = cherry
            .lines()
            .filter_map(|line| line.trim().strip_prefix("+ "))
            .map(|commit| commit.trim().to_string())
            .collect::<Vec<_>>();

        let target = backport_name(&self.remote, branch, from, to, BackportTag::Branch);
        self.pick(&target, &format!("{}/{to}", self.remote), to, commits)
    }

    fn backport_commit(&mut self, commit: &str, target: &str, name: &str) -> Result<Option<Checkpoint>> {
        let candidate = format!("{}/-{name}", self.remote);
        let backport = backport_name(&self.remote, &candidate, "", target, BackportTag::Commit);
        info!("backport {commit} as {backport}");
        self.pick(&backport, target, target, vec![commit.to_string()])
    }

    /// Cherry-pick `commits` onto a staging copy of `start` for `backport`.
    fn pick(
        &mut self,
        backport: &str,
        start: &str,
        back_to: &str,
        commits: Vec<String>,
    ) -> Result<Option<Checkpoint>> {
        let Some(name) = staging_name(&self.remote, backport).map(ToString::to_string) else {
            warn!("{backport} is not a branch of {}", self.remote);
            return Ok(None);
        };

        self.checkout_new(&name, start)?;
        let staging = Staging {
            push: self.push_args(&["-f", "-u"], &name),
            remote_name: backport.to_string(),
            name,
            back_to: back_to.to_string(),
        };

        // INVARIANT: Nothing to pick still pushes the unchanged branch.
        if !commits.is_empty() {
            let mut args = vec!["cherry-pick"];
            args.extend(commits.iter().map(String::as_str));
            if self.vcs.call(&args).is_none() {
                return Ok(Some(self.suspend(
                    Operation::CherryPick,
                    backport.to_string(),
                    Some(staging),
                )));
            }
        }

        self.finish(backport, Some(staging), true)?;
        Ok(None)
    }

    /// Push on success, then leave and delete the staging branch.
    fn finish(&mut self, branch: &str, staging: Option<Staging>, succeeded: bool) -> Result<()> {
        if !succeeded {
            info!("gave up on {branch}");
            self.report.aborted.push(branch.to_string());
        }

        let Some(staging) = staging else {
            return Ok(());
        };

        if succeeded {
            info!("push {}", staging.remote_name);
            let args = staging.push.iter().map(String::as_str).collect::<Vec<_>>();
            if self.vcs.call(&args).is_some() {
                self.report.pushed.push(staging.remote_name.clone());
            } else {
                warn!("cannot push {}", staging.remote_name);
                self.report.failed.push(staging.remote_name.clone());
            }
        }

        self.checkout(&staging.back_to)?;
        if self.vcs.call(&["branch", "-D", &staging.name]).is_none() {
            warn!("cannot delete staging branch {}", staging.name);
        }

        Ok(())
    }

    fn suspend(&mut self, operation: Operation, branch: String, staging: Option<Staging>) -> Checkpoint {
        let checkpoint = Checkpoint { operation, branch };
        self.in_flight = Some(InFlight {
            checkpoint: checkpoint.clone(),
            staging,
        });
        checkpoint
    }

    fn push_front(&mut self, tasks: impl IntoIterator<Item = Task>) {
        let tasks = tasks.into_iter().collect::<Vec<_>>();
        for task in tasks.into_iter().rev() {
            self.queue.push_front(task);
        }
    }

    fn push_args(&self, flags: &[&str], name: &str) -> Vec<String> {
        let mut args = vec!["push".to_string()];
        args.extend(flags.iter().map(ToString::to_string));
        args.push(self.remote.clone());
        args.push(name.to_string());
        args
    }

    /// Patch branches of `base` on the remote, in listing order.
    fn patch_branches(&self, base: &str) -> Vec<String> {
        let prefix = format!("{}/{base}-", self.remote);
        self.remote_branches()
            .into_iter()
            .filter(|branch| branch.starts_with(&prefix))
            .collect()
    }

    fn remote_branches(&self) -> Vec<String> {
        let prefix = format!("{}/", self.remote);
        self.vcs
            .call(&["branch", "-r"])
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|branch| branch.starts_with(&prefix) && !branch.contains("->"))
            .map(ToString::to_string)
            .collect()
    }

    fn checkout(&mut self, branch: &str) -> Result<()> {
        self.vcs
            .call(&["checkout", branch])
            .ok_or_else(|| MaintainError::CheckoutFailed(branch.to_string()))?;
        self.current = branch.to_string();
        Ok(())
    }

    fn checkout_new(&mut self, name: &str, start: &str) -> Result<()> {
        self.vcs
            .call(&["checkout", "-b", name, start])
            .ok_or_else(|| MaintainError::CheckoutFailed(start.to_string()))?;
        self.current = name.to_string();
        Ok(())
    }
}

impl<V> Drop for Maintainer<V>
where
    V: Vcs,
{
    fn drop(&mut self) {
        if self.closed || self.in_flight.is_some() || self.current == self.restore {
            return;
        }

        if self.vcs.call(&["checkout", &self.restore]).is_none() {
            warn!("cannot check out {} again", self.restore);
        }
    }
}

/// Branch maintenance error types.
#[derive(Debug, thiserror::Error)]
pub enum MaintainError {
    /// Checkout failed, so nothing else is safe to do.
    #[error("checkout of {0:?} failed, aborting for safety")]
    CheckoutFailed(String),

    /// Session cannot remember where it started.
    #[error("cannot determine current branch")]
    NoCurrentBranch,

    /// Resume was requested without a conflict.
    #[error("no conflict is waiting for a decision")]
    NothingToResume,

    /// New work was requested while suspended.
    #[error("{0}, decide on it first")]
    DecisionPending(Checkpoint),
}

/// Friendly result alias :3
type Result<T, E = MaintainError> = std::result::Result<T, E>;
