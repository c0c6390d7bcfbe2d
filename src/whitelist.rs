// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sparse checkout whitelisting.
//!
//! Whitelisting keeps only the addons a project actually needs on disk. The
//! pipeline runs in four steps:
//!
//! 1. Plan and persist whitelist entries for the requested modules.
//! 2. Promote auto-install modules until nothing changes.
//! 3. Materialize every whitelist through sparse checkout.
//! 4. Mirror the whitelists into the generated ignore file section.
//!
//! # See Also
//!
//! 1. [`reconcile`]
//! 2. [`materialize`]
//! 3. [`sparse`]
//! 4. [`dockerignore`]

pub mod dockerignore;
pub mod materialize;
pub mod reconcile;
pub mod sparse;

use crate::{
    addon::Namespace,
    config::WhitelistSettings,
    graph::ModuleGraph,
    vcs::Vcs,
    whitelist::{
        dockerignore::DockerignoreError,
        materialize::{whitelist_files, MaterializeError, Materializer},
        reconcile::{Reconciler, WhitelistError},
    },
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// What a whitelist run changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Whitelists extended by the request itself.
    pub whitelisted: Vec<PathBuf>,

    /// Whitelists extended by auto-install promotion.
    pub promoted: Vec<PathBuf>,

    /// Namespaces materialized through sparse checkout.
    pub materialized: Vec<Namespace>,
}

/// Run whole whitelist pipeline for project at `root`.
///
/// Whitelists `module`, or every module of the primary namespace if `module`
/// is `None`.
///
/// # Errors
///
/// - Return [`RunError::Whitelist`] if the request is inconsistent with the
///   module graph. No file is touched in that case.
/// - Return [`RunError::Materialize`] or [`RunError::Dockerignore`] if the
///   result cannot be applied to disk.
#[instrument(skip(root, settings, graph, vcs), level = "debug")]
pub fn run<V>(
    root: &Path,
    settings: &WhitelistSettings,
    graph: &ModuleGraph,
    vcs: &V,
    module: Option<&str>,
    skip_native: bool,
) -> Result<Summary>
where
    V: Vcs,
{
    let reconciler = Reconciler::new(root, graph, settings);
    let whitelisted = reconciler.whitelist(module, skip_native)?;
    let promoted = reconciler.reconcile_auto_install()?;
    let materialized = Materializer::new(root, vcs).materialize()?;

    let files = whitelist_files(root)?;
    if dockerignore::update(root, &root.join(&settings.dockerignore), &files)? {
        info!("updated {}", settings.dockerignore.display());
    }

    warn_phantoms(graph, root);

    Ok(Summary {
        whitelisted,
        promoted,
        materialized,
    })
}

/// Warn about every dependency that was referenced but never found.
pub fn warn_phantoms(graph: &ModuleGraph, root: &Path) {
    for (name, dependents) in graph.phantoms() {
        warn!(
            "{name:?} used by {} was not found anywhere under {}",
            dependents.join(", "),
            root.display()
        );
    }
}

/// Whitelist pipeline error types.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Whitelist(#[from] WhitelistError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Dockerignore(#[from] DockerignoreError),
}

/// Friendly result alias :3
type Result<T, E = RunError> = std::result::Result<T, E>;
