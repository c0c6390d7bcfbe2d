// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bootstrap and maintain multi-repository Odoo projects.
//!
//! An Odoo project is a Git repository whose own addons live in a primary
//! namespace, next to submodules that vendor the framework and third-party
//! addon collections. Most of what is vendored is never used, so every
//! vendored namespace is sparse checked out down to a whitelist of the
//! addons the project actually depends on.
//!
//! # Whitelisting
//!
//! Addons are discovered from committed trees ([`addon::discover`]), their
//! manifests read ([`addon::manifest`]), and their dependencies assembled
//! into a [`graph::ModuleGraph`]. [`whitelist`] turns the transitive closure
//! of a module into whitelist files, promotes auto-install modules whose
//! dependencies became present, and applies the result through sparse
//! checkout.
//!
//! # Branch Maintenance
//!
//! Patch branches are kept on top of their base branches by a resumable
//! state machine ([`maintain::Maintainer`]) that suspends on conflicts.
//!
//! # Cloning
//!
//! Projects are cloned through a cache of bare repositories ([`cache`]) so
//! the framework is only ever downloaded once ([`clone`]).

pub mod addon;
pub mod cache;
pub mod clone;
pub mod config;
pub mod graph;
pub mod maintain;
pub mod path;
pub mod project;
pub mod vcs;
pub mod whitelist;

pub use addon::{Addon, Namespace};
pub use config::Settings;
pub use graph::ModuleGraph;
pub use project::Project;
