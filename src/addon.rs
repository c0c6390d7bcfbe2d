// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Addon domain representation.
//!
//! An __addon__ is a directory holding an Odoo module: Python code, data
//! files, and a __manifest__ describing the module. The manifest lists the
//! modules it depends on, and whether it should be installed automatically
//! once all of its dependencies are present.
//!
//! # Namespaces
//!
//! A project is layered out of several repositories. The project repository
//! keeps its own modules in a primary source tree, and vendors framework and
//! third-party repositories as submodules. The directory that directly holds
//! an addon directory is that addon's __namespace__, e.g., the `sale` addon at
//! `vendor/odoo/cc/addons/sale` lives in namespace `vendor/odoo/cc/addons`.
//!
//! Namespaces are the unit of sparse checkout whitelisting. Each namespace
//! can have its own whitelist file, restricting which of its addons are
//! materialized on disk.
//!
//! # See Also
//!
//! 1. [`manifest`]
//! 2. [`discover`]

pub mod discover;
pub mod manifest;

use crate::addon::manifest::Manifest;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Prefix of whitelist file names next to their namespace directory.
pub const WHITELIST_PREFIX: &str = ".sparse-";

/// A discovered addon.
#[derive(Debug, Clone, PartialEq)]
pub struct Addon {
    /// Unique module name, i.e., name of addon directory.
    pub name: String,

    /// Parsed manifest of the addon.
    pub manifest: Manifest,

    /// Repository subtree owning the addon.
    pub namespace: Namespace,
}

impl Addon {
    /// Construct new addon.
    pub fn new(name: impl Into<String>, manifest: Manifest, namespace: Namespace) -> Self {
        Self {
            name: name.into(),
            manifest,
            namespace,
        }
    }
}

/// Directory holding addon directories, relative to the project root.
#[derive(Default, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(PathBuf);

impl Namespace {
    /// Construct new namespace.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat namespace as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Check if namespace lies at or below `prefix`.
    ///
    /// Compares whole path components, so `vendor/odoo` contains
    /// `vendor/odoo/cc/addons` but not `vendor/odoo-extra/addons`.
    pub fn is_within(&self, prefix: impl AsRef<Path>) -> bool {
        let prefix = prefix.as_ref();
        !prefix.as_os_str().is_empty() && self.0.starts_with(prefix)
    }

    /// Whitelist file of namespace relative to the project root.
    ///
    /// Namespace `a/b/ns` persists to `a/b/.sparse-ns`. Returns `None` for
    /// a namespace without a final component, which cannot be restricted.
    pub fn whitelist_file(&self) -> Option<PathBuf> {
        let name = self.0.file_name()?;
        let parent = self.0.parent().unwrap_or_else(|| Path::new(""));
        Some(parent.join(format!("{WHITELIST_PREFIX}{}", name.to_string_lossy())))
    }

    /// Recover namespace from a whitelist file path.
    ///
    /// Inverse of [`Namespace::whitelist_file`]. Returns `None` if file name
    /// does not carry the whitelist prefix.
    pub fn from_whitelist_file(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_name()?.to_str()?.strip_prefix(WHITELIST_PREFIX)?;
        if name.is_empty() {
            return None;
        }
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        Some(Self(parent.join(name)))
    }
}

impl Display for Namespace {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}
