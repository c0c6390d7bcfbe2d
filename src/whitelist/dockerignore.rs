// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Generated ignore file section.
//!
//! Container builds copy the project directory, so modules that sparse
//! checkout keeps off disk should also be kept out of the build context. The
//! ignore file gets a generated section that mirrors every whitelist: the
//! whole namespace is ignored, then each whitelisted entry is re-included.

use crate::{
    addon::Namespace,
    whitelist::sparse::{SparseError, WhitelistFile},
};

use std::{
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Marker line after which file content is regenerated.
pub const PLACEHOLDER: &str = "# Autogenerated file content from here ... DO NOT MODIFY";

/// Render generated section for whitelist files relative to `root`.
///
/// # Errors
///
/// - Return [`SparseError::Read`] if a whitelist cannot be read.
pub fn render(root: &Path, whitelists: &[PathBuf]) -> Result<String, SparseError> {
    let mut snippet = String::new();
    for path in whitelists {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let Some(namespace) = Namespace::from_whitelist_file(relative) else {
            warn!("{} is not a whitelist file", path.display());
            continue;
        };
        let Some(rules) = WhitelistFile::new(path).rules()? else {
            continue;
        };

        snippet.push_str(&format!("{namespace}/**\n"));
        for rule in rules.iter().filter(|rule| !rule.starts_with("!setup")) {
            snippet.push_str(&format!("!{namespace}/{rule}\n"));
        }
    }

    Ok(snippet)
}

/// Regenerate section of ignore file at `path`.
///
/// Everything up to and including the [`PLACEHOLDER`] line is preserved.
/// A missing placeholder, or a missing file, gets the placeholder appended
/// first.
///
/// # Errors
///
/// - Return [`DockerignoreError::Sparse`] if a whitelist cannot be read.
/// - Return [`DockerignoreError::Read`] or [`DockerignoreError::Write`] if
///   ignore file cannot be accessed.
#[instrument(skip(root, whitelists), level = "debug")]
pub fn update(root: &Path, path: &Path, whitelists: &[PathBuf]) -> Result<bool> {
    let current = match read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(DockerignoreError::Read {
                source,
                path: path.to_path_buf(),
            })
        }
    };

    let mut content = String::new();
    let mut has_placeholder = false;
    for line in current.lines() {
        content.push_str(line);
        content.push('\n');
        if line.contains(PLACEHOLDER) {
            has_placeholder = true;
            break;
        }
    }
    if !has_placeholder {
        content.push_str(PLACEHOLDER);
        content.push('\n');
    }
    content.push_str(&render(root, whitelists)?);

    if content == current {
        debug!("{} is up to date", path.display());
        return Ok(false);
    }

    write(path, content.as_bytes()).map_err(|source| DockerignoreError::Write {
        source,
        path: path.to_path_buf(),
    })?;

    Ok(true)
}

/// Ignore file error types.
#[derive(Debug, thiserror::Error)]
pub enum DockerignoreError {
    /// Ignore file cannot be read.
    #[error("failed to read ignore file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Ignore file cannot be written.
    #[error("failed to write ignore file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Whitelist cannot be read.
    #[error(transparent)]
    Sparse(#[from] SparseError),
}

/// Friendly result alias :3
type Result<T, E = DockerignoreError> = std::result::Result<T, E>;
