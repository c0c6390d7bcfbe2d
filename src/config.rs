// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional `.odooup.toml` project settings file.
//! Every setting has a default, so a project without the file behaves like
//! a project with an empty one.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Name of project settings file at the top-level of a project.
pub const SETTINGS_FILE: &str = ".odooup.toml";

/// Project settings layout.
///
/// # General Layout
///
/// Settings are split into four sections: whitelisting rules, maintenance
/// repository defaults, project layout enforcement, and repository cache
/// location.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Namespace rules for module whitelisting.
    pub whitelist: WhitelistSettings,

    /// Defaults for branch maintenance commands.
    pub repo: RepoSettings,

    /// Project directory convention.
    pub layout: LayoutSettings,

    /// Bare repository cache.
    pub cache: CacheSettings,
}

impl Settings {
    /// Load settings of project at `root`.
    ///
    /// Falls back to default settings if the settings file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let path = root.as_ref().join(SETTINGS_FILE);
        if !path.is_file() {
            // INVARIANT: Defaults go through the same expansion as file data.
            return "".parse();
        }

        read_to_string(&path)
            .map_err(|source| ConfigError::Read {
                source: source.into(),
                path,
            })?
            .parse()
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path setting that may
        // point outside of the project.
        settings.layout.base_dir = expand(&settings.layout.base_dir)?;
        if let Some(dir) = settings.cache.dir.as_ref() {
            settings.cache.dir = Some(expand(dir)?);
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Whitelisting rules.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WhitelistSettings {
    /// Namespace of project's own modules. Never restricted.
    pub primary_namespace: PathBuf,

    /// Namespace prefix of framework modules, skipped with `--skip-native`.
    pub native_namespace: PathBuf,

    /// Path fragments whose manifests are ignored during discovery.
    pub skip_paths: Vec<String>,

    /// Ignore file whose generated section mirrors the whitelists.
    pub dockerignore: PathBuf,
}

impl Default for WhitelistSettings {
    fn default() -> Self {
        Self {
            primary_namespace: PathBuf::from("src"),
            native_namespace: PathBuf::from("vendor/odoo"),
            skip_paths: vec!["point_of_sale/tools".into()],
            dockerignore: PathBuf::from(".dockerignore"),
        }
    }
}

/// Defaults for branch maintenance.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RepoSettings {
    /// Git directory of repository carrying patch branches.
    pub git_dir: PathBuf,

    /// Remote that hosts patch branches.
    pub remote: String,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            git_dir: PathBuf::from("vendor/odoo/cc/.git"),
            remote: "dev".into(),
        }
    }
}

/// Project directory convention.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Require projects to live at `<base_dir>/<org>/<project>`.
    pub enforce: bool,

    /// Base directory for projects.
    pub base_dir: PathBuf,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            enforce: true,
            base_dir: PathBuf::from("~/odoo"),
        }
    }
}

/// Bare repository cache.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache directory. Uses XDG cache directory when unset.
    pub dir: Option<PathBuf>,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings at {:?}", path.display())]
    Read {
        #[source]
        source: std::sync::Arc<std::io::Error>,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            [whitelist]
            primary_namespace = "src"
            native_namespace = "vendor/odoo"
            skip_paths = ["point_of_sale/tools", "tests/fixtures"]

            [repo]
            remote = "patches"

            [layout]
            base_dir = "$BLAH/odoo"

            [cache]
            dir = "$BLAH/.cache/odooup"
        "#
        .parse()?;

        let expect = Settings {
            whitelist: WhitelistSettings {
                skip_paths: vec!["point_of_sale/tools".into(), "tests/fixtures".into()],
                ..Default::default()
            },
            repo: RepoSettings {
                git_dir: PathBuf::from("vendor/odoo/cc/.git"),
                remote: "patches".into(),
            },
            layout: LayoutSettings {
                enforce: true,
                base_dir: PathBuf::from("/home/blah/odoo"),
            },
            cache: CacheSettings {
                dir: Some(PathBuf::from("/home/blah/.cache/odooup")),
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialized_settings_parse_back() -> anyhow::Result<()> {
        let mut settings = Settings::default();
        settings.layout.base_dir = PathBuf::from("/home/blah/odoo");
        settings.repo.remote = "patches".into();

        let result: Settings = settings.to_string().parse()?;
        assert_eq!(result, settings);

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn missing_settings_file_uses_defaults() -> anyhow::Result<()> {
        let result = Settings::load(std::env::current_dir()?)?;
        let mut expect = Settings::default();
        expect.layout.base_dir = PathBuf::from("/home/blah/odoo");
        assert_eq!(result, expect);

        Ok(())
    }
}
