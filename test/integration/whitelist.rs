// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::integration::shop_project;

use odooup::{
    addon::discover::Discoverer,
    config::WhitelistSettings,
    graph::ModuleGraph,
    vcs::{GitTree, SystemGit},
    whitelist::{self, dockerignore::PLACEHOLDER, reconcile::WhitelistError, RunError},
};

use anyhow::Result;
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    env::current_dir,
    fs::{read_to_string, write},
    path::Path,
};

fn build_graph(root: &Path, settings: &WhitelistSettings) -> Result<ModuleGraph> {
    let source = GitTree::new(root);
    let discoverer = Discoverer::new(&source, settings.skip_paths.iter().cloned());
    Ok(discoverer.discover()?.collect())
}

#[sealed_test]
fn whitelist_module_across_namespaces() -> Result<()> {
    let root = current_dir()?;
    shop_project(&root)?;
    write(root.join(".dockerignore"), "node_modules\n")?;
    let settings = WhitelistSettings::default();
    let graph = build_graph(&root, &settings)?;

    let summary = whitelist::run(&root, &settings, &graph, &SystemGit::new(), Some("shop"), false)?;
    assert_eq!(
        summary.whitelisted,
        vec![root.join("vendor/oca/.sparse-web"), root.join("vendor/odoo/.sparse-cc")]
    );
    assert_eq!(summary.promoted, vec![root.join("vendor/oca/.sparse-web")]);

    assert_eq!(
        read_to_string(root.join("vendor/oca/.sparse-web"))?,
        "sale\nweb_widget\nweb_widget_auto\n!setup/**\n"
    );
    assert_eq!(
        read_to_string(root.join("vendor/odoo/.sparse-cc"))?,
        "base\nweb\n!setup/**\n"
    );
    assert!(!root.join("src/.sparse-shop").exists());
    assert!(!root.join(".sparse-src").exists());

    let expect = formatdoc! {"
        node_modules
        {}
        vendor/oca/web/**
        !vendor/oca/web/sale
        !vendor/oca/web/web_widget
        !vendor/oca/web/web_widget_auto
        vendor/odoo/cc/**
        !vendor/odoo/cc/base
        !vendor/odoo/cc/web
    ", PLACEHOLDER};
    assert_eq!(read_to_string(root.join(".dockerignore"))?, expect);

    Ok(())
}

#[sealed_test]
fn whitelist_again_changes_nothing() -> Result<()> {
    let root = current_dir()?;
    shop_project(&root)?;
    let settings = WhitelistSettings::default();
    let graph = build_graph(&root, &settings)?;

    whitelist::run(&root, &settings, &graph, &SystemGit::new(), Some("shop"), false)?;
    let summary = whitelist::run(&root, &settings, &graph, &SystemGit::new(), Some("shop"), false)?;
    assert!(summary.whitelisted.is_empty());
    assert!(summary.promoted.is_empty());

    Ok(())
}

#[sealed_test]
fn whitelist_skipping_native_namespace() -> Result<()> {
    let root = current_dir()?;
    shop_project(&root)?;
    let settings = WhitelistSettings::default();
    let graph = build_graph(&root, &settings)?;

    let summary = whitelist::run(&root, &settings, &graph, &SystemGit::new(), None, true)?;
    assert_eq!(summary.whitelisted, vec![root.join("vendor/oca/.sparse-web")]);
    assert!(!root.join("vendor/odoo/.sparse-cc").exists());

    Ok(())
}

#[sealed_test]
fn whitelist_unknown_module_touches_nothing() -> Result<()> {
    let root = current_dir()?;
    shop_project(&root)?;
    let settings = WhitelistSettings::default();
    let graph = build_graph(&root, &settings)?;

    let result = whitelist::run(&root, &settings, &graph, &SystemGit::new(), Some("nope"), false);
    assert!(matches!(
        result,
        Err(RunError::Whitelist(WhitelistError::UnknownModule(_)))
    ));
    assert!(!root.join("vendor/oca/.sparse-web").exists());
    assert!(!root.join(".dockerignore").exists());

    Ok(())
}
