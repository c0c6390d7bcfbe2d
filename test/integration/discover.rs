// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::integration::shop_project;

use odooup::{
    addon::{discover::Discoverer, Namespace},
    config::WhitelistSettings,
    graph::ModuleGraph,
    vcs::GitTree,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{collections::BTreeSet, env::current_dir};

fn build_graph() -> Result<ModuleGraph> {
    let root = current_dir()?;
    let source = GitTree::new(&root);
    let settings = WhitelistSettings::default();
    let discoverer = Discoverer::new(&source, settings.skip_paths);
    Ok(discoverer.discover()?.collect())
}

#[sealed_test]
fn discover_layers_nested_repositories() -> Result<()> {
    shop_project(&current_dir()?)?;
    let graph = build_graph()?;

    let namespace_of = |name: &str| {
        graph
            .get(name)
            .and_then(|node| node.addon.as_ref())
            .map(|addon| addon.namespace.clone())
    };
    assert_eq!(namespace_of("shop"), Some(Namespace::new("src")));
    assert_eq!(namespace_of("sale"), Some(Namespace::new("vendor/oca/web")));
    assert_eq!(namespace_of("base"), Some(Namespace::new("vendor/odoo/cc")));

    // INVARIANT: Overriding copy brings its own dependencies along.
    let sale_deps = graph
        .predecessors_of("sale")
        .into_iter()
        .map(|node| node.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(sale_deps, vec!["base", "web"]);

    assert!(!graph.contains("broken"));
    assert!(!graph.contains("legacy"));
    assert!(graph.phantoms().is_empty());

    Ok(())
}

#[sealed_test]
fn discover_full_dependency_closure() -> Result<()> {
    shop_project(&current_dir()?)?;
    let graph = build_graph()?;

    let ancestors = graph
        .ancestors_of("shop")
        .into_iter()
        .map(|node| node.name.clone())
        .collect::<BTreeSet<_>>();
    let expect = ["base", "sale", "web", "web_widget"]
        .into_iter()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>();
    assert_eq!(ancestors, expect);

    Ok(())
}

#[sealed_test]
fn discover_twice_yields_same_graph() -> Result<()> {
    shop_project(&current_dir()?)?;
    let first = build_graph()?;
    let second = build_graph()?;

    let snapshot = |graph: &ModuleGraph| {
        graph
            .addons()
            .map(|addon| (addon.name.clone(), addon.namespace.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(snapshot(&first), snapshot(&second));

    Ok(())
}
