// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Whitelist reconciliation.
//!
//! Turns a module request into whitelist entries. Whitelisting a module means
//! whitelisting everything it transitively depends on, grouped by namespace.
//! Requests are planned in full before anything is written, so an
//! inconsistent request never leaves half of its entries behind.
//!
//! # Auto-Install Promotion
//!
//! Odoo installs a module flagged `auto_install` as soon as all of its direct
//! dependencies are installed. Such a module must be present on disk once its
//! dependencies are whitelisted, or the database will reference a module
//! that sparse checkout removed. [`Reconciler::reconcile_auto_install`]
//! promotes these modules until nothing changes anymore.
//!
//! Promotion only extends whitelists that already exist. A namespace without
//! a whitelist is not restricted at all, so all of its modules count as
//! present, and creating a whitelist for it would remove the rest.

use crate::{
    addon::Namespace,
    config::WhitelistSettings,
    graph::ModuleGraph,
    whitelist::sparse::{RuleEdit, SparseError, WhitelistFile},
};

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Entries to add to whitelists for one requested module.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Requested module.
    pub module: String,

    /// Modules to whitelist per namespace.
    pub include: BTreeMap<Namespace, BTreeSet<String>>,
}

/// Reconcile whitelists of a project against its module graph.
#[derive(Debug)]
pub struct Reconciler<'a> {
    root: &'a Path,
    graph: &'a ModuleGraph,
    settings: &'a WhitelistSettings,
}

impl<'a> Reconciler<'a> {
    /// Construct new reconciler for project at `root`.
    pub fn new(root: &'a Path, graph: &'a ModuleGraph, settings: &'a WhitelistSettings) -> Self {
        Self {
            root,
            graph,
            settings,
        }
    }

    /// Plan whitelist entries for a module and its transitive dependencies.
    ///
    /// Modules of the primary namespace are never planned, since they are
    /// always fully present. With `skip_native`, dependencies from the native
    /// namespace are left out too.
    ///
    /// # Errors
    ///
    /// - Return [`WhitelistError::UnknownModule`] if `module` is not in the
    ///   graph.
    /// - Return [`WhitelistError::MissingModuleButReferenced`] if `module` is
    ///   only known as someone's dependency.
    /// - Return [`WhitelistError::NativeModuleSkipped`] if `module` is native
    ///   while native modules are skipped.
    /// - Return [`WhitelistError::MissingDependencies`] listing every
    ///   transitive dependency that was never discovered.
    pub fn plan(&self, module: &str, skip_native: bool) -> Result<Plan> {
        let node = self
            .graph
            .get(module)
            .ok_or_else(|| WhitelistError::UnknownModule(module.to_string()))?;
        let addon = node
            .addon
            .as_ref()
            .ok_or_else(|| WhitelistError::MissingModuleButReferenced(module.to_string()))?;

        if skip_native && self.is_native(&addon.namespace) {
            return Err(WhitelistError::NativeModuleSkipped(module.to_string()));
        }

        let mut plan = Plan {
            module: module.to_string(),
            ..Default::default()
        };
        if !self.is_primary(&addon.namespace) {
            plan.include
                .entry(addon.namespace.clone())
                .or_default()
                .insert(module.to_string());
        }

        let mut missing = Vec::new();
        for dependency in self.graph.ancestors_of(module) {
            let Some(addon) = dependency.addon.as_ref() else {
                error!("missing dependency {:?} of {module:?}", dependency.name);
                missing.push(dependency.name.clone());
                continue;
            };

            let skipped = skip_native && self.is_native(&addon.namespace);
            if skipped || self.is_primary(&addon.namespace) {
                continue;
            }

            plan.include
                .entry(addon.namespace.clone())
                .or_default()
                .insert(addon.name.clone());
        }

        if !missing.is_empty() {
            missing.sort();
            return Err(WhitelistError::MissingDependencies(missing));
        }

        Ok(plan)
    }

    /// Plan every module of the primary namespace.
    ///
    /// Missing dependencies of all modules are reported together.
    ///
    /// # Errors
    ///
    /// - Return [`WhitelistError::MissingDependencies`] listing missing
    ///   dependencies across all planned modules.
    /// - Return any other error of [`Reconciler::plan`] as is.
    pub fn plan_primary(&self, skip_native: bool) -> Result<Vec<Plan>> {
        let modules = self
            .graph
            .addons()
            .filter(|addon| self.is_primary(&addon.namespace))
            .map(|addon| addon.name.clone())
            .collect::<Vec<_>>();

        let mut plans = Vec::new();
        let mut missing = BTreeSet::new();
        for module in modules {
            match self.plan(&module, skip_native) {
                Ok(plan) => plans.push(plan),
                Err(WhitelistError::MissingDependencies(names)) => missing.extend(names),
                Err(error) => return Err(error),
            }
        }

        if !missing.is_empty() {
            return Err(WhitelistError::MissingDependencies(
                missing.into_iter().collect(),
            ));
        }

        Ok(plans)
    }

    /// Merge planned entries into whitelists, creating missing ones.
    ///
    /// Returns whitelist files that changed.
    ///
    /// # Errors
    ///
    /// - Return [`WhitelistError::Sparse`] if a whitelist cannot be read or
    ///   written.
    pub fn apply(&self, plans: &[Plan]) -> Result<Vec<PathBuf>> {
        let mut merged: BTreeMap<&Namespace, BTreeSet<&str>> = BTreeMap::new();
        for plan in plans {
            for (namespace, modules) in &plan.include {
                merged
                    .entry(namespace)
                    .or_default()
                    .extend(modules.iter().map(String::as_str));
            }
        }

        let mut changed = Vec::new();
        for (namespace, modules) in merged {
            let Some(file) = self.whitelist_file(namespace) else {
                warn!("namespace {namespace:?} cannot be restricted");
                continue;
            };

            if file.edit(true, |rules| rules.insert_rules(modules.iter().copied()))? {
                info!("whitelisted {} module(s) in {namespace}", modules.len());
                changed.push(file.as_path().to_path_buf());
            }
        }

        Ok(changed)
    }

    /// Whitelist one module, or every module of the primary namespace.
    ///
    /// Nothing is written unless every requested module plans cleanly.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Reconciler::plan`], or
    ///   [`Reconciler::plan_primary`] when `module` is `None`.
    /// - Return [`WhitelistError::Sparse`] if a whitelist cannot be read or
    ///   written.
    #[instrument(skip(self), level = "debug")]
    pub fn whitelist(&self, module: Option<&str>, skip_native: bool) -> Result<Vec<PathBuf>> {
        let plans = match module {
            Some(module) => vec![self.plan(module, skip_native)?],
            None => self.plan_primary(skip_native)?,
        };

        self.apply(&plans)
    }

    /// Promote auto-install modules whose dependencies are all present.
    ///
    /// A module is present if it is listed in any whitelist, or if its own
    /// namespace has no whitelist. Promotion repeats until nothing changes,
    /// re-examining only dependents of newly promoted modules.
    ///
    /// Returns whitelist files that changed.
    ///
    /// # Errors
    ///
    /// - Return [`WhitelistError::Sparse`] if a whitelist cannot be read or
    ///   written.
    #[instrument(skip(self), level = "debug")]
    pub fn reconcile_auto_install(&self) -> Result<Vec<PathBuf>> {
        let mut whitelists: HashMap<Namespace, Option<RuleEdit>> = HashMap::new();
        let mut present: HashSet<String> = HashSet::new();
        for addon in self.graph.addons() {
            if !whitelists.contains_key(&addon.namespace) {
                let rules = match self.whitelist_file(&addon.namespace) {
                    Some(file) => file.rules()?,
                    None => None,
                };
                if let Some(rules) = rules.as_ref() {
                    present.extend(rules.iter().map(ToString::to_string));
                }
                whitelists.insert(addon.namespace.clone(), rules);
            }

            if whitelists.get(&addon.namespace).is_some_and(Option::is_none) {
                present.insert(addon.name.clone());
            }
        }

        let mut queue = self
            .graph
            .addons()
            .filter(|addon| addon.manifest.auto_install)
            .map(|addon| addon.name.clone())
            .collect::<VecDeque<_>>();
        let mut promoted: BTreeMap<Namespace, BTreeSet<String>> = BTreeMap::new();

        while let Some(module) = queue.pop_front() {
            if present.contains(&module) {
                continue;
            }

            let Some(addon) = self.graph.get(&module).and_then(|node| node.addon.as_ref()) else {
                continue;
            };
            if !addon.manifest.depends.iter().all(|dep| present.contains(dep)) {
                continue;
            }

            // INVARIANT: Only extend existing whitelists.
            let Some(Some(rules)) = whitelists.get_mut(&addon.namespace) else {
                continue;
            };

            debug!("promote auto-install module {module:?}");
            rules.insert_rule(module.clone());
            present.insert(module.clone());
            promoted
                .entry(addon.namespace.clone())
                .or_default()
                .insert(module.clone());

            queue.extend(
                self.graph
                    .successors_of(&module)
                    .into_iter()
                    .filter_map(|node| node.addon.as_ref())
                    .filter(|dependent| dependent.manifest.auto_install)
                    .map(|dependent| dependent.name.clone()),
            );
        }

        let mut changed = Vec::new();
        for (namespace, modules) in promoted {
            let Some(file) = self.whitelist_file(&namespace) else {
                continue;
            };

            if file.edit(false, |rules| rules.insert_rules(modules.iter().cloned()))? {
                let names = modules.iter().map(String::as_str).collect::<Vec<_>>();
                info!("auto-install {} in {namespace}", names.join(", "));
                changed.push(file.as_path().to_path_buf());
            }
        }

        Ok(changed)
    }

    /// Whitelist file of namespace, unless it can never be restricted.
    pub fn whitelist_file(&self, namespace: &Namespace) -> Option<WhitelistFile> {
        if self.is_primary(namespace) {
            return None;
        }

        namespace
            .whitelist_file()
            .map(|path| WhitelistFile::new(self.root.join(path)))
    }

    fn is_primary(&self, namespace: &Namespace) -> bool {
        namespace.is_within(&self.settings.primary_namespace)
    }

    fn is_native(&self, namespace: &Namespace) -> bool {
        namespace.is_within(&self.settings.native_namespace)
    }
}

/// Whitelisting error types.
#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    /// Requested module is not in the module graph.
    #[error("unknown module {0:?}, it is not in the module graph")]
    UnknownModule(String),

    /// Requested module is only referenced as a dependency.
    #[error("module {0:?} is listed as a dependency somewhere, but was found nowhere")]
    MissingModuleButReferenced(String),

    /// Requested module is native, but native modules are skipped.
    #[error("module {0:?} is native, but native modules are skipped from whitelisting")]
    NativeModuleSkipped(String),

    /// Transitive dependencies were never discovered.
    #[error("missing dependencies: {}", .0.join(", "))]
    MissingDependencies(Vec<String>),

    /// Whitelist cannot be accessed.
    #[error(transparent)]
    Sparse(#[from] SparseError),
}

/// Friendly result alias :3
type Result<T, E = WhitelistError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::{manifest::Manifest, Addon};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::{create_dir_all, read_to_string, write};

    const CC: &str = "vendor/odoo/cc/addons";
    const OCA: &str = "vendor/oca/sale";

    fn addon(name: &str, namespace: &str, depends: &[&str]) -> Addon {
        Addon::new(
            name,
            Manifest::with_depends(depends.iter().copied()),
            Namespace::new(namespace),
        )
    }

    fn graph() -> ModuleGraph {
        [
            addon("base", "vendor/odoo/cc/odoo/addons", &[]),
            addon("sale", CC, &["base"]),
            addon("crm", CC, &["base"]),
            Addon::new(
                "sale_extra",
                Manifest::with_depends(["sale"]).auto_install(true),
                Namespace::new(OCA),
            ),
            Addon::new(
                "sale_extra_crm",
                Manifest::with_depends(["sale_extra", "crm"]).auto_install(true),
                Namespace::new(OCA),
            ),
            addon("sale_report", OCA, &["sale"]),
            addon("my_sale", "src", &["sale_report"]),
            addon("broken", "src", &["ghost", "sale"]),
        ]
        .into_iter()
        .collect()
    }

    fn layout() -> anyhow::Result<PathBuf> {
        let root = std::env::current_dir()?;
        for dir in ["vendor/odoo/cc/odoo", "vendor/oca", "src"] {
            create_dir_all(root.join(dir))?;
        }
        Ok(root)
    }

    #[test]
    fn plan_groups_dependencies_by_namespace() -> anyhow::Result<()> {
        let graph = graph();
        let settings = WhitelistSettings::default();
        let reconciler = Reconciler::new(Path::new("/project"), &graph, &settings);

        let plan = reconciler.plan("my_sale", false)?;
        let expect = BTreeMap::from([
            (Namespace::new(OCA), BTreeSet::from(["sale_report".to_string()])),
            (Namespace::new(CC), BTreeSet::from(["sale".to_string()])),
            (
                Namespace::new("vendor/odoo/cc/odoo/addons"),
                BTreeSet::from(["base".to_string()]),
            ),
        ]);
        assert_eq!(plan.include, expect);

        let plan = reconciler.plan("my_sale", true)?;
        assert_eq!(
            plan.include,
            BTreeMap::from([(Namespace::new(OCA), BTreeSet::from(["sale_report".to_string()]))])
        );

        Ok(())
    }

    #[test]
    fn plan_rejects_inconsistent_requests() {
        let graph = graph();
        let settings = WhitelistSettings::default();
        let reconciler = Reconciler::new(Path::new("/project"), &graph, &settings);

        assert!(matches!(
            reconciler.plan("nope", false),
            Err(WhitelistError::UnknownModule(name)) if name == "nope"
        ));
        assert!(matches!(
            reconciler.plan("ghost", false),
            Err(WhitelistError::MissingModuleButReferenced(name)) if name == "ghost"
        ));
        assert!(matches!(
            reconciler.plan("sale", true),
            Err(WhitelistError::NativeModuleSkipped(name)) if name == "sale"
        ));
        assert!(matches!(
            reconciler.plan("broken", false),
            Err(WhitelistError::MissingDependencies(names)) if names == vec!["ghost".to_string()]
        ));
    }

    #[sealed_test]
    fn missing_dependency_writes_nothing() -> anyhow::Result<()> {
        let root = layout()?;
        let graph = graph();
        let settings = WhitelistSettings::default();
        let reconciler = Reconciler::new(&root, &graph, &settings);

        let result = reconciler.whitelist(None, false);
        assert!(matches!(result, Err(WhitelistError::MissingDependencies(_))));
        assert!(!root.join("vendor/odoo/cc/.sparse-addons").exists());
        assert!(!root.join("vendor/oca/.sparse-sale").exists());

        Ok(())
    }

    #[sealed_test]
    fn whitelist_then_promote_auto_install() -> anyhow::Result<()> {
        let root = layout()?;
        let graph = graph();
        let settings = WhitelistSettings::default();
        let reconciler = Reconciler::new(&root, &graph, &settings);

        let changed = reconciler.whitelist(Some("sale"), false)?;
        assert_eq!(changed.len(), 2);
        assert_eq!(
            read_to_string(root.join("vendor/odoo/cc/.sparse-addons"))?,
            "sale\n!setup/**\n"
        );
        assert_eq!(
            read_to_string(root.join("vendor/odoo/cc/odoo/.sparse-addons"))?,
            "base\n!setup/**\n"
        );

        // INVARIANT: Second run is a no-op.
        assert!(reconciler.whitelist(Some("sale"), false)?.is_empty());

        // INVARIANT: Namespace without whitelist is left unrestricted.
        assert!(reconciler.reconcile_auto_install()?.is_empty());
        assert!(!root.join("vendor/oca/.sparse-sale").exists());

        write(root.join("vendor/oca/.sparse-sale"), "sale_report\n!setup/**\n")?;
        let changed = reconciler.reconcile_auto_install()?;
        assert_eq!(changed, vec![root.join("vendor/oca/.sparse-sale")]);
        assert_eq!(
            read_to_string(root.join("vendor/oca/.sparse-sale"))?,
            "sale_extra\nsale_report\n!setup/**\n"
        );

        // INVARIANT: crm is not whitelisted, so sale_extra_crm stays out.
        assert!(reconciler.reconcile_auto_install()?.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn promotion_chains_through_dependents() -> anyhow::Result<()> {
        let root = layout()?;
        let graph = graph();
        let settings = WhitelistSettings::default();
        let reconciler = Reconciler::new(&root, &graph, &settings);

        write(root.join("vendor/odoo/cc/.sparse-addons"), "crm\nsale\n!setup/**\n")?;
        write(root.join("vendor/oca/.sparse-sale"), "!setup/**\n")?;

        reconciler.reconcile_auto_install()?;
        assert_eq!(
            read_to_string(root.join("vendor/oca/.sparse-sale"))?,
            "sale_extra\nsale_extra_crm\n!setup/**\n"
        );

        Ok(())
    }
}
