// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod discover;
mod whitelist;

use crate::RepoFixture;

use anyhow::Result;
use std::path::Path;

/// Project with one primary addon, and two nested addon repositories.
///
/// `sale` exists in both nested repositories. `vendor/oca/web` sorts before
/// `vendor/odoo/cc`, so it is layered later and its copy wins.
pub(crate) fn shop_project(root: &Path) -> Result<RepoFixture> {
    let odoo = RepoFixture::new(root.join("vendor/odoo/cc"))?;
    odoo.stage_and_commit("base/__manifest__.py", "{'name': 'Base'}")?;
    odoo.stage_and_commit("web/__manifest__.py", "{'depends': ['base']}")?;
    odoo.stage_and_commit("sale/__manifest__.py", "{'depends': ['base']}")?;
    odoo.stage_and_commit("sale/tests/__init__.py", "")?;
    odoo.stage_and_commit("point_of_sale/tools/legacy/__openerp__.py", "{}")?;

    let web = RepoFixture::new(root.join("vendor/oca/web"))?;
    web.stage_and_commit("web_widget/__manifest__.py", "{'depends': ['web']}")?;
    web.stage_and_commit(
        "web_widget_auto/__manifest__.py",
        "{'depends': ['web_widget'], 'auto_install': True}",
    )?;
    web.stage_and_commit("sale/__openerp__.py", "{'depends': ['base', 'web']}")?;
    web.stage_and_commit("broken/__manifest__.py", "{'depends': [")?;

    let project = RepoFixture::new(root)?;
    project.stage_and_commit(
        "src/shop/__manifest__.py",
        "{\n    'name': 'Shop',\n    'depends': ['web_widget', 'sale'],\n}\n",
    )?;
    project.stage_gitlink("vendor/odoo/cc", &odoo)?;
    project.stage_gitlink("vendor/oca/web", &web)?;

    Ok(project)
}
