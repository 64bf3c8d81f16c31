use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::matcher::TitleMatcher;
use crate::plan::{
    ATTR_COMPLEXITY, ATTR_DESCRIPTION, ATTR_MODES, ATTR_VALIDATION, DesiredPage, PageType,
};
use crate::store::{PageStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredChild {
    pub component_title: String,
    pub component_id: String,
    pub child_title: String,
    pub child_id: String,
    /// Leading whitespace-delimited token of the child title, e.g. `F.02.1`.
    pub child_code: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub components_found: usize,
    pub components_missing: Vec<String>,
    pub children: Vec<DiscoveredChild>,
    pub request_count: usize,
}

/// Resolve each component title and list its child pages. A component that
/// cannot be resolved is reported, not fatal; store errors are.
pub fn discover_children<S: PageStore>(
    store: &mut S,
    matcher: TitleMatcher,
    component_titles: &[String],
) -> Result<DiscoveryReport, StoreError> {
    let mut report = DiscoveryReport::default();
    for title in component_titles {
        let component = match matcher.resolve(store, title)? {
            Some(component) => component,
            None => {
                warn!(title = %title, "component not found");
                report.components_missing.push(title.clone());
                continue;
            }
        };
        report.components_found += 1;
        let children = store.list_children(&component.id)?;
        debug!(title = %component.title, count = children.len(), "listed children");
        for child in children {
            let child_title = child.title.trim().to_string();
            if child_title.is_empty() {
                continue;
            }
            report.children.push(DiscoveredChild {
                component_title: component.title.clone(),
                component_id: component.id.clone(),
                child_code: leading_token(&child_title),
                child_title,
                child_id: child.id,
            });
        }
    }
    report.children.sort_by(|a, b| {
        (a.component_title.as_str(), a.child_code.as_str())
            .cmp(&(b.component_title.as_str(), b.child_code.as_str()))
    });
    report.request_count = store.request_count();
    Ok(report)
}

pub fn write_inventory(path: &Path, children: &[DiscoveredChild]) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(children).context("failed to serialize inventory")?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_inventory(path: &Path) -> Result<Vec<DiscoveredChild>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    pub options_per_subcomponent: usize,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            options_per_subcomponent: 3,
        }
    }
}

// One Subcomponent row per child, lettered Option rows under it, one Tasks
// row per option. Output sorts parents ahead of their children.
pub fn seed_plan(children: &[DiscoveredChild], options: &SeedOptions) -> Vec<DesiredPage> {
    let mut pages = Vec::new();
    for child in children {
        pages.push(subcomponent_page(child));
        for index in 0..options.options_per_subcomponent.min(26) {
            let letter = char::from(b'A' + index as u8);
            let option = option_page(child, letter);
            let tasks = tasks_page(&option);
            pages.push(option);
            pages.push(tasks);
        }
    }
    pages.sort_by(|a, b| {
        (
            a.parent_title.as_str(),
            a.page_type.precedence(),
            a.title.as_str(),
        )
            .cmp(&(
                b.parent_title.as_str(),
                b.page_type.precedence(),
                b.title.as_str(),
            ))
    });
    pages
}

fn subcomponent_page(child: &DiscoveredChild) -> DesiredPage {
    let mut attributes = BTreeMap::new();
    attributes.insert(
        ATTR_DESCRIPTION.to_string(),
        format!("Implementation subcomponent for {}", child.component_title),
    );
    DesiredPage {
        title: child.child_title.clone(),
        parent_title: child.component_title.clone(),
        page_type: PageType::Subcomponent,
        code_ref: child.child_code.clone(),
        labels: labels(&["blueprint", "subcomponent", &component_token(child)]),
        attributes,
    }
}

fn option_page(child: &DiscoveredChild, letter: char) -> DesiredPage {
    let code = format!("{}.{letter}", child.child_code);
    let mut attributes = BTreeMap::new();
    attributes.insert(
        ATTR_DESCRIPTION.to_string(),
        format!("Implementation option for {}", child.child_title),
    );
    attributes.insert(ATTR_COMPLEXITY.to_string(), "Medium".to_string());
    attributes.insert(
        ATTR_MODES.to_string(),
        "MVP,Production,Enterprise".to_string(),
    );
    attributes.insert(ATTR_VALIDATION.to_string(), "Pending".to_string());
    DesiredPage {
        title: format!("{code} \u{2013} Option {letter} Implementation"),
        parent_title: child.child_title.clone(),
        page_type: PageType::Option,
        code_ref: code,
        labels: labels(&["blueprint", "option", &component_token(child)]),
        attributes,
    }
}

fn tasks_page(option: &DesiredPage) -> DesiredPage {
    let code = option.code_ref.clone();
    let family = code.split('.').next().unwrap_or("").to_string();
    let mut attributes = BTreeMap::new();
    attributes.insert(
        ATTR_DESCRIPTION.to_string(),
        format!("Task breakdown for {code}"),
    );
    DesiredPage {
        title: format!("Tasks \u{2013} {code}"),
        parent_title: option.title.clone(),
        page_type: PageType::Tasks,
        code_ref: code,
        labels: labels(&["blueprint", "tasks", &family]),
        attributes,
    }
}

fn component_token(child: &DiscoveredChild) -> String {
    leading_token(&child.component_title)
}

fn leading_token(value: &str) -> String {
    value.split_whitespace().next().unwrap_or("").to_string()
}

fn labels(values: &[&str]) -> BTreeSet<String> {
    values
        .iter()
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}
