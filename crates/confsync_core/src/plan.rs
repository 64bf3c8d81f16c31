use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ATTR_DESCRIPTION: &str = "description";
pub const ATTR_COMPLEXITY: &str = "complexity";
pub const ATTR_MODES: &str = "modes";
pub const ATTR_VALIDATION: &str = "validation";

/// Page kinds in processing order. Parents must be reconciled before the
/// pages that name them, so the precedence here is correctness, not taste.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PageType {
    Subcomponent,
    Option,
    Tasks,
}

impl PageType {
    pub fn precedence(self) -> u8 {
        match self {
            PageType::Subcomponent => 0,
            PageType::Option => 1,
            PageType::Tasks => 2,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Subcomponent" => Some(PageType::Subcomponent),
            "Option" => Some(PageType::Option),
            "Tasks" => Some(PageType::Tasks),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Subcomponent => "Subcomponent",
            PageType::Option => "Option",
            PageType::Tasks => "Tasks",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPage {
    pub title: String,
    pub parent_title: String,
    pub page_type: PageType,
    pub code_ref: String,
    pub labels: BTreeSet<String>,
    pub attributes: BTreeMap<String, String>,
}

impl DesiredPage {
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub pages: Vec<DesiredPage>,
    pub rows_without_title: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct PlanRow {
    #[serde(rename = "Page Title", default)]
    title: Option<String>,
    #[serde(rename = "Parent Page", default)]
    parent: Option<String>,
    #[serde(rename = "Page Type", default)]
    page_type: Option<String>,
    #[serde(rename = "Code / Ref", default)]
    code: Option<String>,
    #[serde(rename = "Description / Notes", default)]
    description: Option<String>,
    #[serde(rename = "Complexity", default)]
    complexity: Option<String>,
    #[serde(rename = "Mode Applicability", default)]
    modes: Option<String>,
    #[serde(rename = "Validation / Cleanup Flag", default)]
    validation: Option<String>,
    #[serde(rename = "Labels", default)]
    labels: Option<String>,
}

/// Load a plan file: a JSON array of row objects keyed by the spreadsheet
/// column names. Rows without a title are dropped (and counted); a row with
/// an unrecognized page type fails the load.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rows: Vec<PlanRow> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    plan_from_rows(rows)
}

pub fn write_plan(path: &Path, pages: &[DesiredPage]) -> Result<()> {
    let rows: Vec<PlanRow> = pages.iter().map(row_from_page).collect();
    let rendered = serde_json::to_string_pretty(&rows).context("failed to serialize plan")?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn plan_from_rows(rows: Vec<PlanRow>) -> Result<Plan> {
    let mut plan = Plan::default();
    for row in rows {
        let title = row.title.as_deref().unwrap_or("").trim().to_string();
        if title.is_empty() {
            plan.rows_without_title += 1;
            continue;
        }
        let type_field = row.page_type.as_deref().unwrap_or("").trim().to_string();
        let page_type = PageType::parse(&type_field).ok_or_else(|| {
            anyhow::anyhow!("row '{title}': unrecognized Page Type '{type_field}'")
        })?;

        let mut attributes = BTreeMap::new();
        for (key, value) in [
            (ATTR_DESCRIPTION, &row.description),
            (ATTR_COMPLEXITY, &row.complexity),
            (ATTR_MODES, &row.modes),
            (ATTR_VALIDATION, &row.validation),
        ] {
            let value = value.as_deref().unwrap_or("").trim();
            if !value.is_empty() {
                attributes.insert(key.to_string(), value.to_string());
            }
        }

        plan.pages.push(DesiredPage {
            title,
            parent_title: row.parent.as_deref().unwrap_or("").trim().to_string(),
            page_type,
            code_ref: row.code.as_deref().unwrap_or("").trim().to_string(),
            labels: split_labels(row.labels.as_deref().unwrap_or("")),
            attributes,
        });
    }
    Ok(plan)
}

fn row_from_page(page: &DesiredPage) -> PlanRow {
    PlanRow {
        title: Some(page.title.clone()),
        parent: Some(page.parent_title.clone()),
        page_type: Some(page.page_type.as_str().to_string()),
        code: Some(page.code_ref.clone()),
        description: Some(page.attribute(ATTR_DESCRIPTION).to_string()),
        complexity: Some(page.attribute(ATTR_COMPLEXITY).to_string()),
        modes: Some(page.attribute(ATTR_MODES).to_string()),
        validation: Some(page.attribute(ATTR_VALIDATION).to_string()),
        labels: Some(
            page.labels
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(";"),
        ),
    }
}

fn split_labels(raw: &str) -> BTreeSet<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRow {
    #[serde(rename = "OptionRef", default)]
    pub option_ref: String,
    #[serde(rename = "Task ID", default)]
    pub id: String,
    #[serde(rename = "Task Title", default)]
    pub title: String,
    #[serde(rename = "Task Description", default)]
    pub description: String,
    #[serde(rename = "Complexity", default)]
    pub complexity: String,
    #[serde(rename = "Primary Role", default)]
    pub role: String,
    #[serde(rename = "Notes", default)]
    pub notes: String,
    #[serde(rename = "Predecessors", default)]
    pub predecessors: String,
    #[serde(rename = "Client Dependencies", default)]
    pub client_dependencies: String,
    #[serde(rename = "Deliverables", default)]
    pub deliverables: String,
    #[serde(rename = "Acceptance Criteria", default)]
    pub acceptance: String,
    #[serde(rename = "MVP", default)]
    pub mvp: String,
    #[serde(rename = "Production", default)]
    pub production: String,
    #[serde(rename = "Enterprise", default)]
    pub enterprise: String,
}

/// Load task rows from CSV. Columns beyond the known set (the retired
/// orchestration/monitoring/schedule ones included) are ignored.
pub fn load_tasks(path: &Path) -> Result<Vec<TaskRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut rows = Vec::new();
    for (index, record) in reader.deserialize().enumerate() {
        let row: TaskRow = record
            .with_context(|| format!("failed to parse row {} of {}", index + 1, path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanCheckReport {
    pub total_pages: usize,
    pub rows_without_title: usize,
    pub duplicate_titles: Vec<(String, usize)>,
    pub parent_child_counts: Vec<(String, usize)>,
    pub parents_outside_plan: Vec<String>,
}

impl PlanCheckReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_titles.is_empty() && self.rows_without_title == 0
    }
}

/// Static plan checks: duplicate titles, dropped rows, and which parents the
/// plan names but never defines (those must already exist remotely).
pub fn validate_plan(plan: &Plan) -> PlanCheckReport {
    let mut title_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut parent_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for page in &plan.pages {
        *title_counts.entry(page.title.as_str()).or_default() += 1;
        if !page.parent_title.is_empty() {
            *parent_counts.entry(page.parent_title.as_str()).or_default() += 1;
        }
    }

    let duplicate_titles = title_counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(title, count)| ((*title).to_string(), *count))
        .collect();
    let parents_outside_plan = parent_counts
        .keys()
        .filter(|parent| !title_counts.contains_key(**parent))
        .map(|parent| (*parent).to_string())
        .collect();
    let parent_child_counts = parent_counts
        .iter()
        .map(|(parent, count)| ((*parent).to_string(), *count))
        .collect();

    PlanCheckReport {
        total_pages: plan.pages.len(),
        rows_without_title: plan.rows_without_title,
        duplicate_titles,
        parent_child_counts,
        parents_outside_plan,
    }
}
