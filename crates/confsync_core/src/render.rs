use serde_json::{Value, json};

use crate::plan::{
    ATTR_COMPLEXITY, ATTR_DESCRIPTION, ATTR_MODES, ATTR_VALIDATION, DesiredPage, PageType, TaskRow,
};
use crate::store::{BodyFormat, ContentPayload};

const TH_STYLE: &str =
    "background-color: #f8f9fa; font-size: 10px; font-weight: bold; padding: 6px; border: 1px solid #ddd;";
const TD_STYLE: &str = "font-size: 10px; padding: 6px; border: 1px solid #ddd;";

const ADF_TASK_HEADERS: [&str; 9] = [
    "ID",
    "Title",
    "Desc",
    "CX",
    "Role",
    "Dep",
    "Client Deps",
    "Deliverables",
    "Acceptance",
];
const ADF_TASK_COLWIDTHS: [u32; 9] = [80, 170, 360, 40, 70, 110, 140, 140, 160];

pub struct ContentRenderer {
    format: BodyFormat,
    tasks: Option<Vec<TaskRow>>,
}

impl ContentRenderer {
    pub fn new(format: BodyFormat) -> Self {
        Self {
            format,
            tasks: None,
        }
    }

    pub fn with_tasks(format: BodyFormat, tasks: Vec<TaskRow>) -> Self {
        Self {
            format,
            tasks: Some(tasks),
        }
    }

    pub fn render(&self, page: &DesiredPage) -> ContentPayload {
        match self.format {
            BodyFormat::Storage => ContentPayload {
                format: BodyFormat::Storage,
                value: self.render_storage(page),
            },
            BodyFormat::AtlasDocFormat => ContentPayload {
                format: BodyFormat::AtlasDocFormat,
                value: self.render_adf(page).to_string(),
            },
        }
    }

    fn render_storage(&self, page: &DesiredPage) -> String {
        match page.page_type {
            PageType::Subcomponent => subcomponent_body(page),
            PageType::Option => option_body(page),
            PageType::Tasks => self.tasks_body(page),
        }
    }

    fn render_adf(&self, page: &DesiredPage) -> Value {
        match page.page_type {
            PageType::Subcomponent => subcomponent_doc(page),
            PageType::Option => option_doc(page),
            PageType::Tasks => self.tasks_doc(page),
        }
    }

    fn matching_tasks(&self, code: &str) -> Option<Vec<&TaskRow>> {
        self.tasks
            .as_ref()
            .map(|rows| rows.iter().filter(|row| row.option_ref == code).collect())
    }

    fn tasks_body(&self, page: &DesiredPage) -> String {
        let code = page.code_ref.as_str();
        let mut body = format!(
            "<h2>Tasks for {}</h2>\n<div style=\"margin-bottom: 15px;\">\n  <p style=\"font-size: 12px; line-height: 1.4; margin-bottom: 10px;\">{}</p>\n</div>\n",
            escape_html(code),
            escape_html(page.attribute(ATTR_DESCRIPTION)),
        );
        match self.matching_tasks(code) {
            Some(rows) if rows.is_empty() => {
                body.push_str(&format!(
                    "<p><em>No tasks found for OptionRef {}.</em></p>\n",
                    escape_html(code)
                ));
            }
            Some(rows) => body.push_str(&task_table_html(&rows)),
            None => body.push_str(&placeholder_table_html(code)),
        }
        body
    }

    fn tasks_doc(&self, page: &DesiredPage) -> Value {
        let code = page.code_ref.as_str();
        let rows = self.matching_tasks(code).unwrap_or_default();
        adf_doc(vec![
            adf_paragraph(&[&format!("Tasks filtered by OptionRef={code}.")]),
            adf_paragraph(&["Legend: CX=L/M/H; Role=DE/SDE/SDA/PDA; Dep=Task IDs"]),
            adf_tasks_table(&rows),
        ])
    }
}

fn subcomponent_body(page: &DesiredPage) -> String {
    format!(
        "<h2>Overview</h2>\n<p>{}</p>\n<h3>Options</h3>\n<p>Child pages list the implementation options for this subcomponent.</p>\n",
        escape_html(page.attribute(ATTR_DESCRIPTION)),
    )
}

fn option_body(page: &DesiredPage) -> String {
    let complexity = complexity_code(page.attribute(ATTR_COMPLEXITY));
    let mut body = String::new();
    body.push_str("<h2>Option Overview</h2>\n");
    body.push_str(&format!(
        "<div style=\"margin-bottom: 15px;\">\n  <p style=\"font-size: 12px; line-height: 1.4; margin-bottom: 10px;\">{}</p>\n</div>\n",
        escape_html(page.attribute(ATTR_DESCRIPTION)),
    ));
    body.push_str(
        "<table class=\"confluenceTable\" style=\"width: 100%; margin-bottom: 15px; font-size: 11px;\">\n",
    );
    body.push_str("  <colgroup>\n    <col style=\"width: 25%;\"/>\n    <col style=\"width: 75%;\"/>\n  </colgroup>\n  <tbody>\n");
    body.push_str(&detail_row(
        "Option Ref",
        &format!("<code>{}</code>", escape_html(&page.code_ref)),
    ));
    body.push_str(&detail_row(
        "Complexity",
        &format!("<code>{}</code>", escape_html(&complexity)),
    ));
    body.push_str(&detail_row(
        "Mode Applicability",
        &escape_html(page.attribute(ATTR_MODES)),
    ));
    body.push_str(&detail_row(
        "Validation / Cleanup",
        &escape_html(page.attribute(ATTR_VALIDATION)),
    ));
    body.push_str("  </tbody>\n</table>\n");
    body.push_str(&format!(
        "<div style=\"background-color: #e3f2fd; border-left: 4px solid #2196f3; padding: 8px; margin-top: 15px;\">\n  <p style=\"font-size: 11px; margin: 0; color: #1565c0;\">\n    <strong>Next Steps:</strong> See child page <strong>Tasks \u{2013} {}</strong> for detailed task breakdown and implementation guidance.\n  </p>\n</div>\n",
        escape_html(&page.code_ref),
    ));
    body
}

fn detail_row(label: &str, value_html: &str) -> String {
    format!(
        "    <tr>\n      <th style=\"{TH_STYLE}\">{label}</th>\n      <td style=\"{TD_STYLE}\">{value_html}</td>\n    </tr>\n"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskColumn {
    Id,
    Title,
    Description,
    Complexity,
    Role,
    Notes,
    Predecessors,
    ClientDependencies,
    Deliverables,
    Acceptance,
    Mvp,
    Production,
    Enterprise,
}

impl TaskColumn {
    const ALL: [TaskColumn; 13] = [
        TaskColumn::Id,
        TaskColumn::Title,
        TaskColumn::Description,
        TaskColumn::Complexity,
        TaskColumn::Role,
        TaskColumn::Notes,
        TaskColumn::Predecessors,
        TaskColumn::ClientDependencies,
        TaskColumn::Deliverables,
        TaskColumn::Acceptance,
        TaskColumn::Mvp,
        TaskColumn::Production,
        TaskColumn::Enterprise,
    ];

    fn header(self) -> &'static str {
        match self {
            TaskColumn::Id => "Task ID",
            TaskColumn::Title => "Task Title",
            TaskColumn::Description => "Task Description",
            TaskColumn::Complexity => "Complexity",
            TaskColumn::Role => "Primary Role",
            TaskColumn::Notes => "Notes",
            TaskColumn::Predecessors => "Predecessors",
            TaskColumn::ClientDependencies => "Client Dependencies",
            TaskColumn::Deliverables => "Deliverables",
            TaskColumn::Acceptance => "Acceptance Criteria",
            TaskColumn::Mvp => "MVP",
            TaskColumn::Production => "Production",
            TaskColumn::Enterprise => "Enterprise",
        }
    }

    fn value(self, row: &TaskRow) -> &str {
        match self {
            TaskColumn::Id => &row.id,
            TaskColumn::Title => &row.title,
            TaskColumn::Description => &row.description,
            TaskColumn::Complexity => &row.complexity,
            TaskColumn::Role => &row.role,
            TaskColumn::Notes => &row.notes,
            TaskColumn::Predecessors => &row.predecessors,
            TaskColumn::ClientDependencies => &row.client_dependencies,
            TaskColumn::Deliverables => &row.deliverables,
            TaskColumn::Acceptance => &row.acceptance,
            TaskColumn::Mvp => &row.mvp,
            TaskColumn::Production => &row.production,
            TaskColumn::Enterprise => &row.enterprise,
        }
    }
}

fn task_table_html(rows: &[&TaskRow]) -> String {
    // Columns with no data in any row are left out.
    let columns: Vec<TaskColumn> = TaskColumn::ALL
        .into_iter()
        .filter(|column| rows.iter().any(|row| !column.value(row).trim().is_empty()))
        .collect();

    let mut html = String::new();
    html.push_str(
        "<small><div class=\"plan-tasks\" style=\"font-size:12px; line-height:1.35;\">",
    );
    html.push_str(
        "<table style=\"border-collapse:collapse; table-layout:fixed; width:100%;\"><thead><tr>",
    );
    for column in &columns {
        html.push_str(&format!(
            "<th style=\"padding:4px 6px;\">{}</th>",
            escape_html(column.header())
        ));
    }
    html.push_str("</tr></thead><tbody>");
    for row in rows {
        html.push_str("<tr>");
        for column in &columns {
            let value = column.value(row);
            let cell = if *column == TaskColumn::Complexity {
                let code = complexity_code(value);
                format!(
                    "<abbr title=\"{}\">{}</abbr>",
                    escape_html(&complexity_long(&code, value)),
                    escape_html(&code),
                )
            } else {
                escape_html(value)
            };
            html.push_str(&format!(
                "<td style=\"padding:4px 6px; vertical-align:top; word-break:break-word; white-space:normal;\">{cell}</td>"
            ));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table></div></small>");
    html
}

fn placeholder_table_html(code: &str) -> String {
    let mut html = String::new();
    html.push_str("<table class=\"confluenceTable\" style=\"width: 100%; font-size: 11px;\">\n  <thead>\n    <tr>\n");
    for header in ["Task", "Role", "Complexity", "MVP", "Production", "Enterprise"] {
        html.push_str(&format!("      <th style=\"{TH_STYLE}\">{header}</th>\n"));
    }
    html.push_str("    </tr>\n  </thead>\n  <tbody>\n    <tr>\n");
    html.push_str(&format!(
        "      <td colspan=\"6\" style=\"font-size: 10px; padding: 8px; border: 1px solid #ddd; text-align: center; font-style: italic;\">\n        Populate from the mapped tasks CSV filtered by OptionRef = <code>{}</code>.\n      </td>\n",
        escape_html(code)
    ));
    html.push_str("    </tr>\n  </tbody>\n</table>\n");
    html
}

fn subcomponent_doc(page: &DesiredPage) -> Value {
    adf_doc(vec![
        adf_heading(2, "Overview"),
        adf_paragraph(&[page.attribute(ATTR_DESCRIPTION)]),
        adf_heading(3, "Options"),
        adf_paragraph(&["Child pages list the implementation options for this subcomponent."]),
    ])
}

fn option_doc(page: &DesiredPage) -> Value {
    let complexity = complexity_code(page.attribute(ATTR_COMPLEXITY));
    let details = [
        ("Option Ref", page.code_ref.as_str()),
        ("Complexity", complexity.as_str()),
        ("Mode Applicability", page.attribute(ATTR_MODES)),
        ("Validation / Cleanup", page.attribute(ATTR_VALIDATION)),
    ];
    let rows: Vec<Value> = details
        .iter()
        .map(|(label, value)| {
            json!({
                "type": "tableRow",
                "content": [adf_header_cell(label), adf_cell(value)],
            })
        })
        .collect();

    adf_doc(vec![
        adf_heading(2, "Option Overview"),
        adf_paragraph(&[page.attribute(ATTR_DESCRIPTION)]),
        json!({
            "type": "table",
            "attrs": {"isNumberColumnEnabled": false, "layout": "default"},
            "content": rows,
        }),
        adf_paragraph(&[&format!(
            "Next steps: see child page Tasks \u{2013} {} for the detailed task breakdown.",
            page.code_ref
        )]),
    ])
}

fn adf_tasks_table(rows: &[&TaskRow]) -> Value {
    let mut table_rows = vec![json!({
        "type": "tableRow",
        "content": ADF_TASK_HEADERS
            .iter()
            .map(|header| adf_header_cell(header))
            .collect::<Vec<_>>(),
    })];
    for row in rows {
        table_rows.push(json!({
            "type": "tableRow",
            "content": [
                adf_cell(&row.id),
                adf_cell(&trim_text(&row.title, 80)),
                adf_cell(&trim_text(&row.description, 150)),
                adf_cell(&complexity_code(&row.complexity)),
                adf_cell(&row.role),
                adf_cell(&row.predecessors),
                adf_cell(&trim_text(&row.client_dependencies, 80)),
                adf_cell(&trim_text(&row.deliverables, 100)),
                adf_cell(&trim_text(&row.acceptance, 100)),
            ],
        }));
    }
    json!({
        "type": "table",
        "attrs": {
            "isNumberColumnEnabled": false,
            "layout": "full-width",
            "colwidth": ADF_TASK_COLWIDTHS,
        },
        "content": table_rows,
    })
}

fn adf_doc(content: Vec<Value>) -> Value {
    json!({"version": 1, "type": "doc", "content": content})
}

fn adf_text(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

fn adf_paragraph(texts: &[&str]) -> Value {
    let content: Vec<Value> = texts
        .iter()
        .filter(|text| !text.is_empty())
        .map(|text| adf_text(text))
        .collect();
    json!({"type": "paragraph", "content": content})
}

fn adf_heading(level: u8, text: &str) -> Value {
    json!({"type": "heading", "attrs": {"level": level}, "content": [adf_text(text)]})
}

fn adf_cell(text: &str) -> Value {
    json!({
        "type": "tableCell",
        "attrs": {"colspan": 1, "rowspan": 1},
        "content": [adf_paragraph(&[text])],
    })
}

fn adf_header_cell(text: &str) -> Value {
    json!({
        "type": "tableHeader",
        "attrs": {"colspan": 1, "rowspan": 1},
        "content": [adf_paragraph(&[text])],
    })
}

fn trim_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn complexity_code(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "low" | "l" => "L".to_string(),
        "medium" | "m" => "M".to_string(),
        "high" | "h" => "H".to_string(),
        _ => value.trim().to_string(),
    }
}

fn complexity_long(code: &str, original: &str) -> String {
    match code {
        "L" => "Low".to_string(),
        "M" => "Medium".to_string(),
        "H" => "High".to_string(),
        _ => original.trim().to_string(),
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use super::{
        ContentRenderer, complexity_code, escape_html, trim_text,
    };
    use crate::plan::{
        ATTR_COMPLEXITY, ATTR_DESCRIPTION, ATTR_MODES, ATTR_VALIDATION, DesiredPage, PageType,
        TaskRow,
    };
    use crate::store::BodyFormat;

    fn page(page_type: PageType, code: &str, description: &str) -> DesiredPage {
        let mut attributes = BTreeMap::new();
        if !description.is_empty() {
            attributes.insert(ATTR_DESCRIPTION.to_string(), description.to_string());
        }
        DesiredPage {
            title: format!("{code} \u{2013} Example"),
            parent_title: String::new(),
            page_type,
            code_ref: code.to_string(),
            labels: Default::default(),
            attributes,
        }
    }

    fn task(option_ref: &str, id: &str, title: &str, complexity: &str) -> TaskRow {
        TaskRow {
            option_ref: option_ref.to_string(),
            id: id.to_string(),
            title: title.to_string(),
            complexity: complexity.to_string(),
            role: "DE".to_string(),
            ..TaskRow::default()
        }
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html("<b>\"A & B's\"</b>"),
            "&lt;b&gt;&quot;A &amp; B&#x27;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn complexity_codes_normalize_case_and_words() {
        assert_eq!(complexity_code("Low"), "L");
        assert_eq!(complexity_code(" m "), "M");
        assert_eq!(complexity_code("HIGH"), "H");
        assert_eq!(complexity_code("Unknown"), "Unknown");
        assert_eq!(complexity_code(""), "");
    }

    #[test]
    fn trim_text_is_char_aware() {
        assert_eq!(trim_text("short", 10), "short");
        assert_eq!(trim_text("exactly-10", 10), "exactly-10");
        let trimmed = trim_text("\u{2013}\u{2013}\u{2013}\u{2013}\u{2013}\u{2013}", 5);
        assert_eq!(trimmed, "\u{2013}\u{2013}...");
    }

    #[test]
    fn subcomponent_storage_body_escapes_description() {
        let renderer = ContentRenderer::new(BodyFormat::Storage);
        let payload = renderer.render(&page(
            PageType::Subcomponent,
            "F.01",
            "Loads & transforms data",
        ));
        assert_eq!(payload.format, BodyFormat::Storage);
        assert!(payload.value.contains("<h2>Overview</h2>"));
        assert!(payload.value.contains("Loads &amp; transforms data"));
        assert!(payload.value.contains("<h3>Options</h3>"));
    }

    #[test]
    fn option_storage_body_carries_details_and_next_steps() {
        let renderer = ContentRenderer::new(BodyFormat::Storage);
        let mut option = page(PageType::Option, "F.01.A", "Batch option");
        option
            .attributes
            .insert(ATTR_COMPLEXITY.to_string(), "Medium".to_string());
        option
            .attributes
            .insert(ATTR_MODES.to_string(), "MVP,Production".to_string());
        option
            .attributes
            .insert(ATTR_VALIDATION.to_string(), "Pending".to_string());

        let body = renderer.render(&option).value;
        assert!(body.contains("<code>F.01.A</code>"));
        assert!(body.contains("<code>M</code>"));
        assert!(body.contains("MVP,Production"));
        assert!(body.contains("Validation / Cleanup"));
        assert!(body.contains("Tasks \u{2013} F.01.A"));
    }

    #[test]
    fn tasks_storage_body_uses_placeholder_without_injection() {
        let renderer = ContentRenderer::new(BodyFormat::Storage);
        let body = renderer.render(&page(PageType::Tasks, "F.01.A", "")).value;
        assert!(body.contains("<h2>Tasks for F.01.A</h2>"));
        assert!(body.contains("Populate from the mapped tasks CSV"));
        assert!(body.contains("<code>F.01.A</code>"));
    }

    #[test]
    fn tasks_storage_body_reports_empty_match_when_injected() {
        let renderer = ContentRenderer::with_tasks(
            BodyFormat::Storage,
            vec![task("F.99.Z", "T-1", "Elsewhere", "Low")],
        );
        let body = renderer.render(&page(PageType::Tasks, "F.01.A", "")).value;
        assert!(body.contains("No tasks found for OptionRef F.01.A."));
        assert!(!body.contains("T-1"));
    }

    #[test]
    fn tasks_storage_table_filters_rows_and_drops_empty_columns() {
        let renderer = ContentRenderer::with_tasks(
            BodyFormat::Storage,
            vec![
                task("F.01.A", "T-1", "Build loader", "High"),
                task("F.01.A", "T-2", "Review loader", "low"),
                task("F.02.B", "T-9", "Unrelated", "M"),
            ],
        );
        let body = renderer.render(&page(PageType::Tasks, "F.01.A", "")).value;
        assert!(body.contains("T-1"));
        assert!(body.contains("T-2"));
        assert!(!body.contains("T-9"));
        assert!(body.contains("<abbr title=\"High\">H</abbr>"));
        assert!(body.contains("<abbr title=\"Low\">L</abbr>"));
        // No row has notes or predecessors, so those columns disappear.
        assert!(!body.contains("Notes"));
        assert!(!body.contains("Predecessors"));
        assert!(body.contains("Primary Role"));
    }

    #[test]
    fn adf_tasks_doc_has_legend_and_sized_table() {
        let long_title = "x".repeat(100);
        let renderer = ContentRenderer::with_tasks(
            BodyFormat::AtlasDocFormat,
            vec![task("F.01.A", "T-1", &long_title, "Medium")],
        );
        let payload = renderer.render(&page(PageType::Tasks, "F.01.A", ""));
        assert_eq!(payload.format, BodyFormat::AtlasDocFormat);

        let doc: Value = serde_json::from_str(&payload.value).expect("valid ADF JSON");
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["type"], "doc");
        assert_eq!(
            doc["content"][0]["content"][0]["text"],
            "Tasks filtered by OptionRef=F.01.A."
        );
        let table = &doc["content"][2];
        assert_eq!(table["type"], "table");
        assert_eq!(table["attrs"]["layout"], "full-width");
        assert_eq!(table["attrs"]["colwidth"][2], 360);
        // Header row plus one data row.
        assert_eq!(table["content"].as_array().expect("rows").len(), 2);
        let title_cell = &table["content"][1]["content"][1];
        let rendered_title = title_cell["content"][0]["content"][0]["text"]
            .as_str()
            .expect("title text");
        assert_eq!(rendered_title.len(), 80);
        assert!(rendered_title.ends_with("..."));
    }

    #[test]
    fn adf_option_doc_contains_detail_table() {
        let renderer = ContentRenderer::new(BodyFormat::AtlasDocFormat);
        let mut option = page(PageType::Option, "F.01.A", "Batch option");
        option
            .attributes
            .insert(ATTR_COMPLEXITY.to_string(), "High".to_string());
        let doc: Value =
            serde_json::from_str(&renderer.render(&option).value).expect("valid ADF JSON");
        assert_eq!(doc["content"][0]["type"], "heading");
        let table = &doc["content"][2];
        assert_eq!(table["type"], "table");
        let first_row = &table["content"][0];
        assert_eq!(
            first_row["content"][0]["content"][0]["content"][0]["text"],
            "Option Ref"
        );
        assert_eq!(
            first_row["content"][1]["content"][0]["content"][0]["text"],
            "F.01.A"
        );
    }
}
