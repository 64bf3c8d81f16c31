use std::fmt;

use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::matcher::TitleMatcher;
use crate::plan::{DesiredPage, PageType};
use crate::render::ContentRenderer;
use crate::store::{ContentPayload, PageStore, RemotePage, StoreError};

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub root_title: String,
    pub root_id: Option<String>,
    pub update: bool,
    pub dry_run: bool,
    pub only_types: Vec<PageType>,
    /// Stop after this many pages; 0 means no limit.
    pub limit: usize,
    pub skip_unchanged: bool,
    pub show_diff: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageActionRecord {
    pub title: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub success: bool,
    pub dry_run: bool,
    pub planned: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub pages: Vec<PageActionRecord>,
    pub request_count: usize,
}

/// Reconcile the desired pages against the store. Dry runs perform every
/// read (including the pre-update version fetch) and produce the same
/// tallies a live run would, but never call a mutating endpoint.
pub fn reconcile_plan<S: PageStore>(
    store: &mut S,
    matcher: TitleMatcher,
    renderer: &ContentRenderer,
    pages: &[DesiredPage],
    options: &ReconcileOptions,
) -> ReconcileReport {
    let mut report = ReconcileReport {
        dry_run: options.dry_run,
        ..ReconcileReport::default()
    };

    let mut selected: Vec<&DesiredPage> = pages
        .iter()
        .filter(|page| {
            options.only_types.is_empty() || options.only_types.contains(&page.page_type)
        })
        .collect();
    // Parents before children: a Tasks page must be able to find the Option
    // page created earlier in the same run. The sort is stable, so pages of
    // one type keep their plan order.
    selected.sort_by_key(|page| page.page_type.precedence());
    report.planned = selected.len();

    let mut processed = 0usize;
    for page in selected {
        if options.limit > 0 && processed >= options.limit {
            info!(limit = options.limit, "page limit reached; stopping");
            break;
        }
        processed += 1;
        reconcile_page(store, matcher, renderer, page, options, &mut report);
    }

    report.success = report.failed == 0;
    report.request_count = store.request_count();
    info!(
        planned = report.planned,
        created = report.created,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        dry_run = report.dry_run,
        "reconcile finished"
    );
    report
}

fn reconcile_page<S: PageStore>(
    store: &mut S,
    matcher: TitleMatcher,
    renderer: &ContentRenderer,
    page: &DesiredPage,
    options: &ReconcileOptions,
    report: &mut ReconcileReport,
) {
    let existing = match matcher.resolve(store, &page.title) {
        Ok(existing) => existing,
        Err(error) => {
            record_failure(report, &page.title, "lookup", error);
            return;
        }
    };

    match existing {
        Some(matched) => {
            if !options.update {
                debug!(title = %page.title, id = %matched.id, "exists; update disabled");
                report.skipped += 1;
                push_action(
                    report,
                    &page.title,
                    "skipped",
                    Some("exists; update disabled".to_string()),
                );
                return;
            }
            update_existing(store, renderer, page, &matched, options, report);
        }
        None => create_missing(store, matcher, renderer, page, options, report),
    }
}

fn update_existing<S: PageStore>(
    store: &mut S,
    renderer: &ContentRenderer,
    page: &DesiredPage,
    matched: &RemotePage,
    options: &ReconcileOptions,
    report: &mut ReconcileReport,
) {
    // Re-read right before writing so the submitted version is current even
    // when the match came from a cached search result.
    let current = match store.find_by_id(&matched.id) {
        Ok(Some(current)) => current,
        Ok(None) => {
            record_failure(
                report,
                &page.title,
                "refresh",
                format!("page {} no longer exists", matched.id),
            );
            return;
        }
        Err(error) => {
            record_failure(report, &page.title, "refresh", error);
            return;
        }
    };

    let body = renderer.render(page);
    if options.skip_unchanged && current.body.as_ref() == Some(&body) {
        debug!(title = %page.title, id = %current.id, "body unchanged");
        report.skipped += 1;
        push_action(report, &page.title, "unchanged", None);
        return;
    }

    let next_version = current.version + 1;
    let mut detail = if options.show_diff {
        body_diff(&current, &body)
    } else {
        format!("version {} -> {}", current.version, next_version)
    };

    if options.dry_run {
        info!(title = %page.title, id = %current.id, version = next_version, "would update");
        report.updated += 1;
        push_action(report, &page.title, "would_update", Some(detail));
        return;
    }

    match store.update(&current.id, &page.title, next_version, &body) {
        Ok(updated) => {
            info!(title = %page.title, id = %updated.id, version = updated.version, "updated");
            report.updated += 1;
            if let Some(problem) = apply_labels(store, page, &updated.id) {
                report.warnings.push(problem.clone());
                detail.push_str("; ");
                detail.push_str(&problem);
            }
            push_action(report, &page.title, "updated", Some(detail));
        }
        Err(error) => record_failure(report, &page.title, "update", error),
    }
}

fn create_missing<S: PageStore>(
    store: &mut S,
    matcher: TitleMatcher,
    renderer: &ContentRenderer,
    page: &DesiredPage,
    options: &ReconcileOptions,
    report: &mut ReconcileReport,
) {
    let parent_id = match resolve_parent(store, matcher, page, options) {
        Ok(parent_id) => parent_id,
        Err(error) => {
            record_failure(report, &page.title, "parent lookup", error);
            return;
        }
    };

    if parent_id.is_none() {
        warn!(title = %page.title, "no parent found; creating at space root");
        report.warnings.push(format!(
            "no parent found for '{}'; creating at space root",
            page.title
        ));
    }

    let body = renderer.render(page);

    if options.dry_run {
        info!(
            title = %page.title,
            parent = parent_id.as_deref().unwrap_or("<space root>"),
            "would create"
        );
        report.created += 1;
        push_action(
            report,
            &page.title,
            "would_create",
            parent_id.map(|id| format!("under parent {id}")),
        );
        return;
    }

    match store.create(&page.title, parent_id.as_deref(), &body) {
        Ok(created) => {
            info!(title = %page.title, id = %created.id, "created");
            report.created += 1;
            let mut detail = format!("id {}", created.id);
            if let Some(problem) = apply_labels(store, page, &created.id) {
                report.warnings.push(problem.clone());
                detail.push_str("; ");
                detail.push_str(&problem);
            }
            push_action(report, &page.title, "created", Some(detail));
        }
        Err(error) => record_failure(report, &page.title, "create", error),
    }
}

// Named parent via the matcher, then the root-id override, then the root
// title via the matcher. Ok(None) sends the page to the space root.
fn resolve_parent<S: PageStore>(
    store: &mut S,
    matcher: TitleMatcher,
    page: &DesiredPage,
    options: &ReconcileOptions,
) -> Result<Option<String>, StoreError> {
    let parent_title = page.parent_title.trim();
    let root_title = options.root_title.trim();
    let wants_root = parent_title.is_empty() || parent_title == root_title;

    if !wants_root {
        if let Some(parent) = matcher.resolve(store, parent_title)? {
            return Ok(Some(parent.id));
        }
        debug!(title = %page.title, parent = parent_title, "parent not found; falling back to root");
    }

    if let Some(root_id) = options.root_id.as_deref() {
        let root_id = root_id.trim();
        if !root_id.is_empty() {
            return Ok(Some(root_id.to_string()));
        }
    }

    if let Some(root) = matcher.resolve(store, root_title)? {
        return Ok(Some(root.id));
    }

    Ok(None)
}

// Label failures become a warning and a note on the record, never a failed
// page.
fn apply_labels<S: PageStore>(store: &mut S, page: &DesiredPage, id: &str) -> Option<String> {
    if page.labels.is_empty() {
        return None;
    }
    match store.set_labels(id, &page.labels) {
        Ok(()) => None,
        Err(error) => {
            warn!(title = %page.title, %error, "label update failed");
            Some(format!("labels not applied: {error}"))
        }
    }
}

fn body_diff(current: &RemotePage, next: &ContentPayload) -> String {
    let old = current
        .body
        .as_ref()
        .map(|body| body.value.as_str())
        .unwrap_or("");
    let diff = TextDiff::from_lines(old, next.value.as_str());
    let rendered = diff
        .unified_diff()
        .context_radius(2)
        .header("remote", "plan")
        .to_string();
    if rendered.is_empty() {
        "no textual change".to_string()
    } else {
        rendered
    }
}

fn push_action(report: &mut ReconcileReport, title: &str, action: &str, detail: Option<String>) {
    report.pages.push(PageActionRecord {
        title: title.to_string(),
        action: action.to_string(),
        detail,
    });
}

fn record_failure(
    report: &mut ReconcileReport,
    title: &str,
    stage: &str,
    error: impl fmt::Display,
) {
    warn!(title, stage, %error, "page failed");
    report.failed += 1;
    report.errors.push(format!("{title}: {stage}: {error}"));
    push_action(report, title, "failed", Some(format!("{stage}: {error}")));
}
