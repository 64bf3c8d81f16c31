use std::collections::BTreeSet;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::{ClientOptions, Credentials, SiteSettings};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned HTTP {status} for {url}")]
    Http { status: StatusCode, url: String },
    #[error("version conflict updating page {page_id} at version {attempted}")]
    VersionConflict { page_id: String, attempted: i64 },
    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("retry budget exhausted for {url}")]
    RetryExhausted { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Storage,
    AtlasDocFormat,
}

impl BodyFormat {
    pub fn representation(self) -> &'static str {
        match self {
            BodyFormat::Storage => "storage",
            BodyFormat::AtlasDocFormat => "atlas_doc_format",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPayload {
    pub format: BodyFormat,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct RemotePage {
    pub id: String,
    pub title: String,
    pub version: i64,
    pub ancestor_ids: Vec<String>,
    pub body: Option<ContentPayload>,
}

/// Capability surface over the remote page store. Absence is `Ok(None)`;
/// every `Err` is a real failure the caller must handle.
pub trait PageStore {
    fn find_by_id(&mut self, id: &str) -> Result<Option<RemotePage>, StoreError>;
    fn find_by_title(&mut self, title: &str) -> Result<Option<RemotePage>, StoreError>;
    fn search_contains(
        &mut self,
        title: &str,
        limit: usize,
    ) -> Result<Vec<RemotePage>, StoreError>;
    fn list_children(&mut self, parent_id: &str) -> Result<Vec<RemotePage>, StoreError>;
    fn create(
        &mut self,
        title: &str,
        parent_id: Option<&str>,
        body: &ContentPayload,
    ) -> Result<RemotePage, StoreError>;
    fn update(
        &mut self,
        id: &str,
        title: &str,
        version: i64,
        body: &ContentPayload,
    ) -> Result<RemotePage, StoreError>;
    fn set_labels(&mut self, id: &str, labels: &BTreeSet<String>) -> Result<(), StoreError>;
    fn request_count(&self) -> usize;
}

pub struct ConfluenceClient {
    client: Client,
    base_url: String,
    space_key: String,
    credentials: Credentials,
    options: ClientOptions,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl ConfluenceClient {
    pub fn new(
        settings: &SiteSettings,
        credentials: Credentials,
        options: ClientOptions,
    ) -> Result<Self> {
        Url::parse(&settings.base_url)
            .with_context(|| format!("invalid Confluence base URL: {}", settings.base_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
            .context("failed to build Confluence HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            space_key: settings.space_key.clone(),
            credentials,
            options,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json_get(
        &mut self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..=self.options.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.credentials.email, Some(&self.credentials.api_token))
                .header("User-Agent", self.options.user_agent.clone())
                .query(query)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.options.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        return Err(StoreError::Http {
                            status,
                            url: url.clone(),
                        });
                    }
                    return response.json().map_err(StoreError::Transport);
                }
                Err(error) => {
                    if attempt < self.options.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(StoreError::Transport(error));
                }
            }
        }

        Err(StoreError::RetryExhausted { url })
    }

    fn request_json_send(
        &mut self,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let max_retries = self.options.max_write_retries;

        for attempt in 0..=max_retries {
            self.apply_rate_limit(true);
            let response = self
                .client
                .request(method.clone(), &url)
                .basic_auth(&self.credentials.email, Some(&self.credentials.api_token))
                .header("User-Agent", self.options.user_agent.clone())
                .json(body)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, true);
                            continue;
                        }
                        return Err(StoreError::Http {
                            status,
                            url: url.clone(),
                        });
                    }
                    return response.json().map_err(StoreError::Transport);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, true);
                        continue;
                    }
                    return Err(StoreError::Transport(error));
                }
            }
        }

        Err(StoreError::RetryExhausted { url })
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.options.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.options.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .options
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

impl PageStore for ConfluenceClient {
    fn find_by_id(&mut self, id: &str) -> Result<Option<RemotePage>, StoreError> {
        if id.trim().is_empty() {
            return Ok(None);
        }
        let query = vec![(
            "expand".to_string(),
            "version,ancestors,body.storage".to_string(),
        )];
        match self.request_json_get(&format!("/rest/api/content/{id}"), &query) {
            Ok(payload) => {
                let item: ContentItem = serde_json::from_value(payload)?;
                Ok(Some(item.into_remote_page()))
            }
            Err(StoreError::Http { status, .. }) if status == StatusCode::NOT_FOUND => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn find_by_title(&mut self, title: &str) -> Result<Option<RemotePage>, StoreError> {
        if title.trim().is_empty() {
            return Ok(None);
        }
        let query = vec![
            ("spaceKey".to_string(), self.space_key.clone()),
            ("title".to_string(), title.to_string()),
            ("expand".to_string(), "version,ancestors".to_string()),
        ];
        let payload = self.request_json_get("/rest/api/content", &query)?;
        let parsed: ContentListResponse = serde_json::from_value(payload)?;
        Ok(parsed
            .results
            .into_iter()
            .next()
            .map(ContentItem::into_remote_page))
    }

    fn search_contains(
        &mut self,
        title: &str,
        limit: usize,
    ) -> Result<Vec<RemotePage>, StoreError> {
        let cql = format!(
            "space=\"{}\" and type=\"page\" and title ~ \"{}\"",
            escape_cql(&self.space_key),
            escape_cql(title),
        );
        debug!(%cql, "title containment search");
        let query = vec![
            ("cql".to_string(), cql),
            ("limit".to_string(), limit.to_string()),
        ];
        let payload = self.request_json_get("/rest/api/content/search", &query)?;
        let parsed: ContentListResponse = serde_json::from_value(payload)?;
        Ok(parsed
            .results
            .into_iter()
            .map(ContentItem::into_remote_page)
            .collect())
    }

    fn list_children(&mut self, parent_id: &str) -> Result<Vec<RemotePage>, StoreError> {
        let mut children = Vec::new();
        let mut start = 0usize;
        let limit = 100usize;

        loop {
            let query = vec![
                ("start".to_string(), start.to_string()),
                ("limit".to_string(), limit.to_string()),
            ];
            let payload = self.request_json_get(
                &format!("/rest/api/content/{parent_id}/child/page"),
                &query,
            )?;
            let parsed: ContentListResponse = serde_json::from_value(payload)?;
            let has_next = parsed
                .links
                .as_ref()
                .is_some_and(|links| links.next.is_some());
            children.extend(
                parsed
                    .results
                    .into_iter()
                    .map(ContentItem::into_remote_page),
            );
            if !has_next {
                break;
            }
            start += limit;
        }

        Ok(children)
    }

    fn create(
        &mut self,
        title: &str,
        parent_id: Option<&str>,
        body: &ContentPayload,
    ) -> Result<RemotePage, StoreError> {
        let payload = create_payload(title, &self.space_key, parent_id, body);
        debug!(title, parent_id = parent_id.unwrap_or("<space root>"), "creating page");
        let response = self.request_json_send(Method::POST, "/rest/api/content", &payload)?;
        let item: ContentItem = serde_json::from_value(response)?;
        Ok(item.into_remote_page())
    }

    fn update(
        &mut self,
        id: &str,
        title: &str,
        version: i64,
        body: &ContentPayload,
    ) -> Result<RemotePage, StoreError> {
        let payload = update_payload(id, title, &self.space_key, version, body);
        debug!(id, title, version, "updating page");
        match self.request_json_send(Method::PUT, &format!("/rest/api/content/{id}"), &payload) {
            Ok(response) => {
                let item: ContentItem = serde_json::from_value(response)?;
                Ok(item.into_remote_page())
            }
            Err(StoreError::Http { status, .. }) if status == StatusCode::CONFLICT => {
                Err(StoreError::VersionConflict {
                    page_id: id.to_string(),
                    attempted: version,
                })
            }
            Err(error) => Err(error),
        }
    }

    fn set_labels(&mut self, id: &str, labels: &BTreeSet<String>) -> Result<(), StoreError> {
        let items = label_payload(labels);
        if items.is_empty() {
            return Ok(());
        }
        self.request_json_send(
            Method::POST,
            &format!("/rest/api/content/{id}/label"),
            &Value::Array(items),
        )?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn body_node(body: &ContentPayload) -> Value {
    json!({
        body.format.representation(): {
            "value": body.value,
            "representation": body.format.representation(),
        }
    })
}

fn create_payload(
    title: &str,
    space_key: &str,
    parent_id: Option<&str>,
    body: &ContentPayload,
) -> Value {
    let mut payload = json!({
        "type": "page",
        "title": title,
        "space": {"key": space_key},
        "body": body_node(body),
    });
    if let Some(parent_id) = parent_id {
        payload["ancestors"] = json!([{"id": parent_id}]);
    }
    payload
}

fn update_payload(
    id: &str,
    title: &str,
    space_key: &str,
    version: i64,
    body: &ContentPayload,
) -> Value {
    json!({
        "id": id,
        "type": "page",
        "title": title,
        "space": {"key": space_key},
        "version": {"number": version},
        "body": body_node(body),
    })
}

fn label_payload(labels: &BTreeSet<String>) -> Vec<Value> {
    labels
        .iter()
        .filter(|label| !label.trim().is_empty())
        .map(|label| json!({"prefix": "global", "name": label}))
        .collect()
}

fn escape_cql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct ContentListResponse {
    #[serde(default)]
    results: Vec<ContentItem>,
    #[serde(rename = "_links", default)]
    links: Option<LinksPayload>,
}

#[derive(Debug, Deserialize)]
struct LinksPayload {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    id: String,
    title: String,
    #[serde(default)]
    version: Option<VersionPayload>,
    #[serde(default)]
    ancestors: Vec<AncestorPayload>,
    #[serde(default)]
    body: Option<BodyPayload>,
}

#[derive(Debug, Deserialize)]
struct VersionPayload {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct AncestorPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BodyPayload {
    #[serde(default)]
    storage: Option<RepresentationPayload>,
}

#[derive(Debug, Deserialize)]
struct RepresentationPayload {
    value: String,
}

impl ContentItem {
    fn into_remote_page(self) -> RemotePage {
        let body = self.body.and_then(|body| {
            body.storage.map(|storage| ContentPayload {
                format: BodyFormat::Storage,
                value: storage.value,
            })
        });
        RemotePage {
            id: self.id,
            title: self.title,
            version: self.version.map(|version| version.number).unwrap_or(0),
            ancestor_ids: self
                .ancestors
                .into_iter()
                .map(|ancestor| ancestor.id)
                .collect(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::{
        BodyFormat, ContentItem, ContentListResponse, ContentPayload, create_payload, escape_cql,
        is_retryable_status, label_payload, update_payload,
    };

    fn storage_payload(value: &str) -> ContentPayload {
        ContentPayload {
            format: BodyFormat::Storage,
            value: value.to_string(),
        }
    }

    #[test]
    fn create_payload_places_body_under_selected_representation() {
        let payload = create_payload("Alpha", "DOCS", Some("42"), &storage_payload("<p>hi</p>"));
        assert_eq!(payload["type"], "page");
        assert_eq!(payload["title"], "Alpha");
        assert_eq!(payload["space"]["key"], "DOCS");
        assert_eq!(payload["ancestors"][0]["id"], "42");
        assert_eq!(payload["body"]["storage"]["value"], "<p>hi</p>");
        assert_eq!(payload["body"]["storage"]["representation"], "storage");
    }

    #[test]
    fn create_payload_omits_ancestors_without_parent() {
        let payload = create_payload("Alpha", "DOCS", None, &storage_payload(""));
        assert!(payload.get("ancestors").is_none());
    }

    #[test]
    fn create_payload_carries_adf_representation() {
        let body = ContentPayload {
            format: BodyFormat::AtlasDocFormat,
            value: "{\"type\":\"doc\"}".to_string(),
        };
        let payload = create_payload("Alpha", "DOCS", None, &body);
        assert_eq!(
            payload["body"]["atlas_doc_format"]["representation"],
            "atlas_doc_format"
        );
        assert!(payload["body"].get("storage").is_none());
    }

    #[test]
    fn update_payload_submits_requested_version() {
        let payload = update_payload("99", "Alpha", "DOCS", 7, &storage_payload("<p>v7</p>"));
        assert_eq!(payload["id"], "99");
        assert_eq!(payload["version"]["number"], 7);
        assert_eq!(payload["body"]["storage"]["value"], "<p>v7</p>");
    }

    #[test]
    fn label_payload_skips_blank_labels() {
        let labels: BTreeSet<String> = ["blueprint", "", "  ", "option"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let items = label_payload(&labels);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item["prefix"] == "global"));
    }

    #[test]
    fn escape_cql_neutralizes_quotes() {
        assert_eq!(escape_cql("plain"), "plain");
        assert_eq!(escape_cql("say \"hi\""), "say \\\"hi\\\"");
    }

    #[test]
    fn retryable_statuses_exclude_conflict_and_not_found() {
        use reqwest::StatusCode;
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::CONFLICT));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn content_item_decodes_into_remote_page() {
        let item: ContentItem = serde_json::from_value(json!({
            "id": "123",
            "title": "F.01 – Ingestion",
            "version": {"number": 4},
            "ancestors": [{"id": "1"}, {"id": "2"}],
            "body": {"storage": {"value": "<p>body</p>", "representation": "storage"}},
        }))
        .expect("decode content item");
        let page = item.into_remote_page();
        assert_eq!(page.id, "123");
        assert_eq!(page.version, 4);
        assert_eq!(page.ancestor_ids, vec!["1".to_string(), "2".to_string()]);
        let body = page.body.expect("storage body");
        assert_eq!(body.format, BodyFormat::Storage);
        assert_eq!(body.value, "<p>body</p>");
    }

    #[test]
    fn search_results_tolerate_sparse_items() {
        let parsed: ContentListResponse = serde_json::from_value(json!({
            "results": [{"id": "7", "title": "Hit"}],
            "size": 1,
            "_links": {},
        }))
        .expect("decode search response");
        assert_eq!(parsed.results.len(), 1);
        let page = parsed
            .results
            .into_iter()
            .next()
            .expect("one result")
            .into_remote_page();
        assert_eq!(page.version, 0);
        assert!(page.ancestor_ids.is_empty());
        assert!(page.body.is_none());
    }
}
