use tracing::debug;

use crate::store::{PageStore, RemotePage, StoreError};

/// Result cap for the containment search.
pub const SEARCH_LIMIT: usize = 25;

/// How to pick from fuzzy search hits when no candidate title matched
/// directly. `FirstHit` re-finds drifted titles on republish; `ExactOnly`
/// refuses anything but a case-insensitive exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuzzyPolicy {
    #[default]
    FirstHit,
    ExactOnly,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TitleMatcher {
    policy: FuzzyPolicy,
}

impl TitleMatcher {
    pub fn new(policy: FuzzyPolicy) -> Self {
        Self { policy }
    }

    /// Resolve a human-authored title to at most one existing remote page.
    ///
    /// Tries direct lookups for the title and its dash/whitespace variants,
    /// then falls back to a containment search. An HTTP-level failure from
    /// the search endpoint degrades to "no match"; transport failures and
    /// errors from the direct lookups propagate.
    pub fn resolve<S: PageStore>(
        &self,
        store: &mut S,
        title: &str,
    ) -> Result<Option<RemotePage>, StoreError> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        for candidate in title_candidates(trimmed) {
            if let Some(page) = store.find_by_title(&candidate)? {
                debug!(title = trimmed, matched = %page.title, "direct title match");
                return Ok(Some(page));
            }
        }

        let hits = match store.search_contains(trimmed, SEARCH_LIMIT) {
            Ok(hits) => hits,
            Err(StoreError::Http { status, url }) => {
                debug!(%status, %url, "containment search unavailable, treating as no match");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        Ok(pick_fuzzy(trimmed, hits, self.policy))
    }

    /// Ranked fuzzy candidates for a title: case-insensitive exact matches
    /// first, then remaining hits in store order. Unlike `resolve`, search
    /// failures propagate so interactive callers see them.
    pub fn fuzzy_candidates<S: PageStore>(
        &self,
        store: &mut S,
        title: &str,
    ) -> Result<Vec<RemotePage>, StoreError> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let hits = store.search_contains(trimmed, SEARCH_LIMIT)?;
        Ok(rank_hits(trimmed, hits))
    }
}

/// Lookup variants for a title, deduplicated, in match-priority order:
/// the literal, en dash swapped for hyphen, hyphen swapped for en dash,
/// and the whitespace-collapsed form.
pub fn title_candidates(title: &str) -> Vec<String> {
    let trimmed = title.trim();
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    let variants = [
        trimmed.to_string(),
        trimmed.replace('\u{2013}', "-"),
        trimmed.replace('-', "\u{2013}"),
        trimmed.split_whitespace().collect::<Vec<_>>().join(" "),
    ];
    for variant in variants {
        if !variant.is_empty() && !candidates.contains(&variant) {
            candidates.push(variant);
        }
    }
    candidates
}

fn rank_hits(title: &str, hits: Vec<RemotePage>) -> Vec<RemotePage> {
    let lowered = title.trim().to_lowercase();
    let (mut exact, rest): (Vec<_>, Vec<_>) = hits
        .into_iter()
        .partition(|hit| hit.title.trim().to_lowercase() == lowered);
    exact.extend(rest);
    exact
}

fn pick_fuzzy(title: &str, hits: Vec<RemotePage>, policy: FuzzyPolicy) -> Option<RemotePage> {
    let ranked = rank_hits(title, hits);
    let first = ranked.into_iter().next()?;
    match policy {
        FuzzyPolicy::FirstHit => Some(first),
        FuzzyPolicy::ExactOnly => {
            if first.title.trim().to_lowercase() == title.trim().to_lowercase() {
                Some(first)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{FuzzyPolicy, TitleMatcher, title_candidates};
    use crate::store::{ContentPayload, PageStore, RemotePage, StoreError};

    #[derive(Default)]
    struct ScriptedStore {
        pages_by_title: Vec<RemotePage>,
        search_hits: Vec<RemotePage>,
        search_error: Option<StoreError>,
        title_queries: Vec<String>,
        search_queries: Vec<String>,
        request_count: usize,
    }

    impl ScriptedStore {
        fn with_page(mut self, id: &str, title: &str) -> Self {
            self.pages_by_title.push(page(id, title));
            self
        }
    }

    fn page(id: &str, title: &str) -> RemotePage {
        RemotePage {
            id: id.to_string(),
            title: title.to_string(),
            version: 1,
            ancestor_ids: Vec::new(),
            body: None,
        }
    }

    impl PageStore for ScriptedStore {
        fn find_by_id(&mut self, id: &str) -> Result<Option<RemotePage>, StoreError> {
            self.request_count += 1;
            Ok(self
                .pages_by_title
                .iter()
                .find(|candidate| candidate.id == id)
                .cloned())
        }

        fn find_by_title(&mut self, title: &str) -> Result<Option<RemotePage>, StoreError> {
            self.request_count += 1;
            self.title_queries.push(title.to_string());
            Ok(self
                .pages_by_title
                .iter()
                .find(|candidate| candidate.title == title)
                .cloned())
        }

        fn search_contains(
            &mut self,
            title: &str,
            _limit: usize,
        ) -> Result<Vec<RemotePage>, StoreError> {
            self.request_count += 1;
            self.search_queries.push(title.to_string());
            if let Some(error) = self.search_error.take() {
                return Err(error);
            }
            Ok(self.search_hits.clone())
        }

        fn list_children(&mut self, _parent_id: &str) -> Result<Vec<RemotePage>, StoreError> {
            unreachable!("matcher never lists children")
        }

        fn create(
            &mut self,
            _title: &str,
            _parent_id: Option<&str>,
            _body: &ContentPayload,
        ) -> Result<RemotePage, StoreError> {
            unreachable!("matcher never creates")
        }

        fn update(
            &mut self,
            _id: &str,
            _title: &str,
            _version: i64,
            _body: &ContentPayload,
        ) -> Result<RemotePage, StoreError> {
            unreachable!("matcher never updates")
        }

        fn set_labels(
            &mut self,
            _id: &str,
            _labels: &BTreeSet<String>,
        ) -> Result<(), StoreError> {
            unreachable!("matcher never labels")
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    #[test]
    fn candidates_cover_dash_and_whitespace_drift() {
        let candidates = title_candidates("F.01 \u{2013} Data  Ingestion");
        assert_eq!(candidates[0], "F.01 \u{2013} Data  Ingestion");
        assert!(candidates.contains(&"F.01 - Data  Ingestion".to_string()));
        assert!(candidates.contains(&"F.01 \u{2013} Data Ingestion".to_string()));
    }

    #[test]
    fn candidates_deduplicate_when_variants_collapse() {
        let candidates = title_candidates("Plain Title");
        assert_eq!(candidates, vec!["Plain Title".to_string()]);
    }

    #[test]
    fn empty_title_resolves_to_none_without_store_calls() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        let result = matcher.resolve(&mut store, "   ").expect("resolve");
        assert!(result.is_none());
        assert_eq!(store.request_count(), 0);
    }

    #[test]
    fn literal_match_wins_before_variants() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default().with_page("1", "Alpha");
        let result = matcher.resolve(&mut store, "Alpha").expect("resolve");
        assert_eq!(result.expect("match").id, "1");
        assert_eq!(store.title_queries, vec!["Alpha".to_string()]);
        assert!(store.search_queries.is_empty());
    }

    #[test]
    fn dash_variant_matches_without_fuzzy_search() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default().with_page("2", "F.01 \u{2013} Ingestion");
        let result = matcher
            .resolve(&mut store, "F.01 - Ingestion")
            .expect("resolve");
        assert_eq!(result.expect("match").id, "2");
        assert!(store.search_queries.is_empty());
    }

    #[test]
    fn fuzzy_prefers_case_insensitive_exact_over_first_hit() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        store.search_hits = vec![page("10", "Alpha Appendix"), page("11", "ALPHA")];
        let result = matcher.resolve(&mut store, "alpha").expect("resolve");
        assert_eq!(result.expect("match").id, "11");
    }

    #[test]
    fn fuzzy_falls_back_to_first_hit_by_default() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        store.search_hits = vec![page("10", "Alpha Appendix"), page("11", "Alpha Annex")];
        let result = matcher.resolve(&mut store, "alpha").expect("resolve");
        assert_eq!(result.expect("match").id, "10");
    }

    #[test]
    fn fuzzy_exact_ranking_survives_edge_whitespace_on_remote_titles() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        store.search_hits = vec![page("10", "Alpha Appendix"), page("11", " Alpha ")];
        let result = matcher.resolve(&mut store, "alpha").expect("resolve");
        assert_eq!(result.expect("match").id, "11");
    }

    #[test]
    fn exact_only_policy_accepts_hits_with_edge_whitespace() {
        let matcher = TitleMatcher::new(FuzzyPolicy::ExactOnly);
        let mut store = ScriptedStore::default();
        store.search_hits = vec![page("10", "Alpha ")];
        let result = matcher.resolve(&mut store, "alpha").expect("resolve");
        assert_eq!(result.expect("match").id, "10");
    }

    #[test]
    fn exact_only_policy_rejects_loose_hits() {
        let matcher = TitleMatcher::new(FuzzyPolicy::ExactOnly);
        let mut store = ScriptedStore::default();
        store.search_hits = vec![page("10", "Alpha Appendix")];
        let result = matcher.resolve(&mut store, "alpha").expect("resolve");
        assert!(result.is_none());
    }

    #[test]
    fn search_http_failure_degrades_to_no_match() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        store.search_error = Some(StoreError::Http {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            url: "https://example.atlassian.net/wiki/rest/api/content/search".to_string(),
        });
        let result = matcher.resolve(&mut store, "Missing").expect("resolve");
        assert!(result.is_none());
    }

    #[test]
    fn resolve_returns_same_page_when_called_twice() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        store.search_hits = vec![page("10", "Alpha Appendix"), page("11", "Alpha Annex")];

        let first = matcher.resolve(&mut store, "alpha").expect("first resolve");
        let second = matcher.resolve(&mut store, "alpha").expect("second resolve");

        assert_eq!(first.expect("match").id, second.expect("match").id);
        assert_eq!(store.search_queries.len(), 2);
    }

    #[test]
    fn fuzzy_candidates_rank_exact_matches_first() {
        let matcher = TitleMatcher::default();
        let mut store = ScriptedStore::default();
        store.search_hits = vec![
            page("10", "Alpha Appendix"),
            page("11", "ALPHA"),
            page("12", "Alpha Annex"),
        ];
        let ranked = matcher
            .fuzzy_candidates(&mut store, "alpha")
            .expect("candidates");
        assert_eq!(ranked[0].id, "11");
        assert_eq!(ranked[1].id, "10");
        assert_eq!(ranked[2].id, "12");
        assert_eq!(store.search_queries, vec!["alpha".to_string()]);
    }
}
