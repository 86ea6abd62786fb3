//! Fan-out of one search across providers, with merge and deduplication.

use super::normalize::{BookCandidate, normalize};
use super::{MetadataProvider, ProviderKind, RawPage, SearchQuery};
use crate::error::{AppError, ProviderError, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const NOT_CONFIGURED: &str =
    "No metadata provider is configured. Please set an API key in Settings > API Keys.";

/// Failure of one provider inside an otherwise successful search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderWarning {
    /// Provider that failed.
    pub provider: ProviderKind,
    /// HTTP status, `0` when no response arrived.
    pub status: u16,
    /// Failure description.
    pub message: String,
}

impl From<&ProviderError> for ProviderWarning {
    fn from(e: &ProviderError) -> Self {
        Self {
            provider: e.provider,
            status: e.status,
            message: e.message.clone(),
        }
    }
}

/// Unified result of a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultPage {
    /// Deduplicated candidates, provider-priority order.
    pub candidates: Vec<BookCandidate>,
    /// Largest total reported by any provider.
    pub total_estimate: u64,
    /// Whether any provider has results past this page.
    pub has_more: bool,
    /// Providers that failed while others succeeded.
    pub warnings: Vec<ProviderWarning>,
}

/// What makes two candidates the same book.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// ISBN-13 without hyphens.
    Isbn13(String),
    /// ISBN-10 without hyphens.
    Isbn10(String),
    /// Lower-cased title and primary author.
    TitleAuthor(String, String),
}

impl DedupKey {
    /// Derive the key: ISBN-13, else ISBN-10, else title + primary author.
    pub fn of(candidate: &BookCandidate) -> Self {
        let strip = |isbn: &str| isbn.chars().filter(|c| *c != '-').collect::<String>();

        if let Some(isbn13) = candidate.isbn13.as_deref() {
            return DedupKey::Isbn13(strip(isbn13));
        }
        if let Some(isbn10) = candidate.isbn10.as_deref() {
            return DedupKey::Isbn10(strip(isbn10));
        }
        DedupKey::TitleAuthor(
            candidate.title.trim().to_lowercase(),
            candidate
                .primary_author()
                .unwrap_or_default()
                .trim()
                .to_lowercase(),
        )
    }
}

/// Merge settled provider pages. Pages must already be in priority order.
///
/// First-seen candidate per [`DedupKey`] wins; later duplicates are dropped
/// whole, never merged field by field.
pub fn merge_pages(pages: &[RawPage], offset: u32) -> (Vec<BookCandidate>, u64, bool) {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut total_estimate = 0;
    let mut has_more = false;

    for page in pages {
        total_estimate = total_estimate.max(page.total_items);
        has_more |= u64::from(offset) + (page.records.len() as u64) < page.total_items;

        for candidate in page.records.iter().filter_map(normalize) {
            if seen.insert(DedupKey::of(&candidate)) {
                candidates.push(candidate);
            }
        }
    }

    (candidates, total_estimate, has_more)
}

/// Runs searches across a priority-ordered provider list.
pub struct SearchAggregator {
    providers: Vec<Arc<dyn MetadataProvider>>,
    provider_timeout: Duration,
}

impl SearchAggregator {
    /// Default time budget for one provider, retries included.
    pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

    /// Providers in priority order; earlier ones win deduplication.
    pub fn new(providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self {
            providers,
            provider_timeout: Self::DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Override the per-provider time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Providers that would take part in a search.
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        self.providers
            .iter()
            .filter(|p| p.is_configured())
            .map(|p| p.kind())
            .collect()
    }

    async fn run_one(
        &self,
        provider: &Arc<dyn MetadataProvider>,
        query: &SearchQuery,
        referer: &str,
    ) -> std::result::Result<RawPage, ProviderError> {
        let kind = provider.kind();
        match tokio::time::timeout(self.provider_timeout, provider.search(query, referer)).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(AppError::Provider(e))) => Err(e),
            Ok(Err(other)) => Err(ProviderError::transport(kind, other.to_string())),
            Err(_) => Err(ProviderError::transport(
                kind,
                format!(
                    "No response within {}s",
                    self.provider_timeout.as_secs_f32()
                ),
            )),
        }
    }

    /// Search every configured provider and merge the results.
    ///
    /// Waits for all providers to settle. Individual failures become
    /// warnings; only a total failure is an error.
    pub async fn search(&self, query: &SearchQuery, referer: &str) -> Result<SearchResultPage> {
        let active: Vec<&Arc<dyn MetadataProvider>> =
            self.providers.iter().filter(|p| p.is_configured()).collect();

        if active.is_empty() {
            return Err(AppError::NotConfigured(NOT_CONFIGURED.to_string()));
        }

        let outcomes = join_all(
            active
                .iter()
                .map(|provider| self.run_one(provider, query, referer)),
        )
        .await;

        let mut pages = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(page) => pages.push(page),
                Err(e) => {
                    tracing::warn!(
                        provider = %e.provider,
                        status = e.status,
                        error = %e.message,
                        "Metadata provider failed"
                    );
                    failures.push(e);
                }
            }
        }

        if pages.is_empty() {
            return Err(AppError::SearchUnavailable(failures));
        }

        let (candidates, total_estimate, has_more) = merge_pages(&pages, query.offset());

        tracing::info!(
            providers = pages.len(),
            failed = failures.len(),
            results = candidates.len(),
            total_estimate,
            "Metadata search complete"
        );

        Ok(SearchResultPage {
            candidates,
            total_estimate,
            has_more,
            warnings: failures.iter().map(ProviderWarning::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::google_books::{
        self, GoogleBooksClient, IndustryIdentifier, Volume, VolumeInfo,
    };
    use crate::metadata::open_library::SearchDoc;
    use crate::metadata::transport::mock::MockTransport;
    use crate::metadata::{RawRecord, SearchMode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider answering from a canned outcome.
    struct StubProvider {
        kind: ProviderKind,
        configured: bool,
        outcome: std::result::Result<RawPage, ProviderError>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn ok(kind: ProviderKind, total: u64, records: Vec<RawRecord>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                configured: true,
                outcome: Ok(RawPage {
                    provider: kind,
                    total_items: total,
                    records,
                }),
                delay: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(kind: ProviderKind, status: u16, message: &str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                configured: true,
                outcome: Err(ProviderError::http(kind, status, message)),
                delay: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MetadataProvider for StubProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn search(&self, _query: &SearchQuery, _referer: &str) -> Result<RawPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcome.clone().map_err(AppError::from)
        }
    }

    fn google(id: &str, title: &str, isbn13: Option<&str>, description: &str) -> RawRecord {
        RawRecord::GoogleBooks(Volume {
            id: id.to_string(),
            volume_info: VolumeInfo {
                title: Some(title.to_string()),
                authors: Some(vec!["Isaac Asimov".to_string()]),
                description: Some(description.to_string()),
                industry_identifiers: isbn13.map(|isbn| {
                    vec![IndustryIdentifier {
                        kind: "ISBN_13".to_string(),
                        identifier: isbn.to_string(),
                    }]
                }),
                ..Default::default()
            },
        })
    }

    fn open_library(key: &str, title: &str, isbns: &[&str]) -> RawRecord {
        RawRecord::OpenLibrary(SearchDoc {
            key: key.to_string(),
            title: Some(title.to_string()),
            author_name: vec!["Isaac Asimov".to_string()],
            isbn: isbns.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    fn query() -> SearchQuery {
        SearchQuery::new("foundation", SearchMode::FreeText).unwrap()
    }

    #[tokio::test]
    async fn isbn_search_returns_matching_candidate() {
        let transport = Arc::new(MockTransport::json(
            200,
            json!({
                "kind": "books#volumes",
                "totalItems": 1,
                "items": [{
                    "id": "zyTCAlFPjgYC",
                    "volumeInfo": {
                        "title": "Foundation",
                        "authors": ["Isaac Asimov"],
                        "industryIdentifiers": [
                            { "type": "ISBN_10", "identifier": "0553293354" },
                            { "type": "ISBN_13", "identifier": "9780553293357" }
                        ]
                    }
                }]
            }),
        ));
        let client = GoogleBooksClient::new(transport.clone(), google_books::DEFAULT_BASE_URL)
            .with_api_key(Some("key".into()));
        let aggregator = SearchAggregator::new(vec![Arc::new(client)]);
        let query = SearchQuery::new("978-0-553-29335-7", SearchMode::Isbn).unwrap();

        let page = aggregator.search(&query, "").await.unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.candidates[0].isbn13.as_deref(), Some("9780553293357"));
        assert!(page.warnings.is_empty());
        assert_eq!(
            transport.last_request().unwrap().query_value("q"),
            Some("isbn:9780553293357")
        );
    }

    #[tokio::test]
    async fn duplicate_isbn13_keeps_first_provider() {
        let a = StubProvider::ok(
            ProviderKind::GoogleBooks,
            10,
            vec![google("a1", "Foundation", Some("978-0-553-29335-7"), "from A")],
        );
        let b = StubProvider::ok(
            ProviderKind::OpenLibrary,
            5,
            vec![RawRecord::GoogleBooks(Volume {
                id: "b1".into(),
                volume_info: VolumeInfo {
                    title: Some("Foundation (reissue)".into()),
                    description: Some("from B".into()),
                    industry_identifiers: Some(vec![IndustryIdentifier {
                        kind: "ISBN_13".into(),
                        identifier: "9780553293357".into(),
                    }]),
                    ..Default::default()
                },
            })],
        );
        let aggregator = SearchAggregator::new(vec![a, b]);

        let page = aggregator.search(&query(), "").await.unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.candidates[0].provider_id, "a1");
        assert_eq!(page.candidates[0].description.as_deref(), Some("from A"));
        assert_eq!(page.total_estimate, 10);
    }

    #[tokio::test]
    async fn no_configured_provider_fails_before_network() {
        let transport = Arc::new(MockTransport::json(200, json!({})));
        let client = GoogleBooksClient::new(transport.clone(), google_books::DEFAULT_BASE_URL);
        let aggregator = SearchAggregator::new(vec![Arc::new(client)]);

        let err = aggregator.search(&query(), "").await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
        assert_eq!(transport.calls(), 0);

        let empty = SearchAggregator::new(Vec::new());
        assert!(matches!(
            empty.search(&query(), "").await.unwrap_err(),
            AppError::NotConfigured(_)
        ));
    }

    #[tokio::test]
    async fn partial_failure_becomes_warning() {
        let a = StubProvider::failing(ProviderKind::GoogleBooks, 429, "Quota exceeded");
        let b = StubProvider::ok(
            ProviderKind::OpenLibrary,
            3,
            vec![open_library("/works/OL1W", "Foundation", &["9780553293357"])],
        );
        let aggregator = SearchAggregator::new(vec![a.clone(), b.clone()]);

        let page = aggregator.search(&query(), "").await.unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.candidates[0].source_provider, ProviderKind::OpenLibrary);
        assert_eq!(
            page.warnings,
            vec![ProviderWarning {
                provider: ProviderKind::GoogleBooks,
                status: 429,
                message: "Quota exceeded".into(),
            }]
        );
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_failures_surface_every_error() {
        let a = StubProvider::failing(ProviderKind::GoogleBooks, 500, "backend");
        let b = StubProvider::failing(ProviderKind::OpenLibrary, 503, "maintenance");
        let aggregator = SearchAggregator::new(vec![a, b]);

        match aggregator.search(&query(), "").await.unwrap_err() {
            AppError::SearchUnavailable(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].provider, ProviderKind::GoogleBooks);
                assert_eq!(errors[1].status, 503);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out_without_stalling_others() {
        let slow = Arc::new(StubProvider {
            kind: ProviderKind::GoogleBooks,
            configured: true,
            outcome: Ok(RawPage {
                provider: ProviderKind::GoogleBooks,
                total_items: 1,
                records: vec![google("g1", "Foundation", None, "")],
            }),
            delay: Some(Duration::from_secs(5)),
            calls: AtomicUsize::new(0),
        });
        let fast = StubProvider::ok(
            ProviderKind::OpenLibrary,
            1,
            vec![open_library("/works/OL2W", "Foundation and Empire", &[])],
        );
        let aggregator =
            SearchAggregator::new(vec![slow, fast]).with_timeout(Duration::from_millis(50));

        let page = aggregator.search(&query(), "").await.unwrap();
        assert_eq!(page.candidates.len(), 1);
        assert_eq!(page.warnings.len(), 1);
        assert_eq!(page.warnings[0].status, ProviderError::TRANSPORT_STATUS);
    }

    #[test]
    fn provider_order_preserved_and_title_author_dedup() {
        let pages = vec![
            RawPage {
                provider: ProviderKind::GoogleBooks,
                total_items: 2,
                records: vec![
                    google("g1", "Foundation", None, ""),
                    google("g2", "I, Robot", None, ""),
                ],
            },
            RawPage {
                provider: ProviderKind::OpenLibrary,
                total_items: 40,
                records: vec![
                    open_library("/works/OL1W", "FOUNDATION", &[]),
                    open_library("/works/OL3W", "The Gods Themselves", &[]),
                ],
            },
        ];

        let (candidates, total, has_more) = merge_pages(&pages, 0);
        let ids: Vec<&str> = candidates.iter().map(|c| c.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2", "OL3W"]);
        assert_eq!(total, 40);
        assert!(has_more);
    }

    #[test]
    fn has_more_false_on_last_page() {
        let pages = vec![RawPage {
            provider: ProviderKind::GoogleBooks,
            total_items: 21,
            records: vec![google("g1", "Foundation", None, "")],
        }];
        let (_, _, has_more) = merge_pages(&pages, 20);
        assert!(!has_more);
    }

    #[test]
    fn dedup_key_precedence() {
        let mut candidate = normalize(&google("g1", "Foundation", Some("978-0-553-29335-7"), ""))
            .unwrap();
        assert_eq!(
            DedupKey::of(&candidate),
            DedupKey::Isbn13("9780553293357".into())
        );

        candidate.isbn13 = None;
        candidate.isbn10 = Some("0-553-29335-4".into());
        assert_eq!(DedupKey::of(&candidate), DedupKey::Isbn10("0553293354".into()));

        candidate.isbn10 = None;
        assert_eq!(
            DedupKey::of(&candidate),
            DedupKey::TitleAuthor("foundation".into(), "isaac asimov".into())
        );
    }
}
