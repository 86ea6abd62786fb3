//! External book metadata: provider clients, normalization and aggregation.

pub mod aggregator;
pub mod google_books;
pub mod normalize;
pub mod open_library;
pub mod transport;

pub use aggregator::{ProviderWarning, SearchAggregator, SearchResultPage};
pub use google_books::GoogleBooksClient;
pub use normalize::{BookCandidate, normalize};
pub use open_library::OpenLibraryClient;
pub use transport::{HttpTransport, ReqwestTransport, RetryPolicy};

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Referer sent when the caller did not supply one.
pub const DEFAULT_REFERER: &str = "https://bookarr.localhost";

/// User agent for every provider request.
pub const USER_AGENT: &str = "Bookarr/1.0";

/// Known metadata providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google Books volumes API.
    GoogleBooks,
    /// Open Library search API.
    OpenLibrary,
}

impl ProviderKind {
    /// Identifier used in qualified ids and settings.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GoogleBooks => "google_books",
            ProviderKind::OpenLibrary => "open_library",
        }
    }

    /// Accepts both `google_books` and the `google-books` spelling used by the UI.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "google_books" => Some(ProviderKind::GoogleBooks),
            "open_library" => Some(ProviderKind::OpenLibrary),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::GoogleBooks => write!(f, "Google Books"),
            ProviderKind::OpenLibrary => write!(f, "Open Library"),
        }
    }
}

/// How the raw query should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    /// Plain keyword search.
    FreeText,
    /// Title search, optionally narrowed by author.
    Title,
    /// Author-only search.
    Author,
    /// ISBN lookup.
    Isbn,
}

impl SearchMode {
    /// Parse the `type` request parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "books" | "google-books" | "free-text" => Some(SearchMode::FreeText),
            "title" => Some(SearchMode::Title),
            "author" => Some(SearchMode::Author),
            "isbn" => Some(SearchMode::Isbn),
            _ => None,
        }
    }
}

/// A validated search request.
///
/// Construction enforces the invariants, so a `SearchQuery` that exists is
/// always safe to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    raw_query: String,
    mode: SearchMode,
    author: Option<String>,
    max_results: u32,
    offset: u32,
}

impl SearchQuery {
    /// Default page size.
    pub const DEFAULT_MAX_RESULTS: u32 = 20;
    /// Largest page size providers accept.
    pub const MAX_RESULTS_LIMIT: u32 = 40;

    /// Validate and build a query with default paging.
    pub fn new(raw_query: &str, mode: SearchMode) -> Result<Self> {
        let raw_query = raw_query.trim();
        if raw_query.is_empty() {
            return Err(AppError::invalid("q", "Query parameter is required"));
        }

        if mode == SearchMode::Isbn
            && !raw_query.chars().all(|c| c.is_ascii_digit() || c == '-')
        {
            return Err(AppError::invalid(
                "q",
                "ISBN search accepts only digits and hyphens",
            ));
        }

        Ok(Self {
            raw_query: raw_query.to_string(),
            mode,
            author: None,
            max_results: Self::DEFAULT_MAX_RESULTS,
            offset: 0,
        })
    }

    /// Author constraint for title searches; blank values are dropped.
    pub fn with_author(mut self, author: Option<&str>) -> Self {
        self.author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        self
    }

    /// Page size, clamped into `1..=40`.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(1, Self::MAX_RESULTS_LIMIT);
        self
    }

    /// Zero-based result offset.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Trimmed query text.
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    /// Search mode.
    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Author constraint (only meaningful in title mode).
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Page size.
    pub fn max_results(&self) -> u32 {
        self.max_results
    }

    /// Result offset.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The query with hyphens removed, for ISBN lookups.
    pub fn isbn_digits(&self) -> String {
        self.raw_query.chars().filter(|c| *c != '-').collect()
    }
}

/// One raw record, tagged by the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Google Books volume.
    GoogleBooks(google_books::Volume),
    /// Open Library search document.
    OpenLibrary(open_library::SearchDoc),
}

/// A provider's page of raw results.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    /// Producing provider.
    pub provider: ProviderKind,
    /// Provider-reported total, approximate.
    pub total_items: u64,
    /// Records in provider relevance order.
    pub records: Vec<RawRecord>,
}

/// A searchable metadata source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Whether a usable credential is present.
    fn is_configured(&self) -> bool;

    /// Run one search. Fails with [`AppError::NotConfigured`] before any
    /// network call when unconfigured, and with [`AppError::Provider`] otherwise.
    async fn search(&self, query: &SearchQuery, referer: &str) -> Result<RawPage>;
}
