//! Open Library search client.
//!
//! Open Library needs no credential, so the client counts as configured
//! whenever it is enabled.

use super::transport::{HttpRequest, HttpTransport};
use super::{
    DEFAULT_REFERER, MetadataProvider, ProviderKind, RawPage, RawRecord, SearchMode, SearchQuery,
    USER_AGENT,
};
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Public API root.
pub const DEFAULT_BASE_URL: &str = "https://openlibrary.org";

/// Fields requested from `search.json`; the full documents are large.
const SEARCH_FIELDS: &str = "key,title,subtitle,author_name,publisher,first_publish_year,isbn,\
subject,language,number_of_pages_median,cover_i";

/// `search.json` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    /// Total matches; newer responses also send `num_found`.
    #[serde(default, rename = "numFound", alias = "num_found")]
    pub num_found: u64,
    /// Result documents.
    #[serde(default)]
    pub docs: Vec<SearchDoc>,
}

/// One work in a search response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchDoc {
    /// Work key, e.g. `/works/OL893415W`.
    pub key: String,
    /// Work title.
    pub title: Option<String>,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Author display names.
    #[serde(default)]
    pub author_name: Vec<String>,
    /// Publishers across editions.
    #[serde(default)]
    pub publisher: Vec<String>,
    /// Year of the earliest edition.
    pub first_publish_year: Option<i32>,
    /// ISBNs of all editions, 10 and 13 digits mixed.
    #[serde(default)]
    pub isbn: Vec<String>,
    /// Subjects.
    #[serde(default)]
    pub subject: Vec<String>,
    /// MARC language codes (ISO 639-2/B).
    #[serde(default)]
    pub language: Vec<String>,
    /// Median page count across editions.
    pub number_of_pages_median: Option<i64>,
    /// Cover id on covers.openlibrary.org.
    pub cover_i: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Open Library client.
pub struct OpenLibraryClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl OpenLibraryClient {
    /// Create a client.
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Query parameters for a search.
    pub fn search_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = match query.mode() {
            SearchMode::FreeText => vec![("q", query.raw_query().to_string())],
            SearchMode::Isbn => vec![("q", format!("isbn:{}", query.isbn_digits()))],
            SearchMode::Author => vec![("author", query.raw_query().to_string())],
            SearchMode::Title => {
                let mut params = vec![("title", query.raw_query().to_string())];
                if let Some(author) = query.author() {
                    params.push(("author", author.to_string()));
                }
                params
            }
        };

        params.push(("limit", query.max_results().to_string()));
        params.push(("offset", query.offset().to_string()));
        params.push(("fields", SEARCH_FIELDS.to_string()));
        params
    }
}

#[async_trait]
impl MetadataProvider for OpenLibraryClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenLibrary
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, query: &SearchQuery, referer: &str) -> Result<RawPage> {
        let referer = if referer.trim().is_empty() {
            DEFAULT_REFERER
        } else {
            referer
        };

        let mut request = HttpRequest::get(format!("{}/search.json", self.base_url))
            .header("Referer", referer)
            .header("User-Agent", USER_AGENT);
        for (name, value) in Self::search_params(query) {
            request = request.query(name, value);
        }

        tracing::debug!(mode = ?query.mode(), offset = query.offset(), "Searching Open Library");

        let response = self
            .transport
            .get(request)
            .await
            .map_err(|e| ProviderError::transport(ProviderKind::OpenLibrary, e.to_string()))?;

        if !response.is_success() {
            let message = response
                .json::<ErrorBody>()
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            return Err(
                ProviderError::http(ProviderKind::OpenLibrary, response.status, message).into(),
            );
        }

        let body: SearchResponse = response.json().map_err(|e| {
            ProviderError::http(
                ProviderKind::OpenLibrary,
                response.status,
                format!("Invalid response body: {}", e),
            )
        })?;

        Ok(RawPage {
            provider: ProviderKind::OpenLibrary,
            total_items: body.num_found,
            records: body.docs.into_iter().map(RawRecord::OpenLibrary).collect(),
        })
    }
}
