//! Google Books volumes API client.

use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use super::{
    DEFAULT_REFERER, MetadataProvider, ProviderKind, RawPage, RawRecord, SearchMode, SearchQuery,
    USER_AGENT,
};
use crate::error::{AppError, ProviderError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Public API root.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/books/v1";

const NOT_CONFIGURED: &str =
    "Google Books API key is not configured. Please set it in Settings > API Keys.";

/// `GET /volumes` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    /// Resource kind, normally `books#volumes`.
    #[serde(default)]
    pub kind: String,
    /// Approximate total match count.
    #[serde(default)]
    pub total_items: u64,
    /// Omitted entirely when nothing matched.
    #[serde(default)]
    pub items: Vec<Volume>,
}

/// One volume.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Google volume id.
    pub id: String,
    /// Bibliographic data.
    #[serde(default)]
    pub volume_info: VolumeInfo,
}

/// Bibliographic part of a volume.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    /// Title.
    pub title: Option<String>,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Author names, primary first.
    pub authors: Option<Vec<String>>,
    /// Publisher.
    pub publisher: Option<String>,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    pub published_date: Option<String>,
    /// Description, may contain HTML.
    pub description: Option<String>,
    /// ISBNs and other identifiers.
    pub industry_identifiers: Option<Vec<IndustryIdentifier>>,
    /// Printed page count.
    pub page_count: Option<i64>,
    /// BISAC-like category labels.
    pub categories: Option<Vec<String>>,
    /// ISO 639-1 language code.
    pub language: Option<String>,
    /// Cover links.
    pub image_links: Option<ImageLinks>,
}

/// Tagged identifier such as `ISBN_13`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndustryIdentifier {
    /// `ISBN_10`, `ISBN_13`, `OTHER`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Identifier value.
    pub identifier: String,
}

/// Cover image links, smallest first.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ImageLinks {
    pub small_thumbnail: Option<String>,
    pub thumbnail: Option<String>,
    pub small: Option<String>,
    pub medium: Option<String>,
    pub large: Option<String>,
    pub extra_large: Option<String>,
}

/// Requested cover size for [`GoogleBooksClient::cover_url`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverSize {
    /// Thumbnail.
    Small,
    /// Medium, falling back to the thumbnail.
    #[default]
    Medium,
    /// Largest available.
    Large,
}

impl ImageLinks {
    /// Best link for `size`, walking down to smaller sizes when missing.
    pub fn pick(&self, size: CoverSize) -> Option<&str> {
        let ladder: [&Option<String>; 3] = match size {
            CoverSize::Small => [&self.small_thumbnail, &self.thumbnail, &None],
            CoverSize::Medium => [&self.medium, &self.thumbnail, &None],
            CoverSize::Large => [&self.large, &self.extra_large, &self.medium],
        };
        ladder.into_iter().find_map(|link| link.as_deref())
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// `isbn:` scoped term, hyphens removed.
pub fn isbn_query(isbn: &str) -> String {
    let digits: String = isbn.trim().chars().filter(|c| *c != '-').collect();
    format!("isbn:{}", digits)
}

/// Phrase body with embedded double quotes removed.
fn phrase(value: &str) -> String {
    value
        .replace('"', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `intitle:"..."`, plus `+inauthor:"..."` when an author is given.
pub fn title_query(title: &str, author: Option<&str>) -> String {
    let mut query = format!("intitle:\"{}\"", phrase(title));
    if let Some(author) = author.map(phrase).filter(|a| !a.is_empty()) {
        query.push_str(&format!("+inauthor:\"{}\"", author));
    }
    query
}

/// `inauthor:"..."`.
pub fn author_query(author: &str) -> String {
    format!("inauthor:\"{}\"", phrase(author))
}

/// The `q` parameter for a query.
pub fn build_query(query: &SearchQuery) -> String {
    match query.mode() {
        SearchMode::FreeText => query.raw_query().to_string(),
        SearchMode::Isbn => isbn_query(query.raw_query()),
        SearchMode::Title => title_query(query.raw_query(), query.author()),
        SearchMode::Author => author_query(query.raw_query()),
    }
}

/// Google Books client.
///
/// Built per request from the stored credential; nothing is shared between
/// requests except the transport.
pub struct GoogleBooksClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    api_key: Option<String>,
    ebooks_only: bool,
}

impl GoogleBooksClient {
    /// Create an unconfigured client.
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            ebooks_only: false,
        }
    }

    /// Set the API key used by subsequent calls.
    pub fn configure(&mut self, api_key: impl Into<String>) {
        self.api_key = Some(api_key.into());
    }

    /// Builder form of [`configure`](Self::configure).
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Restrict free-text searches to ebooks.
    pub fn ebooks_only(mut self, ebooks_only: bool) -> Self {
        self.ebooks_only = ebooks_only;
        self
    }

    /// Whether a non-blank key is set.
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(AppError::NotConfigured(NOT_CONFIGURED.to_string())),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
        referer: &str,
    ) -> Result<T> {
        let key = self.api_key()?;

        let referer = if referer.trim().is_empty() {
            DEFAULT_REFERER
        } else {
            referer
        };

        let mut request = HttpRequest::get(format!("{}{}", self.base_url, endpoint))
            .header("Referer", referer)
            .header("User-Agent", USER_AGENT);
        for (name, value) in params {
            request = request.query(name, value);
        }
        request = request.query("key", key);

        let response = self
            .transport
            .get(request)
            .await
            .map_err(|e| ProviderError::transport(ProviderKind::GoogleBooks, e.to_string()))?;

        decode(response)
    }

    /// Raw `/volumes` search.
    pub async fn search_volumes(
        &self,
        query: &SearchQuery,
        referer: &str,
    ) -> Result<VolumesResponse> {
        let mut params = vec![
            ("q", build_query(query)),
            ("maxResults", query.max_results().to_string()),
            ("startIndex", query.offset().to_string()),
            ("orderBy", "relevance".to_string()),
            ("printType", "books".to_string()),
        ];
        if self.ebooks_only && query.mode() == SearchMode::FreeText {
            params.push(("filter", "ebooks".to_string()));
        }

        tracing::debug!(mode = ?query.mode(), offset = query.offset(), "Searching Google Books");
        self.request("/volumes", params, referer).await
    }

    /// Single volume by id.
    pub async fn get_volume(&self, volume_id: &str, referer: &str) -> Result<Volume> {
        let volume_id = volume_id.trim();
        if volume_id.is_empty() || volume_id.contains('/') {
            return Err(AppError::invalid("id", "Invalid volume id"));
        }
        self.request(&format!("/volumes/{}", volume_id), Vec::new(), referer)
            .await
    }

    /// Cover URL for a volume at the requested size, if it has one.
    pub async fn cover_url(
        &self,
        volume_id: &str,
        size: CoverSize,
        referer: &str,
    ) -> Result<Option<String>> {
        let volume = self.get_volume(volume_id, referer).await?;
        Ok(volume
            .volume_info
            .image_links
            .as_ref()
            .and_then(|links| links.pick(size))
            .map(str::to_string))
    }
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    if !response.is_success() {
        let message = response
            .json::<ErrorEnvelope>()
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|body| body.message)
            .unwrap_or_else(|| format!("HTTP {}", response.status));

        return Err(ProviderError::http(ProviderKind::GoogleBooks, response.status, message).into());
    }

    response.json::<T>().map_err(|e| {
        ProviderError::http(
            ProviderKind::GoogleBooks,
            response.status,
            format!("Invalid response body: {}", e),
        )
        .into()
    })
}

#[async_trait]
impl MetadataProvider for GoogleBooksClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleBooks
    }

    fn is_configured(&self) -> bool {
        GoogleBooksClient::is_configured(self)
    }

    async fn search(&self, query: &SearchQuery, referer: &str) -> Result<RawPage> {
        let response = self.search_volumes(query, referer).await?;
        Ok(RawPage {
            provider: ProviderKind::GoogleBooks,
            total_items: response.total_items,
            records: response
                .items
                .into_iter()
                .map(RawRecord::GoogleBooks)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::transport::TransportError;
    use crate::metadata::transport::mock::MockTransport;
    use serde_json::json;

    fn client(transport: &Arc<MockTransport>) -> GoogleBooksClient {
        GoogleBooksClient::new(transport.clone(), DEFAULT_BASE_URL)
    }

    #[test]
    fn query_builders() {
        assert_eq!(isbn_query("978-0-553-29335-7"), "isbn:9780553293357");
        assert_eq!(title_query("Dune", None), "intitle:\"Dune\"");
        assert_eq!(
            title_query("Dune", Some("Frank Herbert")),
            "intitle:\"Dune\"+inauthor:\"Frank Herbert\""
        );
        assert_eq!(title_query("Dune", Some(" ")), "intitle:\"Dune\"");
        assert_eq!(author_query(" Ursula K. Le Guin "), "inauthor:\"Ursula K. Le Guin\"");
    }

    #[test]
    fn embedded_quotes_do_not_break_phrases() {
        assert_eq!(
            title_query("The \"Lost\" Chapter", Some("J. \"Jack\" Doe")),
            "intitle:\"The Lost Chapter\"+inauthor:\"J. Jack Doe\""
        );
        assert_eq!(title_query("Dune", Some("\"\"")), "intitle:\"Dune\"");
        assert_eq!(author_query("\"Anonymous\""), "inauthor:\"Anonymous\"");
    }

    #[test]
    fn build_query_per_mode() {
        let title = SearchQuery::new("Foundation", SearchMode::Title)
            .unwrap()
            .with_author(Some("Asimov"));
        assert_eq!(build_query(&title), "intitle:\"Foundation\"+inauthor:\"Asimov\"");

        let free = SearchQuery::new("space opera", SearchMode::FreeText).unwrap();
        assert_eq!(build_query(&free), "space opera");

        let isbn = SearchQuery::new("0-553-29335-4", SearchMode::Isbn).unwrap();
        assert_eq!(build_query(&isbn), "isbn:0553293354");
    }

    #[test]
    fn configured_requires_non_blank_key() {
        let transport = Arc::new(MockTransport::json(200, json!({})));
        let mut c = client(&transport);
        assert!(!c.is_configured());
        c.configure("   ");
        assert!(!c.is_configured());
        c.configure("abc");
        assert!(c.is_configured());
    }

    #[test]
    fn cover_ladder() {
        let links = ImageLinks {
            small_thumbnail: Some("s".into()),
            thumbnail: Some("t".into()),
            extra_large: Some("xl".into()),
            ..Default::default()
        };
        assert_eq!(links.pick(CoverSize::Small), Some("s"));
        assert_eq!(links.pick(CoverSize::Medium), Some("t"));
        assert_eq!(links.pick(CoverSize::Large), Some("xl"));
        assert_eq!(ImageLinks::default().pick(CoverSize::Large), None);
    }

    #[tokio::test]
    async fn unconfigured_search_makes_no_request() {
        let transport = Arc::new(MockTransport::json(200, json!({})));
        let c = client(&transport);
        let query = SearchQuery::new("dune", SearchMode::FreeText).unwrap();

        let err = c.search(&query, "").await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn search_sends_key_referer_and_paging() {
        let transport = Arc::new(MockTransport::json(
            200,
            json!({
                "kind": "books#volumes",
                "totalItems": 1,
                "items": [{ "id": "abc", "volumeInfo": { "title": "Dune" } }]
            }),
        ));
        let c = client(&transport).with_api_key(Some("secret".into())).ebooks_only(true);
        let query = SearchQuery::new("dune", SearchMode::FreeText)
            .unwrap()
            .with_max_results(5)
            .with_offset(10);

        let page = c.search(&query, "https://app.example").await.unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.records.len(), 1);

        let request = transport.last_request().unwrap();
        assert_eq!(request.url, "https://www.googleapis.com/books/v1/volumes");
        assert_eq!(request.query_value("q"), Some("dune"));
        assert_eq!(request.query_value("key"), Some("secret"));
        assert_eq!(request.query_value("maxResults"), Some("5"));
        assert_eq!(request.query_value("startIndex"), Some("10"));
        assert_eq!(request.query_value("filter"), Some("ebooks"));
        assert_eq!(request.header_value("Referer"), Some("https://app.example"));
        assert_eq!(request.header_value("User-Agent"), Some(USER_AGENT));
    }

    #[tokio::test]
    async fn default_referer_used_when_blank() {
        let transport = Arc::new(MockTransport::json(200, json!({ "totalItems": 0 })));
        let c = client(&transport).with_api_key(Some("k".into()));
        let query = SearchQuery::new("x", SearchMode::Author).unwrap();

        let page = c.search(&query, "").await.unwrap();
        assert!(page.records.is_empty());
        let request = transport.last_request().unwrap();
        assert_eq!(request.header_value("Referer"), Some(DEFAULT_REFERER));
        assert_eq!(request.query_value("filter"), None);
    }

    #[tokio::test]
    async fn provider_message_embedded_on_error_status() {
        let transport = Arc::new(MockTransport::json(
            403,
            json!({ "error": { "code": 403, "message": "API key not valid." } }),
        ));
        let c = client(&transport).with_api_key(Some("bad".into()));
        let query = SearchQuery::new("dune", SearchMode::FreeText).unwrap();

        match c.search(&query, "").await.unwrap_err() {
            AppError::Provider(e) => {
                assert_eq!(e.status, 403);
                assert_eq!(e.message, "API key not valid.");
                assert_eq!(e.provider, ProviderKind::GoogleBooks);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_has_synthetic_status() {
        let transport = Arc::new(MockTransport::failing(TransportError::Timeout));
        let c = client(&transport).with_api_key(Some("k".into()));
        let query = SearchQuery::new("dune", SearchMode::FreeText).unwrap();

        match c.search(&query, "").await.unwrap_err() {
            AppError::Provider(e) => {
                assert!(e.is_transport());
                assert_eq!(e.message, "Request timed out");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cover_url_uses_volume_detail() {
        let transport = Arc::new(MockTransport::json(
            200,
            json!({
                "id": "vol1",
                "volumeInfo": {
                    "title": "Dune",
                    "imageLinks": { "thumbnail": "http://t", "medium": "http://m" }
                }
            }),
        ));
        let c = client(&transport).with_api_key(Some("k".into()));

        let url = c.cover_url("vol1", CoverSize::Medium, "").await.unwrap();
        assert_eq!(url.as_deref(), Some("http://m"));
        assert_eq!(
            transport.last_request().unwrap().url,
            "https://www.googleapis.com/books/v1/volumes/vol1"
        );
    }
}
