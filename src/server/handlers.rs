//! HTTP request handlers.

use crate::db::{self, BookWithDetails, Indexer};
use crate::error::{AppError, Result};
use crate::library::{
    CreateBookRequest, LibraryPage, LibraryQuery, UpdateBookRequest, from_candidate,
};
use crate::metadata::google_books::CoverSize;
use crate::metadata::{
    BookCandidate, MetadataProvider, ProviderKind, ProviderWarning, SearchMode, SearchQuery,
};
use crate::server::AppState;
use crate::settings::{
    ConnectionReport, IndexerRequest, Preferences, UpdatePreferencesRequest, test_connection,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Referer for provider calls: the caller's `Origin`, else the configured one.
fn referer(state: &AppState, headers: &HeaderMap) -> String {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.providers.referer.clone())
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// HEALTH
// ============================================================================

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    title: String,
    version: &'static str,
}

/// Liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        title: state.config.server.title.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// METADATA SEARCH
// ============================================================================

/// One search hit.
#[derive(Serialize)]
pub struct SearchItem {
    /// `<provider>:<providerId>`.
    id: String,
    #[serde(flatten)]
    candidate: BookCandidate,
}

/// Search response, shaped like a Google Books volume list.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    kind: &'static str,
    total_items: u64,
    has_more: bool,
    items: Vec<SearchItem>,
    warnings: Vec<ProviderWarning>,
}

/// Build a [`SearchQuery`] from `q`, `type`, `author`, `maxResults`, `startIndex`.
pub fn search_query_from_params(params: &HashMap<String, String>) -> Result<SearchQuery> {
    let mode = match param(params, "type") {
        Some(raw) => SearchMode::parse(raw)
            .ok_or_else(|| AppError::invalid("type", "Invalid search type"))?,
        None => SearchMode::FreeText,
    };

    let max_results = param(params, "maxResults")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(SearchQuery::DEFAULT_MAX_RESULTS);
    let offset = param(params, "startIndex")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);

    Ok(SearchQuery::new(param(params, "q").unwrap_or_default(), mode)?
        .with_author(param(params, "author"))
        .with_max_results(max_results)
        .with_offset(offset))
}

/// `GET /api/search`.
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SearchResponse>> {
    let query = search_query_from_params(&params)?;
    let referer = referer(&state, &headers);

    tracing::info!(
        mode = ?query.mode(),
        max_results = query.max_results(),
        offset = query.offset(),
        "Metadata search"
    );

    let page = state.aggregator()?.search(&query, &referer).await?;

    Ok(Json(SearchResponse {
        kind: "books#volumes",
        total_items: page.total_estimate,
        has_more: page.has_more,
        items: page
            .candidates
            .into_iter()
            .map(|candidate| SearchItem {
                id: candidate.qualified_id(),
                candidate,
            })
            .collect(),
        warnings: page.warnings,
    }))
}

/// Cover query parameters.
#[derive(Debug, Deserialize)]
pub struct CoverParams {
    size: Option<String>,
}

/// Cover lookup response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverResponse {
    cover_url: Option<String>,
}

/// `GET /api/search/cover/{id}`. Accepts a bare Google volume id or a
/// `google_books:` qualified id.
pub async fn search_cover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<CoverParams>,
) -> Result<Json<CoverResponse>> {
    let size = match params.size.as_deref().map(str::trim) {
        None | Some("") | Some("medium") => CoverSize::Medium,
        Some("small") => CoverSize::Small,
        Some("large") => CoverSize::Large,
        Some(_) => return Err(AppError::invalid("size", "Expected small, medium or large")),
    };

    let volume_id = match id.split_once(':') {
        Some((provider, volume_id)) => match ProviderKind::parse(provider) {
            Some(ProviderKind::GoogleBooks) => volume_id,
            _ => {
                return Err(AppError::invalid(
                    "id",
                    "Covers are only available for Google Books volumes",
                ));
            }
        },
        None => id.as_str(),
    };

    let client = state.google_books_client()?;
    let cover_url = client
        .cover_url(volume_id, size, &referer(&state, &headers))
        .await?;

    Ok(Json(CoverResponse { cover_url }))
}

// ============================================================================
// LIBRARY
// ============================================================================

/// `GET /api/books`.
pub async fn list_books(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<LibraryPage<BookWithDetails>>> {
    let query = LibraryQuery::from_params(&params, state.config.library.default_limit)?;
    let (books, total) = state.db.query_books(&query.compile())?;

    tracing::debug!(total, returned = books.len(), page = query.page.page(), "Listed books");
    Ok(Json(LibraryPage::new(books, total, query.page)))
}

/// `POST /api/books`.
pub async fn create_book(
    State(state): State<AppState>,
    Json(request): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<BookWithDetails>)> {
    let new_book = request.validate()?;
    let book = state.db.create_book(&new_book)?;

    tracing::info!(book_id = %book.book.id, title = %book.book.title, "Book added");
    Ok((StatusCode::CREATED, Json(book)))
}

/// `GET /api/books/{id}`.
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookWithDetails>> {
    state
        .db
        .get_book(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Book {}", id)))
}

/// `PATCH /api/books/{id}`.
pub async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateBookRequest>,
) -> Result<Json<BookWithDetails>> {
    let update = request.validate()?;
    state
        .db
        .update_book(&id, &update)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Book {}", id)))
}

/// `POST /api/books/import`: store a search candidate as a library book.
pub async fn import_book(
    State(state): State<AppState>,
    Json(candidate): Json<BookCandidate>,
) -> Result<(StatusCode, Json<BookWithDetails>)> {
    if candidate.title.trim().is_empty() {
        return Err(AppError::invalid("title", "Title is required"));
    }

    let book = state.db.create_book(&from_candidate(&candidate))?;

    tracing::info!(
        book_id = %book.book.id,
        source = %candidate.source_provider,
        provider_id = %candidate.provider_id,
        "Imported book from search"
    );
    Ok((StatusCode::CREATED, Json(book)))
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Stored provider keys; blank when unset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeys {
    google_books_api_key: String,
    open_library_api_key: String,
}

/// `GET /api/settings/api-keys` response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeysResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    api_keys: ApiKeys,
}

fn load_api_keys(state: &AppState) -> Result<ApiKeys> {
    Ok(ApiKeys {
        google_books_api_key: state
            .db
            .get_setting(db::GOOGLE_BOOKS_API_KEY)?
            .unwrap_or_default(),
        open_library_api_key: state
            .db
            .get_setting(db::OPEN_LIBRARY_API_KEY)?
            .unwrap_or_default(),
    })
}

/// `GET /api/settings/api-keys`.
pub async fn get_api_keys(State(state): State<AppState>) -> Result<Json<ApiKeysResponse>> {
    Ok(Json(ApiKeysResponse {
        message: None,
        api_keys: load_api_keys(&state)?,
    }))
}

/// `PUT /api/settings/api-keys` body. Absent keys are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApiKeysRequest {
    google_books_api_key: Option<String>,
    open_library_api_key: Option<String>,
}

/// `PUT /api/settings/api-keys`.
pub async fn update_api_keys(
    State(state): State<AppState>,
    Json(request): Json<UpdateApiKeysRequest>,
) -> Result<Json<ApiKeysResponse>> {
    if let Some(key) = &request.google_books_api_key {
        if key.trim().is_empty() {
            return Err(AppError::invalid(
                "googleBooksApiKey",
                "Google Books API key is required",
            ));
        }
        state.db.set_setting(db::GOOGLE_BOOKS_API_KEY, key.trim())?;
    }
    if let Some(key) = &request.open_library_api_key {
        state.db.set_setting(db::OPEN_LIBRARY_API_KEY, key.trim())?;
    }

    tracing::info!("API key settings updated");
    Ok(Json(ApiKeysResponse {
        message: Some("API key settings updated successfully"),
        api_keys: load_api_keys(&state)?,
    }))
}

/// `POST /api/settings/api-keys/test` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestApiKeyRequest {
    service: Option<String>,
    api_key: Option<String>,
}

/// Probe outcome.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestApiKeyResponse {
    is_valid: bool,
    message: String,
}

/// `POST /api/settings/api-keys/test`: run a one-result search with the
/// given credential. Provider failures are reported, not raised.
pub async fn test_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TestApiKeyRequest>,
) -> Result<Json<TestApiKeyResponse>> {
    let service = request
        .service
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::invalid("service", "API key and service are required"))?;
    let kind = ProviderKind::parse(service)
        .ok_or_else(|| AppError::invalid("service", "Unknown service"))?;

    let check = SearchQuery::new("test", SearchMode::FreeText)?.with_max_results(1);
    let referer = referer(&state, &headers);

    let outcome = match kind {
        ProviderKind::GoogleBooks => {
            let api_key = request
                .api_key
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AppError::invalid("apiKey", "API key and service are required"))?;
            state
                .google_books_client_with_key(Some(api_key))
                .search(&check, &referer)
                .await
        }
        ProviderKind::OpenLibrary => state.open_library_client().search(&check, &referer).await,
    };

    let response = match (kind, outcome) {
        (ProviderKind::GoogleBooks, Ok(_)) => TestApiKeyResponse {
            is_valid: true,
            message: "Google Books API key is valid".to_string(),
        },
        (ProviderKind::OpenLibrary, Ok(_)) => TestApiKeyResponse {
            is_valid: true,
            message: "Open Library API connection is working".to_string(),
        },
        (_, Err(AppError::Provider(e))) if e.is_transport() => TestApiKeyResponse {
            is_valid: false,
            message: format!("Connection test failed: {}", e.message),
        },
        (_, Err(AppError::Provider(e))) => TestApiKeyResponse {
            is_valid: false,
            message: format!("{} API error: {}", e.provider, e.message),
        },
        (_, Err(other)) => return Err(other),
    };

    tracing::info!(service = %kind, valid = response.is_valid, "API key tested");
    Ok(Json(response))
}

// ============================================================================
// PREFERENCES
// ============================================================================

/// Preferences response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    preferences: Preferences,
}

/// `GET /api/settings`.
pub async fn get_preferences(State(state): State<AppState>) -> Result<Json<PreferencesResponse>> {
    Ok(Json(PreferencesResponse {
        message: None,
        preferences: state.db.get_preferences()?,
    }))
}

/// `PUT /api/settings`.
pub async fn update_preferences(
    State(state): State<AppState>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<Json<PreferencesResponse>> {
    let preferences = request.apply(state.db.get_preferences()?)?;
    state.db.set_preferences(&preferences)?;

    tracing::info!(
        language = %preferences.language,
        default_format = %preferences.default_format,
        "Preferences updated"
    );
    Ok(Json(PreferencesResponse {
        message: Some("Settings updated successfully"),
        preferences,
    }))
}

// ============================================================================
// INDEXERS
// ============================================================================

/// Indexer list.
#[derive(Serialize)]
pub struct IndexersResponse {
    indexers: Vec<Indexer>,
}

/// Single indexer, with a message after writes.
#[derive(Serialize)]
pub struct IndexerResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    indexer: Indexer,
}

/// Bare acknowledgement.
#[derive(Serialize)]
pub struct MessageResponse {
    message: &'static str,
}

fn indexer_not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Indexer {}", id))
}

/// `GET /api/settings/indexers`.
pub async fn list_indexers(State(state): State<AppState>) -> Result<Json<IndexersResponse>> {
    Ok(Json(IndexersResponse {
        indexers: state.db.list_indexers()?,
    }))
}

/// `POST /api/settings/indexers`.
pub async fn create_indexer(
    State(state): State<AppState>,
    Json(request): Json<IndexerRequest>,
) -> Result<(StatusCode, Json<IndexerResponse>)> {
    let indexer = state.db.create_indexer(&request.validate()?)?;

    tracing::info!(indexer_id = %indexer.id, name = %indexer.name, kind = %indexer.kind, "Indexer added");
    Ok((
        StatusCode::CREATED,
        Json(IndexerResponse {
            message: Some("Indexer created successfully"),
            indexer,
        }),
    ))
}

/// `GET /api/settings/indexers/{id}`.
pub async fn get_indexer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexerResponse>> {
    let indexer = state.db.get_indexer(&id)?.ok_or_else(|| indexer_not_found(&id))?;
    Ok(Json(IndexerResponse {
        message: None,
        indexer,
    }))
}

/// `PUT /api/settings/indexers/{id}`.
pub async fn update_indexer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<IndexerRequest>,
) -> Result<Json<IndexerResponse>> {
    let settings = request.validate()?;
    let indexer = state
        .db
        .update_indexer(&id, &settings)?
        .ok_or_else(|| indexer_not_found(&id))?;

    tracing::info!(indexer_id = %indexer.id, "Indexer updated");
    Ok(Json(IndexerResponse {
        message: Some("Indexer updated successfully"),
        indexer,
    }))
}

/// `DELETE /api/settings/indexers/{id}`.
pub async fn delete_indexer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if !state.db.delete_indexer(&id)? {
        return Err(indexer_not_found(&id));
    }

    tracing::info!(indexer_id = %id, "Indexer deleted");
    Ok(Json(MessageResponse {
        message: "Indexer deleted successfully",
    }))
}

/// `POST /api/settings/indexers/test`: call the indexer's capabilities
/// endpoint with the submitted settings. Nothing is stored.
pub async fn test_indexer(
    State(state): State<AppState>,
    Json(request): Json<IndexerRequest>,
) -> Result<Json<ConnectionReport>> {
    let settings = request.validate()?;
    let report = test_connection(state.transport(), &settings).await;

    tracing::info!(kind = %settings.kind, valid = report.is_valid, "Indexer tested");
    Ok(Json(report))
}
