//! Application state shared across handlers.

use crate::config::Config;
use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::metadata::{
    GoogleBooksClient, HttpTransport, MetadataProvider, OpenLibraryClient, ReqwestTransport,
    SearchAggregator,
};
use std::sync::Arc;

/// Shared application state.
///
/// Provider clients are not stored here: they are built per request from the
/// current credentials, so a key saved in settings applies immediately.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// HTTP transport shared by all provider clients.
    transport: Arc<dyn HttpTransport>,
}

impl AppState {
    /// Create state with the production HTTP transport.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let transport = ReqwestTransport::new(
            config.providers.request_timeout(),
            config.providers.retry.policy(),
        )
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_transport(config, db, Arc::new(transport)))
    }

    /// Create state with a custom transport.
    pub fn with_transport(config: Config, db: Database, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config: Arc::new(config),
            db,
            transport,
        }
    }

    /// Shared outbound HTTP transport.
    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    /// Google Books key: the stored setting, else the config file.
    pub fn google_books_key(&self) -> Result<Option<String>> {
        let stored = self
            .db
            .get_setting(db::GOOGLE_BOOKS_API_KEY)?
            .filter(|key| !key.trim().is_empty());

        Ok(stored.or_else(|| {
            self.config
                .providers
                .google_books
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty())
        }))
    }

    /// Google Books client with the given key.
    pub fn google_books_client_with_key(&self, api_key: Option<String>) -> GoogleBooksClient {
        let settings = &self.config.providers.google_books;
        GoogleBooksClient::new(self.transport.clone(), settings.base_url.clone())
            .with_api_key(api_key)
            .ebooks_only(settings.ebooks_only)
    }

    /// Google Books client with the current key.
    pub fn google_books_client(&self) -> Result<GoogleBooksClient> {
        Ok(self.google_books_client_with_key(self.google_books_key()?))
    }

    /// Open Library client.
    pub fn open_library_client(&self) -> OpenLibraryClient {
        OpenLibraryClient::new(
            self.transport.clone(),
            self.config.providers.open_library.base_url.clone(),
        )
    }

    /// Aggregator over the enabled providers, Google Books first.
    pub fn aggregator(&self) -> Result<SearchAggregator> {
        let providers_config = &self.config.providers;
        let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();

        if providers_config.google_books.enabled {
            providers.push(Arc::new(self.google_books_client()?));
        }
        if providers_config.open_library.enabled {
            providers.push(Arc::new(self.open_library_client()));
        }

        Ok(SearchAggregator::new(providers).with_timeout(providers_config.provider_deadline()))
    }
}
