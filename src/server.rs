//! HTTP server and routes.

mod handlers;
mod state;

pub use handlers::search_query_from_params;
pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let search_routes = Router::new()
        .route("/", get(handlers::search))
        .route("/cover/{id}", get(handlers::search_cover));

    let book_routes = Router::new()
        .route("/", get(handlers::list_books).post(handlers::create_book))
        .route("/import", post(handlers::import_book))
        .route(
            "/{id}",
            get(handlers::get_book).patch(handlers::update_book),
        );

    let settings_routes = Router::new()
        .route(
            "/",
            get(handlers::get_preferences).put(handlers::update_preferences),
        )
        .route(
            "/api-keys",
            get(handlers::get_api_keys).put(handlers::update_api_keys),
        )
        .route("/api-keys/test", post(handlers::test_api_key))
        .route(
            "/indexers",
            get(handlers::list_indexers).post(handlers::create_indexer),
        )
        .route("/indexers/test", post(handlers::test_indexer))
        .route(
            "/indexers/{id}",
            get(handlers::get_indexer)
                .put(handlers::update_indexer)
                .delete(handlers::delete_indexer),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/search", search_routes)
        .nest("/api/books", book_routes)
        .nest("/api/settings", settings_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
