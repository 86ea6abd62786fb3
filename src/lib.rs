//! bookarr: a personal book library with metadata search.
//!
//! This crate searches Google Books and Open Library, normalizes their
//! records into one candidate shape, and keeps a SQLite-backed library
//! that can be filtered, sorted and paginated over HTTP.
//!
//! # Features
//!
//! - Concurrent search across providers with deduplication
//! - Partial results when a provider fails
//! - Per-request provider credentials from the settings store
//! - Library listing with filters, sorting and pagination
//! - Import of search results into the library
//! - Indexer definitions with connection checks

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Library books and queries.
pub mod library;
/// Metadata providers and search aggregation.
pub mod metadata;
/// HTTP server.
pub mod server;
/// Preferences and indexers.
pub mod settings;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
