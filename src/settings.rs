//! Persisted settings: general preferences and search indexers.

pub mod indexer;
pub mod preferences;

pub use indexer::{ConnectionDetails, ConnectionReport, IndexerRequest, IndexerSettings, test_connection};
pub use preferences::{Preferences, UpdatePreferencesRequest};
