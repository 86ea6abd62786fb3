mod schema;

pub use schema::Database;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings key for the Google Books API key.
pub const GOOGLE_BOOKS_API_KEY: &str = "googleBooksApiKey";

/// Settings key for the Open Library API key.
pub const OPEN_LIBRARY_API_KEY: &str = "openLibraryApiKey";

/// Settings key for the general preferences document.
pub const PREFERENCES: &str = "preferences";

/// Reading status of a library book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookStatus {
    /// Not started.
    #[default]
    Unread,
    /// In progress.
    Reading,
    /// Finished.
    Read,
    /// On the wishlist.
    WantToRead,
    /// Abandoned.
    DidNotFinish,
}

impl BookStatus {
    /// Stored and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Unread => "UNREAD",
            BookStatus::Reading => "READING",
            BookStatus::Read => "READ",
            BookStatus::WantToRead => "WANT_TO_READ",
            BookStatus::DidNotFinish => "DID_NOT_FINISH",
        }
    }

    /// Parse the wire representation. Case-sensitive, like the stored values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UNREAD" => Some(BookStatus::Unread),
            "READING" => Some(BookStatus::Reading),
            "READ" => Some(BookStatus::Read),
            "WANT_TO_READ" => Some(BookStatus::WantToRead),
            "DID_NOT_FINISH" => Some(BookStatus::DidNotFinish),
            _ => None,
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a download attached to a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    /// Waiting for a slot.
    #[default]
    Queued,
    /// Transferring.
    Downloading,
    /// Paused by the user.
    Paused,
    /// Done.
    Completed,
    /// Gave up.
    Failed,
}

impl DownloadStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "QUEUED",
            DownloadStatus::Downloading => "DOWNLOADING",
            DownloadStatus::Paused => "PAUSED",
            DownloadStatus::Completed => "COMPLETED",
            DownloadStatus::Failed => "FAILED",
        }
    }

    /// Parse the stored representation; unknown values read as `Failed`.
    pub fn parse(value: &str) -> Self {
        match value {
            "QUEUED" => DownloadStatus::Queued,
            "DOWNLOADING" => DownloadStatus::Downloading,
            "PAUSED" => DownloadStatus::Paused,
            "COMPLETED" => DownloadStatus::Completed,
            _ => DownloadStatus::Failed,
        }
    }
}

/// Indexer flavour; decides which capabilities endpoint is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    /// NZBGeek.
    Nzbgeek,
    /// NZBHydra2 meta-indexer.
    Nzbhydra,
    /// Any Newznab-compatible indexer.
    Newznab,
    /// Self-hosted or unknown indexer speaking the Newznab caps call.
    Custom,
}

impl IndexerKind {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerKind::Nzbgeek => "nzbgeek",
            IndexerKind::Nzbhydra => "nzbhydra",
            IndexerKind::Newznab => "newznab",
            IndexerKind::Custom => "custom",
        }
    }

    /// Parse a request or stored value, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nzbgeek" => Some(IndexerKind::Nzbgeek),
            "nzbhydra" => Some(IndexerKind::Nzbhydra),
            "newznab" => Some(IndexerKind::Newznab),
            "custom" => Some(IndexerKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for IndexerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerKind::Nzbgeek => write!(f, "NZBGeek"),
            IndexerKind::Nzbhydra => write!(f, "NZBHydra2"),
            IndexerKind::Newznab => write!(f, "Newznab"),
            IndexerKind::Custom => write!(f, "Custom indexer"),
        }
    }
}

/// Configured search indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indexer {
    /// Indexer ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Flavour.
    #[serde(rename = "type")]
    pub kind: IndexerKind,
    /// Base URL, no trailing slash.
    pub url: String,
    /// API key.
    pub api_key: String,
    /// Used for searches.
    pub enabled: bool,
    /// 1 (highest) to 10.
    pub priority: i64,
    /// Rate limit per minute.
    pub requests_per_minute: i64,
    /// Rate limit per day.
    pub requests_per_day: i64,
    /// General search allowed.
    pub search_enabled: bool,
    /// Book search allowed.
    pub book_search_enabled: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Book row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBook {
    /// Book ID.
    pub id: String,
    /// Title.
    pub title: String,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// ISBN-10.
    pub isbn: Option<String>,
    /// ISBN-13.
    pub isbn13: Option<String>,
    /// ISO 639-1 language code.
    pub language: String,
    /// Page count.
    pub page_count: Option<i64>,
    /// Publication date, `YYYY-MM-DD`.
    pub published_at: Option<String>,
    /// Publisher.
    pub publisher: Option<String>,
    /// File format, e.g. `epub`.
    pub format: Option<String>,
    /// Reading status.
    pub status: BookStatus,
    /// Percentage read, 0-100.
    pub reading_progress: i64,
    /// Rating, 1-5.
    pub personal_rating: Option<i64>,
    /// Creation timestamp.
    pub date_added: i64,
    /// When the book was finished.
    pub date_read: Option<i64>,
    /// Google Books volume id, when imported from there.
    pub google_books_id: Option<String>,
    /// Cover image URL.
    pub image_url: Option<String>,
    /// Owning series.
    pub series_id: Option<String>,
    /// Position in the series.
    pub series_order: Option<i64>,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Author row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Author ID.
    pub id: String,
    /// Display name, unique.
    pub name: String,
    /// Name used for sorting, e.g. `Herbert, Frank`.
    pub sort_name: Option<String>,
}

/// An author as attached to one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAuthor {
    /// The author.
    pub author: Author,
    /// Contribution, e.g. `author`, `translator`.
    pub role: String,
    /// Position in the book's author list.
    pub order: i64,
}

/// Series row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    /// Series ID.
    pub id: String,
    /// Series name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
}

/// Download row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    /// Download ID.
    pub id: String,
    /// Book the download belongs to.
    pub book_id: String,
    /// Release title.
    pub title: String,
    /// Current state.
    pub status: DownloadStatus,
    /// Percentage transferred.
    pub progress: f64,
    /// Size in bytes.
    pub size: Option<i64>,
    /// Indexer the release came from.
    pub indexer: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// A book with its relations, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookWithDetails {
    /// Book columns.
    #[serde(flatten)]
    pub book: StoredBook,
    /// Authors in list order.
    pub authors: Vec<BookAuthor>,
    /// Series, if any.
    pub series: Option<Series>,
    /// Category labels.
    pub categories: Vec<String>,
    /// Downloads, newest first.
    pub downloads: Vec<Download>,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            BookStatus::Unread,
            BookStatus::Reading,
            BookStatus::Read,
            BookStatus::WantToRead,
            BookStatus::DidNotFinish,
        ] {
            assert_eq!(BookStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookStatus::parse("reading"), None);
        assert_eq!(
            serde_json::to_string(&BookStatus::WantToRead).unwrap(),
            "\"WANT_TO_READ\""
        );
    }
}
