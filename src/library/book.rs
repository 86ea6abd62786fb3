//! Book creation and update requests.

use crate::db::BookStatus;
use crate::error::{AppError, Result};
use crate::metadata::{BookCandidate, ProviderKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

/// Language stored when a request gives none.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Body of `POST /api/books`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookRequest {
    /// 1 to 500 characters.
    pub title: String,
    /// At most 500 characters.
    pub subtitle: Option<String>,
    /// Author names; at least one, none blank.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Digits and hyphens, or empty.
    pub isbn: Option<String>,
    /// Digits and hyphens, or empty.
    pub isbn13: Option<String>,
    /// At most 5000 characters.
    pub description: Option<String>,
    /// `YYYY`, `YYYY-MM`, `YYYY-MM-DD` or an RFC 3339 timestamp.
    pub published_at: Option<String>,
    /// At least 1.
    pub page_count: Option<i64>,
    /// Two-letter code.
    pub language: Option<String>,
    /// Category labels.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Existing series.
    pub series_id: Option<String>,
    /// At least 1.
    pub series_order: Option<i64>,
    /// Publisher.
    pub publisher: Option<String>,
    /// File format.
    pub format: Option<String>,
    /// Initial status.
    pub status: Option<BookStatus>,
    /// Cover image URL.
    pub image_url: Option<String>,
    /// Google Books volume id.
    pub google_books_id: Option<String>,
}

/// A validated book, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub(crate) title: String,
    pub(crate) subtitle: Option<String>,
    pub(crate) authors: Vec<String>,
    pub(crate) isbn: Option<String>,
    pub(crate) isbn13: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) published_at: Option<NaiveDate>,
    pub(crate) page_count: Option<i64>,
    pub(crate) language: String,
    pub(crate) categories: Vec<String>,
    pub(crate) series_id: Option<String>,
    pub(crate) series_order: Option<i64>,
    pub(crate) publisher: Option<String>,
    pub(crate) format: Option<String>,
    pub(crate) status: BookStatus,
    pub(crate) image_url: Option<String>,
    pub(crate) google_books_id: Option<String>,
}

impl NewBook {
    /// Title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Author names in order.
    pub fn authors(&self) -> &[String] {
        &self.authors
    }
}

impl CreateBookRequest {
    /// Check every field and produce a [`NewBook`].
    pub fn validate(self) -> Result<NewBook> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::invalid("title", "Title is required"));
        }
        if title.chars().count() > 500 {
            return Err(AppError::invalid("title", "Title is too long"));
        }

        let subtitle = blank_to_none(self.subtitle);
        if subtitle.as_ref().is_some_and(|s| s.chars().count() > 500) {
            return Err(AppError::invalid("subtitle", "Subtitle is too long"));
        }

        if self.authors.is_empty() {
            return Err(AppError::invalid("authors", "At least one author is required"));
        }
        let mut authors = Vec::with_capacity(self.authors.len());
        for name in &self.authors {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::invalid("authors", "Author name is required"));
            }
            if !authors.iter().any(|a: &String| a == name) {
                authors.push(name.to_string());
            }
        }

        let isbn = checked_isbn("isbn", self.isbn)?;
        let isbn13 = checked_isbn("isbn13", self.isbn13)?;

        let description = blank_to_none(self.description);
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > 5000)
        {
            return Err(AppError::invalid("description", "Description is too long"));
        }

        let published_at = match blank_to_none(self.published_at) {
            Some(raw) => Some(parse_date(&raw).ok_or_else(|| {
                AppError::invalid("publishedAt", "Expected a date such as 1965-08-01")
            })?),
            None => None,
        };

        if self.page_count.is_some_and(|p| p < 1) {
            return Err(AppError::invalid("pageCount", "Page count must be positive"));
        }

        let language = match blank_to_none(self.language) {
            Some(lang) if lang.chars().count() != 2 => {
                return Err(AppError::invalid(
                    "language",
                    "Language must be a 2-letter code",
                ));
            }
            Some(lang) => lang.to_ascii_lowercase(),
            None => DEFAULT_LANGUAGE.to_string(),
        };

        if self.series_order.is_some_and(|o| o < 1) {
            return Err(AppError::invalid(
                "seriesOrder",
                "Series order must be positive",
            ));
        }

        let mut categories: Vec<String> = Vec::new();
        for category in self.categories {
            let category = category.trim();
            if !category.is_empty() && !categories.iter().any(|c| c == category) {
                categories.push(category.to_string());
            }
        }

        Ok(NewBook {
            title: title.to_string(),
            subtitle,
            authors,
            isbn,
            isbn13,
            description,
            published_at,
            page_count: self.page_count,
            language,
            categories,
            series_id: blank_to_none(self.series_id),
            series_order: self.series_order,
            publisher: blank_to_none(self.publisher),
            format: blank_to_none(self.format).map(|f| f.to_ascii_lowercase()),
            status: self.status.unwrap_or_default(),
            image_url: blank_to_none(self.image_url),
            google_books_id: blank_to_none(self.google_books_id),
        })
    }
}

/// Convert a search candidate into a library book.
///
/// Candidates without authors are stored under "Unknown Author" so the
/// at-least-one-author rule holds for imported books too.
pub fn from_candidate(candidate: &BookCandidate) -> NewBook {
    let authors = if candidate.authors.is_empty() {
        vec!["Unknown Author".to_string()]
    } else {
        candidate.authors.clone()
    };

    NewBook {
        title: candidate.title.clone(),
        subtitle: candidate.subtitle.clone(),
        authors,
        isbn: candidate.isbn10.clone(),
        isbn13: candidate.isbn13.clone(),
        description: candidate.description.clone(),
        published_at: candidate.published_at,
        page_count: candidate.page_count.map(i64::from),
        language: candidate.language.clone(),
        categories: candidate.categories.iter().cloned().collect(),
        series_id: None,
        series_order: None,
        publisher: candidate.publisher.clone(),
        format: None,
        status: BookStatus::WantToRead,
        image_url: candidate.cover_image_url.clone(),
        google_books_id: (candidate.source_provider == ProviderKind::GoogleBooks)
            .then(|| candidate.provider_id.clone()),
    }
}

/// Body of `PATCH /api/books/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookRequest {
    /// New status.
    pub status: Option<BookStatus>,
    /// 0 to 100.
    pub reading_progress: Option<i64>,
    /// 1 to 5.
    pub personal_rating: Option<i64>,
    /// Date or RFC 3339 timestamp the book was finished.
    pub date_read: Option<String>,
}

/// A validated partial update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookUpdate {
    /// New status.
    pub status: Option<BookStatus>,
    /// New progress.
    pub reading_progress: Option<i64>,
    /// New rating.
    pub personal_rating: Option<i64>,
    /// New finish time, Unix seconds.
    pub date_read: Option<i64>,
}

impl BookUpdate {
    /// Whether nothing would change.
    pub fn is_empty(&self) -> bool {
        self == &BookUpdate::default()
    }
}

impl UpdateBookRequest {
    /// Check ranges and resolve `dateRead`.
    ///
    /// Moving a book to `READ` without a `dateRead` stamps the current time.
    pub fn validate(self) -> Result<BookUpdate> {
        if self
            .reading_progress
            .is_some_and(|p| !(0..=100).contains(&p))
        {
            return Err(AppError::invalid(
                "readingProgress",
                "Must be between 0 and 100",
            ));
        }
        if self
            .personal_rating
            .is_some_and(|r| !(1..=5).contains(&r))
        {
            return Err(AppError::invalid("personalRating", "Must be between 1 and 5"));
        }

        let date_read = match blank_to_none(self.date_read) {
            Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
                AppError::invalid("dateRead", "Expected a date or RFC 3339 timestamp")
            })?),
            None if self.status == Some(BookStatus::Read) => Some(Utc::now().timestamp()),
            None => None,
        };

        Ok(BookUpdate {
            status: self.status,
            reading_progress: self.reading_progress,
            personal_rating: self.personal_rating,
            date_read,
        })
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn checked_isbn(field: &str, value: Option<String>) -> Result<Option<String>> {
    match blank_to_none(value) {
        Some(isbn) if !isbn.chars().all(|c| c.is_ascii_digit() || c == '-') => {
            Err(AppError::invalid(field, "Invalid ISBN format"))
        }
        other => Ok(other),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    crate::metadata::normalize::parse_published_date(raw)
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    parse_date(raw)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateBookRequest {
        CreateBookRequest {
            title: "Dune".into(),
            authors: vec!["Frank Herbert".into()],
            ..Default::default()
        }
    }

    #[test]
    fn minimal_request_gets_defaults() {
        let book = request().validate().unwrap();
        assert_eq!(book.title(), "Dune");
        assert_eq!(book.language, "en");
        assert_eq!(book.status, BookStatus::Unread);
        assert!(book.isbn.is_none());
    }

    #[test]
    fn field_rules() {
        let cases: Vec<(&str, CreateBookRequest)> = vec![
            ("title", CreateBookRequest { title: "  ".into(), ..request() }),
            ("title", CreateBookRequest { title: "x".repeat(501), ..request() }),
            ("subtitle", CreateBookRequest { subtitle: Some("x".repeat(501)), ..request() }),
            ("authors", CreateBookRequest { authors: vec![], ..request() }),
            ("authors", CreateBookRequest { authors: vec!["A".into(), " ".into()], ..request() }),
            ("isbn", CreateBookRequest { isbn: Some("978-X".into()), ..request() }),
            ("description", CreateBookRequest { description: Some("x".repeat(5001)), ..request() }),
            ("pageCount", CreateBookRequest { page_count: Some(0), ..request() }),
            ("language", CreateBookRequest { language: Some("eng".into()), ..request() }),
            ("seriesOrder", CreateBookRequest { series_order: Some(0), ..request() }),
            ("publishedAt", CreateBookRequest { published_at: Some("someday".into()), ..request() }),
        ];

        for (expected, case) in cases {
            match case.validate() {
                Err(AppError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn empty_isbn_is_allowed() {
        let book = CreateBookRequest {
            isbn: Some(String::new()),
            isbn13: Some("978-0-441-17271-9".into()),
            ..request()
        }
        .validate()
        .unwrap();
        assert_eq!(book.isbn, None);
        assert_eq!(book.isbn13.as_deref(), Some("978-0-441-17271-9"));
    }

    #[test]
    fn duplicate_authors_and_categories_collapsed() {
        let book = CreateBookRequest {
            authors: vec!["Frank Herbert".into(), "Frank Herbert ".into()],
            categories: vec!["Fiction".into(), "Fiction".into(), "".into()],
            ..request()
        }
        .validate()
        .unwrap();
        assert_eq!(book.authors(), ["Frank Herbert".to_string()]);
        assert_eq!(book.categories, vec!["Fiction".to_string()]);
    }

    #[test]
    fn update_ranges() {
        let bad = UpdateBookRequest {
            reading_progress: Some(101),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = UpdateBookRequest {
            personal_rating: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let ok = UpdateBookRequest {
            reading_progress: Some(100),
            personal_rating: Some(5),
            date_read: Some("2024-03-01".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(ok.date_read, Some(1_709_251_200));
    }

    #[test]
    fn marking_read_stamps_date() {
        let update = UpdateBookRequest {
            status: Some(BookStatus::Read),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert!(update.date_read.is_some());
        assert!(UpdateBookRequest::default().validate().unwrap().is_empty());
    }
}
