//! Filter, sort and pagination over the persisted library.
//!
//! A [`LibraryQuery`] compiles to one parameterized SQL fragment that the
//! database runs twice (count and page fetch) inside a single transaction.

use crate::db::BookStatus;
use crate::error::{AppError, Result};
use rusqlite::types::Value;
use serde::Serialize;
use std::collections::HashMap;

/// Largest page size accepted.
pub const MAX_LIMIT: u32 = 100;

/// Page size when none is given.
pub const DEFAULT_LIMIT: u32 = 20;

/// Optional predicates, ANDed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryFilter {
    /// Substring of title, subtitle, description or any author name.
    pub text_query: Option<String>,
    /// Substring of any author name.
    pub author_name: Option<String>,
    /// Substring of the ISBN-10 or the ISBN-13.
    pub isbn_fragment: Option<String>,
    /// Exact format, case-insensitive.
    pub format: Option<String>,
    /// Exact status.
    pub status: Option<BookStatus>,
    /// Substring of the series name.
    pub series_name: Option<String>,
    /// Substring of any category.
    pub category: Option<String>,
}

/// Sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// Title, case-insensitive.
    Title,
    /// Number of linked authors, not their names.
    Author,
    /// Creation time.
    DateAdded,
    /// Publication date, missing dates last.
    PublishedAt,
    /// Personal rating, unrated last.
    Rating,
}

impl SortField {
    /// Parse the `sortBy` parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "title" => Some(SortField::Title),
            "author" => Some(SortField::Author),
            "dateAdded" => Some(SortField::DateAdded),
            "publishedAt" => Some(SortField::PublishedAt),
            "rating" => Some(SortField::Rating),
            _ => None,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Parse the `sortOrder` parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Sort specification. Defaults to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibrarySort {
    /// Column.
    pub field: SortField,
    /// Direction.
    pub order: SortOrder,
}

impl Default for LibrarySort {
    fn default() -> Self {
        Self {
            field: SortField::DateAdded,
            order: SortOrder::Desc,
        }
    }
}

impl LibrarySort {
    /// Build from request parameters. An unknown field falls back to the
    /// default sort as a whole; an unknown order alone falls back to `desc`.
    pub fn parse(field: Option<&str>, order: Option<&str>) -> Self {
        let Some(field) = field.and_then(SortField::parse) else {
            return Self::default();
        };
        Self {
            field,
            order: order.and_then(SortOrder::parse).unwrap_or(SortOrder::Desc),
        }
    }

    /// `ORDER BY` body. Ties are broken by id so pages never overlap.
    pub fn order_by_sql(&self) -> String {
        let dir = self.order.sql();
        let primary = match self.field {
            SortField::Title => format!("b.title COLLATE NOCASE {dir}"),
            SortField::Author => format!(
                "(SELECT COUNT(*) FROM book_authors ba WHERE ba.book_id = b.id) {dir}"
            ),
            SortField::DateAdded => format!("b.date_added {dir}"),
            SortField::PublishedAt => {
                format!("b.published_at IS NULL, b.published_at {dir}")
            }
            SortField::Rating => {
                format!("b.personal_rating IS NULL, b.personal_rating {dir}")
            }
        };
        format!("{primary}, b.id ASC")
    }
}

/// One-based page and page size, always within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Clamp `page` to at least 1 and `limit` into `1..=100`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIMIT),
        }
    }

    /// One-based page number.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Page size.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Rows to skip.
    pub fn skip(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// A full library listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryQuery {
    /// Predicates.
    pub filter: LibraryFilter,
    /// Ordering.
    pub sort: LibrarySort,
    /// Window.
    pub page: PageRequest,
}

/// SQL ready to run against `books b`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// `WHERE ...`, or empty when nothing filters.
    pub where_sql: String,
    /// Positional parameters for `where_sql`.
    pub params: Vec<Value>,
    /// `ORDER BY` body.
    pub order_sql: String,
    /// `LIMIT`.
    pub limit: i64,
    /// `OFFSET`.
    pub offset: i64,
}

impl LibraryQuery {
    /// Parse `GET /api/books` query parameters.
    ///
    /// Numbers that do not parse fall back to their defaults; numbers that
    /// parse but are out of range are rejected, as is an unknown status.
    pub fn from_params(params: &HashMap<String, String>, default_limit: u32) -> Result<Self> {
        let text = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let status = match text("status") {
            Some(raw) => Some(BookStatus::parse(&raw).ok_or_else(|| {
                AppError::invalid(
                    "status",
                    "Expected one of UNREAD, READING, READ, WANT_TO_READ, DID_NOT_FINISH",
                )
            })?),
            None => None,
        };

        let page = match text("page").and_then(|raw| raw.parse::<i64>().ok()) {
            Some(page) if page < 1 || page > i64::from(u32::MAX) => {
                return Err(AppError::invalid("page", "Must be at least 1"));
            }
            Some(page) => page as u32,
            None => 1,
        };

        let limit = match text("limit").and_then(|raw| raw.parse::<i64>().ok()) {
            Some(limit) if !(1..=i64::from(MAX_LIMIT)).contains(&limit) => {
                return Err(AppError::invalid("limit", "Must be between 1 and 100"));
            }
            Some(limit) => limit as u32,
            None => default_limit,
        };

        Ok(Self {
            filter: LibraryFilter {
                text_query: text("query"),
                author_name: text("author"),
                isbn_fragment: text("isbn"),
                format: text("format"),
                status,
                series_name: text("series"),
                category: text("category"),
            },
            sort: LibrarySort::parse(
                params.get("sortBy").map(String::as_str),
                params.get("sortOrder").map(String::as_str),
            ),
            page: PageRequest::new(page, limit),
        })
    }

    /// Compile into SQL. Blank filter strings are ignored.
    pub fn compile(&self) -> CompiledQuery {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let f = &self.filter;

        if let Some(q) = present(&f.text_query) {
            let pattern = contains_pattern(q);
            clauses.push(format!(
                "(unicode_lower(b.title) LIKE ? ESCAPE '\\' \
                 OR unicode_lower(b.subtitle) LIKE ? ESCAPE '\\' \
                 OR unicode_lower(b.description) LIKE ? ESCAPE '\\' \
                 OR {})",
                AUTHOR_MATCH
            ));
            params.extend(std::iter::repeat_n(Value::Text(pattern), 4));
        }

        if let Some(author) = present(&f.author_name) {
            clauses.push(AUTHOR_MATCH.to_string());
            params.push(Value::Text(contains_pattern(author)));
        }

        if let Some(isbn) = present(&f.isbn_fragment) {
            let pattern = contains_pattern(isbn);
            clauses.push(
                "(b.isbn LIKE ? ESCAPE '\\' OR b.isbn13 LIKE ? ESCAPE '\\')".to_string(),
            );
            params.push(Value::Text(pattern.clone()));
            params.push(Value::Text(pattern));
        }

        if let Some(format) = present(&f.format) {
            clauses.push("unicode_lower(b.format) = ?".to_string());
            params.push(Value::Text(format.to_lowercase()));
        }

        if let Some(status) = f.status {
            clauses.push("b.status = ?".to_string());
            params.push(Value::Text(status.as_str().to_string()));
        }

        if let Some(series) = present(&f.series_name) {
            clauses.push(
                "EXISTS (SELECT 1 FROM series s WHERE s.id = b.series_id \
                 AND unicode_lower(s.name) LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            params.push(Value::Text(contains_pattern(series)));
        }

        if let Some(category) = present(&f.category) {
            clauses.push(
                "EXISTS (SELECT 1 FROM book_categories bc WHERE bc.book_id = b.id \
                 AND unicode_lower(bc.category) LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            params.push(Value::Text(contains_pattern(category)));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        CompiledQuery {
            where_sql,
            params,
            order_sql: self.sort.order_by_sql(),
            limit: i64::from(self.page.limit()),
            offset: self.page.skip() as i64,
        }
    }
}

const AUTHOR_MATCH: &str = "EXISTS (SELECT 1 FROM book_authors ba \
     JOIN authors a ON a.id = ba.author_id \
     WHERE ba.book_id = b.id AND unicode_lower(a.name) LIKE ? ESCAPE '\\')";

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `%value%` with LIKE wildcards in `value` escaped.
fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// One page of library results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryPage<T> {
    /// Rows on this page.
    pub books: Vec<T>,
    /// Rows matching the filter.
    pub total: u64,
    /// One-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// `ceil(total / limit)`.
    pub total_pages: u64,
    /// Whether a later page exists.
    pub has_more: bool,
}

impl<T> LibraryPage<T> {
    /// Assemble a page and derive the paging fields.
    pub fn new(books: Vec<T>, total: u64, request: PageRequest) -> Self {
        let limit = u64::from(request.limit());
        let total_pages = total.div_ceil(limit);
        Self {
            books,
            total,
            page: request.page(),
            limit: request.limit(),
            total_pages,
            has_more: u64::from(request.page()) < total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_nothing_given() {
        let query = LibraryQuery::from_params(&HashMap::new(), DEFAULT_LIMIT).unwrap();
        assert_eq!(query, LibraryQuery::default());

        let compiled = query.compile();
        assert!(compiled.where_sql.is_empty());
        assert!(compiled.params.is_empty());
        assert_eq!(compiled.order_sql, "b.date_added DESC, b.id ASC");
        assert_eq!((compiled.limit, compiled.offset), (20, 0));
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let query =
            LibraryQuery::from_params(&params(&[("page", "two"), ("limit", "")]), 15).unwrap();
        assert_eq!(query.page, PageRequest::new(1, 15));
    }

    #[test]
    fn out_of_range_numbers_rejected() {
        for (key, value) in [("page", "0"), ("page", "-3"), ("limit", "0"), ("limit", "101")] {
            let err = LibraryQuery::from_params(&params(&[(key, value)]), 20).unwrap_err();
            assert!(
                matches!(err, AppError::Validation { ref field, .. } if field == key),
                "{key}={value}"
            );
        }
    }

    #[test]
    fn unknown_status_rejected() {
        let err = LibraryQuery::from_params(&params(&[("status", "FINISHED")]), 20).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let ok = LibraryQuery::from_params(&params(&[("status", "READING")]), 20).unwrap();
        assert_eq!(ok.filter.status, Some(BookStatus::Reading));
    }

    #[test]
    fn page_clamping() {
        let page = PageRequest::new(0, 500);
        assert_eq!((page.page(), page.limit()), (1, 100));
        assert_eq!(PageRequest::new(3, 10).skip(), 20);
        assert_eq!(PageRequest::new(1, 0).limit(), 1);
    }

    #[test]
    fn sort_fallback() {
        assert_eq!(
            LibrarySort::parse(Some("popularity"), Some("asc")),
            LibrarySort::default()
        );
        assert_eq!(
            LibrarySort::parse(Some("title"), Some("sideways")),
            LibrarySort {
                field: SortField::Title,
                order: SortOrder::Desc
            }
        );
        assert!(
            LibrarySort::parse(Some("author"), Some("asc"))
                .order_by_sql()
                .starts_with("(SELECT COUNT(*) FROM book_authors")
        );
        assert_eq!(
            LibrarySort::parse(Some("rating"), Some("desc")).order_by_sql(),
            "b.personal_rating IS NULL, b.personal_rating DESC, b.id ASC"
        );
    }

    #[test]
    fn filters_are_anded_and_isbn_keeps_text_match() {
        let query = LibraryQuery {
            filter: LibraryFilter {
                text_query: Some("dune".into()),
                isbn_fragment: Some("978".into()),
                format: Some("EPUB".into()),
                author_name: Some("   ".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let compiled = query.compile();

        // Two joins plus the one inside the author subquery.
        assert_eq!(compiled.where_sql.matches(" AND ").count(), 3);
        assert!(compiled.where_sql.contains("b.isbn13 LIKE ?"));
        assert!(compiled.where_sql.contains("unicode_lower(b.title) LIKE ?"));
        // 4 text slots, 2 isbn slots, 1 format slot; blank author ignored.
        assert_eq!(compiled.params.len(), 7);
        assert_eq!(compiled.params[6], Value::Text("epub".into()));
    }

    #[test]
    fn like_wildcards_escaped() {
        assert_eq!(contains_pattern("100%_Pure"), "%100\\%\\_pure%");
    }

    #[test]
    fn page_math() {
        let page = LibraryPage::new(vec![(); 10], 25, PageRequest::new(2, 10));
        assert_eq!(page.total_pages, 3);
        assert!(page.has_more);

        let last = LibraryPage::new(vec![(); 5], 25, PageRequest::new(3, 10));
        assert!(!last.has_more);

        let empty = LibraryPage::<()>::new(Vec::new(), 0, PageRequest::default());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more);
    }
}
