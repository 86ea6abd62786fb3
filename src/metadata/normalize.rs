//! Mapping of raw provider records into [`BookCandidate`]s.

use super::google_books::Volume;
use super::open_library::SearchDoc;
use super::{ProviderKind, RawRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Language used when a provider does not report one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Provider-agnostic book metadata, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookCandidate {
    /// Identifier within the source provider's namespace.
    pub provider_id: String,
    /// Never empty.
    pub title: String,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// First entry is the primary author.
    #[serde(default)]
    pub authors: Vec<String>,
    /// ISBN-10, hyphens as supplied.
    pub isbn10: Option<String>,
    /// ISBN-13, hyphens as supplied.
    pub isbn13: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// ISO 639-1 code.
    pub language: String,
    /// Positive page count.
    pub page_count: Option<u32>,
    /// Publication date; partial dates are padded with 1.
    pub published_at: Option<NaiveDate>,
    /// Category labels, deduplicated.
    #[serde(default)]
    pub categories: BTreeSet<String>,
    /// Cover image URL.
    pub cover_image_url: Option<String>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Provider the record came from.
    pub source_provider: ProviderKind,
}

impl BookCandidate {
    /// `<provider>:<id>`, usable for later detail lookups.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.source_provider.as_str(), self.provider_id)
    }

    /// First listed author, if any.
    pub fn primary_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// Normalize one raw record; `None` when it has no usable title.
pub fn normalize(record: &RawRecord) -> Option<BookCandidate> {
    match record {
        RawRecord::GoogleBooks(volume) => from_google_volume(volume),
        RawRecord::OpenLibrary(doc) => from_open_library_doc(doc),
    }
}

fn from_google_volume(volume: &Volume) -> Option<BookCandidate> {
    let info = &volume.volume_info;
    let title = non_blank(info.title.as_deref())?;

    // First identifier of each type wins, even if a later one looks better.
    let first_isbn = |kind: &str| {
        info.industry_identifiers
            .iter()
            .flatten()
            .find(|identifier| identifier.kind == kind)
            .and_then(|identifier| clean_isbn(&identifier.identifier))
    };
    let isbn10 = first_isbn("ISBN_10");
    let isbn13 = first_isbn("ISBN_13");

    let cover_image_url = info.image_links.as_ref().and_then(|links| {
        links
            .thumbnail
            .as_deref()
            .or(links.small_thumbnail.as_deref())
            .map(str::to_string)
    });

    Some(BookCandidate {
        provider_id: volume.id.clone(),
        title,
        subtitle: non_blank(info.subtitle.as_deref()),
        authors: clean_names(info.authors.iter().flatten()),
        isbn10,
        isbn13,
        description: non_blank(info.description.as_deref()),
        language: info
            .language
            .as_deref()
            .and_then(language_code)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        page_count: positive(info.page_count),
        published_at: info.published_date.as_deref().and_then(parse_published_date),
        categories: clean_set(info.categories.iter().flatten()),
        cover_image_url,
        publisher: non_blank(info.publisher.as_deref()),
        source_provider: ProviderKind::GoogleBooks,
    })
}

fn from_open_library_doc(doc: &SearchDoc) -> Option<BookCandidate> {
    let title = non_blank(doc.title.as_deref())?;

    let mut isbn10 = None;
    let mut isbn13 = None;
    for raw in &doc.isbn {
        let Some(isbn) = clean_isbn(raw) else {
            continue;
        };
        match isbn.chars().filter(|c| *c != '-').count() {
            10 if isbn10.is_none() => isbn10 = Some(isbn),
            13 if isbn13.is_none() => isbn13 = Some(isbn),
            _ => {}
        }
    }

    Some(BookCandidate {
        provider_id: doc.key.trim_start_matches("/works/").to_string(),
        title,
        subtitle: non_blank(doc.subtitle.as_deref()),
        authors: clean_names(doc.author_name.iter()),
        isbn10,
        isbn13,
        description: None,
        language: doc
            .language
            .first()
            .and_then(|code| language_code(code))
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        page_count: positive(doc.number_of_pages_median),
        published_at: doc
            .first_publish_year
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1)),
        categories: clean_set(doc.subject.iter()),
        cover_image_url: doc
            .cover_i
            .filter(|id| *id > 0)
            .map(|id| format!("https://covers.openlibrary.org/b/id/{}-L.jpg", id)),
        publisher: non_blank(doc.publisher.first().map(String::as_str)),
        source_provider: ProviderKind::OpenLibrary,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn clean_names<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    names.filter_map(|name| non_blank(Some(name.as_str()))).collect()
}

fn clean_set<'a>(labels: impl Iterator<Item = &'a String>) -> BTreeSet<String> {
    labels.filter_map(|label| non_blank(Some(label.as_str()))).collect()
}

fn positive(value: Option<i64>) -> Option<u32> {
    value
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
}

/// Reduce an ISBN to digits and hyphens. A trailing ISBN-10 check character
/// `X` is kept, upper-cased. Returns `None` when no digits remain.
pub fn clean_isbn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter_map(|c| match c {
            '0'..='9' | '-' => Some(c),
            'x' | 'X' => Some('X'),
            _ => None,
        })
        .collect();

    let cleaned = match cleaned.find('X') {
        Some(pos) if pos + 1 != cleaned.len() => cleaned.replace('X', ""),
        _ => cleaned,
    };
    let cleaned = cleaned.trim_matches('-').to_string();

    if cleaned.chars().any(|c| c.is_ascii_digit()) {
        Some(cleaned)
    } else {
        None
    }
}

/// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`; missing parts become 1.
pub fn parse_published_date(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.trim().split('-').collect();

    let number = |part: &str, len: usize| -> Option<u32> {
        if part.len() == len && part.chars().all(|c| c.is_ascii_digit()) {
            part.parse().ok()
        } else {
            None
        }
    };

    let (year, month, day) = match parts.as_slice() {
        &[y] => (number(y, 4)?, 1, 1),
        &[y, m] => (number(y, 4)?, number(m, 2)?, 1),
        &[y, m, d] => (number(y, 4)?, number(m, 2)?, number(d, 2)?),
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year as i32, month, day)
}

/// Map a provider language code onto ISO 639-1.
///
/// Two-letter codes (optionally with a region, `en-GB`) pass through; common
/// ISO 639-2 codes as used by Open Library are translated.
pub fn language_code(raw: &str) -> Option<String> {
    let code = raw
        .trim()
        .trim_start_matches("/languages/")
        .to_ascii_lowercase();
    let base = code.split(['-', '_']).next().unwrap_or_default();

    if base.len() == 2 && base.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(base.to_string());
    }

    let mapped = match base {
        "eng" => "en",
        "fre" | "fra" => "fr",
        "ger" | "deu" => "de",
        "spa" => "es",
        "ita" => "it",
        "por" => "pt",
        "dut" | "nld" => "nl",
        "rus" => "ru",
        "jpn" => "ja",
        "chi" | "zho" => "zh",
        "kor" => "ko",
        "ara" => "ar",
        "pol" => "pl",
        "swe" => "sv",
        "dan" => "da",
        "nor" => "no",
        "fin" => "fi",
        "tur" => "tr",
        "gre" | "ell" => "el",
        "heb" => "he",
        "hin" => "hi",
        "lat" => "la",
        "cze" | "ces" => "cs",
        "hun" => "hu",
        "ukr" => "uk",
        _ => return None,
    };
    Some(mapped.to_string())
}
