//! General preferences.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// File formats a user may prefer.
pub const FORMATS: [&str; 4] = ["epub", "pdf", "mobi", "azw3"];

/// General preferences, stored as one JSON document in the settings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Two-letter interface language.
    pub language: String,
    /// IANA timezone name.
    pub timezone: String,
    /// Preferred download format.
    pub default_format: String,
    /// Download wanted books automatically.
    pub auto_download: bool,
    /// Send email notifications.
    pub email_notifications: bool,
    /// Notify when a download completes.
    pub download_complete: bool,
    /// Notify when a wanted book shows up.
    pub new_book_available: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            default_format: "epub".to_string(),
            auto_download: false,
            email_notifications: false,
            download_complete: true,
            new_book_available: false,
        }
    }
}

/// Body of `PUT /api/settings`. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePreferencesRequest {
    /// Two letters.
    pub language: Option<String>,
    /// Non-empty, at most 64 characters.
    pub timezone: Option<String>,
    /// One of [`FORMATS`].
    pub default_format: Option<String>,
    /// New value.
    pub auto_download: Option<bool>,
    /// New value.
    pub email_notifications: Option<bool>,
    /// New value.
    pub download_complete: Option<bool>,
    /// New value.
    pub new_book_available: Option<bool>,
}

impl UpdatePreferencesRequest {
    /// Validate and merge into `current`.
    pub fn apply(self, current: Preferences) -> Result<Preferences> {
        let mut next = current;

        if let Some(language) = self.language {
            let language = language.trim();
            if language.chars().count() != 2 || !language.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(AppError::invalid("language", "Language must be a 2-letter code"));
            }
            next.language = language.to_ascii_lowercase();
        }

        if let Some(timezone) = self.timezone {
            let timezone = timezone.trim();
            if timezone.is_empty() || timezone.chars().count() > 64 {
                return Err(AppError::invalid("timezone", "Timezone is required"));
            }
            next.timezone = timezone.to_string();
        }

        if let Some(format) = self.default_format {
            let format = format.trim().to_ascii_lowercase();
            if !FORMATS.contains(&format.as_str()) {
                return Err(AppError::invalid(
                    "defaultFormat",
                    "Expected one of epub, pdf, mobi, azw3",
                ));
            }
            next.default_format = format;
        }

        next.auto_download = self.auto_download.unwrap_or(next.auto_download);
        next.email_notifications = self.email_notifications.unwrap_or(next.email_notifications);
        next.download_complete = self.download_complete.unwrap_or(next.download_complete);
        next.new_book_available = self.new_book_available.unwrap_or(next.new_book_available);

        Ok(next)
    }
}
