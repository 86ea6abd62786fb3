//! Indexer validation and connection checks.

use crate::db::IndexerKind;
use crate::error::{AppError, Result};
use crate::metadata::USER_AGENT;
use crate::metadata::transport::{HttpRequest, HttpTransport};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST`/`PUT /api/settings/indexers` and of the connection test.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerRequest {
    /// Required.
    #[serde(default)]
    pub name: String,
    /// `nzbgeek`, `nzbhydra`, `newznab` or `custom`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Absolute http(s) URL.
    #[serde(default)]
    pub url: String,
    /// Required.
    #[serde(default)]
    pub api_key: String,
    /// Defaults to true.
    pub enabled: Option<bool>,
    /// 1 to 10, default 5.
    pub priority: Option<i64>,
    /// Default 60.
    pub requests_per_minute: Option<i64>,
    /// Default 1000.
    pub requests_per_day: Option<i64>,
    /// Defaults to true.
    pub search_enabled: Option<bool>,
    /// Defaults to true.
    pub book_search_enabled: Option<bool>,
}

/// Validated indexer fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Display name.
    pub name: String,
    /// Flavour.
    pub kind: IndexerKind,
    /// Base URL without trailing slash.
    pub url: String,
    /// API key.
    pub api_key: String,
    /// Used for searches.
    pub enabled: bool,
    /// 1 to 10.
    pub priority: i64,
    /// Rate limit per minute.
    pub requests_per_minute: i64,
    /// Rate limit per day.
    pub requests_per_day: i64,
    /// General search allowed.
    pub search_enabled: bool,
    /// Book search allowed.
    pub book_search_enabled: bool,
}

impl IndexerRequest {
    /// Check every field and apply defaults.
    pub fn validate(self) -> Result<IndexerSettings> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::invalid("name", "Indexer name is required"));
        }

        let kind = IndexerKind::parse(&self.kind).ok_or_else(|| {
            AppError::invalid("type", "Expected one of nzbgeek, nzbhydra, newznab, custom")
        })?;

        let url = self.url.trim();
        let valid_url = Url::parse(url)
            .ok()
            .is_some_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some());
        if !valid_url {
            return Err(AppError::invalid("url", "Invalid URL format"));
        }

        let api_key = self.api_key.trim();
        if api_key.is_empty() {
            return Err(AppError::invalid("apiKey", "API key is required"));
        }

        let priority = self.priority.unwrap_or(5);
        if !(1..=10).contains(&priority) {
            return Err(AppError::invalid("priority", "Must be between 1 and 10"));
        }

        let requests_per_minute = self.requests_per_minute.unwrap_or(60);
        if requests_per_minute < 1 {
            return Err(AppError::invalid("requestsPerMinute", "Must be positive"));
        }
        let requests_per_day = self.requests_per_day.unwrap_or(1000);
        if requests_per_day < 1 {
            return Err(AppError::invalid("requestsPerDay", "Must be positive"));
        }

        Ok(IndexerSettings {
            name: name.to_string(),
            kind,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            enabled: self.enabled.unwrap_or(true),
            priority,
            requests_per_minute,
            requests_per_day,
            search_enabled: self.search_enabled.unwrap_or(true),
            book_search_enabled: self.book_search_enabled.unwrap_or(true),
        })
    }
}

/// What the indexer said about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// Server name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Server version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether book search is advertised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_search: Option<bool>,
}

/// Outcome of a connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    /// The indexer answered with a 2xx.
    pub is_valid: bool,
    /// Human-readable result.
    pub message: String,
    /// Empty unless the test succeeded.
    pub details: ConnectionDetails,
}

/// Capabilities request for an indexer.
pub fn caps_request(settings: &IndexerSettings) -> HttpRequest {
    let request = match settings.kind {
        IndexerKind::Nzbhydra => {
            HttpRequest::get(format!("{}/api/v2.0/capabilities", settings.url))
                .header("X-API-Key", settings.api_key.as_str())
        }
        _ => HttpRequest::get(format!("{}/api", settings.url))
            .query("t", "caps")
            .query("apikey", &settings.api_key),
    };
    request
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/json")
}

/// Call the indexer's capabilities endpoint and report what happened.
///
/// Failures are part of the report, never an error.
pub async fn test_connection(
    transport: &dyn HttpTransport,
    settings: &IndexerSettings,
) -> ConnectionReport {
    let kind = settings.kind;

    let response = match transport.get(caps_request(settings)).await {
        Ok(response) => response,
        Err(e) => {
            return ConnectionReport {
                is_valid: false,
                message: format!("Connection test failed: {}", e),
                details: ConnectionDetails::default(),
            };
        }
    };

    let body = response.json::<Value>().unwrap_or(Value::Null);

    if response.is_success() {
        return ConnectionReport {
            is_valid: true,
            message: format!("{} connection successful", kind),
            details: caps_details(kind, &body),
        };
    }

    let message = match kind {
        IndexerKind::Custom => format!("{} error: HTTP {}", kind, response.status),
        IndexerKind::Nzbhydra => format!(
            "{} API error: {}",
            kind,
            body["message"].as_str().unwrap_or("Invalid API key or URL")
        ),
        IndexerKind::Nzbgeek | IndexerKind::Newznab => format!(
            "{} API error: {}",
            kind,
            body["error"].as_str().unwrap_or("Invalid API key or URL")
        ),
    };

    ConnectionReport {
        is_valid: false,
        message,
        details: ConnectionDetails::default(),
    }
}

fn caps_details(kind: IndexerKind, body: &Value) -> ConnectionDetails {
    let text = |value: &Value| value.as_str().map(str::to_string);

    match kind {
        IndexerKind::Nzbhydra => ConnectionDetails {
            server: Some("NZBHydra2".to_string()),
            version: Some(text(&body["version"]).unwrap_or_else(|| "Unknown".to_string())),
            book_search: Some(supported(&body["searching"]["book"]["supported"])),
        },
        _ => {
            let fallback = match kind {
                IndexerKind::Nzbgeek => "NZBGeek",
                IndexerKind::Newznab => "Newznab",
                _ => "Custom Indexer",
            };
            ConnectionDetails {
                server: Some(text(&body["server"]["title"]).unwrap_or_else(|| fallback.to_string())),
                version: Some(
                    text(&body["server"]["version"]).unwrap_or_else(|| "Unknown".to_string()),
                ),
                book_search: Some(supported(
                    &body["caps"]["searching"]["search"]["book-search"]["supported"],
                )),
            }
        }
    }
}

/// Newznab reports `"yes"`/`"no"`; JSON gateways send booleans.
fn supported(value: &Value) -> bool {
    value
        .as_bool()
        .unwrap_or_else(|| value.as_str().is_some_and(|s| s.eq_ignore_ascii_case("yes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::transport::TransportError;
    use crate::metadata::transport::mock::MockTransport;
    use serde_json::json;

    fn request() -> IndexerRequest {
        IndexerRequest {
            name: "Geek".into(),
            kind: "nzbgeek".into(),
            url: "https://api.nzbgeek.info/".into(),
            api_key: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_applied() {
        let settings = request().validate().unwrap();
        assert_eq!(settings.kind, IndexerKind::Nzbgeek);
        assert_eq!(settings.url, "https://api.nzbgeek.info");
        assert!(settings.enabled);
        assert_eq!(settings.priority, 5);
        assert_eq!(settings.requests_per_minute, 60);
        assert_eq!(settings.requests_per_day, 1000);
        assert!(settings.search_enabled && settings.book_search_enabled);
    }

    #[test]
    fn field_rules() {
        let cases: Vec<(&str, IndexerRequest)> = vec![
            ("name", IndexerRequest { name: " ".into(), ..request() }),
            ("type", IndexerRequest { kind: "torznab".into(), ..request() }),
            ("url", IndexerRequest { url: "not a url".into(), ..request() }),
            ("url", IndexerRequest { url: "ftp://indexer.example".into(), ..request() }),
            ("apiKey", IndexerRequest { api_key: "".into(), ..request() }),
            ("priority", IndexerRequest { priority: Some(11), ..request() }),
            ("priority", IndexerRequest { priority: Some(0), ..request() }),
            ("requestsPerDay", IndexerRequest { requests_per_day: Some(0), ..request() }),
        ];

        for (expected, case) in cases {
            match case.validate() {
                Err(AppError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn caps_request_per_kind() {
        let geek = caps_request(&request().validate().unwrap());
        assert_eq!(geek.url, "https://api.nzbgeek.info/api");
        assert_eq!(geek.query_value("t"), Some("caps"));
        assert_eq!(geek.query_value("apikey"), Some("secret"));
        assert_eq!(geek.header_value("user-agent"), Some(USER_AGENT));

        let hydra = caps_request(
            &IndexerRequest {
                kind: "NZBHydra".into(),
                url: "http://localhost:5076".into(),
                ..request()
            }
            .validate()
            .unwrap(),
        );
        assert_eq!(hydra.url, "http://localhost:5076/api/v2.0/capabilities");
        assert_eq!(hydra.header_value("x-api-key"), Some("secret"));
        assert!(hydra.query.is_empty());
    }

    #[tokio::test]
    async fn successful_caps_reported() {
        let transport = MockTransport::json(
            200,
            json!({
                "server": { "title": "NZBgeek", "version": "0.6" },
                "caps": { "searching": { "search": { "book-search": { "supported": "yes" } } } }
            }),
        );
        let report = test_connection(&transport, &request().validate().unwrap()).await;

        assert!(report.is_valid);
        assert_eq!(report.message, "NZBGeek connection successful");
        assert_eq!(report.details.server.as_deref(), Some("NZBgeek"));
        assert_eq!(report.details.version.as_deref(), Some("0.6"));
        assert_eq!(report.details.book_search, Some(true));
    }

    #[tokio::test]
    async fn rejected_key_reported() {
        let transport = MockTransport::json(401, json!({ "error": "Incorrect user credentials" }));
        let report = test_connection(&transport, &request().validate().unwrap()).await;

        assert!(!report.is_valid);
        assert_eq!(report.message, "NZBGeek API error: Incorrect user credentials");
        assert_eq!(report.details, ConnectionDetails::default());

        let custom = IndexerRequest {
            kind: "custom".into(),
            ..request()
        }
        .validate()
        .unwrap();
        let transport = MockTransport::json(404, json!({}));
        let report = test_connection(&transport, &custom).await;
        assert_eq!(report.message, "Custom indexer error: HTTP 404");
    }

    #[tokio::test]
    async fn unreachable_indexer_reported() {
        let transport = MockTransport::failing(TransportError::Connect("refused".into()));
        let report = test_connection(&transport, &request().validate().unwrap()).await;

        assert!(!report.is_valid);
        assert_eq!(report.message, "Connection test failed: Connection failed: refused");
    }
}
