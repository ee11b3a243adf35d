//! Built-in destination providers.
//!
//! - [`WebhookProvider`]: signed, retrying delivery to any HTTP endpoint
//! - [`SpreadsheetProvider`]: appends one row per event to a spreadsheet
//! - [`DatabaseProvider`]: creates one page per event in a workspace database
//! - [`EmailProvider`]: sends a notification email per event
//!
//! Only the webhook provider retries. The others create a new row, page or
//! email on every call, so they make a single attempt.

use formrelay_core::{Error, Result};
use serde_json::Value;
use url::Url;

mod database;
mod email;
mod spreadsheet;
mod webhook;

pub use database::{DatabaseProvider, DatabaseSettings};
pub use email::{EmailProvider, EmailSettings};
pub use spreadsheet::{SpreadsheetProvider, SpreadsheetSettings};
pub use webhook::{WebhookMethod, WebhookProvider, WebhookSettings};

/// Parses an absolute http(s) URL from a settings value.
pub(crate) fn parse_http_url(field: &str, value: &str) -> Result<Url> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation().with_message(format!("'{field}' is required")));
    }

    let url = Url::parse(value).map_err(|err| {
        Error::validation()
            .with_message(format!("'{field}' is not a valid URL: {err}"))
            .with_source(err)
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::validation().with_message(format!(
            "'{field}' must be an absolute http or https URL"
        )));
    }

    Ok(url)
}

/// Appends path segments to an API base URL.
pub(crate) fn api_url<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::validation().with_message(format!("'{base}' cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Renders an answer as plain text for rows, properties and emails.
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Returns the value for `field`, or a validation error if it is blank.
pub(crate) fn require_setting<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::validation().with_message(format!("'{field}' is required")))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use formrelay_core::ErrorKind;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_http_url() {
        assert!(parse_http_url("url", "https://example.com/hook").is_ok());
        assert!(parse_http_url("url", "http://localhost:8080").is_ok());

        for invalid in ["", "  ", "not a url", "ftp://example.com", "mailto:a@b.com"] {
            let err = parse_http_url("url", invalid).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "{invalid}");
        }
    }

    #[test]
    fn test_api_url_appends_segments() {
        let base = Url::parse("https://sheets.example.com/v4/").unwrap();
        let url = api_url(&base, ["spreadsheets", "abc", "values", "My Sheet!A1:append"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.example.com/v4/spreadsheets/abc/values/My%20Sheet!A1:append"
        );
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!("Ann")), "Ann");
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!(42)), "42");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&json!(["red", "blue"])), "red, blue");
    }
}
