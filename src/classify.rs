//! Content-type classification.
//!
//! A request body is mapped to exactly one decoding strategy.  The rules are
//! evaluated in a fixed order and the first match wins: media type strings
//! routinely satisfy more than one substring check (a vendor type may carry
//! both `json` and `form-data`), so the order is part of the contract.

use axum::http::Method;
use serde::Serialize;

/// The closed set of decoding strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentClassification {
    Json,
    MultipartForm,
    UrlEncodedForm,
    PlainText,
    Html,
    Xml,
    OctetStream,
    Unsupported,
    NoBody,
}

impl ContentClassification {
    pub const ALL: [ContentClassification; 9] = [
        ContentClassification::Json,
        ContentClassification::MultipartForm,
        ContentClassification::UrlEncodedForm,
        ContentClassification::PlainText,
        ContentClassification::Html,
        ContentClassification::Xml,
        ContentClassification::OctetStream,
        ContentClassification::Unsupported,
        ContentClassification::NoBody,
    ];

    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClassification::Json => "JSON",
            ContentClassification::MultipartForm => "MULTIPART_FORM",
            ContentClassification::UrlEncodedForm => "URL_ENCODED_FORM",
            ContentClassification::PlainText => "PLAIN_TEXT",
            ContentClassification::Html => "HTML",
            ContentClassification::Xml => "XML",
            ContentClassification::OctetStream => "OCTET_STREAM",
            ContentClassification::Unsupported => "UNSUPPORTED",
            ContentClassification::NoBody => "NO_BODY",
        }
    }

    /// Index into `ALL`, used for per-classification counters.
    pub fn index(&self) -> usize {
        match self {
            ContentClassification::Json => 0,
            ContentClassification::MultipartForm => 1,
            ContentClassification::UrlEncodedForm => 2,
            ContentClassification::PlainText => 3,
            ContentClassification::Html => 4,
            ContentClassification::Xml => 5,
            ContentClassification::OctetStream => 6,
            ContentClassification::Unsupported => 7,
            ContentClassification::NoBody => 8,
        }
    }

    /// Whether the strategy needs the request body at all.
    pub fn reads_body(&self) -> bool {
        !matches!(self, ContentClassification::NoBody)
    }
}

impl std::fmt::Display for ContentClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the decoding strategy for a request.
///
/// Matching is ASCII case-insensitive.  A blank content type is treated the
/// same as a missing one.
pub fn classify(
    content_type: Option<&str>,
    content_length: Option<&str>,
    method: &Method,
) -> ContentClassification {
    if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
        return ContentClassification::NoBody;
    }
    let content_type = match content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
        Some(ct) => ct.to_ascii_lowercase(),
        None => return ContentClassification::NoBody,
    };
    if content_length.map(str::trim) == Some("0") {
        return ContentClassification::NoBody;
    }

    let ct = content_type.as_str();
    if ct.starts_with("application/json") {
        ContentClassification::Json
    } else if ct.contains("multipart/form-data") {
        ContentClassification::MultipartForm
    } else if ct.contains("application/x-www-form-urlencoded") {
        ContentClassification::UrlEncodedForm
    } else if ct.contains("text/plain") {
        ContentClassification::PlainText
    } else if ct.contains("text/html") {
        ContentClassification::Html
    } else if ct.contains("application/xml") || ct.contains("text/xml") {
        ContentClassification::Xml
    } else if ct.contains("application/octet-stream") {
        ContentClassification::OctetStream
    } else {
        ContentClassification::Unsupported
    }
}
