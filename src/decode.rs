//! Body decoding.
//!
//! The body is buffered exactly once and every strategy works from that
//! buffer, so a failed parse can always report the raw text it saw.  Nothing
//! in here returns `Err`: failures are folded into [`DecodeOutcome`].

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use axum::body::{to_bytes, Body};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures_util::FutureExt;
use serde::Serialize;

use crate::classify::ContentClassification;
use crate::error::panic_message;
use crate::snapshot::{parse_pairs, FieldMap, QueryValue};

const UTF8_BOM: &[u8; 3] = b"\xEF\xBB\xBF";

/// `{type: "binary", size, base64}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryDescriptor {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: usize,
    pub base64: String,
}

impl BinaryDescriptor {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            kind: "binary",
            size: bytes.len(),
            base64: general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// A multipart part that carried a filename.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: usize,
    pub base64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    File(FileDescriptor),
    Multiple(Vec<FormValue>),
}

impl FormValue {
    fn push(&mut self, value: FormValue) {
        match self {
            FormValue::Multiple(values) => values.push(value),
            single => {
                let first = std::mem::replace(single, FormValue::Multiple(Vec::new()));
                *single = FormValue::Multiple(vec![first, value]);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsupportedBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content_type: Option<String>,
    pub raw: String,
}

/// A successfully decoded body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedBody {
    Json(serde_json::Value),
    Multipart(FieldMap<FormValue>),
    UrlEncoded(FieldMap<QueryValue>),
    Text(String),
    Binary(BinaryDescriptor),
    Unsupported(UnsupportedBody),
}

/// Result of the single decode attempt made for a request.
///
/// `value` and `error` are never both set.  `raw_fallback` is only present
/// alongside an error, and only when the body could be buffered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutcome {
    pub value: Option<DecodedBody>,
    pub error: Option<String>,
    pub raw_fallback: Option<String>,
    /// Number of body bytes buffered (0 when no read was attempted).
    pub body_bytes: usize,
}

impl DecodeOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    fn decoded(value: DecodedBody, body_bytes: usize) -> Self {
        Self {
            value: Some(value),
            error: None,
            raw_fallback: None,
            body_bytes,
        }
    }

    fn failed(error: String, raw: &[u8]) -> Self {
        Self {
            value: None,
            error: Some(error),
            raw_fallback: Some(String::from_utf8_lossy(raw).into_owned()),
            body_bytes: raw.len(),
        }
    }

    fn unread(error: String) -> Self {
        Self {
            value: None,
            error: Some(error),
            raw_fallback: None,
            body_bytes: 0,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Buffer the body (bounded by `limit` when set) and decode it.
///
/// `NoBody` never touches the stream.  A transport failure while buffering,
/// including an aborted upload or an exceeded limit, becomes an error outcome
/// without a raw fallback.
pub async fn decode(
    classification: ContentClassification,
    content_type: Option<&str>,
    body: Body,
    limit: Option<usize>,
) -> DecodeOutcome {
    if !classification.reads_body() {
        return DecodeOutcome::empty();
    }
    let bytes = match to_bytes(body, limit.unwrap_or(usize::MAX)).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, classification = %classification, "failed to buffer request body");
            return DecodeOutcome::unread(format!("Failed to read request body: {}", err));
        }
    };
    decode_bytes(classification, content_type, bytes).await
}

/// Decode an already-buffered body.  Any panic raised by a strategy is caught
/// and reported as a general parsing error.
pub async fn decode_bytes(
    classification: ContentClassification,
    content_type: Option<&str>,
    bytes: Bytes,
) -> DecodeOutcome {
    let raw = bytes.clone();
    guarded(
        classification,
        &raw,
        run_strategy(classification, content_type, bytes),
    )
    .await
}

async fn guarded<F>(classification: ContentClassification, raw: &[u8], strategy: F) -> DecodeOutcome
where
    F: Future<Output = DecodeOutcome>,
{
    match AssertUnwindSafe(strategy).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            tracing::error!(%detail, classification = %classification, "decoder fault");
            DecodeOutcome::failed(format!("General body parsing error: {}", detail), raw)
        }
    }
}

async fn run_strategy(
    classification: ContentClassification,
    content_type: Option<&str>,
    bytes: Bytes,
) -> DecodeOutcome {
    let len = bytes.len();
    match classification {
        ContentClassification::NoBody => DecodeOutcome::empty(),
        ContentClassification::Json => {
            let text = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);
            match serde_json::from_slice::<serde_json::Value>(text) {
                Ok(value) => DecodeOutcome::decoded(DecodedBody::Json(value), len),
                Err(err) => DecodeOutcome::failed(format!("Invalid JSON body: {}", err), &bytes),
            }
        }
        ContentClassification::MultipartForm => {
            match parse_multipart(content_type.unwrap_or_default(), bytes.clone()).await {
                Ok(fields) => DecodeOutcome::decoded(DecodedBody::Multipart(fields), len),
                Err(err) => {
                    DecodeOutcome::failed(format!("Invalid multipart body: {}", err), &bytes)
                }
            }
        }
        ContentClassification::UrlEncodedForm => match std::str::from_utf8(&bytes) {
            Ok(_) => DecodeOutcome::decoded(DecodedBody::UrlEncoded(parse_pairs(&bytes)), len),
            Err(err) => DecodeOutcome::failed(format!("Invalid form body: {}", err), &bytes),
        },
        ContentClassification::PlainText
        | ContentClassification::Html
        | ContentClassification::Xml => DecodeOutcome::decoded(
            DecodedBody::Text(String::from_utf8_lossy(&bytes).into_owned()),
            len,
        ),
        ContentClassification::OctetStream => {
            DecodeOutcome::decoded(DecodedBody::Binary(BinaryDescriptor::from_bytes(&bytes)), len)
        }
        ContentClassification::Unsupported => DecodeOutcome::decoded(
            DecodedBody::Unsupported(UnsupportedBody {
                kind: "unsupported",
                content_type: content_type.map(str::to_string),
                raw: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            len,
        ),
    }
}

async fn parse_multipart(
    content_type: &str,
    bytes: Bytes,
) -> Result<FieldMap<FormValue>, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(bytes) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields: FieldMap<FormValue> = FieldMap::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let value = match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field.content_type().map(|m| m.to_string());
                let data = field.bytes().await?;
                FormValue::File(FileDescriptor {
                    kind: "file",
                    filename,
                    content_type,
                    size: data.len(),
                    base64: general_purpose::STANDARD.encode(&data),
                })
            }
            None => FormValue::Text(field.text().await?),
        };
        match fields.get_mut(&name) {
            Some(existing) => existing.push(value),
            None => fields.insert(name, value),
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(class: ContentClassification, ct: &str, body: &'static [u8]) -> DecodeOutcome {
        decode_bytes(class, Some(ct), Bytes::from_static(body)).await
    }

    fn value_json(outcome: &DecodeOutcome) -> serde_json::Value {
        serde_json::to_value(outcome.value.as_ref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn json_body_decodes() {
        let out = run(ContentClassification::Json, "application/json", br#"{"a":1}"#).await;
        assert!(out.error.is_none());
        assert_eq!(value_json(&out), json!({"a": 1}));
        assert!(out.raw_fallback.is_none());
    }

    #[tokio::test]
    async fn truncated_json_keeps_raw_text() {
        let out = run(ContentClassification::Json, "application/json", br#"{"a":"#).await;
        assert!(out.value.is_none());
        assert!(out.error.as_deref().unwrap().starts_with("Invalid JSON body"));
        assert_eq!(out.raw_fallback.as_deref(), Some(r#"{"a":"#));
    }

    #[tokio::test]
    async fn json_with_byte_order_mark_decodes() {
        let out = run(
            ContentClassification::Json,
            "application/json",
            b"\xEF\xBB\xBF{\"ok\":true}",
        )
        .await;
        assert!(out.error.is_none(), "unexpected error {:?}", out.error);
        assert_eq!(value_json(&out), json!({"ok": true}));
    }

    #[tokio::test]
    async fn panicking_strategy_becomes_general_parsing_error() {
        let strategy = async {
            if true {
                panic!("decoder exploded");
            }
            DecodeOutcome::empty()
        };
        let out = guarded(ContentClassification::Json, b"{\"a\":1}", strategy).await;
        assert!(out.value.is_none());
        assert_eq!(
            out.error.as_deref(),
            Some("General body parsing error: decoder exploded")
        );
        assert_eq!(out.raw_fallback.as_deref(), Some("{\"a\":1}"));
        assert_eq!(out.body_bytes, 7);
    }

    #[tokio::test]
    async fn wide_urlencoded_form_decodes_quickly() {
        let raw: String = (0..50_000)
            .map(|i| format!("field{}=v", i))
            .collect::<Vec<_>>()
            .join("&");
        let started = std::time::Instant::now();
        let out = decode_bytes(
            ContentClassification::UrlEncodedForm,
            Some("application/x-www-form-urlencoded"),
            Bytes::from(raw),
        )
        .await;
        assert!(out.error.is_none());
        match out.value {
            Some(DecodedBody::UrlEncoded(fields)) => assert_eq!(fields.len(), 50_000),
            other => panic!("unexpected value {:?}", other),
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn urlencoded_body_folds_repeated_keys() {
        let out = run(
            ContentClassification::UrlEncodedForm,
            "application/x-www-form-urlencoded",
            b"name=ada&tag=x&tag=y",
        )
        .await;
        assert_eq!(value_json(&out), json!({"name": "ada", "tag": ["x", "y"]}));
    }

    #[tokio::test]
    async fn urlencoded_rejects_invalid_utf8() {
        let out = run(
            ContentClassification::UrlEncodedForm,
            "application/x-www-form-urlencoded",
            b"a=\xff\xfe",
        )
        .await;
        assert!(out.error.is_some());
        assert!(out.raw_fallback.is_some());
    }

    #[tokio::test]
    async fn multipart_text_and_file_parts() {
        let body: &'static [u8] = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
hello\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.bin\"\r\n\
Content-Type: application/octet-stream\r\n\r\n\
abc\r\n\
--XYZ--\r\n";
        let out = run(
            ContentClassification::MultipartForm,
            "multipart/form-data; boundary=XYZ",
            body,
        )
        .await;
        assert!(out.error.is_none(), "unexpected error {:?}", out.error);
        let v = value_json(&out);
        assert_eq!(v["title"], json!("hello"));
        assert_eq!(v["upload"]["type"], json!("file"));
        assert_eq!(v["upload"]["filename"], json!("a.bin"));
        assert_eq!(v["upload"]["size"], json!(3));
        assert_eq!(v["upload"]["base64"], json!("YWJj"));
    }

    #[tokio::test]
    async fn multipart_without_boundary_fails_softly() {
        let out = run(
            ContentClassification::MultipartForm,
            "multipart/form-data",
            b"whatever",
        )
        .await;
        assert!(out.value.is_none());
        assert!(out.error.as_deref().unwrap().starts_with("Invalid multipart body"));
        assert_eq!(out.raw_fallback.as_deref(), Some("whatever"));
    }

    #[tokio::test]
    async fn text_types_pass_through_as_strings() {
        for (class, ct) in [
            (ContentClassification::PlainText, "text/plain"),
            (ContentClassification::Html, "text/html"),
            (ContentClassification::Xml, "application/xml"),
        ] {
            let out = run(class, ct, b"<p>hi</p>").await;
            assert_eq!(value_json(&out), json!("<p>hi</p>"));
        }
    }

    #[tokio::test]
    async fn octet_stream_is_described_not_decoded() {
        let out = decode_bytes(
            ContentClassification::OctetStream,
            Some("application/octet-stream"),
            Bytes::from(vec![0u8, 1, 2, 3, 4, 5, 6, 7, 8, 255]),
        )
        .await;
        let v = value_json(&out);
        assert_eq!(v["type"], json!("binary"));
        assert_eq!(v["size"], json!(10));
        assert_eq!(v["base64"], json!("AAECAwQFBgcI/w=="));
    }

    #[tokio::test]
    async fn unsupported_keeps_content_type_and_raw() {
        let out = run(ContentClassification::Unsupported, "image/svg", b"<svg/>").await;
        assert_eq!(
            value_json(&out),
            json!({"type": "unsupported", "contentType": "image/svg", "raw": "<svg/>"})
        );
    }

    #[tokio::test]
    async fn no_body_skips_the_stream() {
        let out = decode(ContentClassification::NoBody, None, Body::from("ignored"), None).await;
        assert_eq!(out, DecodeOutcome::empty());
    }

    #[tokio::test]
    async fn body_over_limit_is_an_unread_error() {
        let out = decode(
            ContentClassification::PlainText,
            Some("text/plain"),
            Body::from("0123456789"),
            Some(4),
        )
        .await;
        assert!(out.value.is_none());
        assert!(out.error.as_deref().unwrap().starts_with("Failed to read request body"));
        assert!(out.raw_fallback.is_none());
    }
}
