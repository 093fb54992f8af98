//! The reflection envelope returned by introspection mode.
//!
//! The envelope is always delivered with status 200.  A body that failed to
//! decode is still a successful reflection; the failure is described in the
//! `error` field rather than signalled through the status code.

use serde::Serialize;

use crate::decode::{DecodeOutcome, DecodedBody};
use crate::snapshot::{FieldMap, QueryValue, RequestSnapshot};
use crate::util::{iso_timestamp, Stopwatch};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub path: String,
    pub headers: FieldMap<String>,
    pub query: FieldMap<QueryValue>,
    pub params: FieldMap<Option<String>>,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
}

impl From<RequestSnapshot> for RequestInfo {
    fn from(snap: RequestSnapshot) -> Self {
        RequestInfo {
            method: snap.method.as_str().to_string(),
            url: snap.url,
            path: snap.path,
            headers: snap.headers,
            query: snap.query,
            params: snap.params,
            content_type: snap.content_type,
            content_length: snap.content_length,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub timestamp: String,
    pub processing_time_ms: u64,
    pub worker_version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEnvelope {
    pub request: RequestInfo,
    pub body: Option<DecodedBody>,
    pub error: Option<String>,
    pub raw_body: Option<String>,
    pub metadata: EnvelopeMetadata,
}

impl DiagnosticEnvelope {
    /// Merge the captured head and decode result.  `clock` must have been
    /// started before the snapshot was taken.
    pub fn build(
        snapshot: RequestSnapshot,
        outcome: DecodeOutcome,
        clock: &Stopwatch,
        version: &str,
    ) -> Self {
        let DecodeOutcome {
            value,
            error,
            raw_fallback,
            ..
        } = outcome;
        // An error always wins; a value is never reported next to one.
        let (body, raw_body) = match error {
            Some(_) => (None, raw_fallback),
            None => (value, None),
        };
        DiagnosticEnvelope {
            request: snapshot.into(),
            body,
            error,
            raw_body,
            metadata: EnvelopeMetadata {
                timestamp: iso_timestamp(),
                processing_time_ms: clock.elapsed_ms(),
                worker_version: version.to_string(),
            },
        }
    }
}
