//! Last-resort error boundary.
//!
//! Two terminal outcomes: an uncaught fault renders a 500 envelope, an
//! unmatched route a 404 envelope.  Decode failures never reach this module;
//! they are reported inside the 200 reflection envelope.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::AssertUnwindSafe;

use axum::extract::Request;
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::FutureExt;
use serde::Serialize;

use crate::util::iso_timestamp;

/// An unexpected failure while serving a request.
#[derive(Debug, Clone, Serialize)]
pub struct Fault {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self {
            message: message.into(),
            kind: kind.into(),
            stack,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Drop the captured backtrace.  After an unwind it only shows the
    /// frames of whoever caught the panic.
    pub fn without_stack(mut self) -> Self {
        self.stack = None;
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn into_response_for(self, method: &Method, uri: &Uri) -> Response {
        #[derive(Serialize)]
        struct FaultMetadata<'a> {
            timestamp: String,
            path: &'a str,
            method: &'a str,
        }
        #[derive(Serialize)]
        struct FaultEnvelope<'a> {
            error: &'a Fault,
            metadata: FaultMetadata<'a>,
        }
        let envelope = FaultEnvelope {
            error: &self,
            metadata: FaultMetadata {
                timestamp: iso_timestamp(),
                path: uri.path(),
                method: method.as_str(),
            },
        };
        (self.status, Json(envelope)).into_response()
    }
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Middleware that turns a panicking handler into a 500 envelope instead of a
/// dropped connection.
pub async fn fault_boundary(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(%method, path = %uri.path(), %message, "handler panicked");
            Fault::new("panic", message)
                .without_stack()
                .into_response_for(&method, &uri)
        }
    }
}

/// Fallback for unmatched routes.
pub async fn not_found(method: Method, uri: Uri) -> Response {
    tracing::debug!(%method, path = %uri.path(), "no matching route");
    let body = serde_json::json!({
        "error": {
            "message": "Not Found",
            "path": uri.path(),
            "method": method.as_str(),
        },
        "metadata": { "timestamp": iso_timestamp() },
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
