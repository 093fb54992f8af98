//! Byte-exact passthrough.
//!
//! Echoes the request headers and the undecoded body.  The payload is never
//! inspected or re-encoded.  Only the message framing headers are left to
//! the transport, since it recomputes them for the response it writes.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::Fault;

/// Build the echo response.  Fails only if the body cannot be buffered.
pub async fn echo(req: Request, limit: Option<usize>) -> Result<Response, Fault> {
    let (parts, body) = req.into_parts();
    let bodiless = parts.method == Method::GET || parts.method == Method::HEAD;

    let bytes = if bodiless {
        Default::default()
    } else {
        to_bytes(body, limit.unwrap_or(usize::MAX))
            .await
            .map_err(|err| {
                Fault::new("body_read", format!("Failed to read request body: {}", err))
                    .with_status(read_failure_status(&err))
            })?
    };

    let mut headers = parts.headers;
    strip_framing(&mut headers, bodiless);
    tracing::debug!(method = %parts.method, bytes = bytes.len(), "passthrough echo");

    let mut response = (StatusCode::OK, Body::from(bytes)).into_response();
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_framing(headers: &mut HeaderMap, bodiless: bool) {
    headers.remove(header::TRANSFER_ENCODING);
    if bodiless {
        headers.remove(header::CONTENT_LENGTH);
    }
}

/// 413 when the configured limit was exceeded, 500 otherwise.
pub(crate) fn read_failure_status(err: &axum::Error) -> StatusCode {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
        source = e.source();
    }
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, body: Vec<u8>) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri("/")
            .header("content-type", "image/png")
            .header("x-custom", "kept")
            .header("content-length", body.len().to_string())
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn post_body_is_returned_verbatim() {
        let payload: Vec<u8> = (0..=255u8).rev().collect();
        let resp = echo(request(Method::POST, payload.clone()), None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-custom"], "kept");
        assert_eq!(resp.headers()["content-type"], "image/png");
        let out = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(out.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn get_returns_empty_body_with_headers() {
        let resp = echo(request(Method::GET, b"ignored".to_vec()), None).await.unwrap();
        assert_eq!(resp.headers()["x-custom"], "kept");
        assert!(resp.headers().get("content-length").is_none());
        let out = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let fault = echo(request(Method::PUT, vec![7u8; 64]), Some(8))
            .await
            .unwrap_err();
        assert_eq!(fault.status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
