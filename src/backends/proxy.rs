use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::Response;

use super::{BackendError, ProxyBackend};

/// Hop-by-hop headers owned by each transport leg (RFC 9110 §7.6.1).
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards requests to a fixed base URL over HTTP.
pub struct HttpProxyBackend {
    base: url::Url,
    client: reqwest::Client,
    max_body_bytes: Option<usize>,
}

impl HttpProxyBackend {
    pub fn new(
        base_url: &str,
        timeout_ms: u64,
        max_body_bytes: Option<usize>,
    ) -> Result<Self, BackendError> {
        let base = url::Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            base,
            client,
            max_body_bytes,
        })
    }

    /// Same path and query as the inbound request, on the backend's origin.
    fn target_url(&self, req: &Request) -> Result<url::Url, BackendError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Ok(self.base.join(path_and_query)?)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

#[async_trait::async_trait]
impl ProxyBackend for HttpProxyBackend {
    fn name(&self) -> &str {
        self.base.as_str()
    }

    async fn forward(&self, req: Request) -> Result<Response, BackendError> {
        let target = self.target_url(&req)?;
        let (parts, body) = req.into_parts();
        let body = to_bytes(body, self.max_body_bytes.unwrap_or(usize::MAX)).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!(method = %parts.method, target = %target, "forwarding to backend");
        let upstream = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut resp_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut resp_headers);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = resp_headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_keeps_path_and_query() {
        let backend = HttpProxyBackend::new("http://backend.internal:9000", 100, None).unwrap();
        let req = axum::http::Request::builder()
            .uri("/proxy/orders?id=7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            backend.target_url(&req).unwrap().as_str(),
            "http://backend.internal:9000/proxy/orders?id=7"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-request-id"));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            HttpProxyBackend::new("::nope", 100, None),
            Err(BackendError::Url(_))
        ));
    }
}
