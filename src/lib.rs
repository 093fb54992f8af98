//! Core library for Reflector.  This module wires the reflection pipeline
//! (snapshot, classify, decode, envelope), the passthrough echo and the
//! collaborator routes into an Axum router.

mod config;
pub mod backends;
pub mod classify;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod passthrough;
pub mod snapshot;
pub mod telemetry;
pub mod util;

pub use config::{AppConfig, ReflectMode, RotationConfig};

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{middleware, Json, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::backends::{
    BackendError, FsObjectStore, HttpProxyBackend, ObjectStore, ProxyBackend,
};
use crate::classify::classify;
use crate::decode::decode;
use crate::envelope::DiagnosticEnvelope;
use crate::metrics::Metrics;
use crate::snapshot::{path_params, FieldMap, RequestSnapshot};
use crate::telemetry::{RequestLogFields, RotatingWriter, TelemetrySink};
use crate::util::{trace_key, Stopwatch};

/// Optional segments declared by the `/hooks` routes.
const HOOK_PARAMS: [&str; 2] = ["source", "event"];

/// Application state shared across handlers.  Holds configuration and the
/// injected collaborators; nothing in here is mutated per request except
/// the monotonic counters.
#[derive(Clone)]
pub struct AppState {
    pub mode: ReflectMode,
    pub version: Arc<str>,
    pub max_body_bytes: Option<usize>,
    pub proxy: Option<Arc<dyn ProxyBackend>>,
    pub store: Option<Arc<dyn ObjectStore>>,
    pub telemetry: TelemetrySink,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// State with no collaborators bound and telemetry disabled.
    pub fn new(mode: ReflectMode, version: impl Into<Arc<str>>) -> Self {
        Self {
            mode,
            version: version.into(),
            max_body_bytes: None,
            proxy: None,
            store: None,
            telemetry: TelemetrySink::disabled(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyBackend>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

/// Build state from a parsed configuration.  Collaborators whose settings
/// are absent stay unbound.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let AppConfig {
        mode,
        version,
        max_body_bytes,
        proxy_url,
        proxy_timeout_ms,
        trace_dir,
        log_file,
        rotation,
        log_stdout,
        log_sample_n,
    } = config;

    let writer = match log_file.as_deref() {
        Some(path) => match RotatingWriter::open(path, rotation) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to open LOG_FILE; request log disabled");
                None
            }
        },
        None => {
            tracing::info!("Request log disabled: LOG_FILE not set");
            None
        }
    };
    let telemetry = TelemetrySink::new(writer, log_stdout, log_sample_n);

    let mut state = AppState::new(mode, version)
        .with_max_body_bytes(max_body_bytes)
        .with_telemetry(telemetry);

    match proxy_url.as_deref() {
        Some(url) => {
            let backend = HttpProxyBackend::new(url, proxy_timeout_ms, max_body_bytes)?;
            state = state.with_proxy(Arc::new(backend));
        }
        None => tracing::warn!("REFLECTOR_PROXY_URL not set; /proxy will report service not available"),
    }
    match trace_dir {
        Some(dir) => state = state.with_store(Arc::new(FsObjectStore::new(dir))),
        None => tracing::warn!("REFLECTOR_TRACE_DIR not set; /trace writes will fail"),
    }
    Ok(state)
}

/// Build state from environment variables.  See `AppConfig::from_env` for
/// the recognised variables.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    Ok(build_state(config)?)
}

/// Build the Axum router and attach handlers.  The router holds a copy
/// of the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", any(reflect_root))
        .route("/hooks/:source", any(reflect_hook))
        .route("/hooks/:source/:event", any(reflect_hook))
        .route("/proxy", any(proxy_handler))
        .route("/proxy/*rest", any(proxy_handler))
        .route("/trace", post(trace_handler).fallback(error::not_found))
        .route("/healthz", get(healthz_handler).fallback(error::not_found))
        .route("/metrics", get(metrics_handler).fallback(error::not_found))
        .fallback(error::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(error::fault_boundary)),
        )
        .with_state(state)
}

async fn reflect_root(State(state): State<AppState>, req: Request) -> Response {
    reflect(&state, FieldMap::new(), req).await
}

async fn reflect_hook(
    State(state): State<AppState>,
    Path(matched): Path<HashMap<String, String>>,
    req: Request,
) -> Response {
    reflect(&state, path_params(matched, &HOOK_PARAMS), req).await
}

async fn reflect(state: &AppState, params: FieldMap<Option<String>>, req: Request) -> Response {
    match state.mode {
        ReflectMode::Introspect => introspect(state, params, req).await,
        ReflectMode::Passthrough => {
            let method = req.method().clone();
            let uri = req.uri().clone();
            match passthrough::echo(req, state.max_body_bytes).await {
                Ok(resp) => resp,
                Err(fault) => {
                    tracing::warn!(%method, path = %uri.path(), error = %fault.message, "passthrough failed");
                    fault.into_response_for(&method, &uri)
                }
            }
        }
    }
}

/// The introspection pipeline: snapshot, classify, decode, envelope.  Always
/// answers 200; decode failures are described inside the envelope.
pub async fn introspect(
    state: &AppState,
    params: FieldMap<Option<String>>,
    req: Request,
) -> Response {
    let clock = Stopwatch::start();
    let (parts, body) = req.into_parts();
    let snapshot = RequestSnapshot::capture(&parts, params);
    tracing::debug!(method = %snapshot.method, path = %snapshot.path, headers = ?snapshot.headers, "request headers");

    let classification = classify(
        snapshot.content_type.as_deref(),
        snapshot.content_length.as_deref(),
        &snapshot.method,
    );
    let outcome = decode(
        classification,
        snapshot.content_type.as_deref(),
        body,
        state.max_body_bytes,
    )
    .await;
    if let Some(err) = outcome.error.as_deref() {
        tracing::warn!(classification = %classification, error = %err, "body decode failed");
    }

    let method = snapshot.method.clone();
    let path = snapshot.path.clone();
    let body_bytes = outcome.body_bytes;
    let decode_error = outcome.error.clone();
    let envelope = DiagnosticEnvelope::build(snapshot, outcome, &clock, &state.version);
    let latency_ms = envelope.metadata.processing_time_ms;

    state
        .metrics
        .observe_request(classification, decode_error.is_some(), latency_ms);
    let record = serde_json::json!({
        "schemaVersion": 1,
        "ts": envelope.metadata.timestamp,
        "method": method.as_str(),
        "path": path,
        "classification": classification,
        "decodeError": decode_error,
        "bodyBytes": body_bytes,
        "latencyMs": latency_ms,
        "status": 200,
    });
    state.telemetry.emit_request(
        &record,
        &RequestLogFields {
            method: method.as_str(),
            path: &path,
            classification: classification.as_str(),
            decode_error: decode_error.is_some(),
            body_bytes,
            latency_ms,
        },
    );

    (StatusCode::OK, Json(envelope)).into_response()
}

fn error_message(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": { "message": message } });
    (status, Json(body)).into_response()
}

/// Forwards the request untouched to the bound backend.
async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    let Some(proxy) = state.proxy.as_ref() else {
        tracing::warn!(path = %req.uri().path(), "proxy backend not bound");
        return error_message(StatusCode::INTERNAL_SERVER_ERROR, "service not available");
    };
    state.metrics.observe_proxy();
    match proxy.forward(req).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(backend = %proxy.name(), error = %err, "proxy forward failed");
            let status = match &err {
                BackendError::Body(e) => passthrough::read_failure_status(e),
                BackendError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
                BackendError::Request(_) => StatusCode::BAD_GATEWAY,
            };
            error_message(status, &err.to_string())
        }
    }
}

/// Stores the raw body as `trace/<timestamp>.log.gz`.
async fn trace_handler(State(state): State<AppState>, req: Request) -> Response {
    let failure = || (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "success": false }))).into_response();

    let Some(store) = state.store.as_ref() else {
        tracing::warn!("trace store not bound");
        return failure();
    };
    let body = match to_bytes(req.into_body(), state.max_body_bytes.unwrap_or(usize::MAX)).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read trace body");
            return failure();
        }
    };
    let key = trace_key(chrono::Utc::now());
    match store.put(&key, body).await {
        Ok(obj) => {
            state.metrics.observe_trace_write();
            tracing::info!(key = %obj.key, size = obj.size, "trace stored");
            let json = serde_json::json!({
                "success": true,
                "etag": obj.etag,
                "key": obj.key,
                "size": obj.size,
            });
            (StatusCode::OK, Json(json)).into_response()
        }
        Err(e) => {
            tracing::error!(key = %key, error = %e, "trace write failed");
            failure()
        }
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": &*state.version,
        "mode": state.mode.as_str(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render(&state.telemetry, &state.version);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
