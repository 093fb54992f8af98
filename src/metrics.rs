//! Process-wide counters and their Prometheus text rendering.
//!
//! Counters only ever increase and are not read by the request pipeline, so
//! no request observes another request's state.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::classify::ContentClassification;
use crate::telemetry::TelemetrySink;

/// Latency bucket upper bounds in milliseconds.
const LATENCY_BUCKETS_MS: [u64; 11] = [1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000];

pub struct Metrics {
    requests_total: AtomicU64,
    decode_errors_total: AtomicU64,
    classification_counts: [AtomicU64; 9],
    proxy_requests_total: AtomicU64,
    trace_writes_total: AtomicU64,
    hist_counts: [AtomicU64; 11],
    hist_sum_ms: AtomicU64,
    hist_count: AtomicU64,
    start_epoch_secs: f64,
    start_instant: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let start_epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            requests_total: AtomicU64::new(0),
            decode_errors_total: AtomicU64::new(0),
            classification_counts: Default::default(),
            proxy_requests_total: AtomicU64::new(0),
            trace_writes_total: AtomicU64::new(0),
            hist_counts: Default::default(),
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
            start_epoch_secs,
            start_instant: Instant::now(),
        }
    }

    /// Record one reflected request.
    pub fn observe_request(
        &self,
        classification: ContentClassification,
        decode_error: bool,
        latency_ms: u64,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if decode_error {
            self.decode_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.classification_counts[classification.index()].fetch_add(1, Ordering::Relaxed);
        self.hist_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| latency_ms <= *ub) {
            self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn observe_proxy(&self) {
        self.proxy_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_trace_write(&self) {
        self.trace_writes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn decode_errors_total(&self) -> u64 {
        self.decode_errors_total.load(Ordering::Relaxed)
    }

    pub fn classification_total(&self, classification: ContentClassification) -> u64 {
        self.classification_counts[classification.index()].load(Ordering::Relaxed)
    }

    pub fn render(&self, telemetry: &TelemetrySink, version: &str) -> String {
        let mut buf = String::new();
        counter(
            &mut buf,
            "reflector_requests_total",
            "Total requests reflected in introspection mode",
            self.requests_total(),
        );
        counter(
            &mut buf,
            "reflector_decode_errors_total",
            "Reflected requests whose body failed to decode",
            self.decode_errors_total(),
        );

        writeln!(
            &mut buf,
            "# HELP reflector_classification_total Reflected requests per content classification\n# TYPE reflector_classification_total counter"
        )
        .ok();
        for class in ContentClassification::ALL {
            writeln!(
                &mut buf,
                "reflector_classification_total{{classification=\"{}\"}} {}",
                class,
                self.classification_total(class)
            )
            .ok();
        }

        writeln!(
            &mut buf,
            "# HELP reflector_request_latency_ms Reflection latency histogram milliseconds\n# TYPE reflector_request_latency_ms histogram"
        )
        .ok();
        let mut cumulative: u64 = 0;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.hist_counts[i].load(Ordering::Relaxed);
            writeln!(
                &mut buf,
                "reflector_request_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        let count = self.hist_count.load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "reflector_request_latency_ms_bucket{{le=\"+Inf\"}} {}",
            count
        )
        .ok();
        writeln!(
            &mut buf,
            "reflector_request_latency_ms_sum {}",
            self.hist_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(&mut buf, "reflector_request_latency_ms_count {}", count).ok();

        counter(
            &mut buf,
            "reflector_proxy_requests_total",
            "Requests forwarded to the proxy backend",
            self.proxy_requests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "reflector_trace_writes_total",
            "Trace objects written to the object store",
            self.trace_writes_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "reflector_telemetry_lines_total",
            "Request log lines written",
            telemetry.lines_total(),
        );
        counter(
            &mut buf,
            "reflector_telemetry_write_errors_total",
            "Request log write failures",
            telemetry.write_errors_total(),
        );
        gauge(
            &mut buf,
            "reflector_log_file_size_bytes",
            "Current size in bytes of the request log (0 if disabled)",
            telemetry.file_size_bytes(),
        );

        writeln!(
            &mut buf,
            "# HELP reflector_build_info Build information\n# TYPE reflector_build_info gauge"
        )
        .ok();
        writeln!(&mut buf, "reflector_build_info{{version=\"{}\"}} 1", version).ok();
        gauge(
            &mut buf,
            "reflector_process_start_time_seconds",
            "Process start time (Unix epoch seconds)",
            self.start_epoch_secs,
        );
        gauge(
            &mut buf,
            "reflector_process_uptime_seconds",
            "Process uptime seconds",
            self.start_instant.elapsed().as_secs_f64(),
        );
        buf
    }
}

fn counter(buf: &mut String, name: &str, help: &str, value: u64) {
    writeln!(buf, "# HELP {} {}\n# TYPE {} counter\n{} {}", name, help, name, name, value).ok();
}

fn gauge(buf: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    writeln!(buf, "# HELP {} {}\n# TYPE {} gauge\n{} {}", name, help, name, name, value).ok();
}
