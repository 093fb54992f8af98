//! Small helpers shared by the handlers: wall-clock timestamps, a monotonic
//! stopwatch and object key derivation for the trace sink.

use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn iso_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Object key for a stored trace: `trace/<ISO-8601>.log.gz`.
pub fn trace_key(ts: DateTime<Utc>) -> String {
    format!("trace/{}.log.gz", format_timestamp(ts))
}

/// Monotonic elapsed-time measurement started when a request is captured.
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Stopwatch {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whole milliseconds elapsed.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
