//! Structured request log.
//!
//! One NDJSON record per reflected request, written through a size-rotated
//! file and optionally mirrored as a `tracing` event.  The sink is injected
//! through `AppState`; a failed write is counted and logged but never changes
//! what the caller receives.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::RotationConfig;

/// Appending file writer that rotates once the file reaches `max_bytes`.
/// Rotated files are named `<path>.1` .. `<path>.<keep>`, newest first, and
/// `<path>.1` is gzipped to `<path>.1.gz` when compression is on.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    rotation: RotationConfig,
}

impl RotatingWriter {
    pub fn open(path: impl AsRef<Path>, rotation: RotationConfig) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            rotation,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.rotation.max_bytes {
            if self.current_size().unwrap_or(0) >= limit {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        let keep = self.rotation.keep;
        if keep > 0 {
            for idx in (1..keep).rev() {
                let from = self.backup_path(idx);
                if from.exists() {
                    fs::rename(&from, self.backup_path(idx + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            if self.rotation.compress {
                self.compress_newest_backup();
            }
        }
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn compress_newest_backup(&self) {
        let rotated = self.backup_path(1);
        let data = match fs::read(&rotated) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = %rotated.display(), error = %e, "cannot read rotated log for compression");
                return;
            }
        };
        let mut gz_name = rotated.as_os_str().to_owned();
        gz_name.push(".gz");
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        let compressed = gz.write_all(&data).and_then(|_| gz.finish());
        match compressed.and_then(|buf| fs::write(&gz_name, buf)) {
            Ok(()) => {
                let _ = fs::remove_file(&rotated);
            }
            Err(e) => {
                tracing::warn!(path = %rotated.display(), error = %e, "failed to compress rotated log")
            }
        }
    }
}

/// Summary fields mirrored to stdout.
pub struct RequestLogFields<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub classification: &'a str,
    pub decode_error: bool,
    pub body_bytes: usize,
    pub latency_ms: u64,
}

#[derive(Clone)]
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    sample_n: Option<u64>,
    sample_counter: Arc<AtomicU64>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
    file_size_bytes: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool, sample_n: Option<u64>) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            sample_n,
            sample_counter: Arc::new(AtomicU64::new(0)),
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
            file_size_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, false, None)
    }

    pub fn emit_request(&self, record: &serde_json::Value, log: &RequestLogFields<'_>) {
        let wrote = self.write_record(record);
        if (wrote || self.writer.is_none()) && self.should_log_stdout() {
            tracing::info!(
                target: "telemetry",
                method = log.method,
                path = log.path,
                classification = log.classification,
                decodeError = log.decode_error,
                bodyBytes = log.body_bytes,
                latencyMs = log.latency_ms,
                "request reflected"
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes.load(Ordering::Relaxed)
    }

    fn write_record(&self, record: &serde_json::Value) -> bool {
        let Some(writer) = self.writer.as_ref() else {
            return false;
        };
        let Ok(mut guard) = writer.lock() else {
            tracing::warn!("request log writer poisoned");
            self.write_errors_total.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match guard.write_line(&record.to_string()) {
            Ok(()) => {
                self.lines_total.fetch_add(1, Ordering::Relaxed);
                if let Some(sz) = guard.current_size() {
                    self.file_size_bytes.store(sz, Ordering::Relaxed);
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write request log line");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn should_log_stdout(&self) -> bool {
        if !self.log_stdout {
            return false;
        }
        match self.sample_n {
            Some(n) => self.sample_counter.fetch_add(1, Ordering::Relaxed) % n == 0,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fields() -> RequestLogFields<'static> {
        RequestLogFields {
            method: "POST",
            path: "/",
            classification: "JSON",
            decode_error: false,
            body_bytes: 7,
            latency_ms: 1,
        }
    }

    #[test]
    fn rotates_and_compresses_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requests.log");
        let rotation = RotationConfig {
            max_bytes: Some(10),
            keep: 2,
            compress: true,
        };
        let mut w = RotatingWriter::open(&path, rotation).unwrap();
        w.write_line("first line over ten bytes").unwrap();
        w.write_line("second").unwrap();
        assert!(dir.path().join("requests.log.1.gz").exists());
        assert!(!dir.path().join("requests.log.1").exists());
        let current = fs::read_to_string(&path).unwrap();
        assert_eq!(current, "second\n");
    }

    #[test]
    fn sink_counts_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requests.log");
        let rotation = RotationConfig {
            max_bytes: None,
            keep: 1,
            compress: false,
        };
        let sink = TelemetrySink::new(Some(RotatingWriter::open(&path, rotation).unwrap()), false, None);
        sink.emit_request(&serde_json::json!({"method": "POST"}), &fields());
        sink.emit_request(&serde_json::json!({"method": "PUT"}), &fields());
        assert_eq!(sink.lines_total(), 2);
        assert_eq!(sink.write_errors_total(), 0);
        assert!(sink.file_size_bytes() > 0);
        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let sink = TelemetrySink::disabled();
        sink.emit_request(&serde_json::json!({}), &fields());
        assert_eq!(sink.lines_total(), 0);
    }
}
