use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Which pipeline serves the reflection routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReflectMode {
    /// Classify, decode and describe the request.
    #[default]
    Introspect,
    /// Echo headers and body byte for byte.
    Passthrough,
}

impl ReflectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectMode::Introspect => "introspect",
            ReflectMode::Passthrough => "passthrough",
        }
    }
}

impl FromStr for ReflectMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "introspect" => Ok(ReflectMode::Introspect),
            "passthrough" => Ok(ReflectMode::Passthrough),
            other => Err(anyhow!(
                "REFLECTOR_MODE must be 'introspect' or 'passthrough' (got '{}')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            keep: 1,
            compress: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: ReflectMode,
    pub version: String,
    /// Upper bound on buffered body size (None => unbounded).
    pub max_body_bytes: Option<usize>,
    pub proxy_url: Option<String>,
    pub proxy_timeout_ms: u64,
    pub trace_dir: Option<PathBuf>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
    pub log_sample_n: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: ReflectMode::Introspect,
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_body_bytes: None,
            proxy_url: None,
            proxy_timeout_ms: 10_000,
            trace_dir: None,
            log_file: None,
            rotation: RotationConfig::default(),
            log_stdout: false,
            log_sample_n: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let mode = match parse_optional_string("REFLECTOR_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.mode,
        };
        let version = parse_optional_string("REFLECTOR_VERSION").unwrap_or(defaults.version);
        let proxy_url = parse_optional_string("REFLECTOR_PROXY_URL");
        if let Some(url) = proxy_url.as_deref() {
            url::Url::parse(url)
                .map_err(|e| anyhow!("REFLECTOR_PROXY_URL is not a valid URL: {}", e))?;
        }

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            mode,
            version,
            max_body_bytes: parse_optional_u64("REFLECTOR_MAX_BODY_BYTES")?.map(|v| v as usize),
            proxy_url,
            proxy_timeout_ms: parse_optional_u64("REFLECTOR_PROXY_TIMEOUT_MS")?
                .unwrap_or(defaults.proxy_timeout_ms),
            trace_dir: parse_optional_string("REFLECTOR_TRACE_DIR").map(PathBuf::from),
            log_file: parse_optional_string("LOG_FILE"),
            rotation,
            log_stdout: parse_bool_env("REFLECTOR_LOG_STDOUT")?.unwrap_or(false),
            log_sample_n: parse_optional_u64("REFLECTOR_LOG_SAMPLE_N")?.filter(|n| *n > 1),
        })
    }
}

fn parse_optional_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
