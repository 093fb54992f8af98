//! Request metadata extraction.
//!
//! `RequestSnapshot::capture` reads the already-buffered request head and
//! never touches the body.  Header names are lower-cased by the transport;
//! when a header repeats, its values are joined with `", "` in arrival order.
//! Repeated query keys are kept as arrays.

use std::collections::HashMap;

use axum::http::{header, request::Parts, HeaderMap, Method, Uri};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// An insertion-ordered string-keyed map that serializes as a JSON object.
///
/// Lookups go through `index`, so folding n fields stays linear in n.
#[derive(Debug, Clone)]
pub struct FieldMap<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for FieldMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V: PartialEq> PartialEq for FieldMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<V> FieldMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let i = *self.index.get(key)?;
        Some(&mut self.entries[i].1)
    }

    /// Insert or replace, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Serialize> Serialize for FieldMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A query value: a single string, or every value of a repeated key.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl QueryValue {
    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                let first = std::mem::take(first);
                *self = QueryValue::Multiple(vec![first, value]);
            }
            QueryValue::Multiple(values) => values.push(value),
        }
    }
}

/// Parse `a=1&b=2&a=3` style pairs into a `FieldMap`, folding repeated keys.
pub fn parse_pairs(raw: &[u8]) -> FieldMap<QueryValue> {
    let mut out: FieldMap<QueryValue> = FieldMap::new();
    for (k, v) in url::form_urlencoded::parse(raw) {
        match out.get_mut(&k) {
            Some(existing) => existing.push(v.into_owned()),
            None => out.insert(k.into_owned(), QueryValue::Single(v.into_owned())),
        }
    }
    out
}

/// Immutable view of the request head, captured once per request.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub headers: FieldMap<String>,
    pub query: FieldMap<QueryValue>,
    /// Path parameters.  Optional segments the route declares but the request
    /// did not supply are present with `None`.
    pub params: FieldMap<Option<String>>,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
}

impl RequestSnapshot {
    pub fn capture(parts: &Parts, params: FieldMap<Option<String>>) -> Self {
        Self::from_head(&parts.method, &parts.uri, &parts.headers, params)
    }

    pub fn from_head(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        params: FieldMap<Option<String>>,
    ) -> Self {
        let query = uri
            .query()
            .map(|q| parse_pairs(q.as_bytes()))
            .unwrap_or_default();
        RequestSnapshot {
            method: method.clone(),
            url: absolute_url(uri, headers),
            path: uri.path().to_string(),
            headers: collect_headers(headers),
            query,
            params,
            content_type: header_str(headers, header::CONTENT_TYPE.as_str()),
            content_length: header_str(headers, header::CONTENT_LENGTH.as_str()),
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn collect_headers(headers: &HeaderMap) -> FieldMap<String> {
    let mut out: FieldMap<String> = FieldMap::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes());
        match out.get_mut(name.as_str()) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => out.insert(name.as_str(), value.into_owned()),
        }
    }
    out
}

/// Rebuild the absolute URL.  Origin-form request targets only carry the
/// path, so the authority comes from the `Host` header.
fn absolute_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}://{}{}", scheme, host, path_and_query)
}

/// Build the parameter map from extracted route params, filling any of
/// `declared` that did not match with `None`.
pub fn path_params(matched: HashMap<String, String>, declared: &[&str]) -> FieldMap<Option<String>> {
    let mut out = FieldMap::new();
    for name in declared {
        out.insert(*name, matched.get(*name).cloned());
    }
    let mut extra: Vec<_> = matched
        .into_iter()
        .filter(|(k, _)| !declared.contains(&k.as_str()))
        .collect();
    extra.sort();
    for (k, v) in extra {
        out.insert(k, Some(v));
    }
    out
}
