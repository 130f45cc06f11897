//! Case-insensitive header map and header-inspection helpers.
//!
//! Lookup folds ASCII letters only. Non-ASCII bytes in a header name are
//! compared exactly; this mirrors the transport's historical behavior and
//! is a documented limitation, not an oversight to fix with full Unicode
//! case folding.

use std::fmt;
use std::iter::FromIterator;

/// An ordered map of header names to values.
///
/// Names compare case-insensitively (ASCII folding only). The casing of
/// the first insertion is retained for output; iteration yields entries
/// in insertion order.
#[derive(Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Inserts a header, replacing any existing value.
    ///
    /// When replacing, the originally inserted casing and position are
    /// kept; only the value changes.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        for entry in &mut self.entries {
            if entry.0.eq_ignore_ascii_case(&name) {
                entry.1 = value;
                return;
            }
        }
        self.entries.push((name, value));
    }

    /// Appends a header value, comma-joining it onto an existing entry.
    ///
    /// Repeated headers on the wire are equivalent to one comma-separated
    /// list (RFC 7230 section 3.2.2).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        for entry in &mut self.entries {
            if entry.0.eq_ignore_ascii_case(&name) {
                entry.1.push_str(", ");
                entry.1.push_str(&value);
                return;
            }
        }
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes a header, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterates entries in insertion order, with original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Headers {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl<N: Into<String>, V: Into<String>> Extend<(N, V)> for Headers {
    fn extend<T: IntoIterator<Item = (N, V)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

pub(crate) fn connection_close(headers: &Headers) -> bool {
    connection_has(headers, "close")
}

pub(crate) fn connection_keep_alive(headers: &Headers) -> bool {
    connection_has(headers, "keep-alive")
}

fn connection_has(headers: &Headers, needle: &str) -> bool {
    if let Some(value) = headers.get("connection") {
        for token in value.split(',') {
            if token.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

pub(crate) fn content_length_parse(headers: &Headers) -> Option<u64> {
    headers
        .get("content-length")
        .and_then(|value| value.trim().parse().ok())
}

pub(crate) fn transfer_encoding_is_chunked(headers: &Headers) -> bool {
    // chunked must always be the last encoding, according to spec
    if let Some(value) = headers.get("transfer-encoding") {
        if let Some(encoding) = value.rsplit(',').next() {
            return encoding.trim().eq_ignore_ascii_case("chunked");
        }
    }
    false
}
