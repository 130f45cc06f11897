//! URL value type and percent/query encoding.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;

/// Represents a Uniform Resource Locator:
/// `scheme://host:port/path?query#fragment`.
///
/// For client requests the URL should be absolute; for server requests it
/// may be a relative reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Url {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub fragment: Option<String>,
}

impl Url {
    /// Creates an absolute URL with path `/` and no query.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Url {
        Url {
            scheme: Some(scheme.into()),
            host: Some(host.into()),
            port: Some(port),
            path: "/".to_string(),
            query: BTreeMap::new(),
            fragment: None,
        }
    }

    /// Replaces the path, returning the URL for chaining.
    pub fn with_path(mut self, path: impl Into<String>) -> Url {
        self.path = path.into();
        self
    }

    /// Adds one query parameter, returning the URL for chaining.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Url {
        self.query.insert(key.into(), value.into());
        self
    }

    /// The origin-form request target: path plus encoded query.
    pub(crate) fn request_target(&self) -> String {
        let mut target = if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        };
        if !self.query.is_empty() {
            target.push('?');
            target.push_str(&query::encode(&self.query));
        }
        target
    }

    /// Value for a `Host` header: `host` or `host:port`.
    pub(crate) fn host_header(&self) -> Option<String> {
        let host = self.host.as_ref()?;
        Some(match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        })
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref scheme) = self.scheme {
            write!(f, "{}://", scheme)?;
        }
        if let Some(ref host) = self.host {
            f.write_str(host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(&self.request_target())?;
        if let Some(ref fragment) = self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

/// Returns a percent-encoded string according to RFC 3986.
///
/// The input must not already be percent encoded.
pub fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(hex_digit(b >> 4));
                out.push(hex_digit(b & 0xF));
            }
        }
    }
    out
}

/// Decodes a percent-encoded string according to RFC 3986.
///
/// `+` decodes to a space. Returns an error on a malformed `%` escape or
/// if the decoded bytes are not valid UTF-8.
pub fn decode(s: &str) -> crate::Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).copied().and_then(unhex);
                let lo = bytes.get(i + 2).copied().and_then(unhex);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        return Err(Error::new_uri(format!(
                            "malformed % escape at offset {}",
                            i
                        )));
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(Error::new_uri)
}

fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'A' + nibble - 10) as char,
    }
}

fn unhex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

pub mod query {
    //! HTTP query string encoding and decoding.

    use std::collections::BTreeMap;

    /// Encodes a query map as `key=value` pairs joined by `&`, with keys
    /// and values percent encoded.
    pub fn encode(query: &BTreeMap<String, String>) -> String {
        let mut out = String::new();
        for (key, value) in query {
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(&super::encode(key));
            if !value.is_empty() {
                out.push('=');
                out.push_str(&super::encode(value));
            }
        }
        out
    }

    /// Decodes a query string into a map.
    ///
    /// A key without `=` maps to the empty string. The last value wins
    /// for a duplicated key, since the RFC does not specify otherwise.
    pub fn decode(query: &str) -> crate::Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let mut parts = pair.splitn(2, '=');
            let key = super::decode(parts.next().unwrap_or(""))?;
            let value = super::decode(parts.next().unwrap_or(""))?;
            out.insert(key, value);
        }
        Ok(out)
    }
}
