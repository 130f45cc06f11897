//! HTTP request value type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::Method;

use crate::headers::Headers;
use crate::url::Url;

/// One HTTP request, with a fully materialized body.
#[derive(Debug)]
pub struct Request {
    pub method: Method,

    /// For client requests, the URL should be absolute.
    /// For server requests, the URL may be a relative reference.
    pub url: Url,

    pub headers: Headers,

    pub body: Bytes,

    /// When false, the request is sent with `Connection: close` and the
    /// connection stops accepting new sends once this request is queued.
    pub keep_alive: bool,

    /// For server requests, the address of the client. Note that this may
    /// correspond to a proxy or load balancer address.
    pub client: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Request {
        Request {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            client: None,
        }
    }

    pub fn get(url: Url) -> Request {
        Request::new(Method::GET, url)
    }

    pub fn post(url: Url, content_type: &str, body: impl Into<Bytes>) -> Request {
        let mut request = Request::new(Method::POST, url);
        request.headers.insert("Content-Type", content_type);
        request.body = body.into();
        request
    }

    pub fn delete(url: Url) -> Request {
        Request::new(Method::DELETE, url)
    }

    /// Returns whether the given content-encoding is considered acceptable
    /// in the response. See RFC 2616 section 14.3.
    ///
    /// A missing or empty `Accept-Encoding` header means nothing beyond
    /// identity is acceptable.
    pub fn accepts_encoding(&self, encoding: &str) -> bool {
        let accept = match self.headers.get("accept-encoding") {
            Some(value) => value,
            None => return false,
        };
        if accept.trim().is_empty() {
            return false;
        }

        for item in accept.split(',') {
            let mut parts = item.split(';');
            let name = parts.next().unwrap_or("").trim();
            let acceptable = qvalue(parts) > 0.0;

            if name.eq_ignore_ascii_case(encoding) {
                return acceptable;
            }
            // "*" matches any encoding not explicitly listed.
            if name == "*" && acceptable {
                return true;
            }
        }
        false
    }

    /// Returns whether the given media type is considered acceptable in
    /// the response. See RFC 2616 section 14.1.
    ///
    /// A missing `Accept` header means all media types are acceptable.
    pub fn accepts_media_type(&self, media_type: &str) -> bool {
        let mut wanted = media_type.splitn(2, '/');
        let (wanted_type, wanted_subtype) = match (wanted.next(), wanted.next()) {
            (Some(t), Some(s)) if !t.is_empty() && !s.is_empty() => (t, s),
            _ => return false,
        };

        let accept = match self.headers.get("accept") {
            Some(value) => value,
            None => return true,
        };

        for item in accept.split(',') {
            let mut parts = item.split(';');
            let name = parts.next().unwrap_or("").trim();

            let mut offered = name.splitn(2, '/');
            let (offered_type, offered_subtype) = match (offered.next(), offered.next()) {
                (Some(t), Some(s)) => (t, s),
                _ => continue,
            };

            let type_matches =
                offered_type == "*" || offered_type.eq_ignore_ascii_case(wanted_type);
            let subtype_matches =
                offered_subtype == "*" || offered_subtype.eq_ignore_ascii_case(wanted_subtype);

            if type_matches && subtype_matches {
                // First match decides; a qvalue of 0 disqualifies.
                return qvalue(parts) > 0.0;
            }
        }
        false
    }
}

/// Parses `q=` from remaining `;`-separated parameters; defaults to 1.
fn qvalue<'a>(params: impl Iterator<Item = &'a str>) -> f32 {
    for param in params {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
            return value.trim().parse().unwrap_or(0.0);
        }
    }
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(name: &str, value: &str) -> Request {
        let mut request = Request::get(Url::new("http", "example.org", 80));
        request.headers.insert(name, value);
        request
    }

    #[test]
    fn accepts_encoding_absent_header_is_refusal() {
        let request = Request::get(Url::new("http", "example.org", 80));
        assert!(!request.accepts_encoding("gzip"));
    }

    #[test]
    fn accepts_encoding_listed() {
        let request = request_with("Accept-Encoding", "gzip, deflate");
        assert!(request.accepts_encoding("gzip"));
        assert!(request.accepts_encoding("Deflate"));
        assert!(!request.accepts_encoding("br"));
    }

    #[test]
    fn accepts_encoding_qvalue_zero_disqualifies() {
        let request = request_with("Accept-Encoding", "gzip;q=0, deflate;q=0.5");
        assert!(!request.accepts_encoding("gzip"));
        assert!(request.accepts_encoding("deflate"));
    }

    #[test]
    fn accepts_encoding_wildcard() {
        let request = request_with("Accept-Encoding", "*");
        assert!(request.accepts_encoding("gzip"));

        let request = request_with("Accept-Encoding", "*;q=0");
        assert!(!request.accepts_encoding("gzip"));
    }

    #[test]
    fn accepts_media_type_absent_header_accepts_all() {
        let request = Request::get(Url::new("http", "example.org", 80));
        assert!(request.accepts_media_type("application/json"));
    }

    #[test]
    fn accepts_media_type_wildcards() {
        let request = request_with("Accept", "text/*, application/json");
        assert!(request.accepts_media_type("text/plain"));
        assert!(request.accepts_media_type("application/json"));
        assert!(!request.accepts_media_type("image/png"));

        let request = request_with("Accept", "*/*");
        assert!(request.accepts_media_type("image/png"));
    }

    #[test]
    fn accepts_media_type_qvalue_zero_disqualifies() {
        let request = request_with("Accept", "application/json;q=0.0, */*");
        assert!(!request.accepts_media_type("application/json"));
    }

    #[test]
    fn accepts_media_type_malformed_argument() {
        let request = Request::get(Url::new("http", "example.org", 80));
        assert!(!request.accepts_media_type("json"));
    }
}
