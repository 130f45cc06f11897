//! Request serialization and response head parsing.

use bytes::{Buf, BytesMut};
use http::{Method, StatusCode};
use tracing::{debug, trace};

use crate::error::{Error, Parse};
use crate::headers::{self, Headers};
use crate::request::Request;

/// Maximum number of headers accepted in a response head.
const MAX_HEADERS: usize = 100;

/// Maximum accumulated size of a response head before parsing fails.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// A parsed response head.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) status: StatusCode,
    pub(crate) headers: Headers,
    /// The peer asked for this connection to close after the exchange,
    /// either explicitly or implicitly (HTTP/1.0 without keep-alive).
    pub(crate) close: bool,
}

/// How the body following a [`Head`] is framed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BodyLength {
    None,
    Known(u64),
    Chunked,
    /// Read until the peer closes the connection.
    CloseDelimited,
}

/// Serializes `request` in origin-form onto `dst`.
///
/// Derives `Host` from the URL, `Content-Length` from the body, and
/// `Connection: close` from the keep-alive flag, unless the caller
/// already set those headers.
pub(crate) fn encode_request(request: &Request, dst: &mut BytesMut) {
    let target = request.url.request_target();
    trace!("encoding request: {} {}", request.method, target);

    dst.extend_from_slice(request.method.as_str().as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(target.as_bytes());
    dst.extend_from_slice(b" HTTP/1.1\r\n");

    if !request.headers.contains("host") {
        if let Some(host) = request.url.host_header() {
            dst.extend_from_slice(b"Host: ");
            dst.extend_from_slice(host.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
    }

    let wants_length = !request.body.is_empty()
        || request.method == Method::POST
        || request.method == Method::PUT
        || request.method == Method::PATCH;
    if wants_length && !request.headers.contains("content-length") {
        let mut buf = itoa::Buffer::new();
        dst.extend_from_slice(b"Content-Length: ");
        dst.extend_from_slice(buf.format(request.body.len()).as_bytes());
        dst.extend_from_slice(b"\r\n");
    }

    if !request.keep_alive && !headers::connection_close(&request.headers) {
        dst.extend_from_slice(b"Connection: close\r\n");
    }

    for (name, value) in request.headers.iter() {
        dst.extend_from_slice(name.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }

    dst.extend_from_slice(b"\r\n");
    dst.extend_from_slice(&request.body);
}

/// Tries to parse a response head from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success the head
/// bytes are consumed from `buf`, leaving any body bytes in place.
pub(crate) fn parse_head(buf: &mut BytesMut) -> crate::Result<Option<Head>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let (consumed, head) = {
        let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut parsed_headers);

        match parsed.parse(&buf[..]) {
            Ok(httparse::Status::Complete(len)) => {
                let code = parsed.code.ok_or_else(|| Error::new_parse(Parse::Status))?;
                let status = StatusCode::from_u16(code)
                    .map_err(|_| Error::new_parse(Parse::Status))?;

                let mut headers = Headers::new();
                for header in parsed.headers.iter() {
                    let value = std::str::from_utf8(header.value)
                        .map_err(|_| Error::new_parse(Parse::Header))?;
                    headers.append(header.name, value);
                }

                let http10 = parsed.version == Some(0);
                let close = headers::connection_close(&headers)
                    || (http10 && !headers::connection_keep_alive(&headers));

                debug!("parsed response head: {}", status);
                (len, Head { status, headers, close })
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_SIZE {
                    return Err(Error::new_parse(Parse::TooLarge));
                }
                return Ok(None);
            }
            Err(_) => return Err(Error::new_parse(Parse::Status)),
        }
    };

    buf.advance(consumed);
    Ok(Some(head))
}

/// Decides how the body following `head` is framed (RFC 7230 section
/// 3.3.3, the subset a client without HEAD requests needs).
pub(crate) fn body_length(head: &Head) -> crate::Result<BodyLength> {
    let status = head.status;
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyLength::None);
    }

    if headers::transfer_encoding_is_chunked(&head.headers) {
        return Ok(BodyLength::Chunked);
    }

    if head.headers.contains("content-length") {
        return match headers::content_length_parse(&head.headers) {
            Some(0) => Ok(BodyLength::None),
            Some(len) => Ok(BodyLength::Known(len)),
            None => Err(Error::new_parse(Parse::Header)),
        };
    }

    Ok(BodyLength::CloseDelimited)
}
