//! HTTP response value type and its body representation.

use std::fmt;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use http::StatusCode;

use crate::headers::Headers;
use crate::pipe;

/// How a response body is produced.
///
/// Exactly one variant is active; every consumer matches all four. The
/// framing headers (`Content-Length`, `Transfer-Encoding`) are derived
/// from the variant by the constructors and serializers, never set by
/// callers directly.
pub enum Body {
    /// No body at all.
    None,
    /// A fully materialized payload. `Content-Length` is derived from it.
    Full(Bytes),
    /// An absolute path to a file, to be streamed by a server with a
    /// zero-copy file transfer. The caller supplies `Content-Type`.
    Path(PathBuf),
    /// Chunked body data arriving over a pipe; implies
    /// `Transfer-Encoding: chunked`.
    Pipe(pipe::Reader),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::None => f.write_str("Body::None"),
            Body::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Body::Path(path) => f.debug_tuple("Body::Path").field(path).finish(),
            Body::Pipe(_) => f.write_str("Body::Pipe"),
        }
    }
}

/// One HTTP response.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    /// A response with no body.
    pub fn new(status: StatusCode) -> Response {
        Response {
            status,
            headers: Headers::new(),
            body: Body::None,
        }
    }

    /// A response with a materialized body; derives `Content-Length`.
    pub fn with_body(status: StatusCode, body: impl Into<Bytes>) -> Response {
        let body = body.into();
        let mut headers = Headers::new();
        let mut buf = itoa::Buffer::new();
        headers.insert("Content-Length", buf.format(body.len()));
        Response {
            status,
            headers,
            body: Body::Full(body),
        }
    }

    /// A response streamed from a pipe; derives
    /// `Transfer-Encoding: chunked`.
    pub fn with_pipe(status: StatusCode, reader: pipe::Reader) -> Response {
        let mut headers = Headers::new();
        headers.insert("Transfer-Encoding", "chunked");
        Response {
            status,
            headers,
            body: Body::Pipe(reader),
        }
    }

    /// A file-transfer response. Framing headers are derived from the
    /// file at transmission time; supply `Content-Type` yourself.
    pub fn with_path(status: StatusCode, path: impl Into<PathBuf>) -> Response {
        Response {
            status,
            headers: Headers::new(),
            body: Body::Path(path.into()),
        }
    }

    pub fn ok() -> Response {
        Response::new(StatusCode::OK)
    }

    pub fn ok_with(body: impl Into<Bytes>) -> Response {
        Response::with_body(StatusCode::OK, body)
    }

    pub fn accepted() -> Response {
        Response::new(StatusCode::ACCEPTED)
    }

    pub fn bad_request(body: impl Into<Bytes>) -> Response {
        Response::with_body(StatusCode::BAD_REQUEST, body)
    }

    pub fn forbidden(body: impl Into<Bytes>) -> Response {
        Response::with_body(StatusCode::FORBIDDEN, body)
    }

    pub fn not_found() -> Response {
        Response::new(StatusCode::NOT_FOUND)
    }

    pub fn internal_server_error(body: impl Into<Bytes>) -> Response {
        Response::with_body(StatusCode::INTERNAL_SERVER_ERROR, body)
    }

    pub fn not_implemented() -> Response {
        Response::new(StatusCode::NOT_IMPLEMENTED)
    }

    pub fn service_unavailable() -> Response {
        Response::new(StatusCode::SERVICE_UNAVAILABLE)
    }

    /// The status line reason string, e.g. `"Not Found"`.
    pub fn reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Consumes the response and materializes its whole body.
    ///
    /// For `Pipe` bodies this reads until end-of-stream, so it suspends
    /// as long as the producer keeps the stream open.
    pub async fn read_body(self) -> crate::Result<Bytes> {
        match self.body {
            Body::None => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Path(path) => {
                let contents = tokio::fs::read(&path)
                    .await
                    .map_err(crate::Error::new_io)?;
                Ok(Bytes::from(contents))
            }
            Body::Pipe(reader) => {
                let mut out = BytesMut::new();
                loop {
                    let chunk = reader.read().await?;
                    if chunk.is_empty() {
                        return Ok(out.freeze());
                    }
                    out.extend_from_slice(&chunk);
                }
            }
        }
    }
}
