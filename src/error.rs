//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result type often returned from methods that can have `ductwork` errors.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling the streaming pipe or a
/// pipelined connection.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Kind {
    Parse(Parse),
    /// The transport reached EOF before a message was complete.
    Incomplete,
    /// A response arrived when no request was waiting for one.
    MismatchedResponse,
    /// A pending item was dropped before ever being processed.
    Canceled,
    /// A send was attempted on a connection that is no longer open.
    Closed,
    /// A pipe read was attempted after the read end was closed.
    ReadClosed,
    /// The write end of a pipe recorded an explicit failure.
    Aborted,
    /// An `io::Error` occurred while reading or writing the transport.
    Io,
    /// Error occurred while connecting.
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Parse {
    Status,
    Header,
    TooLarge,
    Chunk,
    Uri,
}

impl Error {
    pub(crate) fn new(kind: Kind, cause: Option<Cause>) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause }),
        }
    }

    /// Returns true if this was an HTTP or URI parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if a pending operation was dropped before completing.
    pub fn is_canceled(&self) -> bool {
        self.inner.kind == Kind::Canceled
    }

    /// Returns true if a send was attempted on a connection that is not open.
    pub fn is_closed(&self) -> bool {
        self.inner.kind == Kind::Closed
    }

    /// Returns true if a pipe read happened after the read end was closed.
    pub fn is_read_closed(&self) -> bool {
        self.inner.kind == Kind::ReadClosed
    }

    /// Returns true if the pipe writer failed the stream on purpose.
    pub fn is_aborted(&self) -> bool {
        self.inner.kind == Kind::Aborted
    }

    /// Returns true if the transport reported an I/O error.
    pub fn is_io(&self) -> bool {
        self.inner.kind == Kind::Io
    }

    /// Returns true if the transport closed before a message completed.
    pub fn is_incomplete(&self) -> bool {
        self.inner.kind == Kind::Incomplete
    }

    /// Returns true if this error happened while connecting.
    pub fn is_connect(&self) -> bool {
        self.inner.kind == Kind::Connect
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Cause> {
        self.inner.cause
    }

    pub(crate) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Parse(parse), None)
    }

    pub(crate) fn new_uri<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Parse(Parse::Uri), Some(cause.into()))
    }

    pub(crate) fn new_chunk<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Parse(Parse::Chunk), Some(cause.into()))
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::Incomplete, None)
    }

    pub(crate) fn new_mismatched_response() -> Error {
        Error::new(Kind::MismatchedResponse, None)
    }

    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled, None)
    }

    pub(crate) fn new_disconnected() -> Error {
        Error::new(Kind::Canceled, Some("connection disconnected".into()))
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::Closed, None)
    }

    pub(crate) fn new_read_closed() -> Error {
        Error::new(Kind::ReadClosed, None)
    }

    pub(crate) fn new_aborted<E: Into<Cause>>(reason: E) -> Error {
        Error::new(Kind::Aborted, Some(reason.into()))
    }

    pub(crate) fn new_io(cause: io::Error) -> Error {
        Error::new(Kind::Io, Some(cause.into()))
    }

    pub(crate) fn new_connect<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Connect, Some(cause.into()))
    }

    /// Makes a fresh error of the same kind, carrying the original cause
    /// rendered to a string. Used when one underlying failure has to be
    /// delivered to several pending callers.
    pub(crate) fn replicate(&self) -> Error {
        let cause = self
            .inner
            .cause
            .as_ref()
            .map(|c| Cause::from(c.to_string()));
        Error::new(self.inner.kind, cause)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Status) => "invalid status line",
            Kind::Parse(Parse::Header) => "invalid header",
            Kind::Parse(Parse::TooLarge) => "message head too large",
            Kind::Parse(Parse::Chunk) => "invalid chunked framing",
            Kind::Parse(Parse::Uri) => "invalid percent encoding",
            Kind::Incomplete => "connection closed before message completed",
            Kind::MismatchedResponse => "received response without a request",
            Kind::Canceled => "operation was canceled",
            Kind::Closed => "connection closed",
            Kind::ReadClosed => "read end of the pipe is closed",
            Kind::Aborted => "stream aborted by writer",
            Kind::Io => "transport error",
            Kind::Connect => "error trying to connect",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("ductwork::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
