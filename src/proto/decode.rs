//! Incremental decoders for the different response body framings.
//!
//! The connection's read loop owns the transport buffer; decoders step
//! over whatever bytes are available and report when they need more.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::error::Error;
use crate::proto::role::BodyLength;

use self::ChunkedState::*;

/// One step of decoding.
#[derive(Debug)]
pub(crate) enum Decode {
    /// A non-empty piece of body data.
    Data(Bytes),
    /// The body is complete.
    Complete,
    /// More transport bytes are needed.
    Incomplete,
}

/// Decoder for a single response body.
#[derive(Debug)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    /// No body follows the head.
    Empty,
    /// A `Content-Length` body with this many bytes remaining.
    Length(u64),
    /// A `Transfer-Encoding: chunked` body.
    Chunked(ChunkedState, u64),
    /// A body delimited by connection close. The flag records whether
    /// EOF has been observed.
    Eof(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder {
    pub(crate) fn new(length: BodyLength) -> Decoder {
        let kind = match length {
            BodyLength::None => Kind::Empty,
            BodyLength::Known(len) => Kind::Length(len),
            BodyLength::Chunked => Kind::Chunked(Size, 0),
            BodyLength::CloseDelimited => Kind::Eof(false),
        };
        Decoder { kind }
    }

    /// True when the body can only end by the peer closing the connection.
    pub(crate) fn is_close_delimited(&self) -> bool {
        matches!(self.kind, Kind::Eof(_))
    }

    /// Records that the transport reached EOF. Returns true if that is a
    /// legal end of this body, false if the body is now truncated.
    pub(crate) fn eof(&mut self) -> bool {
        match self.kind {
            Kind::Empty | Kind::Length(0) => true,
            Kind::Chunked(End, _) => true,
            Kind::Eof(ref mut seen) => {
                *seen = true;
                true
            }
            _ => false,
        }
    }

    /// Decodes as much as possible out of `buf`.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> crate::Result<Decode> {
        match self.kind {
            Kind::Empty => Ok(Decode::Complete),
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(Decode::Complete);
                }
                if buf.is_empty() {
                    return Ok(Decode::Incomplete);
                }
                let take = (*remaining).min(buf.len() as u64) as usize;
                let data = buf.split_to(take).freeze();
                *remaining -= take as u64;
                trace!("content-length body: read {}, remaining {}", take, remaining);
                Ok(Decode::Data(data))
            }
            Kind::Chunked(ref mut state, ref mut size) => loop {
                if *state == End {
                    return Ok(Decode::Complete);
                }
                let mut data = None;
                *state = match state.step(buf, size, &mut data)? {
                    Some(next) => next,
                    None => return Ok(Decode::Incomplete),
                };
                if let Some(data) = data {
                    return Ok(Decode::Data(data));
                }
            },
            Kind::Eof(seen) => {
                if seen {
                    Ok(Decode::Complete)
                } else if buf.is_empty() {
                    Ok(Decode::Incomplete)
                } else {
                    Ok(Decode::Data(buf.split().freeze()))
                }
            }
        }
    }
}

macro_rules! byte {
    ($buf:ident) => {{
        if $buf.is_empty() {
            return Ok(None);
        }
        let b = $buf[0];
        $buf.advance(1);
        b
    }};
}

impl ChunkedState {
    /// Advances the chunked state machine by one step. Returns `None`
    /// when more transport bytes are needed.
    fn step(
        self,
        buf: &mut BytesMut,
        size: &mut u64,
        data: &mut Option<Bytes>,
    ) -> crate::Result<Option<ChunkedState>> {
        match self {
            Size => ChunkedState::read_size(buf, size),
            SizeLws => ChunkedState::read_size_lws(buf),
            Extension => ChunkedState::read_extension(buf),
            SizeLf => ChunkedState::read_size_lf(buf, *size),
            Body => ChunkedState::read_body(buf, size, data),
            BodyCr => ChunkedState::expect(buf, b'\r', BodyLf, "chunk data CR"),
            BodyLf => ChunkedState::expect(buf, b'\n', Size, "chunk data LF"),
            EndCr => ChunkedState::expect(buf, b'\r', EndLf, "last chunk CR"),
            EndLf => ChunkedState::expect(buf, b'\n', End, "last chunk LF"),
            End => Ok(Some(End)),
        }
    }

    fn read_size(buf: &mut BytesMut, size: &mut u64) -> crate::Result<Option<ChunkedState>> {
        match byte!(buf) {
            b @ b'0'..=b'9' => {
                *size = checked_size(*size, (b - b'0') as u64)?;
            }
            b @ b'a'..=b'f' => {
                *size = checked_size(*size, (b + 10 - b'a') as u64)?;
            }
            b @ b'A'..=b'F' => {
                *size = checked_size(*size, (b + 10 - b'A') as u64)?;
            }
            b'\t' | b' ' => return Ok(Some(SizeLws)),
            b';' => return Ok(Some(Extension)),
            b'\r' => return Ok(Some(SizeLf)),
            _ => return Err(Error::new_chunk("invalid chunk size")),
        }
        Ok(Some(Size))
    }

    fn read_size_lws(buf: &mut BytesMut) -> crate::Result<Option<ChunkedState>> {
        // Linear white space may follow the size, but no more digits.
        match byte!(buf) {
            b'\t' | b' ' => Ok(Some(SizeLws)),
            b';' => Ok(Some(Extension)),
            b'\r' => Ok(Some(SizeLf)),
            _ => Err(Error::new_chunk("invalid chunk size line")),
        }
    }

    fn read_extension(buf: &mut BytesMut) -> crate::Result<Option<ChunkedState>> {
        // No supported extensions; skip to the end of the line.
        match byte!(buf) {
            b'\r' => Ok(Some(SizeLf)),
            _ => Ok(Some(Extension)),
        }
    }

    fn read_size_lf(buf: &mut BytesMut, size: u64) -> crate::Result<Option<ChunkedState>> {
        match byte!(buf) {
            b'\n' if size == 0 => {
                trace!("end of chunked body");
                Ok(Some(EndCr))
            }
            b'\n' => {
                trace!("incoming chunk: {} bytes", size);
                Ok(Some(Body))
            }
            _ => Err(Error::new_chunk("invalid chunk size LF")),
        }
    }

    fn read_body(
        buf: &mut BytesMut,
        remaining: &mut u64,
        data: &mut Option<Bytes>,
    ) -> crate::Result<Option<ChunkedState>> {
        if buf.is_empty() {
            return Ok(None);
        }
        let take = (*remaining).min(buf.len() as u64) as usize;
        *data = Some(buf.split_to(take).freeze());
        *remaining -= take as u64;
        if *remaining == 0 {
            Ok(Some(BodyCr))
        } else {
            Ok(Some(Body))
        }
    }

    fn expect(
        buf: &mut BytesMut,
        expected: u8,
        next: ChunkedState,
        what: &'static str,
    ) -> crate::Result<Option<ChunkedState>> {
        let b = byte!(buf);
        if b == expected {
            Ok(Some(next))
        } else {
            // Trailer sections are not supported; a last chunk must be
            // followed directly by CRLF.
            Err(Error::new_chunk(what))
        }
    }
}

fn checked_size(size: u64, digit: u64) -> crate::Result<u64> {
    size.checked_mul(16)
        .and_then(|s| s.checked_add(digit))
        .ok_or_else(|| Error::new_chunk("chunk size overflow"))
}
