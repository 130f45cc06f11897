//! An asynchronous in-memory unbuffered pipe, used for streaming HTTP
//! response bodies via chunked encoding.
//!
//! Much like unix pipes, data is read until end-of-stream is reached;
//! this occurs when the write end of the pipe is closed and there is no
//! outstanding data left to read. End-of-stream is an empty chunk,
//! delivered exactly once.
//!
//! Unlike unix pipes, if the read end is closed before the write end,
//! the writer is notified through the [`Writer::reader_closed`] future
//! rather than a broken-pipe error on write.
//!
//! "Unbuffered" means there is no flow control: each non-empty write
//! corresponds to an equivalent read, and a producer that outruns a
//! stalled consumer grows the internal queue without bound. That is a
//! deliberate tradeoff; backpressure belongs to a layer above this one.
//!
//! The writer can also induce a failure on the reader, e.g. to signal
//! that a transport disconnected before a response body completed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_channel::oneshot;
use tracing::trace;

use crate::error::Error;

/// An in-memory stream of byte chunks with one write end and one read end.
///
/// Cloned [`Reader`] and [`Writer`] handles all observe the same shared
/// state; it is freed when the last handle is dropped.
#[derive(Clone)]
pub struct Pipe {
    inner: Arc<Mutex<Inner>>,
}

/// The read end of a [`Pipe`].
#[derive(Clone)]
pub struct Reader {
    inner: Arc<Mutex<Inner>>,
}

/// The write end of a [`Pipe`].
#[derive(Clone)]
pub struct Writer {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum ReadEnd {
    Open,
    Closed,
}

#[derive(Debug)]
enum WriteEnd {
    Open,
    Closed,
    Failed(String),
}

struct Inner {
    read_end: ReadEnd,
    write_end: WriteEnd,

    /// Readers waiting for data, oldest first.
    reads: VecDeque<oneshot::Sender<crate::Result<Bytes>>>,

    /// Unread chunks, oldest first. Empty chunks are never queued; an
    /// empty chunk is reserved for signaling end-of-stream.
    writes: VecDeque<Bytes>,

    /// Waiters on the reader-closed signal.
    closure: Vec<oneshot::Sender<()>>,

    /// Set once, when the read end closes while the write end is open.
    reader_closed_early: bool,
}

impl Pipe {
    pub fn new() -> Pipe {
        Pipe {
            inner: Arc::new(Mutex::new(Inner {
                read_end: ReadEnd::Open,
                write_end: WriteEnd::Open,
                reads: VecDeque::new(),
                writes: VecDeque::new(),
                closure: Vec::new(),
                reader_closed_early: false,
            })),
        }
    }

    pub fn reader(&self) -> Reader {
        Reader {
            inner: self.inner.clone(),
        }
    }

    pub fn writer(&self) -> Writer {
        Writer {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Pipe {
    fn default() -> Pipe {
        Pipe::new()
    }
}

// Handle equality means "same underlying pipe", useful for checking
// connection identity.
impl PartialEq for Pipe {
    fn eq(&self, other: &Pipe) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Reader {
    fn eq(&self, other: &Reader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Writer {
    fn eq(&self, other: &Writer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pipe")
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pipe::Reader")
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pipe::Writer")
    }
}

enum Read {
    Ready(crate::Result<Bytes>),
    Wait(oneshot::Receiver<crate::Result<Bytes>>),
}

impl Reader {
    /// Returns the next chunk written to the pipe, in write order.
    ///
    /// An empty chunk means end-of-stream. Buffered data is delivered
    /// before a recorded failure is observed. Fails immediately if the
    /// read end has been closed.
    ///
    /// Dropping the returned future is equivalent to never having read:
    /// no chunk is lost, and the pipe is not closed.
    pub async fn read(&self) -> crate::Result<Bytes> {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            if inner.read_end == ReadEnd::Closed {
                Read::Ready(Err(Error::new_read_closed()))
            } else if let Some(chunk) = inner.writes.pop_front() {
                Read::Ready(Ok(chunk))
            } else {
                match inner.write_end {
                    WriteEnd::Open => {
                        let (tx, rx) = oneshot::channel();
                        inner.reads.push_back(tx);
                        Read::Wait(rx)
                    }
                    WriteEnd::Closed => Read::Ready(Ok(Bytes::new())),
                    WriteEnd::Failed(ref reason) => {
                        Read::Ready(Err(Error::new_aborted(reason.clone())))
                    }
                }
            }
        };

        match step {
            Read::Ready(result) => result,
            Read::Wait(rx) => match rx.await {
                Ok(result) => result,
                // The shared state outlives this reader handle, so the
                // sender can only disappear if the pipe itself is gone.
                Err(_canceled) => Err(Error::new_canceled()),
            },
        }
    }

    /// Closes the read end of the pipe, notifying the writer that the
    /// reader is no longer interested. Returns false if the read end was
    /// already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.read_end == ReadEnd::Closed {
            return false;
        }
        trace!("pipe read end closed");
        inner.read_end = ReadEnd::Closed;
        inner.writes.clear();

        for tx in inner.reads.drain(..) {
            let _ = tx.send(Err(Error::new_read_closed()));
        }

        if let WriteEnd::Open = inner.write_end {
            inner.reader_closed_early = true;
            for tx in inner.closure.drain(..) {
                let _ = tx.send(());
            }
        }
        true
    }
}

impl Writer {
    /// Writes a chunk into the pipe.
    ///
    /// Returns false, without effect, if the chunk is empty or if either
    /// end of the pipe has left the open state. A pending read is
    /// fulfilled directly; otherwise the chunk is queued.
    pub fn write(&self, chunk: impl Into<Bytes>) -> bool {
        let mut chunk = chunk.into();
        if chunk.is_empty() {
            // An empty chunk is the end-of-stream signal; writing one is
            // defined as a no-op.
            return false;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.read_end != ReadEnd::Open {
            return false;
        }
        match inner.write_end {
            WriteEnd::Open => {}
            _ => return false,
        }

        while let Some(tx) = inner.reads.pop_front() {
            if tx.is_canceled() {
                // The read future was discarded; skip it so the chunk
                // goes to a reader that is still listening.
                continue;
            }
            match tx.send(Ok(chunk)) {
                Ok(()) => return true,
                Err(returned) => {
                    chunk = returned.expect("just sent Ok");
                }
            }
        }
        inner.writes.push_back(chunk);
        true
    }

    /// Closes the write end of the pipe, sending end-of-stream to the
    /// reader. Returns false if the write end was already closed or
    /// failed.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.write_end {
            WriteEnd::Open => {}
            _ => return false,
        }
        trace!("pipe write end closed");
        inner.write_end = WriteEnd::Closed;

        for tx in inner.reads.drain(..) {
            let _ = tx.send(Ok(Bytes::new()));
        }
        // The reader-closed signal can no longer fire.
        inner.closure.clear();
        true
    }

    /// Closes the write end of the pipe with a failure instead of
    /// end-of-stream. Returns false if the write end was already closed
    /// or failed.
    ///
    /// Chunks already queued are still delivered before the failure is
    /// observed by the reader.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut inner = self.inner.lock().unwrap();
        match inner.write_end {
            WriteEnd::Open => {}
            _ => return false,
        }
        trace!("pipe write end failed: {}", message);

        for tx in inner.reads.drain(..) {
            let _ = tx.send(Err(Error::new_aborted(message.clone())));
        }
        inner.write_end = WriteEnd::Failed(message);
        inner.closure.clear();
        true
    }

    /// Resolves when the read end of the pipe is closed while the write
    /// end is still open, meaning the reader gave up. Never resolves if
    /// the write end closes or fails first.
    pub async fn reader_closed(&self) {
        enum Signal {
            Fired,
            Wait(oneshot::Receiver<()>),
            Never,
        }

        let signal = {
            let mut inner = self.inner.lock().unwrap();
            if inner.reader_closed_early {
                Signal::Fired
            } else {
                match inner.write_end {
                    WriteEnd::Open => {
                        let (tx, rx) = oneshot::channel();
                        inner.closure.push(tx);
                        Signal::Wait(rx)
                    }
                    _ => Signal::Never,
                }
            }
        };

        match signal {
            Signal::Fired => {}
            Signal::Wait(rx) => {
                if rx.await.is_err() {
                    // Writer side finished first; the signal will never
                    // fire now.
                    std::future::pending::<()>().await;
                }
            }
            Signal::Never => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_then_close_reads_in_order() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        assert!(writer.write("hello"));
        assert!(writer.write("world"));
        assert!(writer.close());

        assert_eq!(reader.read().await.unwrap(), "hello");
        assert_eq!(reader.read().await.unwrap(), "world");
        assert_eq!(reader.read().await.unwrap(), "");
    }

    #[tokio::test]
    async fn pending_read_fulfilled_by_write() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        let pending = tokio::spawn(async move { reader.read().await });
        tokio::task::yield_now().await;

        assert!(writer.write("hello"));
        assert_eq!(pending.await.unwrap().unwrap(), "hello");
    }

    #[tokio::test]
    async fn empty_write_is_a_no_op() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        assert!(!writer.write(""));
        assert!(writer.write("data"));
        assert!(writer.close());

        assert_eq!(reader.read().await.unwrap(), "data");
        // End-of-stream comes from close(), not from the empty write.
        assert_eq!(reader.read().await.unwrap(), "");
    }

    #[tokio::test]
    async fn end_of_stream_is_sticky() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        assert!(writer.close());
        assert_eq!(reader.read().await.unwrap(), "");
        assert_eq!(reader.read().await.unwrap(), "");
    }

    #[tokio::test]
    async fn fail_rejects_pending_and_subsequent_reads() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        let pending = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.read().await })
        };
        tokio::task::yield_now().await;

        assert!(writer.fail("boom"));

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert!(err.to_string().contains("boom"));

        let err = reader.read().await.unwrap_err();
        assert!(err.is_aborted());
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn buffered_data_drains_before_failure() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        assert!(writer.write("tail"));
        assert!(writer.fail("boom"));

        assert_eq!(reader.read().await.unwrap(), "tail");
        assert!(reader.read().await.unwrap_err().is_aborted());
    }

    #[tokio::test]
    async fn write_refused_after_close_or_fail() {
        let pipe = Pipe::new();
        let writer = pipe.writer();

        assert!(writer.close());
        assert!(!writer.write("late"));
        assert!(!writer.close());
        assert!(!writer.fail("too late"));
    }

    #[tokio::test]
    async fn reader_close_notifies_writer() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        let notified = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.reader_closed().await })
        };
        tokio::task::yield_now().await;

        assert!(reader.close());
        notified.await.unwrap();

        assert!(!writer.write("x"));
        assert!(!reader.close());
    }

    #[tokio::test]
    async fn reader_closed_observed_after_the_fact() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        assert!(reader.close());
        // The signal already fired; later observers still see it.
        writer.reader_closed().await;
    }

    #[tokio::test]
    async fn read_after_reader_close_fails() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        assert!(writer.write("ignored"));
        assert!(reader.close());
        assert!(reader.read().await.unwrap_err().is_read_closed());
    }

    #[tokio::test]
    async fn pending_reads_fail_when_reader_closes() {
        let pipe = Pipe::new();
        let reader = pipe.reader();

        let pending = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.read().await })
        };
        tokio::task::yield_now().await;

        assert!(reader.close());
        assert!(pending.await.unwrap().unwrap_err().is_read_closed());
    }

    #[tokio::test]
    async fn discarded_read_future_loses_nothing() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        {
            let abandoned = reader.read();
            futures_util::pin_mut!(abandoned);
            assert!(futures_util::poll!(abandoned.as_mut()).is_pending());
            // Dropped here without completing.
        }

        assert!(writer.write("kept"));
        assert_eq!(reader.read().await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn close_resolves_pending_read_with_end_of_stream() {
        let pipe = Pipe::new();
        let (reader, writer) = (pipe.reader(), pipe.writer());

        let pending = tokio::spawn(async move { reader.read().await });
        tokio::task::yield_now().await;

        assert!(writer.close());
        assert_eq!(pending.await.unwrap().unwrap(), "");
    }

    #[test]
    fn handle_equality_tracks_the_underlying_pipe() {
        let pipe = Pipe::new();
        assert_eq!(pipe.reader(), pipe.reader());
        assert_eq!(pipe.writer(), pipe.writer());
        assert_ne!(pipe.reader(), Pipe::new().reader());
    }
}
