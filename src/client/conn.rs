//! The pipelined connection state machine.
//!
//! A connection moves `Open -> Closing -> Closed`, never backwards.
//! While `Open` it accepts new sends; `Closing` drains responses for
//! requests already on the wire; `Closed` has released the transport and
//! resolved the [`Connection::disconnected`] future.
//!
//! Two background tasks drive the transport: a write task that flushes
//! serialized requests in order, and a read task that parses response
//! heads, attributes them to the oldest pending send (the pipelining
//! invariant), and decodes bodies, either accumulating them or feeding
//! them through a pipe to the caller.

use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_channel::{mpsc, oneshot};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Notify};
use tracing::{debug, trace};

use crate::error::Error;
use crate::headers;
use crate::pipe::Pipe;
use crate::proto::{self, Decode, Decoder};
use crate::request::Request;
use crate::response::{Body, Response};

/// Represents a connection to an HTTP server. Pipelining is used when
/// there are multiple requests in flight.
///
/// Cloned handles share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Mutex<Shared>,
    /// Interrupts the read task on `disconnect`.
    shutdown: Notify,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

struct Shared {
    state: State,
    /// One slot per in-flight request, in send order.
    queue: VecDeque<Slot>,
    /// Serialized requests travel over this to the write task. Dropped
    /// when no further sends are possible, which lets the write task
    /// flush and shut down the transport's write side.
    write_tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum State {
    Open,
    Closing,
    Closed,
}

struct Slot {
    tx: oneshot::Sender<crate::Result<Response>>,
    streamed: bool,
    /// The request asked for the connection to close after this exchange.
    close_after: bool,
}

impl Connection {
    /// Starts a connection over an already established transport.
    ///
    /// This is the seam used by [`connect`](super::connect) and by tests
    /// that substitute an in-memory duplex transport.
    pub fn open<T>(io: T) -> Connection
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (write_tx, write_rx) = mpsc::unbounded();
        let (closed_tx, closed_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                state: State::Open,
                queue: VecDeque::new(),
                write_tx: Some(write_tx),
            }),
            shutdown: Notify::new(),
            closed_tx,
            closed_rx,
        });

        tokio::spawn(write_task(write_half, write_rx));
        tokio::spawn(read_task(inner.clone(), read_half));

        Connection { inner }
    }

    /// Sends a request, fully materializing the response body.
    ///
    /// If other requests are already in flight, pipelining occurs. The
    /// request is serialized and queued immediately; the returned future
    /// resolves when the matching response has been received in full.
    ///
    /// If the request or the response carries `Connection: close`, the
    /// connection accepts no further sends.
    ///
    /// Dropping the returned future does not abort the exchange: the
    /// response is still read off the wire (and discarded) so later
    /// pipelined responses stay correctly attributed.
    pub fn send(&self, request: Request) -> ResponseFuture {
        self.dispatch(request, false)
    }

    /// Sends a request whose response body is streamed.
    ///
    /// The returned future resolves as soon as the response head is
    /// received, with a [`Body::Pipe`] body that yields chunks while the
    /// connection keeps reading them from the transport.
    pub fn send_streaming(&self, request: Request) -> ResponseFuture {
        self.dispatch(request, true)
    }

    fn dispatch(&self, request: Request, streamed: bool) -> ResponseFuture {
        let mut shared = self.inner.shared.lock().unwrap();
        if shared.state != State::Open {
            return ResponseFuture::error(Error::new_closed());
        }

        let close_after =
            !request.keep_alive || headers::connection_close(&request.headers);

        let mut wire = BytesMut::with_capacity(256 + request.body.len());
        proto::encode_request(&request, &mut wire);

        let write_tx = match shared.write_tx.as_ref() {
            Some(tx) => tx,
            // The write task is gone; the read task is about to close us.
            None => return ResponseFuture::error(Error::new_closed()),
        };
        if write_tx.unbounded_send(wire.freeze()).is_err() {
            return ResponseFuture::error(Error::new_closed());
        }

        let (tx, rx) = oneshot::channel();
        shared.queue.push_back(Slot {
            tx,
            streamed,
            close_after,
        });

        if close_after {
            trace!("request carries close directive; no further sends");
            shared.state = State::Closing;
            // Flush what is queued, then half-close the write side.
            shared.write_tx = None;
        }

        ResponseFuture::waiting(rx)
    }

    /// Disconnects from the server.
    ///
    /// Any responses still pending when the transport closes are
    /// resolved with a failure. The returned future completes once the
    /// connection reaches the closed state.
    pub async fn disconnect(&self) {
        let already_closed = {
            let mut shared = self.inner.shared.lock().unwrap();
            match shared.state {
                State::Closed => true,
                _ => {
                    shared.state = State::Closing;
                    shared.write_tx = None;
                    false
                }
            }
        };
        if !already_closed {
            self.inner.shutdown.notify_one();
        }
        self.disconnected().await;
    }

    /// Resolves once a disconnection occurs, for any reason: explicit
    /// [`disconnect`](Connection::disconnect), a close directive, or a
    /// transport failure.
    pub async fn disconnected(&self) {
        let mut closed_rx = self.inner.closed_rx.clone();
        loop {
            if *closed_rx.borrow_and_update() {
                return;
            }
            if closed_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock().unwrap();
        f.debug_struct("Connection")
            .field("state", &shared.state)
            .field("in_flight", &shared.queue.len())
            .finish()
    }
}

/// A future returned by [`Connection::send`], yielding the [`Response`].
#[must_use = "futures do nothing unless awaited"]
pub struct ResponseFuture {
    rx: Option<oneshot::Receiver<crate::Result<Response>>>,
    err: Option<Error>,
}

impl ResponseFuture {
    fn waiting(rx: oneshot::Receiver<crate::Result<Response>>) -> ResponseFuture {
        ResponseFuture {
            rx: Some(rx),
            err: None,
        }
    }

    fn error(err: Error) -> ResponseFuture {
        ResponseFuture {
            rx: None,
            err: Some(err),
        }
    }
}

impl Future for ResponseFuture {
    type Output = crate::Result<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(err) = this.err.take() {
            return Poll::Ready(Err(err));
        }
        let rx = this.rx.as_mut().expect("ResponseFuture polled after completion");
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The read task dropped the slot without resolving it.
            Poll::Ready(Err(_canceled)) => Poll::Ready(Err(Error::new_canceled())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResponseFuture")
    }
}

async fn write_task<T>(
    mut io: WriteHalf<T>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    while let Some(wire) = rx.next().await {
        if let Err(err) = io.write_all(&wire).await {
            debug!("write task: transport error: {}", err);
            return;
        }
    }
    // All senders gone: nothing further will be written.
    let _ = io.shutdown().await;
}

async fn read_task<T>(inner: Arc<Inner>, mut io: ReadHalf<T>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let result = drive(&inner, &mut io, &mut buf).await;
    finish(&inner, result.err());
}

/// Reads and attributes responses until the connection is done.
///
/// `Ok(())` is a clean shutdown (close directive honored, or EOF with
/// nothing outstanding); an error fails every pending slot.
async fn drive<T>(
    inner: &Arc<Inner>,
    io: &mut ReadHalf<T>,
    buf: &mut BytesMut,
) -> crate::Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        // Read until a full response head is buffered.
        let head = loop {
            if let Some(head) = proto::parse_head(buf)? {
                break head;
            }
            if read_more(inner, io, buf).await? == 0 {
                let idle = {
                    let shared = inner.shared.lock().unwrap();
                    shared.queue.is_empty()
                };
                if idle && buf.is_empty() {
                    trace!("peer closed an idle connection");
                    return Ok(());
                }
                return Err(Error::new_incomplete());
            }
        };

        let slot = {
            let mut shared = inner.shared.lock().unwrap();
            let slot = match shared.queue.pop_front() {
                Some(slot) => slot,
                None => return Err(Error::new_mismatched_response()),
            };
            if slot.close_after || head.close {
                // No further sends; drain this exchange, then close.
                if shared.state == State::Open {
                    shared.state = State::Closing;
                    shared.write_tx = None;
                }
            }
            slot
        };
        let close_after = slot.close_after || head.close;

        let mut decoder = Decoder::new(proto::body_length(&head)?);
        // A close-delimited body also forces the connection shut.
        let close_after = close_after || decoder.is_close_delimited();

        let outcome = if slot.streamed {
            stream_body(inner, io, buf, head, slot, &mut decoder).await
        } else {
            collect_body(inner, io, buf, head, slot, &mut decoder).await
        };
        outcome?;

        if close_after {
            debug!("closing after exchange completed");
            return Ok(());
        }
    }
}

/// Decodes a response body into one buffer, then resolves the slot.
async fn collect_body<T>(
    inner: &Arc<Inner>,
    io: &mut ReadHalf<T>,
    buf: &mut BytesMut,
    head: proto::Head,
    slot: Slot,
    decoder: &mut Decoder,
) -> crate::Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut body = BytesMut::new();
    loop {
        match decoder.decode(buf)? {
            Decode::Data(chunk) => body.extend_from_slice(&chunk),
            Decode::Complete => break,
            Decode::Incomplete => {
                if read_more(inner, io, buf).await? == 0 {
                    if decoder.eof() {
                        continue;
                    }
                    return Err(Error::new_incomplete());
                }
            }
        }
    }

    let body = if body.is_empty() {
        Body::None
    } else {
        Body::Full(body.freeze())
    };
    let response = Response {
        status: head.status,
        headers: head.headers,
        body,
    };
    // The caller may have discarded its future; that does not abort
    // anything, the exchange already completed.
    let _ = slot.tx.send(Ok(response));
    Ok(())
}

/// Resolves the slot with a pipe as soon as the head is in, then feeds
/// body chunks through the pipe while they arrive.
async fn stream_body<T>(
    inner: &Arc<Inner>,
    io: &mut ReadHalf<T>,
    buf: &mut BytesMut,
    head: proto::Head,
    slot: Slot,
    decoder: &mut Decoder,
) -> crate::Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let pipe = Pipe::new();
    let writer = pipe.writer();
    let response = Response {
        status: head.status,
        headers: head.headers,
        body: Body::Pipe(pipe.reader()),
    };

    // Resolved before the body arrives: streamed responses are
    // resolved-then-filled, which is what keeps a slow body from
    // blocking attribution of later responses to their callers.
    let mut writer = match slot.tx.send(Ok(response)) {
        Ok(()) => Some(writer),
        Err(_unwanted) => {
            // Caller discarded its future; drain the body to keep the
            // connection's framing intact, but deliver it nowhere.
            trace!("streamed response discarded; draining body");
            None
        }
    };

    let result = loop {
        match decoder.decode(buf) {
            Ok(Decode::Data(chunk)) => {
                if let Some(ref w) = writer {
                    if !w.write(chunk) {
                        // Reader closed its end; it will never read
                        // again, so stop delivering and just drain.
                        trace!("pipe reader closed; draining body");
                        writer = None;
                    }
                }
            }
            Ok(Decode::Complete) => break Ok(()),
            Ok(Decode::Incomplete) => match read_more(inner, io, buf).await {
                Ok(0) => {
                    if decoder.eof() {
                        continue;
                    }
                    break Err(Error::new_incomplete());
                }
                Ok(_) => {}
                Err(err) => break Err(err),
            },
            Err(err) => break Err(err),
        }
    };

    match result {
        Ok(()) => {
            if let Some(w) = writer {
                w.close();
            }
            Ok(())
        }
        Err(err) => {
            if let Some(w) = writer {
                w.fail(err.to_string());
            }
            Err(err)
        }
    }
}

/// Reads more transport bytes into `buf`, or aborts on `disconnect`.
async fn read_more<T>(
    inner: &Arc<Inner>,
    io: &mut ReadHalf<T>,
    buf: &mut BytesMut,
) -> crate::Result<usize>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    tokio::select! {
        read = io.read_buf(buf) => read.map_err(Error::new_io),
        _ = inner.shutdown.notified() => Err(Error::new_disconnected()),
    }
}

/// Moves the connection to `Closed`, failing whatever is still pending,
/// and fires the disconnected signal.
fn finish(inner: &Arc<Inner>, error: Option<Error>) {
    let slots = {
        let mut shared = inner.shared.lock().unwrap();
        shared.state = State::Closed;
        shared.write_tx = None;
        mem::take(&mut shared.queue)
    };

    if let Some(ref err) = error {
        debug!("connection closed with error: {}", err);
    }
    for slot in slots {
        let failure = match error {
            // Every pending exchange fails with the same underlying cause.
            Some(ref err) => err.replicate(),
            // Clean close with requests the peer will never answer.
            None => Error::new_closed(),
        };
        let _ = slot.tx.send(Err(failure));
    }

    let _ = inner.closed_tx.send(true);
}
