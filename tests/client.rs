#![deny(rust_2018_idioms)]

use futures_util::poll;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use ductwork::client::Connection;
use ductwork::{Body, Request, StatusCode, Url};

fn url(path: &str) -> Url {
    Url::new("http", "example.org", 80).with_path(path)
}

/// Reads from the peer until `n` request heads have been buffered, then
/// returns everything read as text.
async fn read_heads(io: &mut DuplexStream, n: usize) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let complete = buf.windows(4).filter(|w| w == b"\r\n\r\n").count();
        if complete >= n {
            return String::from_utf8(buf).expect("request head is not UTF-8");
        }
        let read = io.read(&mut tmp).await.unwrap();
        assert!(read > 0, "peer closed while a request head was expected");
        buf.extend_from_slice(&tmp[..read]);
    }
}

async fn read_head(io: &mut DuplexStream) -> String {
    read_heads(io, 1).await
}

#[tokio::test]
async fn get_with_full_body() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut = conn.send(Request::get(url("/state")));

    let head = read_head(&mut server).await;
    assert!(head.starts_with("GET /state HTTP/1.1\r\n"), "head: {:?}", head);
    assert!(head.contains("Host: example.org:80\r\n"), "head: {:?}", head);

    server
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();

    let response = fut.await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.read_body().await.unwrap(), "hello");
}

#[tokio::test]
async fn responses_attributed_in_send_order() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut1 = conn.send(Request::get(url("/one")));
    let fut2 = conn.send(Request::get(url("/two")));

    let heads = read_heads(&mut server, 2).await;
    let first = heads.find("GET /one").unwrap();
    let second = heads.find("GET /two").unwrap();
    assert!(first < second, "requests reordered on the wire: {:?}", heads);

    server
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none\
              HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo",
        )
        .await
        .unwrap();

    assert_eq!(fut1.await.unwrap().read_body().await.unwrap(), "one");
    assert_eq!(fut2.await.unwrap().read_body().await.unwrap(), "two");
}

#[tokio::test]
async fn streamed_body_arrives_in_chunks() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut = conn.send_streaming(Request::get(url("/events")));
    read_head(&mut server).await;

    server
        .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
        .await
        .unwrap();
    let response = fut.await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    let reader = match response.body {
        Body::Pipe(reader) => reader,
        other => panic!("expected a streamed body, got {:?}", other),
    };

    server.write_all(b"5\r\nhello\r\n").await.unwrap();
    assert_eq!(reader.read().await.unwrap(), "hello");

    server.write_all(b"5\r\nworld\r\n").await.unwrap();
    assert_eq!(reader.read().await.unwrap(), "world");

    server.write_all(b"0\r\n\r\n").await.unwrap();
    assert!(reader.read().await.unwrap().is_empty());

    // The exchange ended cleanly, so the connection is still usable.
    let fut = conn.send(Request::get(url("/after")));
    read_head(&mut server).await;
    server
        .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(fut.await.unwrap().status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn streamed_response_resolves_before_its_body_completes() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut1 = conn.send_streaming(Request::get(url("/stream")));
    let mut fut2 = conn.send(Request::get(url("/plain")));

    read_heads(&mut server, 2).await;
    server
        .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
        .await
        .unwrap();

    // The streamed response resolves on its head alone.
    let response = fut1.await.unwrap();
    let reader = match response.body {
        Body::Pipe(reader) => reader,
        other => panic!("expected a streamed body, got {:?}", other),
    };
    assert_eq!(reader.read().await.unwrap(), "hello");

    // The second response cannot resolve while the first body is open.
    assert!(poll!(&mut fut2).is_pending());

    server
        .write_all(b"0\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
        .await
        .unwrap();
    assert!(reader.read().await.unwrap().is_empty());
    assert_eq!(fut2.await.unwrap().read_body().await.unwrap(), "ok");
}

#[tokio::test]
async fn response_close_directive_stops_further_sends() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut = conn.send(Request::get(url("/last")));
    read_head(&mut server).await;
    server
        .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 3\r\n\r\nbye")
        .await
        .unwrap();

    let response = fut.await.unwrap();
    assert_eq!(response.read_body().await.unwrap(), "bye");

    let err = conn.send(Request::get(url("/more"))).await.unwrap_err();
    assert!(err.is_closed(), "unexpected error: {:?}", err);

    conn.disconnected().await;
}

#[tokio::test]
async fn request_close_directive_stops_further_sends() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let mut request = Request::get(url("/last"));
    request.keep_alive = false;
    let fut = conn.send(request);

    // The connection refuses the next send before any response arrives.
    let err = conn.send(Request::get(url("/more"))).await.unwrap_err();
    assert!(err.is_closed(), "unexpected error: {:?}", err);

    let head = read_head(&mut server).await;
    assert!(head.contains("Connection: close\r\n"), "head: {:?}", head);

    server
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nbye")
        .await
        .unwrap();
    assert_eq!(fut.await.unwrap().read_body().await.unwrap(), "bye");

    conn.disconnected().await;
}

#[tokio::test]
async fn transport_failure_fails_everything_pending() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut1 = conn.send_streaming(Request::get(url("/stream")));
    let fut2 = conn.send(Request::get(url("/plain")));

    read_heads(&mut server, 2).await;
    server
        .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
        .await
        .unwrap();

    let response = fut1.await.unwrap();
    let reader = match response.body {
        Body::Pipe(reader) => reader,
        other => panic!("expected a streamed body, got {:?}", other),
    };
    assert_eq!(reader.read().await.unwrap(), "hello");

    // The peer dies mid-body.
    drop(server);

    let err = reader.read().await.unwrap_err();
    assert!(err.is_aborted(), "unexpected error: {:?}", err);

    let err = fut2.await.unwrap_err();
    assert!(err.is_incomplete(), "unexpected error: {:?}", err);

    conn.disconnected().await;
}

#[tokio::test]
async fn disconnect_fails_pending_responses() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut = conn.send(Request::get(url("/never")));
    read_head(&mut server).await;

    conn.disconnect().await;

    let err = fut.await.unwrap_err();
    assert!(err.is_canceled(), "unexpected error: {:?}", err);
}

#[tokio::test]
async fn eof_with_a_pending_response_is_incomplete() {
    let (client_io, mut server) = duplex(4096);
    let conn = Connection::open(client_io);

    let fut = conn.send(Request::get(url("/gone")));
    read_head(&mut server).await;
    drop(server);

    let err = fut.await.unwrap_err();
    assert!(err.is_incomplete(), "unexpected error: {:?}", err);

    conn.disconnected().await;
}

#[tokio::test]
async fn idle_eof_closes_cleanly() {
    let (client_io, server) = duplex(4096);
    let conn = Connection::open(client_io);

    drop(server);
    conn.disconnected().await;

    let err = conn.send(Request::get(url("/late"))).await.unwrap_err();
    assert!(err.is_closed(), "unexpected error: {:?}", err);
}
