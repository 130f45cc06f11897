//! Pipelined HTTP client connection.
//!
//! One [`Connection`] owns one transport and multiplexes several
//! sequential request/response exchanges over it. Responses are matched
//! to requests strictly by send order; see [`Connection::send`].

mod conn;

pub use self::conn::{Connection, ResponseFuture};

use tokio::net::TcpStream;

use crate::error::Error;
use crate::url::Url;

/// Opens a TCP connection to the host in `url`.
///
/// Only the `http` scheme is supported. A URL without a port connects to
/// port 80; the source design never settled scheme-dependent defaults,
/// so the historical default is kept for every scheme.
pub async fn connect(url: &Url) -> crate::Result<Connection> {
    let scheme = url.scheme.as_deref().unwrap_or("http");
    if scheme != "http" {
        return Err(Error::new_connect(format!(
            "unsupported scheme: {}",
            scheme
        )));
    }
    let host = url
        .host
        .as_deref()
        .ok_or_else(|| Error::new_connect("url has no host"))?;
    let port = url.port.unwrap_or(80);

    let stream = TcpStream::connect((host, port))
        .await
        .map_err(Error::new_connect)?;
    Ok(Connection::open(stream))
}
