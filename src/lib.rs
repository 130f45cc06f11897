#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # Ductwork
//!
//! Ductwork is a small set of asynchronous HTTP/1 transport primitives:
//! an unbuffered streaming [`Pipe`] for producing response bodies
//! chunk by chunk, and a pipelined [`client::Connection`] that sends
//! several requests over one transport and hands back the responses in
//! order.
//!
//! A response body can be a fully materialized [`Bytes`], a path to a
//! file served at transmission time, or the read end of a [`Pipe`] fed
//! by some other task:
//!
//! ```no_run
//! use ductwork::{client, Request, Url};
//!
//! # async fn run() -> ductwork::Result<()> {
//! let conn = client::connect(&Url::new("http", "example.org", 80)).await?;
//! let response = conn.send(Request::get(Url::new("http", "example.org", 80))).await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```
//!
//! [`Bytes`]: bytes::Bytes

pub use http::{Method, StatusCode};

pub use crate::error::{Error, Result};
pub use crate::headers::Headers;
pub use crate::pipe::Pipe;
pub use crate::request::Request;
pub use crate::response::{Body, Response};
pub use crate::url::Url;

pub mod client;
mod error;
mod headers;
pub mod pipe;
mod proto;
mod request;
mod response;
pub mod url;
