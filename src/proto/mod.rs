//! Minimal client-side HTTP/1 wire codec.
//!
//! Only what the pipelined connection needs: request encoding, response
//! head parsing, and incremental body decoding. Trailers and request
//! body streaming are not supported.

pub(crate) mod decode;
pub(crate) mod role;

pub(crate) use self::decode::{Decode, Decoder};
pub(crate) use self::role::{body_length, encode_request, parse_head, Head};
