//! Protocol implementations.
//!
//! - `http`: HTTP/1.1 request framing and response encoding used by the
//!   reactor.

pub mod http;
