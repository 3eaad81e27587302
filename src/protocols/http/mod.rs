//! HTTP/1.1 text protocol.
//!
//! One request/response pair per exchange, with pipelining:
//!
//! ```text
//! Request:  METHOD SP PATH SP VERSION CRLF
//!           Name: Value CRLF ...
//!           CRLF
//!           <Content-Length bytes of body>
//!
//! Response: HTTP/1.1 SP STATUS SP REASON CRLF
//!           Content-Type / Content-Length / Connection headers CRLF
//!           CRLF
//!           <body>
//! ```

pub mod parser;
pub mod response;

pub use parser::{parse_frame, FrameResult, Request};
pub use response::{Response, StatusCode};
