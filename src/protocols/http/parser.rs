//! Incremental HTTP/1.1 request framing.
//!
//! Works on the unconsumed region of a connection's read buffer and reports
//! how many bytes one complete frame occupies, so the caller can advance its
//! cursor and try again for pipelined requests.

use thiserror::Error;

/// Header block terminator.
const HEADER_END: &[u8] = b"\r\n\r\n";

/// A complete, parsed request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header lines in arrival order (names as sent).
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the client asked for the connection to be closed after this exchange.
    pub fn wants_close(&self) -> bool {
        self.header("Connection")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
    }
}

/// Framing faults that still leave the stream in sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
}

/// Result of trying to frame one request.
#[derive(Debug)]
pub enum FrameResult {
    /// Need more data for headers or body.
    Incomplete,
    /// A full request was extracted.
    Complete { request: Request, consumed: usize },
    /// The frame is broken but its extent is known; skip `consumed` bytes
    /// and answer with an error.
    Malformed { error: ParseError, consumed: usize },
    /// The declared frame can never fit into the read buffer.
    TooLarge { required: usize },
}

/// Try to frame one request from the front of `input`.
///
/// `max_frame` bounds the total size (head plus declared body) a frame may
/// occupy; anything larger is reported as `TooLarge` as soon as the head
/// has arrived.
pub fn parse_frame(input: &[u8], max_frame: usize) -> FrameResult {
    let head_len = match find_header_end(input) {
        Some(pos) => pos + HEADER_END.len(),
        None => {
            if input.len() > max_frame {
                return FrameResult::TooLarge {
                    required: input.len(),
                };
            }
            return FrameResult::Incomplete;
        }
    };

    let head = match std::str::from_utf8(&input[..head_len - HEADER_END.len()]) {
        Ok(s) => s,
        Err(_) => {
            return FrameResult::Malformed {
                error: ParseError::InvalidEncoding,
                consumed: head_len,
            }
        }
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");

    // Headers first: the declared length decides how much to skip even when
    // the request line is broken.
    let mut headers = Vec::new();
    let mut header_error = None;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            _ => {
                header_error.get_or_insert(ParseError::InvalidHeader);
            }
        }
    }

    let content_length = match content_length(&headers) {
        Ok(len) => len,
        Err(error) => {
            return FrameResult::Malformed {
                error,
                consumed: head_len,
            }
        }
    };

    let total = match head_len.checked_add(content_length) {
        Some(total) if total <= max_frame => total,
        _ => {
            return FrameResult::TooLarge {
                required: head_len.saturating_add(content_length),
            }
        }
    };

    if input.len() < total {
        return FrameResult::Incomplete;
    }

    if let Some(error) = header_error {
        return FrameResult::Malformed {
            error,
            consumed: total,
        };
    }

    let (method, path, version) = match parse_request_line(request_line) {
        Some(parts) => parts,
        None => {
            return FrameResult::Malformed {
                error: ParseError::InvalidRequestLine,
                consumed: total,
            }
        }
    };

    FrameResult::Complete {
        request: Request {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
            body: input[head_len..total].to_vec(),
        },
        consumed: total,
    }
}

/// Split `METHOD SP PATH SP VERSION`.
fn parse_request_line(line: &str) -> Option<(&str, &str, &str)> {
    let mut parts = line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty())?;
    let path = parts.next().filter(|p| p.starts_with('/'))?;
    let version = parts.next().filter(|v| v.starts_with("HTTP/"))?;
    if parts.next().is_some() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    Some((method, path, version))
}

fn content_length(headers: &[(String, String)]) -> Result<usize, ParseError> {
    match headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
    {
        None => Ok(0),
        Some((_, v)) => v.parse().map_err(|_| ParseError::InvalidContentLength),
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(HEADER_END.len()).position(|w| w == HEADER_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 64 * 1024;

    fn complete(input: &[u8]) -> (Request, usize) {
        match parse_frame(input, MAX) {
            FrameResult::Complete { request, consumed } => (request, consumed),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_get() {
        let input = b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, consumed) = complete(input);
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/health");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.header("host"), Some("localhost"));
        assert!(req.body.is_empty());
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_post_with_body() {
        let input = b"POST /process HTTP/1.1\r\ncontent-length: 7\r\n\r\n{\"a\":1}";
        let (req, consumed) = complete(input);
        assert_eq!(req.body, b"{\"a\":1}");
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_incomplete_head_and_body() {
        assert!(matches!(
            parse_frame(b"GET / HTTP/1.1\r\nHost: x\r\n", MAX),
            FrameResult::Incomplete
        ));
        assert!(matches!(
            parse_frame(b"POST /process HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc", MAX),
            FrameResult::Incomplete
        ));
    }

    #[test]
    fn test_pipelined_frames() {
        let input = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c";
        let (first, n1) = complete(input);
        assert_eq!(first.path, "/a");
        let (second, n2) = complete(&input[n1..]);
        assert_eq!(second.path, "/b");
        assert!(matches!(
            parse_frame(&input[n1 + n2..], MAX),
            FrameResult::Incomplete
        ));
    }

    #[test]
    fn test_invalid_content_length_skips_head() {
        let head = b"POST /process HTTP/1.1\r\nContent-Length: abc\r\n\r\n";
        let mut input = head.to_vec();
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");
        match parse_frame(&input, MAX) {
            FrameResult::Malformed { error, consumed } => {
                assert_eq!(error, ParseError::InvalidContentLength);
                assert_eq!(consumed, head.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bad_request_line_skips_body() {
        let input = b"NONSENSE\r\nContent-Length: 3\r\n\r\nxyz";
        match parse_frame(input, MAX) {
            FrameResult::Malformed { error, consumed } => {
                assert_eq!(error, ParseError::InvalidRequestLine);
                assert_eq!(consumed, input.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_declared_body_too_large() {
        let input = b"POST /process HTTP/1.1\r\nContent-Length: 1000000\r\n\r\nabc";
        match parse_frame(input, 1024) {
            FrameResult::TooLarge { required } => assert!(required > 1024),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_head_too_large() {
        let input = vec![b'a'; 2048];
        assert!(matches!(
            parse_frame(&input, 1024),
            FrameResult::TooLarge { .. }
        ));
    }

    #[test]
    fn test_connection_close_header() {
        let (req, _) = complete(b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n");
        assert!(req.wants_close());
        let (req, _) = complete(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert!(!req.wants_close());
    }
}
