//! The request parser (RP): the outer of the two nested state machines.
//! Drives the [`crate::line::LineExtractor`] over a caller-owned buffer,
//! classifying each completed line according to `check_state` and
//! accumulating the parsed request line, headers, and body.

use crate::{
    line::{LineExtractor, LineStatus},
    method::Method,
    tokens::{is_header_name_token, is_header_value_token, is_request_target_token},
    version::Version,
    ParseError,
};

/// Where the outer state machine currently is.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CheckState {
    /// Expecting the request line (`METHOD SP target SP version CRLF`).
    RequestLine,
    /// Expecting header lines, terminated by an empty line.
    Headers,
    /// Expecting exactly `content_length` body bytes, no terminator.
    Body,
}

/// What a completed parse pass produced. Distinct from the routing/resource
/// outcomes the `server` crate layers on top once a request is available.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseOutcome {
    /// Not enough bytes yet; call again once more have arrived.
    NoRequest,
    /// A complete, well-formed request is available.
    GetRequest,
    /// The request line, a header, or the body violated the protocol.
    BadRequest,
}

/// A single recognized header. Only `Connection`, `Content-Length`, and
/// `Host` are inspected by name; everything else is logged at `trace` and
/// discarded intentionally.
#[derive(Debug, Clone)]
pub struct Header {
    /// Header field name, lower-cased.
    pub name: String,
    /// Header field value, with leading whitespace trimmed.
    pub value: String,
}

/// Parsed HTTP/1.1 request. Fields are populated incrementally as the
/// request line, headers, and body are completed; owned copies are kept
/// rather than borrowing into the caller's buffer, trading one copy per
/// field for not having to reason about self-referential lifetimes across
/// multiple `recv` calls into the same fixed buffer.
#[derive(Debug, Default)]
pub struct RequestParser {
    state_: Option<CheckState>,
    /// Parsed method, once the request line is complete.
    pub method: Option<Method>,
    /// Parsed request target, with any `http://host` prefix stripped and
    /// a bare `/` expanded to `/judge.html`.
    pub url: String,
    /// Parsed HTTP version, once the request line is complete.
    pub version: Option<Version>,
    /// Recognized headers seen so far.
    pub headers: Vec<Header>,
    /// `true` once a `Connection: keep-alive` header has been seen.
    pub keep_alive: bool,
    /// `Content-Length` header value, 0 if absent.
    pub content_length: usize,
    /// `Host` header value, if present.
    pub host: Option<String>,
    /// Request body, once fully read.
    pub body: Option<Vec<u8>>,
}

impl RequestParser {
    /// Creates a parser ready to read a new request line.
    pub fn new() -> Self {
        Self {
            state_: Some(CheckState::RequestLine),
            ..Default::default()
        }
    }

    /// Current state; `None` once a terminal outcome has been returned, at
    /// which point this parser must be discarded or [`RequestParser::new`]'d
    /// fresh for the next request on a keep-alive connection.
    pub fn state(&self) -> Option<CheckState> {
        self.state_
    }

    /// Resumes parsing. `buf` is the connection's fixed read buffer,
    /// `filled` is how many bytes have been received into it, `scanned` and
    /// `line_start` are external cursors the caller persists across calls
    /// so a partial request left by one `recv` resumes on the next.
    pub fn parse(
        &mut self,
        buf: &mut [u8],
        filled: usize,
        scanned: &mut usize,
        line_start: &mut usize,
    ) -> Result<ParseOutcome, ParseError> {
        loop {
            let state = match self.state_ {
                Some(s) => s,
                None => return Ok(ParseOutcome::GetRequest),
            };

            if state == CheckState::Body {
                if self.content_length == 0 {
                    self.state_ = None;
                    return Ok(ParseOutcome::GetRequest);
                }
                if filled < *line_start + self.content_length {
                    return Ok(ParseOutcome::NoRequest);
                }
                let body = buf[*line_start..*line_start + self.content_length].to_vec();
                *line_start += self.content_length;
                self.body = Some(body);
                self.state_ = None;
                return Ok(ParseOutcome::GetRequest);
            }

            match LineExtractor::extract(buf, scanned, filled) {
                LineStatus::Open => {
                    if *scanned >= buf.len() {
                        return Err(ParseError::Overrun);
                    }
                    return Ok(ParseOutcome::NoRequest);
                }
                LineStatus::Bad => return Err(ParseError::NewLine),
                LineStatus::Ok => {
                    // terminator was nulled in place; the line is
                    // [line_start, scanned - 2).
                    let line_end = *scanned - 2;
                    let line = buf[*line_start..line_end].to_vec();
                    *line_start = *scanned;

                    match state {
                        CheckState::RequestLine => {
                            if self.parse_request_line(&line).is_err() {
                                return Ok(ParseOutcome::BadRequest);
                            }
                            self.state_ = Some(CheckState::Headers);
                        }
                        CheckState::Headers => {
                            if line.is_empty() {
                                if self.content_length > 0 {
                                    self.state_ = Some(CheckState::Body);
                                } else {
                                    self.state_ = None;
                                    return Ok(ParseOutcome::GetRequest);
                                }
                            } else if self.parse_header(&line).is_err() {
                                return Ok(ParseOutcome::BadRequest);
                            }
                        }
                        CheckState::Body => unreachable!("handled above"),
                    }
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let mut parts = line.splitn(3, |&b| b == b' ');
        let method = parts.next().ok_or(ParseError::Method)?;
        let target = parts.next().ok_or(ParseError::Target)?;
        let version = parts.next().ok_or(ParseError::Version)?;

        let method = Method::parse(method).ok_or(ParseError::Method)?;
        if !method.is_routable() {
            return Err(ParseError::Method);
        }

        if !target.iter().all(|&b| is_request_target_token(b)) {
            return Err(ParseError::Target);
        }

        let mut target_str = std::str::from_utf8(target).map_err(|_| ParseError::Target)?;
        for prefix in ["http://", "https://"] {
            if let Some(rest) = target_str.strip_prefix(prefix) {
                target_str = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
            }
        }
        if !target_str.starts_with('/') {
            return Err(ParseError::Target);
        }

        let version = Version::parse(version).ok_or(ParseError::Version)?;
        if version != Version::H1_1 {
            return Err(ParseError::Version);
        }

        self.method = Some(method);
        self.url = if target_str == "/" {
            "/judge.html".to_string()
        } else {
            target_str.to_string()
        };
        self.version = Some(version);
        Ok(())
    }

    fn parse_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let colon = line.iter().position(|&b| b == b':').ok_or(ParseError::HeaderName)?;
        let name = &line[..colon];
        if !name.iter().all(|&b| is_header_name_token(b)) {
            return Err(ParseError::HeaderName);
        }
        let mut value = &line[colon + 1..];
        while value.first() == Some(&b' ') || value.first() == Some(&b'\t') {
            value = &value[1..];
        }
        if !value.iter().all(|&b| is_header_value_token(b)) {
            return Err(ParseError::HeaderValue);
        }

        let name_str = std::str::from_utf8(name)
            .map_err(|_| ParseError::HeaderName)?
            .to_ascii_lowercase();
        let value_str = std::str::from_utf8(value)
            .map_err(|_| ParseError::HeaderValue)?
            .to_string();

        match name_str.as_str() {
            "connection" => {
                if value_str.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
            "content-length" => {
                self.content_length = value_str.parse().map_err(|_| ParseError::HeaderValue)?;
            }
            "host" => self.host = Some(value_str.clone()),
            _ => {
                tracing::trace!(header = %name_str, value = %value_str, "unrecognized header");
            }
        }

        self.headers.push(Header {
            name: name_str,
            value: value_str,
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn feed(req: &mut RequestParser, wire: &[u8]) -> Result<ParseOutcome, ParseError> {
        let mut buf = vec![0u8; 2048];
        buf[..wire.len()].copy_from_slice(wire);
        let mut scanned = 0;
        let mut line_start = 0;
        req.parse(&mut buf, wire.len(), &mut scanned, &mut line_start)
    }

    #[test]
    fn parses_simple_get_with_no_body() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::GetRequest, outcome);
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!("/judge.html", req.url);
        assert_eq!(Some(Version::H1_1), req.version);
        assert_eq!(Some("x".to_string()), req.host);
    }

    #[test]
    fn keeps_non_root_path_unchanged() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"GET /picture.html HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::GetRequest, outcome);
        assert_eq!("/picture.html", req.url);
    }

    #[test]
    fn strips_absolute_form_authority() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"GET http://example.com/x.html HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::GetRequest, outcome);
        assert_eq!("/x.html", req.url);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::BadRequest, outcome);
    }

    #[test]
    fn connection_keep_alive_is_recognized() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::GetRequest, outcome);
        assert!(req.keep_alive);
    }

    #[test]
    fn waits_for_more_bytes_on_partial_request_line() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"GET / HTTP/1.1\r").unwrap();
        assert_eq!(ParseOutcome::NoRequest, outcome);
    }

    #[test]
    fn body_is_read_once_content_length_bytes_arrive() {
        let mut req = RequestParser::new();
        let wire = b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 23\r\n\r\nuser=alice&password=pw!";
        let outcome = feed(&mut req, wire).unwrap();
        assert_eq!(ParseOutcome::GetRequest, outcome);
        assert_eq!(b"user=alice&password=pw!".to_vec(), req.body.unwrap());
    }

    #[test]
    fn body_incomplete_returns_no_request() {
        let mut req = RequestParser::new();
        let wire = b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 23\r\n\r\nuser=alice";
        let outcome = feed(&mut req, wire).unwrap();
        assert_eq!(ParseOutcome::NoRequest, outcome);
    }

    #[test]
    fn resumes_across_two_parse_calls_like_two_recvs() {
        let mut req = RequestParser::new();
        let mut buf = vec![0u8; 2048];
        let mut scanned = 0;
        let mut line_start = 0;

        let first = b"GET / HTTP/1.1\r\n";
        buf[..first.len()].copy_from_slice(first);
        let outcome = req
            .parse(&mut buf, first.len(), &mut scanned, &mut line_start)
            .unwrap();
        assert_eq!(ParseOutcome::NoRequest, outcome);

        let second = b"\r\n";
        buf[first.len()..first.len() + second.len()].copy_from_slice(second);
        let outcome = req
            .parse(
                &mut buf,
                first.len() + second.len(),
                &mut scanned,
                &mut line_start,
            )
            .unwrap();
        assert_eq!(ParseOutcome::GetRequest, outcome);
    }

    #[test]
    fn unrecognized_method_is_bad_request() {
        let mut req = RequestParser::new();
        let outcome = feed(&mut req, b"PATCH / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::BadRequest, outcome);
    }
}
