//! Response assembler.
//!
//! A status line, `Content-Length`, `Connection`, and a blank line are
//! formatted into the connection's fixed write buffer, followed — for a
//! served file — by a gathered write of `[header_buf, mapped_region]`
//! rather than copying the file into the buffer.

use std::io::Write;

use memmap2::Mmap;
use parser::status::Status;

use crate::error::ConnError;

/// Literal error bodies.
pub const BAD_REQUEST_BODY: &str =
    "Your request has bad syntax or is inherently impossible to staisfy.\n";
/// Literal 403 body.
pub const FORBIDDEN_BODY: &str = "You do not have permission to get file form this server.\n";
/// Literal 404 body.
pub const NOT_FOUND_BODY: &str = "The requested file was not found on this server.\n";
/// Literal 500 body.
pub const INTERNAL_ERROR_BODY: &str = "There was an unusual problem serving the request file.\n";
/// Served in place of an empty file.
pub const EMPTY_FILE_BODY: &str = "<html><body></body></html>";
/// Literal written when the live-connection count is at its configured
/// maximum.
pub const BUSY_BODY: &str = "Internal server is busy";

/// What a response's body is made of, once the status and headers are
/// fixed.
#[derive(Debug)]
pub enum Body {
    /// An inline literal, appended into the write buffer itself.
    Literal(&'static str),
    /// A memory-mapped file, sent as a second gather segment so its bytes
    /// are never copied into the write buffer. `None` for a zero-length
    /// file, substituting [`EMPTY_FILE_BODY`] in that case.
    Mapped(Option<Mmap>, u64),
}

/// A fully assembled response: header bytes plus at most one additional
/// mapped segment to gather-write after them. Holds the [`Mmap`] itself
/// (rather than a copy) so the write step can reference its bytes directly
/// for as long as the response is in flight.
#[derive(Debug)]
pub struct Response {
    /// Status line + headers + blank line (and, for [`Body::Literal`], the
    /// body too).
    pub header: Vec<u8>,
    /// The file segment to send after `header`, if any.
    pub mapped: Option<Mmap>,
    /// Sum of `header.len()` and the mapped segment's length.
    pub total_len: usize,
}

/// Builds the status line, `Content-Length`, `Connection`, and blank line,
/// appending a literal body inline or leaving room for a gathered mmap
/// segment. A header buffer that would exceed the connection's fixed write
/// buffer is reported as [`ConnError::Internal`].
pub fn assemble(
    status: Status,
    keep_alive: bool,
    body: Body,
    write_buf_capacity: usize,
) -> Result<Response, ConnError> {
    let mut header = Vec::with_capacity(128);
    let content_len = match &body {
        Body::Literal(s) => s.len() as u64,
        Body::Mapped(_, len) if *len > 0 => *len,
        Body::Mapped(_, _) => EMPTY_FILE_BODY.len() as u64,
    };

    write!(header, "HTTP/1.1 {} {}\r\n", status as u16, status.title())
        .map_err(|e| ConnError::Internal(e.to_string()))?;
    write!(header, "Content-Length: {}\r\n", content_len)
        .map_err(|e| ConnError::Internal(e.to_string()))?;
    write!(
        header,
        "Connection: {}\r\n",
        if keep_alive { "keep-alive" } else { "close" }
    )
    .map_err(|e| ConnError::Internal(e.to_string()))?;
    header.extend_from_slice(b"\r\n");

    let mapped = match body {
        Body::Literal(s) => {
            header.extend_from_slice(s.as_bytes());
            None
        }
        Body::Mapped(mapping, len) if len > 0 => mapping,
        Body::Mapped(_, _) => {
            header.extend_from_slice(EMPTY_FILE_BODY.as_bytes());
            None
        }
    };

    if header.len() > write_buf_capacity && mapped.is_none() {
        return Err(ConnError::Internal(
            "response header exceeded the write buffer".to_string(),
        ));
    }

    let total_len = header.len() + mapped.as_ref().map_or(0, |m| m.len());
    Ok(Response {
        header,
        mapped,
        total_len,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn assembles_a_literal_not_found_response() {
        let resp = assemble(Status::NotFound, false, Body::Literal(NOT_FOUND_BODY), 1024).unwrap();
        let text = String::from_utf8(resp.header.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 49\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(NOT_FOUND_BODY));
        assert_eq!(resp.total_len, resp.header.len());
        assert!(resp.mapped.is_none());
    }

    #[test]
    fn empty_file_substitutes_the_literal_placeholder() {
        let resp = assemble(Status::Ok, true, Body::Mapped(None, 0), 1024).unwrap();
        let text = String::from_utf8(resp.header.clone()).unwrap();
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with(EMPTY_FILE_BODY));
        assert!(resp.mapped.is_none());
    }
}
