// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
#![doc(test(attr(deny(warnings))))]

//! Two-level HTTP/1.1 request parser.
//!
//! The outer state machine ([`request::RequestParser`]) walks the request
//! line, headers, and optional body in that order. It is fed lines produced
//! by the inner [`line::LineExtractor`], which scans a caller-owned buffer
//! for a CRLF terminator without copying anything until a full line is
//! found. Both operate on cursors the caller holds across `recv` calls, so a
//! request may arrive in as many reads as the peer cares to split it into.

pub mod line;
pub mod method;
pub mod request;
pub mod status;
mod tokens;
pub mod version;

pub use method::Method;
pub use version::Version;

/// Failures the parser can report. Distinct from the routing/resource
/// outcomes in [`request::ParseOutcome`], which are produced once a request
/// has been fully read.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid byte in method, or method not recognized.
    #[error("invalid token in method")]
    Method,
    /// Invalid byte in request target.
    #[error("invalid token in target")]
    Target,
    /// Invalid or unsupported HTTP version.
    #[error("invalid version")]
    Version,
    /// Invalid byte in header name.
    #[error("invalid token in header name")]
    HeaderName,
    /// Invalid byte in header value.
    #[error("invalid token in header value")]
    HeaderValue,
    /// A line was not terminated by `\r\n` the way RFC 9112 requires.
    #[error("invalid or missing new line")]
    NewLine,
    /// The read buffer filled up before a complete request was seen.
    #[error("request exceeded the fixed read buffer")]
    Overrun,
}
