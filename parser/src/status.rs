//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
///
/// `title()` returns the literal reason phrase this server writes on the
/// status line; only the five variants the router ever emits have a
/// meaningful one, the rest are carried for completeness.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.3.1
    Ok = 200,
    /// 15.5.1. Only emitted when the server is configured for strict status
    /// codes; see `router::BadRequestPolicy` in the `server` crate.
    BadRequest = 400,
    /// 15.5.4
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// 15.6.1
    InternalServerError = 500,
}

impl Status {
    /// The literal reason phrase this server writes for the status.
    pub fn title(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Error",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", *self as u16))
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn titles_match_literal_reason_phrases() {
        assert_eq!("OK", Status::Ok.title());
        assert_eq!("Not Found", Status::NotFound.title());
        assert_eq!("Forbidden", Status::Forbidden.title());
        assert_eq!("Internal Error", Status::InternalServerError.title());
    }
}
