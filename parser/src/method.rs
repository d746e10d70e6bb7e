//! Representation of HTTP method
use std::fmt::Display;

/// Representation of the requested HTTP Method
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)
///
/// Only [`Method::Get`] and [`Method::Post`] are ever routed by this server;
/// the rest are recognized so that an unsupported-but-well-formed method
/// reports a clean [`crate::ParseError::Method`] rather than falling through
/// a generic "unrecognized token" path.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

impl Method {
    /// Parses a method token, the bytes preceding the first space on the
    /// request line.
    pub fn parse(token: &[u8]) -> Option<Method> {
        match token {
            b"GET" => Some(Method::Get),
            b"HEAD" => Some(Method::Head),
            b"POST" => Some(Method::Post),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"CONNECT" => Some(Method::Connect),
            b"OPTIONS" => Some(Method::Options),
            b"TRACE" => Some(Method::Trace),
            _ => None,
        }
    }

    /// True for the methods this server will hand to the router; every
    /// other recognized method is well-formed HTTP but unsupported here.
    pub fn is_routable(&self) -> bool {
        matches!(self, Method::Get | Method::Post)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        })
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn parses_get_and_post() {
        assert_eq!(Some(Method::Get), Method::parse(b"GET"));
        assert_eq!(Some(Method::Post), Method::parse(b"POST"));
    }

    #[test]
    fn rejects_unknown_token() {
        assert_eq!(None, Method::parse(b"PATCH_X"));
    }

    #[test]
    fn only_get_and_post_are_routable() {
        assert!(Method::Get.is_routable());
        assert!(Method::Post.is_routable());
        assert!(!Method::Put.is_routable());
    }
}
