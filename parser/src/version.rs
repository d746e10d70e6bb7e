//! Representation of the requested HTTP version
use std::fmt::Display;

/// Representation of the requested HTTP version
///
/// Only [`Version::H1_1`] is accepted by the router; the other variants
/// exist so a request naming a different version is rejected with a
/// specific [`crate::ParseError::Version`] rather than the parser
/// misreading the version field as garbage.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
    /// HTTP/2
    H2,
    /// HTTP/3
    H3,
}

impl Version {
    /// Parses the version token following `HTTP/` on the request line.
    pub fn parse(token: &[u8]) -> Option<Version> {
        match token {
            b"HTTP/1.0" => Some(Version::H1_0),
            b"HTTP/1.1" => Some(Version::H1_1),
            b"HTTP/2" | b"HTTP/2.0" => Some(Version::H2),
            b"HTTP/3" | b"HTTP/3.0" => Some(Version::H3),
            _ => None,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
            Self::H3 => "HTTP/3",
        })
    }
}

#[cfg(test)]
mod test {
    use super::Version;

    #[test]
    fn parses_http_1_1() {
        assert_eq!(Some(Version::H1_1), Version::parse(b"HTTP/1.1"));
    }

    #[test]
    fn rejects_unknown_version() {
        assert_eq!(None, Version::parse(b"HTTP/0.9"));
    }
}
