//! The line extractor (LE): the inner of the two nested parser state
//! machines. It scans a caller-owned buffer byte by byte from `scanned`
//! looking for a `\r\n` pair, overwriting the pair with null terminators
//! in place on success. The caller supplies `scanned` and `filled` as
//! external cursors so a partial line left by one `recv` is resumed on the
//! next without the extractor retaining any state of its own.

/// Outcome of a single scan attempt.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LineStatus {
    /// A complete line was found; `scanned` now points just past the
    /// (now nulled) terminator.
    Ok,
    /// A bare `\r` not followed by `\n`, or a bare `\n`, was found.
    Bad,
    /// Reached `filled` without finding a terminator; more bytes are
    /// needed before this call can make progress.
    Open,
}

/// Stateless scanner; all state lives in the cursors passed by the caller.
#[derive(Debug, Default)]
pub struct LineExtractor;

impl LineExtractor {
    /// Scans `buf[*scanned..filled]` for a line terminator, advancing
    /// `scanned` as it goes.
    ///
    /// On `LineStatus::Ok`, the line's content is `buf[line_start..n]` where
    /// `n` is the position of the terminator's first byte; the caller is
    /// expected to have tracked `line_start` itself (see
    /// [`crate::request::RequestParser`]).
    pub fn extract(buf: &mut [u8], scanned: &mut usize, filled: usize) -> LineStatus {
        while *scanned < filled {
            let b = buf[*scanned];
            if b == b'\r' {
                if *scanned + 1 >= filled {
                    return LineStatus::Open;
                }
                if buf[*scanned + 1] == b'\n' {
                    buf[*scanned] = 0;
                    buf[*scanned + 1] = 0;
                    *scanned += 2;
                    return LineStatus::Ok;
                }
                return LineStatus::Bad;
            } else if b == b'\n' {
                return LineStatus::Bad;
            }
            *scanned += 1;
        }
        LineStatus::Open
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_a_complete_line() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: x\r\n".to_vec();
        let mut scanned = 0;
        let filled = buf.len();
        assert_eq!(
            LineStatus::Ok,
            LineExtractor::extract(&mut buf, &mut scanned, filled)
        );
        assert_eq!(16, scanned);
        assert_eq!(0, buf[14]);
        assert_eq!(0, buf[15]);
    }

    #[test]
    fn reports_open_when_terminator_not_yet_received() {
        let mut buf = b"GET / HTTP/1.1\r".to_vec();
        let mut scanned = 0;
        let filled = buf.len();
        assert_eq!(
            LineStatus::Open,
            LineExtractor::extract(&mut buf, &mut scanned, filled)
        );
        assert_eq!(14, scanned);
    }

    #[test]
    fn resumes_scanning_from_external_cursor_across_calls() {
        let mut buf = vec![0u8; 32];
        buf[..6].copy_from_slice(b"GET / ");
        let mut scanned = 0;
        let mut filled = 6;
        assert_eq!(
            LineStatus::Open,
            LineExtractor::extract(&mut buf, &mut scanned, filled)
        );
        buf[6..16].copy_from_slice(b"HTTP/1.1\r\n");
        filled = 16;
        assert_eq!(
            LineStatus::Ok,
            LineExtractor::extract(&mut buf, &mut scanned, filled)
        );
        assert_eq!(16, scanned);
    }

    #[test]
    fn bare_lf_is_bad() {
        let mut buf = b"x\ny".to_vec();
        let mut scanned = 0;
        let filled = buf.len();
        assert_eq!(
            LineStatus::Bad,
            LineExtractor::extract(&mut buf, &mut scanned, filled)
        );
    }

    #[test]
    fn bare_cr_not_followed_by_lf_is_bad() {
        let mut buf = b"x\rx".to_vec();
        let mut scanned = 0;
        let filled = buf.len();
        assert_eq!(
            LineStatus::Bad,
            LineExtractor::extract(&mut buf, &mut scanned, filled)
        );
    }
}
