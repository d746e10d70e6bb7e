//! Request router and resource resolver.
//!
//! Routing, the CGI-ish login/register body parse, and the filesystem
//! `stat`/`mmap` resolution are split across two functions: [`route`]
//! decides which asset or literal the request maps to (and performs the
//! login/register side effects along the way), [`resolve`] turns that into
//! an open, mapped file or a resource error.

use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parser::Method;

use crate::context::ServerContext;
use crate::error::ConnError;

/// Whether a parser-rejected request reports status 404, matching a
/// long-deployed client base that expects it, or the RFC-correct 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BadRequestPolicy {
    /// Emit 404.
    Literal404,
    /// Emit 400, the RFC-correct status.
    Rfc400,
}

/// A file resolved and mapped from the document root, ready to be served.
#[derive(Debug)]
pub struct ResolvedFile {
    /// Read-only mapping of the file contents. `None` for a zero-length
    /// file, since mapping an empty file is an error.
    pub mapping: Option<Mmap>,
    /// File size in bytes, as reported by `stat`.
    pub len: u64,
}

/// Decides which asset or literal a `GET_REQUEST` maps to, running the
/// login/register side effects for the CGI-like paths along the way.
/// Keyed on the character following the last `/` in the URL.
pub fn route(method: Method, url: &str, body: Option<&[u8]>, ctx: &ServerContext) -> String {
    let route_char = url.rsplit('/').next().and_then(|tail| tail.chars().next());

    match (method, route_char) {
        (Method::Post, Some('2')) => {
            let (name, password) = parse_login_body(body.unwrap_or(&[]));
            if ctx.users.check_login(&name, &password) {
                "/welcome.html".to_string()
            } else {
                "/loginError.html".to_string()
            }
        }
        (Method::Post, Some('3')) => {
            let (name, password) = parse_login_body(body.unwrap_or(&[]));
            if ctx.users.contains(&name) {
                return "/registerError.html".to_string();
            }
            match ctx.pool.as_ref() {
                Some(pool) => match crate::db::register_user(pool, &name, &password) {
                    Ok(true) => {
                        ctx.users.insert(name, password);
                        "/login.html".to_string()
                    }
                    Ok(false) | Err(_) => "/registerError.html".to_string(),
                },
                None => "/registerError.html".to_string(),
            }
        }
        (_, Some('0')) => "/register.html".to_string(),
        (_, Some('1')) => "/login.html".to_string(),
        (_, Some('5')) => "/picture.html".to_string(),
        (_, Some('6')) => "/video.html".to_string(),
        _ => url.to_string(),
    }
}

/// Splits a `user=<name>&password=<pwd>` body by its literal field names,
/// so a short or malformed body yields empty strings rather than reading
/// past the buffer.
fn parse_login_body(body: &[u8]) -> (String, String) {
    let body = String::from_utf8_lossy(body);
    let mut name = String::new();
    let mut password = String::new();
    for field in body.split('&') {
        if let Some(rest) = field.strip_prefix("user=") {
            name = rest.to_string();
        } else if let Some(rest) = field.strip_prefix("password=") {
            password = rest.to_string();
        }
    }
    (name, password)
}

/// `stat`s `doc_root/url`, then opens and memory-maps it read-only.
/// `stat` failure is [`ConnError::NotFound`], a non-world-readable file is
/// [`ConnError::Forbidden`], a directory is [`ConnError::IsDirectory`].
pub fn resolve(doc_root: &Path, url: &str) -> Result<ResolvedFile, ConnError> {
    let path = join_doc_root(doc_root, url);
    let metadata = std::fs::metadata(&path).map_err(|_| ConnError::NotFound)?;

    if metadata.is_dir() {
        return Err(ConnError::IsDirectory);
    }
    if metadata.permissions().mode() & 0o004 == 0 {
        return Err(ConnError::Forbidden);
    }

    let len = metadata.len();
    if len == 0 {
        return Ok(ResolvedFile { mapping: None, len: 0 });
    }

    let file = File::open(&path).map_err(|e| ConnError::Internal(e.to_string()))?;
    // Safety: the mapping is read-only and the file is not truncated by
    // this process afterward; the fd is dropped immediately after mapping.
    let mapping = unsafe { Mmap::map(&file) }.map_err(|e| ConnError::Internal(e.to_string()))?;
    Ok(ResolvedFile {
        mapping: Some(mapping),
        len,
    })
}

fn join_doc_root(doc_root: &Path, url: &str) -> PathBuf {
    doc_root.join(url.trim_start_matches('/'))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::users::UserTable;

    fn ctx_without_pool() -> ServerContext {
        ServerContext {
            doc_root: PathBuf::from("/tmp"),
            users: UserTable::new(),
            pool: None,
            bad_request_policy: BadRequestPolicy::Literal404,
        }
    }

    #[test]
    fn routes_bare_digit_paths_to_literal_assets() {
        let ctx = ctx_without_pool();
        assert_eq!("/register.html", route(Method::Get, "/0", None, &ctx));
        assert_eq!("/login.html", route(Method::Get, "/1", None, &ctx));
        assert_eq!("/picture.html", route(Method::Get, "/5", None, &ctx));
        assert_eq!("/video.html", route(Method::Get, "/6", None, &ctx));
    }

    #[test]
    fn unmatched_path_is_served_as_is() {
        let ctx = ctx_without_pool();
        assert_eq!(
            "/judge.html",
            route(Method::Get, "/judge.html", None, &ctx)
        );
    }

    #[test]
    fn login_succeeds_for_known_credentials() {
        let ctx = ctx_without_pool();
        ctx.users.insert("alice".to_string(), "pw!".to_string());
        let body = b"user=alice&password=pw!";
        assert_eq!(
            "/welcome.html",
            route(Method::Post, "/2CGISQL.cgi", Some(body), &ctx)
        );
    }

    #[test]
    fn login_fails_for_wrong_password() {
        let ctx = ctx_without_pool();
        ctx.users.insert("alice".to_string(), "pw!".to_string());
        let body = b"user=alice&password=wrong";
        assert_eq!(
            "/loginError.html",
            route(Method::Post, "/2CGISQL.cgi", Some(body), &ctx)
        );
    }

    #[test]
    fn register_without_db_pool_reports_error_page() {
        let ctx = ctx_without_pool();
        let body = b"user=bob&password=hunter2";
        assert_eq!(
            "/registerError.html",
            route(Method::Post, "/3CGISQL.cgi", Some(body), &ctx)
        );
    }

    #[test]
    fn register_rejects_already_known_name() {
        let ctx = ctx_without_pool();
        ctx.users.insert("bob".to_string(), "x".to_string());
        let body = b"user=bob&password=hunter2";
        assert_eq!(
            "/registerError.html",
            route(Method::Post, "/3CGISQL.cgi", Some(body), &ctx)
        );
    }

    #[test]
    fn resolve_reports_not_found_for_missing_file() {
        let err = resolve(Path::new("/nonexistent-doc-root"), "/missing.html").unwrap_err();
        assert!(matches!(err, ConnError::NotFound));
    }
}
