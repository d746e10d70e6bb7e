//! End-to-end scenarios over a real loopback `TcpStream`, driving
//! [`server::connection::Connection`]'s `read_step`/`process`/`write_step`
//! directly rather than through the full reactor: this server has no
//! async runtime a test could drive through a mocked clock, so each test
//! plays the reactor's read/process/write cycle by hand against a real
//! socket.

use std::io::{Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpStream as MioTcpStream;
use mio::Token;

use server::connection::{Connection, Directive, WriteOutcome};
use server::context::ServerContext;
use server::router::BadRequestPolicy;
use server::users::UserTable;

fn temp_doc_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "server-e2e-{name}-{}-{:?}",
        std::process::id(),
        thread::current().id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp doc root");
    dir
}

fn write_asset(root: &Path, name: &str, contents: &str) {
    std::fs::write(root.join(name), contents).expect("write fixture asset");
}

fn context(doc_root: PathBuf) -> Arc<ServerContext> {
    Arc::new(ServerContext {
        doc_root,
        users: UserTable::new(),
        pool: None,
        bad_request_policy: BadRequestPolicy::Literal404,
    })
}

/// Accepts one connection on `listener` and hands it back as a
/// non-blocking [`Connection`], the way the acceptor would, minus
/// registration with a reactor (these tests drive it by hand).
fn accept_one(listener: &StdTcpListener) -> Arc<Connection> {
    let (stream, peer_addr) = listener.accept().expect("accept test client");
    stream.set_nonblocking(true).expect("set nonblocking");
    let mio_stream = MioTcpStream::from_std(stream);
    Arc::new(Connection::new(mio_stream, Token(0), peer_addr))
}

/// Repeatedly calls `read_step` until at least one byte has arrived,
/// matching the reactor waiting for the next READ readiness event.
fn read_until_bytes(conn: &Connection) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match conn.read_step() {
            Ok(n) if n > 0 => return,
            Ok(_) => {
                if Instant::now() > deadline {
                    panic!("timed out waiting for request bytes");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
}

/// Drives `process()`/`read_step()` until a response has been assembled,
/// then drains `write_step()` until the response is fully sent.
fn roundtrip(conn: &Connection, ctx: &ServerContext) -> WriteOutcome {
    loop {
        match conn.process(ctx) {
            Directive::RearmRead => read_until_bytes(conn),
            Directive::RearmWrite => break,
            Directive::Close => panic!("process() should not report Close directly"),
        }
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match conn.write_step() {
            Ok(WriteOutcome::Pending) => {
                if Instant::now() > deadline {
                    panic!("timed out draining response");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Ok(outcome) => return outcome,
            Err(e) => panic!("unexpected write error: {e}"),
        }
    }
}

fn read_all_available(stream: &mut std::net::TcpStream) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("set read timeout");
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => panic!("unexpected client read error: {e}"),
        }
    }
    buf
}

/// `GET /` with `Connection: close` serves `judge.html` and the
/// connection closes after the response is sent.
#[test]
fn get_root_serves_judge_html_and_closes() {
    let doc_root = temp_doc_root("root");
    write_asset(&doc_root, "judge.html", "<html>ROOT PAGE</html>");
    let ctx = context(doc_root);

    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let conn = accept_one(&listener);
        read_until_bytes(&conn);
        roundtrip(&conn, &ctx)
    });

    let mut client = std::net::TcpStream::connect(addr).unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    let response = read_all_available(&mut client);
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.contains("Connection: close\r\n"), "{text}");
    assert!(text.ends_with("<html>ROOT PAGE</html>"), "{text}");

    let outcome = server.join().unwrap();
    assert_eq!(WriteOutcome::Close, outcome);
}

/// Scenario 2: a missing asset reports 404 with the literal body.
#[test]
fn get_missing_asset_reports_not_found() {
    let doc_root = temp_doc_root("missing");
    let ctx = context(doc_root);

    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let conn = accept_one(&listener);
        read_until_bytes(&conn);
        roundtrip(&conn, &ctx)
    });

    let mut client = std::net::TcpStream::connect(addr).unwrap();
    client
        .write_all(b"GET /missing.html HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_all_available(&mut client);
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"), "{text}");
    assert!(
        text.ends_with("The requested file was not found on this server.\n"),
        "{text}"
    );

    server.join().unwrap();
}

/// Scenario 3: a POST to the login CGI path with a known username/password
/// serves `welcome.html`.
#[test]
fn post_login_with_known_credentials_serves_welcome_page() {
    let doc_root = temp_doc_root("login");
    write_asset(&doc_root, "welcome.html", "<html>WELCOME</html>");
    let ctx = context(doc_root);
    ctx.users.insert("alice".to_string(), "pw!".to_string());

    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let conn = accept_one(&listener);
        read_until_bytes(&conn);
        roundtrip(&conn, &ctx)
    });

    let mut client = std::net::TcpStream::connect(addr).unwrap();
    let body = b"user=alice&password=pw!";
    let request = format!(
        "POST /2CGISQL.cgi HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    client.write_all(request.as_bytes()).unwrap();
    client.write_all(body).unwrap();

    let response = read_all_available(&mut client);
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.ends_with("<html>WELCOME</html>"), "{text}");

    server.join().unwrap();
}

/// A keep-alive connection processes two requests in sequence and produces
/// byte-identical responses for the same GET both times.
#[test]
fn keep_alive_connection_serves_two_requests_identically() {
    let doc_root = temp_doc_root("keepalive");
    write_asset(&doc_root, "judge.html", "<html>ROOT PAGE</html>");
    let ctx = context(doc_root);

    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let conn = accept_one(&listener);
        read_until_bytes(&conn);
        let first = roundtrip(&conn, &ctx);
        assert_eq!(WriteOutcome::KeepAlive, first);
        read_until_bytes(&conn);
        roundtrip(&conn, &ctx)
    });

    let mut client = std::net::TcpStream::connect(addr).unwrap();
    let request = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n";
    client.write_all(request).unwrap();
    let first_response = read_all_available(&mut client);
    client.write_all(request).unwrap();
    let second_response = read_all_available(&mut client);

    assert_eq!(first_response, second_response);
    server.join().unwrap();
}
