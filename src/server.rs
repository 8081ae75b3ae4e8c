//! Minimal HTTP/1.1 front for [`api::handle`](crate::api::handle).
//!
//! One request per connection, one thread per connection. Enough for the
//! two JSON endpoints; anything fancier belongs behind a real proxy.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::api::{self, ApiRequest, ApiResponse};
use crate::claim::ClaimService;

/// Largest accepted request body. A full-grid claim is roughly 40 MB of JSON.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const MAX_HEADER_LINES: usize = 100;
/// Longest request or header line, terminator included.
const MAX_LINE_BYTES: usize = 8 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GridServer {
    listener: TcpListener,
    service: Arc<ClaimService>,
    cors_origin: Option<String>,
}

impl GridServer {
    pub fn bind(addr: impl ToSocketAddrs, service: Arc<ClaimService>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, service, cors_origin: None })
    }

    /// Answer CORS preflights and tag responses for this browser origin.
    pub fn with_cors_origin(mut self, origin: Option<String>) -> Self {
        self.cors_origin = origin.filter(|o| !o.is_empty());
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever on the calling thread.
    pub fn run(self) -> io::Result<()> {
        log::info!("listening on {}", self.listener.local_addr()?);
        let cors = Arc::new(self.cors_origin);
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let service = Arc::clone(&self.service);
                    let cors = Arc::clone(&cors);
                    thread::spawn(move || {
                        let peer = stream.peer_addr().ok();
                        if let Err(e) = serve_connection(stream, &service, cors.as_deref()) {
                            log::debug!("connection {:?} dropped: {}", peer, e);
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }
        Ok(())
    }

    /// Run the accept loop on a background thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Err(e) = self.run() {
                log::error!("server stopped: {}", e);
            }
        })
    }
}

fn serve_connection(stream: TcpStream, service: &ClaimService, cors: Option<&str>) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    if read_line_capped(&mut reader, &mut request_line)?.is_none() {
        return write_response(stream, &bad_request("request line too long"), cors);
    }
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return write_response(stream, &bad_request("malformed request line"), cors);
    };

    let mut content_length = 0usize;
    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        match read_line_capped(&mut reader, &mut line)? {
            None => return write_response(stream, &bad_request("header line too long"), cors),
            Some(0) => break,
            Some(_) => {}
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = match value.trim().parse() {
                Ok(n) => n,
                Err(_) => return write_response(stream, &bad_request("bad content-length"), cors),
            };
        }
    }
    if content_length > MAX_BODY_BYTES {
        return write_response(stream, &bad_request("request body too large"), cors);
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };
    log::debug!("{} {}", method, target);

    if method == "OPTIONS" && cors.is_some() {
        return write_response(stream, &ApiResponse { status: 204, body: Vec::new() }, cors);
    }

    let response = api::handle(service, &ApiRequest { method, path, query, body: &body });
    write_response(stream, &response, cors)
}

/// `read_line` that stops after [`MAX_LINE_BYTES`]. `None` means the line
/// had no terminator within the cap.
fn read_line_capped<R: BufRead>(reader: &mut R, buf: &mut String) -> io::Result<Option<usize>> {
    let n = (&mut *reader).take(MAX_LINE_BYTES as u64).read_line(buf)?;
    if n == MAX_LINE_BYTES && !buf.ends_with('\n') {
        return Ok(None);
    }
    Ok(Some(n))
}

fn bad_request(reason: &str) -> ApiResponse {
    let reply = api::ClaimResponse::Invalid { reason: reason.to_string() };
    ApiResponse {
        status: 400,
        body: serde_json::to_vec(&reply).unwrap_or_default(),
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

fn write_response(mut stream: TcpStream, response: &ApiResponse, cors: Option<&str>) -> io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason_phrase(response.status),
        response.body.len()
    );
    if let Some(origin) = cors {
        head.push_str(&format!(
            "Access-Control-Allow-Origin: {origin}\r\n\
             Access-Control-Allow-Methods: GET, POST\r\n\
             Access-Control-Allow-Headers: Content-Type, Authorization\r\n\
             Access-Control-Allow-Credentials: true\r\n"
        ));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}
