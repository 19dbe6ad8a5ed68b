//! A small threaded HTTP/1.1 server: one accept thread, one thread per
//! connection, one request per connection (`Connection: close`).

use std::io::{self, BufRead as _, BufReader, Cursor, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;
const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Percent-decoded path without the query string.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status).with_body("text/plain; charset=utf-8", body.into().into_bytes())
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self::new(status).with_body("application/json", body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(self, content_type: &str, body: Vec<u8>) -> Self {
        let mut resp = self.with_header("Content-Type", content_type);
        resp.body = body;
        resp
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// A listener on `127.0.0.1:<ephemeral port>` dispatching to a handler.
/// Shutting down (explicitly or on drop) closes the listener before returning.
pub struct Server {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl Server {
    pub fn bind(handler: Handler) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind 127.0.0.1:0")?;
        let addr = listener.local_addr().context("local_addr")?;
        let stop = Arc::new(AtomicBool::new(false));

        let accept = thread::Builder::new()
            .name(format!("repotest-accept-{}", addr.port()))
            .spawn({
                let stop = Arc::clone(&stop);
                move || accept_loop(listener, &stop, &handler)
            })
            .context("spawn accept thread")?;

        debug!(%addr, "http server listening");
        Ok(Self {
            addr,
            stop,
            accept: Some(accept),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops accepting, waits for the accept thread and drops the listener.
    /// Requests already being served finish on their own threads. Fails when
    /// the listener could not be closed; calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(accept) = self.accept.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::SeqCst);
        // The accept loop only notices the flag once it returns from accept().
        TcpStream::connect_timeout(&self.addr, Duration::from_secs(1))
            .with_context(|| format!("wake accept loop on {}, listener stays open", self.addr))?;
        if accept.join().is_err() {
            anyhow::bail!("accept thread on {} panicked", self.addr);
        }
        debug!(addr = %self.addr, "http server stopped");
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %format!("{err:#}"), "http server shutdown failed");
        }
    }
}

fn accept_loop(listener: TcpListener, stop: &AtomicBool, handler: &Handler) {
    for conn in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(stream) => {
                let handler = Arc::clone(handler);
                let spawned = thread::Builder::new()
                    .name("repotest-conn".to_string())
                    .spawn(move || serve_connection(stream, &handler));
                if let Err(err) = spawned {
                    warn!(error = %err, "failed to spawn connection thread");
                }
            }
            Err(err) => debug!(error = %err, "accept failed"),
        }
    }
}

fn serve_connection(mut stream: TcpStream, handler: &Handler) {
    let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
    let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

    let response = match read_request(&mut stream) {
        Ok(req) => {
            let resp = handler(&req);
            debug!(method = %req.method, path = %req.path, status = resp.status, "request");
            let head_only = req.method == "HEAD";
            write_response(&mut stream, &resp, head_only)
        }
        Err(err) => {
            debug!(error = %format!("{err:#}"), "bad request");
            write_response(&mut stream, &Response::text(400, "bad request\n"), false)
        }
    };
    if let Err(err) = response {
        debug!(error = %err, "failed to write response");
    }
    let _ = stream.shutdown(Shutdown::Both);
}

pub fn read_request<S: Read + Write>(stream: &mut S) -> Result<Request> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let head_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            anyhow::bail!("request head exceeds {MAX_HEAD_BYTES} bytes");
        }
        let n = stream.read(&mut tmp).context("read request head")?;
        if n == 0 {
            anyhow::bail!("connection closed before end of request head");
        }
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = std::str::from_utf8(&buf[..head_end]).context("request head is not utf-8")?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("malformed request line: {request_line:?}");
    };

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            anyhow::bail!("malformed header line: {line:?}");
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let (path, query) = split_target(target)?;
    let mut req = Request {
        method: method.to_ascii_uppercase(),
        path,
        query,
        headers,
        body: Vec::new(),
    };

    if req
        .header("Expect")
        .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .context("write 100 Continue")?;
    }

    let rest = buf[head_end + 4..].to_vec();
    let chunked = req
        .header("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let content_length = match req.header("Content-Length") {
        Some(v) => Some(
            v.parse::<usize>()
                .with_context(|| format!("invalid Content-Length: {v:?}"))?,
        ),
        None => None,
    };

    let mut body_reader = BufReader::new(Cursor::new(rest).chain(stream));
    req.body = if chunked {
        read_chunked_body(&mut body_reader)?
    } else if let Some(len) = content_length {
        if len > MAX_BODY_BYTES {
            anyhow::bail!("request body of {len} bytes exceeds {MAX_BODY_BYTES}");
        }
        let mut body = Vec::with_capacity(len);
        (&mut body_reader)
            .take(len as u64)
            .read_to_end(&mut body)
            .context("read request body")?;
        if body.len() != len {
            anyhow::bail!("request body truncated: got {} of {len} bytes", body.len());
        }
        body
    } else {
        Vec::new()
    };
    Ok(req)
}

fn read_chunked_body<R: io::BufRead>(reader: &mut R) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader
            .read_line(&mut size_line)
            .context("read chunk size")?;
        let size_hex = size_line.trim().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_hex, 16)
            .with_context(|| format!("invalid chunk size: {size_hex:?}"))?;
        if size == 0 {
            // Trailers, then the final empty line.
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).context("read chunk trailer")?;
                if n == 0 || line.trim().is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if size > MAX_BODY_BYTES.saturating_sub(body.len()) {
            anyhow::bail!("chunked request body exceeds {MAX_BODY_BYTES} bytes");
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .context("read chunk data")?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).context("read chunk terminator")?;
    }
}

pub fn write_response<W: Write>(out: &mut W, resp: &Response, head_only: bool) -> io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", resp.status, reason_phrase(resp.status));
    for (name, value) in &resp.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n", resp.body.len()));
    head.push_str("Connection: close\r\n\r\n");
    out.write_all(head.as_bytes())?;
    if !head_only {
        out.write_all(&resp.body)?;
    }
    out.flush()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Splits an origin-form (or absolute-form) request target into its decoded
/// path and query pairs.
fn split_target(target: &str) -> Result<(String, Vec<(String, String)>)> {
    let url = if target.starts_with('/') {
        Url::parse(&format!("http://localhost{target}"))
    } else {
        Url::parse(target)
    }
    .with_context(|| format!("invalid request target: {target:?}"))?;
    let path = percent_decode_str(url.path())
        .decode_utf8_lossy()
        .into_owned();
    let query = url.query_pairs().into_owned().collect();
    Ok((path, query))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
