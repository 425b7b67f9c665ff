//! Per-connection worker
//!
//! Each accepted socket is served by one [`Connection`] on its own thread. The
//! worker reads into a fixed buffer, feeds the parser, dispatches complete
//! requests to the handler and writes responses back, keeping the connection
//! open for as long as the protocol allows.

use super::chunked::ChunkedWriter;
use super::payload::{BytesPayload, Payload};
use super::router::Handler;
use super::server::ServerConfig;
use super::{
    Error, Headers, HttpRequest, HttpResponse, RequestBody, RequestParser, Status, Version,
};
use std::any::Any;
use std::collections::HashMap;
use std::io::{self, BufWriter, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, error, trace, warn};

/// Live connections, tracked so the server can force them closed
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    closed: AtomicBool,
    connections: Mutex<HashMap<u64, TcpStream>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
        // a worker that panicked while holding the lock leaves the map intact
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a connection, returning its id
    ///
    /// Once [`close_all`](ConnectionRegistry::close_all) has run, new
    /// connections are shut down immediately.
    pub fn insert(&self, stream: &TcpStream) -> io::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = stream.try_clone()?;
        let mut connections = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            let _ = handle.shutdown(Shutdown::Both);
        } else {
            connections.insert(id, handle);
        }
        Ok(id)
    }

    pub fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Shut down every tracked connection, interrupting blocked reads and writes
    pub fn close_all(&self) {
        let mut connections = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        for (id, stream) in connections.drain() {
            trace!(id, "force-closing connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the client said in its Connection header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHint {
    Absent,
    KeepAlive,
    Close,
}

impl ConnectionHint {
    pub fn from_headers(headers: &Headers) -> Self {
        if headers.contains_token("Connection", "close") {
            ConnectionHint::Close
        } else if headers.contains_token("Connection", "keep-alive") {
            ConnectionHint::KeepAlive
        } else {
            ConnectionHint::Absent
        }
    }
}

/// How a response body is delimited, and whether the connection survives it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Content-Length, connection kept open
    KeepAlive,
    /// Transfer-Encoding: chunked, connection kept open
    Chunked,
    /// Body ends when the connection closes
    Close,
}

/// Choose the framing for a response
///
/// | version | Connection  | length  | framing   |
/// |---------|-------------|---------|-----------|
/// | 1.0     | keep-alive  | known   | KeepAlive |
/// | 1.0     | other       | any     | Close     |
/// | 1.1     | close       | any     | Close     |
/// | 1.1     | other       | known   | KeepAlive |
/// | 1.1     | other       | unknown | Chunked   |
pub fn decide_framing(version: Version, hint: ConnectionHint, length_known: bool) -> Framing {
    match version {
        Version::Http10 if hint == ConnectionHint::KeepAlive && length_known => Framing::KeepAlive,
        Version::Http10 => Framing::Close,
        Version::Http11 if hint == ConnectionHint::Close => Framing::Close,
        Version::Http11 if length_known => Framing::KeepAlive,
        Version::Http11 => Framing::Chunked,
    }
}

/// Run the handler, turning every failure into a response
///
/// Returns the response and whether the connection must close after it.
/// A halt yields its carried response. Errors and panics yield 500 and force
/// the connection closed. A handler with no response yields 500.
pub fn dispatch(handler: &dyn Handler, request: &mut HttpRequest<'_>) -> (HttpResponse, bool) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request)));
    match result {
        Ok(Ok(Some(response))) => (response, false),
        Ok(Ok(None)) => {
            warn!(
                method = request.method(),
                path = request.path(),
                "handler returned no response"
            );
            (
                plain_response(Status::INTERNAL_SERVER_ERROR, "Handler returned no response"),
                false,
            )
        }
        Ok(Err(Error::Halt(response))) => (*response, false),
        Ok(Err(e)) => {
            error!(
                method = request.method(),
                path = request.path(),
                error = %e,
                "uncaught handler error"
            );
            (
                plain_response(Status::INTERNAL_SERVER_ERROR, "Internal Server Error"),
                true,
            )
        }
        Err(panic) => {
            error!(
                method = request.method(),
                path = request.path(),
                panic = panic_message(panic.as_ref()),
                "handler panicked"
            );
            (
                plain_response(Status::INTERNAL_SERVER_ERROR, "Internal Server Error"),
                true,
            )
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic>"
    }
}

fn plain_response(status: Status, body: &'static str) -> HttpResponse {
    HttpResponse::with_body(status, BytesPayload::new(body))
}

fn invalid_header(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Errors that just mean the peer went away
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// One client connection
pub struct Connection {
    id: u64,
    stream: TcpStream,
    handler: Arc<dyn Handler>,
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    buffer: Vec<u8>,
    pos: usize,
    end: usize,
}

impl Connection {
    /// Wrap an accepted socket and register it
    pub fn new(
        stream: TcpStream,
        handler: Arc<dyn Handler>,
        config: Arc<ServerConfig>,
        registry: Arc<ConnectionRegistry>,
    ) -> io::Result<Self> {
        let id = registry.insert(&stream)?;
        let buffer = vec![0u8; config.buffer_size.max(1)];
        Ok(Connection {
            id,
            local_addr: stream.local_addr().ok(),
            remote_addr: stream.peer_addr().ok(),
            stream,
            handler,
            config,
            registry,
            buffer,
            pos: 0,
            end: 0,
        })
    }

    /// Serve requests until the connection ends, then deregister
    pub fn run(mut self) {
        debug!(id = self.id, peer = ?self.remote_addr, "connection opened");
        match self.serve() {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => {
                debug!(id = self.id, error = %e, "peer disconnected");
            }
            Err(e) => {
                warn!(id = self.id, peer = ?self.remote_addr, error = %e, "connection failed");
            }
        }
        self.registry.remove(self.id);
        debug!(id = self.id, "connection closed");
    }

    fn serve(&mut self) -> io::Result<()> {
        let mut parser = RequestParser::new();

        while self.fill_buffer()? {
            self.pos += parser.parse(&self.buffer[self.pos..self.end]);

            if parser.is_error() {
                warn!(id = self.id, peer = ?self.remote_addr, "malformed request");
                return self.reject(Version::Http11, Status::BAD_REQUEST, "Bad Request");
            }

            if parser.is_finished() {
                let Some(head) = mem::take(&mut parser).into_head() else {
                    continue;
                };
                if !self.exchange(head)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Make sure unparsed bytes are available; `false` on EOF
    fn fill_buffer(&mut self) -> io::Result<bool> {
        if self.pos < self.end {
            return Ok(true);
        }
        loop {
            match self.stream.read(&mut self.buffer) {
                Ok(n) => {
                    self.pos = 0;
                    self.end = n;
                    return Ok(n > 0);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Handle one parsed request; returns whether the connection stays open
    fn exchange(&mut self, mut head: super::parser::RequestHead) -> io::Result<bool> {
        let version = Version::from_protocol(head.version.as_deref().unwrap_or(super::message::HTTP10));

        if head.headers.contains("Transfer-Encoding") {
            warn!(id = self.id, "request body transfer coding not supported");
            self.reject(version, Status::NOT_IMPLEMENTED, "Not Implemented")?;
            return Ok(false);
        }
        let length = match head.headers.get("Content-Length") {
            None => 0,
            Some(value) => match value.trim().parse::<u64>() {
                Ok(length) => length,
                Err(_) => {
                    warn!(id = self.id, content_length = value, "invalid Content-Length");
                    self.reject(version, Status::BAD_REQUEST, "Bad Request")?;
                    return Ok(false);
                }
            },
        };

        let in_context = match strip_context(&self.config.context_path, &head.path) {
            Some(path) => {
                head.path = path;
                true
            }
            None => false,
        };

        let hint = ConnectionHint::from_headers(&head.headers);
        let is_head = head.method.eq_ignore_ascii_case(super::message::HEAD);

        let (mut response, forced_close, method, path, unread) = {
            let mut stream: &TcpStream = &self.stream;
            let body = RequestBody::new(&self.buffer[self.pos..self.end], &mut stream, length);
            let mut request = HttpRequest::from_head(head, body).with_connection(
                &self.config.scheme,
                &self.config.context_path,
                self.local_addr,
                self.remote_addr,
            );

            let (response, forced_close) = if in_context {
                dispatch(self.handler.as_ref(), &mut request)
            } else {
                (plain_response(Status::NOT_FOUND, "Not Found"), false)
            };
            let method = request.method().to_string();
            let path = request.path().to_string();

            // The next pipelined request starts after this body
            let mut body = request.into_body();
            body.drain()?;
            (response, forced_close, method, path, body.unread_buffered())
        };
        self.pos = self.end - unread;

        let length_known = response.body().length().is_some();
        let framing = if forced_close {
            Framing::Close
        } else {
            decide_framing(version, hint, length_known)
        };

        debug!(
            id = self.id,
            method = %method,
            path = %path,
            status = response.status().code(),
            framing = ?framing,
            "request handled"
        );

        self.send(version, &mut response, framing, is_head)?;

        if framing == Framing::Close {
            self.teardown();
            return Ok(false);
        }
        Ok(true)
    }

    /// Answer without dispatching and close the connection
    fn reject(&mut self, version: Version, status: Status, body: &'static str) -> io::Result<()> {
        let mut response = plain_response(status, body);
        self.send(version, &mut response, Framing::Close, false)?;
        self.teardown();
        Ok(())
    }

    fn send(
        &mut self,
        version: Version,
        response: &mut HttpResponse,
        mut framing: Framing,
        is_head: bool,
    ) -> io::Result<()> {
        let bodiless = is_head || response.status().forbids_body();
        if framing == Framing::Chunked && response.status().forbids_body() {
            framing = Framing::KeepAlive;
        }

        if !response.headers().contains("Date") {
            response
                .set_header("Date", &httpdate::fmt_http_date(SystemTime::now()))
                .map_err(invalid_header)?;
        }
        if let Some(length) = response.body().length() {
            if !response.status().forbids_body() {
                response
                    .set_header("Content-Length", &length.to_string())
                    .map_err(invalid_header)?;
            }
        }
        match framing {
            Framing::KeepAlive if version == Version::Http10 => {
                response
                    .set_header("Connection", "keep-alive")
                    .map_err(invalid_header)?;
            }
            Framing::Close if version == Version::Http11 => {
                response
                    .set_header("Connection", "close")
                    .map_err(invalid_header)?;
            }
            Framing::Chunked => {
                response.remove_header("Content-Length");
                response
                    .set_header("Transfer-Encoding", "chunked")
                    .map_err(invalid_header)?;
            }
            _ => {}
        }

        let write_buffer_size = self.config.write_buffer_size.max(1);
        let mut out = BufWriter::with_capacity(write_buffer_size, &self.stream);
        response.write_head(version, &mut out)?;

        if !bodiless {
            if framing == Framing::Chunked {
                let mut chunked = ChunkedWriter::new(&mut out);
                {
                    let mut coalesce = BufWriter::with_capacity(write_buffer_size, &mut chunked);
                    response.body_mut().write_to(&mut coalesce)?;
                    coalesce.flush()?;
                }
                chunked.finish()?;
            } else {
                response.body_mut().write_to(&mut out)?;
            }
        }
        out.flush()
    }

    /// Half-close, discard input until the client closes, then close
    fn teardown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Write);
        loop {
            match self.stream.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        self.pos = 0;
        self.end = 0;
    }
}

/// Path relative to the context path, or `None` if outside it
fn strip_context(context_path: &str, path: &str) -> Option<String> {
    if context_path.is_empty() {
        return Some(path.to_string());
    }
    let rest = path.strip_prefix(context_path)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}
