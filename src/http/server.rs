//! Blocking HTTP server
//!
//! One thread accepts connections and each connection gets a thread of its
//! own. Closing the server stops the accept loop and force-closes every live
//! connection.

use super::connection::{Connection, ConnectionRegistry};
use super::router::Handler;
use super::{Error, Result, DEFAULT_BUFFER_SIZE};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on
    pub addr: SocketAddr,
    /// Size of each connection's read buffer
    pub buffer_size: usize,
    /// Size of the response write buffer, which is also the largest chunk
    /// written for chunked responses
    pub write_buffer_size: usize,
    /// Listen backlog
    pub backlog: i32,
    /// Set SO_REUSEADDR before binding
    pub reuse_address: bool,
    /// Scheme reported by requests, e.g. when behind a TLS terminator
    pub scheme: String,
    /// Path prefix the application is mounted under
    pub context_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            backlog: 128,
            reuse_address: true,
            scheme: "http".to_string(),
            context_path: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Requests outside `context_path` get 404; inside it, the prefix is
    /// removed from the path the handler sees
    pub fn context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into().trim_end_matches('/').to_string();
        self
    }
}

/// A thread-per-connection HTTP/1.x server
pub struct HttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn Handler>,
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    listener_closed: AtomicBool,
    closed: AtomicBool,
}

impl HttpServer {
    /// Bind a listening socket as described by `config`
    pub fn bind(config: ServerConfig, handler: impl Handler + 'static) -> Result<Self> {
        let socket = Socket::new(
            Domain::for_address(config.addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        if config.reuse_address {
            socket.set_reuse_address(true)?;
        }
        socket.bind(&config.addr.into())?;
        socket.listen(config.backlog)?;
        Self::from_listener(socket.into(), config, handler)
    }

    /// Serve on an already bound listener; `config.addr` is ignored
    pub fn from_listener(
        listener: TcpListener,
        config: ServerConfig,
        handler: impl Handler + 'static,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(HttpServer {
            listener,
            local_addr,
            handler: Arc::new(handler),
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            listener_closed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently being served
    pub fn connections(&self) -> usize {
        self.registry.len()
    }

    /// Accept connections until the listener is closed
    pub fn serve(&self) -> Result<()> {
        info!(addr = %self.local_addr, "listening");
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.listener_closed.load(Ordering::SeqCst) {
                        break;
                    }
                    self.start_connection(stream, peer);
                }
                Err(_) if self.listener_closed.load(Ordering::SeqCst) => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    error!(addr = %self.local_addr, error = %e, "accept failed");
                    return Err(e.into());
                }
            }
        }
        info!(addr = %self.local_addr, "stopped listening");
        Ok(())
    }

    fn start_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "accepted connection");
        let connection = match Connection::new(
            stream,
            Arc::clone(&self.handler),
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
        ) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(%peer, error = %e, "failed to set up connection");
                return;
            }
        };
        let spawned = thread::Builder::new()
            .name(format!("http-conn-{peer}"))
            .spawn(move || connection.run());
        if let Err(e) = spawned {
            warn!(%peer, error = %e, "failed to spawn connection thread");
        }
    }

    /// Stop accepting new connections; live connections are left alone
    pub fn close_listener(&self) {
        if self.listener_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(addr = %self.local_addr, "closing listener");
        // Shutting down a listening socket wakes a blocked accept() on most
        // platforms; elsewhere a throwaway connection does the same
        if SockRef::from(&self.listener).shutdown(Shutdown::Both).is_err() {
            let _ = TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1));
        }
    }

    /// Close the listener, every live connection and the handler
    pub fn close(&self) -> Result<()> {
        self.close_listener();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.registry.close_all();
        self.handler.close()
    }

    /// Run the accept loop on a background thread
    pub fn spawn(self) -> Result<ServerHandle> {
        let server = Arc::new(self);
        let accept = Arc::clone(&server);
        let thread = thread::Builder::new()
            .name(format!("http-accept-{}", server.local_addr))
            .spawn(move || {
                if let Err(e) = accept.serve() {
                    error!(error = %e, "accept loop failed");
                }
            })?;
        Ok(ServerHandle {
            server,
            thread: Some(thread),
        })
    }
}

/// Where to connect to wake our own accept loop
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

/// A server running on a background thread
///
/// Dropping the handle closes the server.
pub struct ServerHandle {
    server: Arc<HttpServer>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    /// Close the server and wait for the accept loop to exit
    pub fn close(&mut self) -> Result<()> {
        let result = self.server.close();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Error::Protocol("accept thread panicked".to_string()))?;
        }
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error while closing server");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{responses, HttpRequest, Router};
    use std::io::{Read, Write};

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.write_buffer_size, 8192);
        assert_eq!(config.backlog, 128);
        assert!(config.reuse_address);
        assert_eq!(config.scheme, "http");
        assert_eq!(config.context_path, "");
    }

    #[test]
    fn test_config_setters() {
        let config = ServerConfig::default()
            .addr("127.0.0.1:0".parse().unwrap())
            .buffer_size(16)
            .scheme("https")
            .context_path("/app/");
        assert_eq!(config.buffer_size, 16);
        assert_eq!(config.scheme, "https");
        assert_eq!(config.context_path, "/app");
    }

    #[test]
    fn test_wake_addr() {
        assert_eq!(
            wake_addr("0.0.0.0:81".parse().unwrap()),
            "127.0.0.1:81".parse().unwrap()
        );
        assert_eq!(wake_addr("[::]:81".parse().unwrap()), "[::1]:81".parse().unwrap());
        assert_eq!(
            wake_addr("10.0.0.1:81".parse().unwrap()),
            "10.0.0.1:81".parse().unwrap()
        );
    }

    #[test]
    fn test_spawn_and_close() {
        let mut router = Router::new();
        router
            .get("/", |_: &mut HttpRequest<'_>| Ok(Some(responses::ok("up"))))
            .unwrap();
        let config = ServerConfig::default().addr("127.0.0.1:0".parse().unwrap());
        let mut handle = HttpServer::bind(config, router).unwrap().spawn().unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
        stream
            .write_all(b"GET / HTTP/1.0\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nup"));

        handle.close().unwrap();
        assert_eq!(handle.server().connections(), 0);
        handle.close().unwrap();
    }
}
