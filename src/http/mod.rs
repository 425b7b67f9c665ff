//! HTTP/1.x server runtime
//!
//! This module provides the request parser, the request/response model, the
//! router and the blocking server that ties them together.
//!
//! # Architecture
//!
//! Each accepted connection is served by its own thread:
//!
//! - `RequestParser` turns raw bytes into a request line and headers, one
//!   byte at a time, however the input happens to be fragmented
//! - `HttpRequest` exposes the parsed head plus a body bounded by
//!   Content-Length
//! - a `Handler` (usually a `Router`) turns the request into an `HttpResponse`
//! - the connection picks keep-alive, known-length or chunked framing and
//!   writes the response back
//!
//! # Examples
//!
//! ```no_run
//! use leanhttp::http::{responses, HttpRequest, HttpServer, Router, ServerConfig};
//!
//! let mut router = Router::new();
//! router
//!     .get("/hello/<name>", |request: &mut HttpRequest<'_>| {
//!         let name = request.param("name").get()?.to_string();
//!         Ok(Some(responses::ok(format!("Hello, {}!", name))))
//!     })
//!     .unwrap();
//!
//! let config = ServerConfig::default().addr("127.0.0.1:8080".parse().unwrap());
//! let server = HttpServer::bind(config, router).unwrap();
//! server.serve().unwrap();
//! ```

pub mod chunked;
pub mod connection;
pub mod headers;
pub mod message;
pub mod params;
pub mod parser;
pub mod payload;
pub mod resources;
pub mod response;
pub mod router;
pub mod server;
pub mod status;

pub use headers::Headers;
pub use message::{HttpRequest, RequestBody, Version};
pub use params::{Param, Params};
pub use parser::RequestParser;
pub use payload::{BytesPayload, FilePayload, Payload, ReaderPayload};
pub use response::{halt, responses, HttpResponse};
pub use router::{handler_fn, Handler, Router};
pub use server::{HttpServer, ServerConfig, ServerHandle};
pub use status::Status;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid HTTP status: {0} (must be 3 digits)")]
    InvalidStatus(u16),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("{kind} '{name}' is missing")]
    ParameterMissing { kind: &'static str, name: String },

    #[error("{kind} '{name}' has multiple values")]
    ParameterAmbiguous { kind: &'static str, name: String },

    #[error("{kind} '{name}' has an invalid value: {value:?}")]
    ParameterFormat {
        kind: &'static str,
        name: String,
        value: String,
    },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Incomplete message")]
    Incomplete,

    /// Short-circuits handler processing with a ready-made response.
    ///
    /// Built with [`halt`]; the server sends the carried response as-is.
    #[error("halted with status {}", .0.status())]
    Halt(Box<HttpResponse>),

    #[error("Handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an application error so a handler can propagate it with `?`
    pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Handler(err.into())
    }
}

/// Default size of the per-connection read buffer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
