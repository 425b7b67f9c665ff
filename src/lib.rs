//! leanhttp - embeddable HTTP/1.x server runtime
//!
//! This crate provides a small blocking HTTP/1.0 and HTTP/1.1 server: an
//! incremental request parser, a thread-per-connection server with
//! keep-alive and chunked response framing, and a path-template router.

pub mod http;
