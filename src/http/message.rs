//! HTTP request types
//!
//! This module defines the request a handler receives: the parsed head,
//! connection metadata, routing parameters and a body stream bounded by
//! Content-Length.

use super::params::{Param, Params};
use super::parser::RequestHead;
use super::{Error, Headers, Result};
use regex::Regex;
use std::any::{Any, TypeId};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// HTTP protocol version, as far as framing decisions are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Map a request-line protocol string to a version
    ///
    /// The version is not validated: anything other than `HTTP/1.0` is
    /// treated as HTTP/1.1.
    pub fn from_protocol(protocol: &str) -> Self {
        if protocol.eq_ignore_ascii_case(HTTP10) {
            Version::Http10
        } else {
            Version::Http11
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => HTTP10,
            Version::Http11 => HTTP11,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Http11
    }
}

pub const HTTP10: &str = "HTTP/1.0";
pub const HTTP11: &str = "HTTP/1.1";

pub const GET: &str = "GET";
pub const HEAD: &str = "HEAD";
pub const POST: &str = "POST";
pub const PUT: &str = "PUT";
pub const PATCH: &str = "PATCH";
pub const DELETE: &str = "DELETE";
pub const OPTIONS: &str = "OPTIONS";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Request body stream
///
/// Reads bytes already buffered by the connection first, then continues on
/// the socket, stopping after Content-Length bytes.
pub struct RequestBody<'a> {
    buffered: &'a [u8],
    stream: Option<&'a mut dyn Read>,
    remaining: u64,
}

impl<'a> RequestBody<'a> {
    /// A body of `length` bytes that starts in `buffered` and continues on `stream`
    pub fn new(buffered: &'a [u8], stream: &'a mut dyn Read, length: u64) -> Self {
        RequestBody {
            buffered,
            stream: Some(stream),
            remaining: length,
        }
    }

    /// A body held entirely in memory
    pub fn from_slice(data: &'a [u8]) -> Self {
        RequestBody {
            buffered: data,
            stream: None,
            remaining: data.len() as u64,
        }
    }

    pub fn empty() -> Self {
        RequestBody::from_slice(&[])
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Discard the rest of the body
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    /// Number of connection-buffered bytes this body has not consumed
    ///
    /// After the body is drained these belong to the next pipelined request.
    pub(crate) fn unread_buffered(&self) -> usize {
        self.buffered.len()
    }

    /// Read the rest of the body into memory
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.remaining.min(64 * 1024) as usize);
        self.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for RequestBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));

        let n = if !self.buffered.is_empty() {
            let n = max.min(self.buffered.len());
            buf[..n].copy_from_slice(&self.buffered[..n]);
            self.buffered = &self.buffered[n..];
            n
        } else if let Some(stream) = self.stream.as_mut() {
            stream.read(&mut buf[..max])?
        } else {
            0
        };

        if n == 0 {
            // The peer went away before sending the whole body
            self.remaining = 0;
        } else {
            self.remaining -= n as u64;
        }
        Ok(n)
    }
}

impl fmt::Debug for RequestBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("remaining", &self.remaining)
            .finish()
    }
}

/// HTTP request
///
/// Everything except the routing parameters, the body position and the
/// extensions is fixed once the request is built.
pub struct HttpRequest<'a> {
    method: String,
    path: String,
    query_string: Option<String>,
    protocol: String,
    scheme: String,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    context_path: String,
    headers: Headers,
    body: RequestBody<'a>,
    params: Params,
    query_cache: OnceCell<Params>,
    form_cache: Option<Params>,
    extensions: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl<'a> HttpRequest<'a> {
    /// Create a new request with an empty body
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        HttpRequest {
            method: method.into(),
            path: path.into(),
            query_string: None,
            protocol: HTTP11.to_string(),
            scheme: "http".to_string(),
            local_addr: None,
            remote_addr: None,
            context_path: String::new(),
            headers: Headers::new(),
            body: RequestBody::empty(),
            params: Params::new(),
            query_cache: OnceCell::new(),
            form_cache: None,
            extensions: HashMap::new(),
        }
    }

    /// Build a request from a parsed head
    ///
    /// A missing protocol version defaults to HTTP/1.0.
    pub fn from_head(head: RequestHead, body: RequestBody<'a>) -> Self {
        let mut request = HttpRequest::new(head.method, head.path);
        request.query_string = head.query;
        request.protocol = head
            .version
            .map(|v| v.to_ascii_uppercase())
            .unwrap_or_else(|| HTTP10.to_string());
        request.headers = head.headers;
        request.body = body;
        request
    }

    pub(crate) fn with_connection(
        mut self,
        scheme: &str,
        context_path: &str,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        self.scheme = scheme.to_string();
        self.context_path = context_path.to_string();
        self.local_addr = local_addr;
        self.remote_addr = remote_addr;
        self
    }

    /// Create a builder for constructing requests
    pub fn builder(method: impl Into<String>, path: impl Into<String>) -> HttpRequestBuilder<'a> {
        HttpRequestBuilder {
            request: HttpRequest::new(method, path),
        }
    }

    /// The request method, such as `GET` or `POST`
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The path relative to the context root, excluding the query string
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, if the target had one
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// The protocol from the request line, e.g. `HTTP/1.1`
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn version(&self) -> Version {
        Version::from_protocol(&self.protocol)
    }

    /// `http` or `https`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The local address the client is connected to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The address of the remote client
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The path the application is mounted at
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// A request header
    pub fn header<'n>(&'n self, name: &'n str) -> Param<'n> {
        Param::new("request header", name, self.headers.get(name).into_iter().collect())
    }

    /// The body stream
    pub fn body(&mut self) -> &mut RequestBody<'a> {
        &mut self.body
    }

    pub(crate) fn into_body(self) -> RequestBody<'a> {
        self.body
    }

    /// Parameters captured from the path during routing
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// A parameter captured from the path during routing
    pub fn param<'n>(&'n self, name: &'n str) -> Param<'n> {
        Param::new("URL parameter", name, self.params.get_all(name).collect())
    }

    /// Replace the routing parameters, returning the previous ones
    pub fn set_params(&mut self, params: Params) -> Params {
        std::mem::replace(&mut self.params, params)
    }

    /// Decoded query string fields
    pub fn query_map(&self) -> &Params {
        self.query_cache.get_or_init(|| match &self.query_string {
            Some(query) => Params::from_form_data(query.as_bytes()),
            None => Params::new(),
        })
    }

    /// A query string field
    pub fn query<'n>(&'n self, name: &'n str) -> Param<'n> {
        Param::new("query parameter", name, self.query_map().get_all(name).collect())
    }

    /// Decoded form fields from an `application/x-www-form-urlencoded` body
    ///
    /// The first call consumes the body.
    pub fn form_map(&mut self) -> Result<&Params> {
        if self.form_cache.is_none() {
            let content_type = self.headers.get("Content-Type").unwrap_or("");
            let media_type = content_type.split(';').next().unwrap_or("").trim();
            if !media_type.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
                return Err(Error::UnsupportedMediaType(content_type.to_string()));
            }
            let data = self.body.read_to_vec()?;
            self.form_cache = Some(Params::from_form_data(&data));
        }
        Ok(self.form_cache.get_or_insert_with(Params::new))
    }

    /// A form field
    pub fn form<'n>(&'n mut self, name: &'n str) -> Result<Param<'n>> {
        let form = self.form_map()?;
        Ok(Param::new("form parameter", name, form.get_all(name).collect()))
    }

    /// The full request URI
    ///
    /// The host comes from a well-formed Host header, falling back to the
    /// local address. The port is omitted when it is the scheme default.
    pub fn uri(&self) -> String {
        let host = self
            .headers
            .get("Host")
            .and_then(host_from_header)
            .or_else(|| {
                self.local_addr.map(|addr| match addr {
                    SocketAddr::V4(v4) => v4.ip().to_string(),
                    SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
                })
            })
            .unwrap_or_else(|| "localhost".to_string());

        let mut uri = format!("{}://{}", self.scheme, host);
        if let Some(port) = self.local_addr.map(|a| a.port()) {
            let default_port = match self.scheme.as_str() {
                "http" => 80,
                "https" => 443,
                _ => 0,
            };
            if port != default_port {
                uri.push_str(&format!(":{}", port));
            }
        }
        uri.push_str(&self.context_path);
        uri.push_str(&self.path);
        if let Some(query) = &self.query_string {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }

    /// Attach a typed value for later handlers to pick up
    ///
    /// A later value of the same type replaces the earlier one.
    pub fn extend<T: Any + Send>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Look up a value attached with [`extend`](HttpRequest::extend)
    pub fn extension<T: Any + Send>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn extension_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }
}

impl fmt::Debug for HttpRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query_string", &self.query_string)
            .field("protocol", &self.protocol)
            .field("scheme", &self.scheme)
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("context_path", &self.context_path)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .finish()
    }
}

fn host_from_header(host: &str) -> Option<String> {
    static HOST_RE: OnceLock<Regex> = OnceLock::new();
    let re = HOST_RE.get_or_init(|| {
        Regex::new(r"^([a-z0-9.-]+|\[[a-f0-9]*:[a-f0-9:]+\])(:\d+)?$").expect("valid host pattern")
    });
    re.captures(&host.to_ascii_lowercase())
        .map(|caps| caps[1].to_string())
}

/// Builder for HTTP requests
///
/// Mostly useful for exercising handlers without a socket.
pub struct HttpRequestBuilder<'a> {
    request: HttpRequest<'a>,
}

impl<'a> HttpRequestBuilder<'a> {
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.request.query_string = Some(query.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.request.protocol = protocol.into();
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.request.scheme = scheme.into();
        self
    }

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.request.local_addr = Some(addr);
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.request.remote_addr = Some(addr);
        self
    }

    pub fn context_path(mut self, context_path: impl Into<String>) -> Self {
        self.request.context_path = context_path.into();
        self
    }

    /// Add a header, joining repeated names like the parser does
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        self.request.headers.append(name, value)?;
        Ok(self)
    }

    pub fn body(mut self, body: RequestBody<'a>) -> Self {
        self.request.body = body;
        self
    }

    pub fn build(self) -> HttpRequest<'a> {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestParser;
    use std::io::Cursor;

    fn sample() -> HttpRequest<'static> {
        HttpRequest::builder("GET", "/path")
            .query("one&foo=bar&&baz=&")
            .local_addr("127.0.0.1:80".parse().unwrap())
            .remote_addr("127.0.0.1:1234".parse().unwrap())
            .context_path("/app")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .unwrap()
            .header("Host", "totally bogus, whoopsie")
            .unwrap()
            .body(RequestBody::from_slice(b"number=1&number=2&mouse=on&wicket[]&&soccer"))
            .build()
    }

    #[test]
    fn test_version_from_protocol() {
        assert_eq!(Version::from_protocol("HTTP/1.0"), Version::Http10);
        assert_eq!(Version::from_protocol("http/1.0"), Version::Http10);
        assert_eq!(Version::from_protocol("HTTP/1.1"), Version::Http11);
        assert_eq!(Version::from_protocol("HTTP/9.9"), Version::Http11);
    }

    #[test]
    fn test_query_and_form() {
        let mut request = sample();
        assert_eq!(request.query("foo").get().unwrap(), "bar");
        assert_eq!(request.query_map().len(), 3);
        assert_eq!(request.query("one").get().unwrap(), "");
        assert_eq!(request.query("baz").get().unwrap(), "");
        assert_eq!(request.query("missing").optional().unwrap(), None);

        assert_eq!(request.form("number").unwrap().all(), ["1", "2"]);
        assert!(request.form("mouse").unwrap().as_bool().unwrap());
        // cached after the body is consumed
        assert_eq!(request.form("soccer").unwrap().get().unwrap(), "");
    }

    #[test]
    fn test_form_requires_form_content_type() {
        let mut request = HttpRequest::builder("POST", "/")
            .header("Content-Type", "application/json")
            .unwrap()
            .body(RequestBody::from_slice(b"{}"))
            .build();
        assert!(matches!(request.form_map(), Err(Error::UnsupportedMediaType(_))));
    }

    #[test]
    fn test_uri() {
        let request = sample();
        assert_eq!(request.uri(), "http://127.0.0.1/app/path?one&foo=bar&&baz=&");

        let request = HttpRequest::builder("GET", "/x")
            .local_addr("10.0.0.1:8080".parse().unwrap())
            .header("Host", "Example.com:8080")
            .unwrap()
            .build();
        assert_eq!(request.uri(), "http://example.com:8080/x");
    }

    #[test]
    fn test_params_replace_and_restore() {
        let mut request = sample();
        let old = request.set_params([("id", "7")].into_iter().collect());
        assert!(old.is_empty());
        assert_eq!(request.param("id").parse::<u32>().unwrap(), 7);

        request.set_params(old);
        assert!(matches!(request.param("id").get(), Err(Error::ParameterMissing { .. })));
    }

    #[test]
    fn test_header_param() {
        let request = sample();
        assert_eq!(request.header("host").get().unwrap(), "totally bogus, whoopsie");
        assert_eq!(request.header("X-Missing").or("none").unwrap(), "none");
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Session(&'static str);

        let mut request = sample();
        assert_eq!(request.extension::<Session>(), None);
        request.extend(Session("alice"));
        assert_eq!(request.extension::<Session>(), Some(&Session("alice")));
        request.extension_mut::<Session>().unwrap().0 = "bob";
        assert_eq!(request.extension::<Session>().unwrap().0, "bob");
    }

    #[test]
    fn test_body_is_bounded() {
        let mut socket = Cursor::new(b"world and the rest".to_vec());
        let mut body = RequestBody::new(b"hello ", &mut socket, 11);

        let mut first = [0u8; 1];
        body.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"h");
        assert_eq!(body.read_to_vec().unwrap(), b"ello world");
        assert_eq!(body.read(&mut [0u8; 8]).unwrap(), 0);
        assert_eq!(body.remaining(), 0);
        assert_eq!(socket.position(), 5);
    }

    #[test]
    fn test_drain_leaves_pipelined_bytes() {
        let buffered = b"abcGET / HTTP/1.1\r\n\r\n";
        let mut socket = Cursor::new(Vec::new());
        let mut body = RequestBody::new(buffered, &mut socket, 3);

        assert_eq!(body.drain().unwrap(), 3);
        assert_eq!(body.unread_buffered(), buffered.len() - 3);
    }

    #[test]
    fn test_from_head_defaults_to_http10() {
        let mut parser = RequestParser::new();
        parser.parse(b"get /x?y=1\r\nConnection: keep-alive\r\n\r\n");
        let request = HttpRequest::from_head(parser.into_head().unwrap(), RequestBody::empty());

        assert_eq!(request.method(), "get");
        assert_eq!(request.protocol(), HTTP10);
        assert_eq!(request.version(), Version::Http10);
        assert_eq!(request.query_string(), Some("y=1"));
        assert!(request.headers().contains_token("connection", "keep-alive"));
    }
}
