//! HTTP response model
//!
//! Header names and values are validated when they are set, so a response
//! that exists can always be serialized.

use super::payload::{BytesPayload, Payload};
use super::{Error, Headers, Result, Status, Version, CRLF};
use std::fmt;
use std::io::{self, Write};

/// HTTP response
pub struct HttpResponse {
    status: Status,
    headers: Headers,
    cookies: Vec<String>,
    body: Box<dyn Payload>,
}

impl HttpResponse {
    /// Create a response with an empty body
    pub fn new(status: Status) -> Self {
        HttpResponse {
            status,
            headers: Headers::new(),
            cookies: Vec::new(),
            body: Box::new(BytesPayload::default()),
        }
    }

    /// Create a response with the given body
    pub fn with_body(status: Status, body: impl Payload + 'static) -> Self {
        let mut response = HttpResponse::new(status);
        response.set_body(body);
        response
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the 3-digit status code
    pub fn set_status(&mut self, code: u16) -> Result<()> {
        self.status = Status::new(code)?;
        Ok(())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Add a header, joining onto any existing value with `", "`
    ///
    /// `Set-Cookie` is the exception: every value is kept and emitted on its
    /// own header line.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<()> {
        if name.eq_ignore_ascii_case("Set-Cookie") {
            super::headers::validate_value(value)?;
            self.cookies.push(value.to_string());
            Ok(())
        } else {
            self.headers.append(name, value)
        }
    }

    /// Set a header, replacing any existing value
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        if name.eq_ignore_ascii_case("Set-Cookie") {
            super::headers::validate_value(value)?;
            self.cookies.clear();
            self.cookies.push(value.to_string());
            Ok(())
        } else {
            self.headers.set(name, value)
        }
    }

    /// Chaining form of [`set_header`](HttpResponse::set_header)
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    /// `Set-Cookie` values in the order they were added
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn body(&self) -> &dyn Payload {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> &mut dyn Payload {
        self.body.as_mut()
    }

    pub fn set_body(&mut self, body: impl Payload + 'static) {
        self.body = Box::new(body);
    }

    /// Serialize the status line and header section
    pub fn head_bytes(&self, version: Version) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        buf.extend_from_slice(version.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.code().to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.reason_phrase().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            push_field(&mut buf, name, value);
        }
        for cookie in &self.cookies {
            push_field(&mut buf, "Set-Cookie", cookie);
        }

        buf.extend_from_slice(CRLF.as_bytes());
        buf
    }

    /// Write the status line and header section
    pub fn write_head(&self, version: Version, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.head_bytes(version))
    }
}

/// Append `name: value\r\n`, encoding the value as ISO-8859-1
fn push_field(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    // validated to be <= U+00FF when set
    buf.extend(value.chars().map(|c| c as u32 as u8));
    buf.extend_from_slice(CRLF.as_bytes());
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("body_length", &self.body.length())
            .finish()
    }
}

/// Stop handling the request and send `response` instead
///
/// Handlers return the result as an error, which unwinds through any
/// enclosing routers:
///
/// ```
/// use leanhttp::http::{halt, responses, HttpRequest, HttpResponse, Result};
///
/// fn require_login(request: &HttpRequest<'_>) -> Result<()> {
///     if request.header("Authorization").optional()?.is_none() {
///         return Err(halt(responses::response(401, "Log in first")?));
///     }
///     Ok(())
/// }
/// ```
pub fn halt(response: HttpResponse) -> Error {
    Error::Halt(Box::new(response))
}

/// Convenience constructors for common responses
pub mod responses {
    use super::HttpResponse;
    use crate::http::payload::{BytesPayload, FilePayload, Payload};
    use crate::http::{resources, Result, Status};
    use bytes::Bytes;
    use std::path::Path;
    use std::time::SystemTime;

    /// A response with the given status code and in-memory body
    pub fn response(status: u16, body: impl Into<Bytes>) -> Result<HttpResponse> {
        Ok(HttpResponse::with_body(
            Status::new(status)?,
            BytesPayload::new(body),
        ))
    }

    /// 200 OK
    pub fn ok(body: impl Into<Bytes>) -> HttpResponse {
        HttpResponse::with_body(Status::OK, BytesPayload::new(body))
    }

    /// 404 Not Found
    pub fn not_found(body: impl Into<Bytes>) -> HttpResponse {
        HttpResponse::with_body(Status::NOT_FOUND, BytesPayload::new(body))
    }

    /// An empty response with a Location header
    ///
    /// Prefer [`see_other`], [`redirect`] or [`moved_permanently`].
    pub fn redirect_with(status: Status, location: &str) -> Result<HttpResponse> {
        HttpResponse::new(status).header("Location", location)
    }

    /// 303 See Other: the client fetches `location` with GET, even after a POST
    pub fn see_other(location: &str) -> Result<HttpResponse> {
        redirect_with(Status::SEE_OTHER, location)
    }

    /// 307 Temporary Redirect: the client repeats the same request at `location`
    pub fn redirect(location: &str) -> Result<HttpResponse> {
        redirect_with(Status::TEMPORARY_REDIRECT, location)
    }

    /// 301 Moved Permanently
    pub fn moved_permanently(location: &str) -> Result<HttpResponse> {
        redirect_with(Status::MOVED_PERMANENTLY, location)
    }

    /// Serve a file, setting Last-Modified, Content-Length and Content-Type
    /// where they can be determined
    pub fn resource(path: &Path) -> Result<HttpResponse> {
        let payload = FilePayload::open(path)?;
        let length = payload.length();
        let modified = std::fs::metadata(path)?.modified().ok();

        let mut response = HttpResponse::with_body(Status::OK, payload);
        if let Some(modified) = modified.filter(|m| *m > SystemTime::UNIX_EPOCH) {
            response.set_header("Last-Modified", &httpdate::fmt_http_date(modified))?;
        }
        if let Some(length) = length {
            response.set_header("Content-Length", &length.to_string())?;
        }
        if let Some(content_type) = resources::content_type(path) {
            response.set_header("Content-Type", content_type)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_serialize_head() {
        let mut response = responses::ok("Hello");
        response.set_header("Content-Type", "text/plain").unwrap();
        response.add_header("Set-Cookie", "a=1").unwrap();
        response.add_header("Set-Cookie", "b=2").unwrap();

        let head = String::from_utf8(response.head_bytes(Version::Http11)).unwrap();
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"
        );

        let head = response.head_bytes(Version::Http10);
        assert!(head.starts_with(b"HTTP/1.0 200 OK\r\n"));
    }

    #[test]
    fn test_add_header_joins() {
        let mut response = HttpResponse::new(Status::OK);
        response.add_header("Vary", "Accept").unwrap();
        response.add_header("vary", "Cookie").unwrap();
        assert_eq!(response.headers().get("Vary"), Some("Accept, Cookie"));
    }

    #[test]
    fn test_set_cookie_replaces_all() {
        let mut response = HttpResponse::new(Status::OK);
        response.add_header("Set-Cookie", "a=1").unwrap();
        response.add_header("set-cookie", "b=2").unwrap();
        response.set_header("Set-Cookie", "c=3").unwrap();
        assert_eq!(response.cookies(), ["c=3"]);
        assert!(!response.headers().contains("Set-Cookie"));
    }

    #[test]
    fn test_header_validation_before_serialization() {
        let mut response = HttpResponse::new(Status::OK);
        assert!(matches!(response.set_header("Bad Name", "v"), Err(Error::InvalidHeader(_))));
        assert!(response.add_header("X-Value", "a\0b").is_err());
        assert!(response.add_header("Set-Cookie", "a=1\r\nX: y").is_err());
        assert!(response.headers().is_empty());
        assert!(response.cookies().is_empty());
    }

    #[test]
    fn test_latin1_values() {
        let response = HttpResponse::new(Status::OK)
            .header("X-Name", "Andr\u{e9}")
            .unwrap();
        let head = response.head_bytes(Version::Http11);
        let needle = b"X-Name: Andr\xe9\r\n";
        assert!(head.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_set_status() {
        let mut response = HttpResponse::new(Status::OK);
        response.set_status(299).unwrap();
        assert_eq!(response.status().code(), 299);
        assert!(matches!(response.set_status(42), Err(Error::InvalidStatus(42))));
        assert!(response.set_status(1000).is_err());
        assert_eq!(response.status().code(), 299);
    }

    #[test]
    fn test_redirects() {
        let response = responses::see_other("/next").unwrap();
        assert_eq!(response.status(), Status::SEE_OTHER);
        assert_eq!(response.headers().get("Location"), Some("/next"));
        assert_eq!(response.body().length(), Some(0));

        assert_eq!(responses::redirect("/a").unwrap().status().code(), 307);
        assert_eq!(responses::moved_permanently("/b").unwrap().status().code(), 301);
        assert!(responses::redirect("/a\nb").is_err());
    }

    #[test]
    fn test_resource() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("style.css");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"body {}")
            .unwrap();

        let response = responses::resource(&path).unwrap();
        assert_eq!(response.status(), Status::OK);
        assert_eq!(response.headers().get("Content-Length"), Some("7"));
        assert_eq!(response.headers().get("Content-Type"), Some("text/css"));
        assert!(response.headers().contains("Last-Modified"));
        assert_eq!(response.body().length(), Some(7));
    }

    #[test]
    fn test_halt_carries_response() {
        let err = halt(responses::not_found("gone"));
        match err {
            Error::Halt(response) => assert_eq!(response.status(), Status::NOT_FOUND),
            other => panic!("unexpected error: {other}"),
        }
    }
}
