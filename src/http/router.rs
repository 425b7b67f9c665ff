//! Path-template routing
//!
//! A [`Router`] is an ordered list of routes and nested handlers. The first
//! entry that produces a response wins; if none does the router answers
//! `Ok(None)` so an enclosing router, or the server, can fall back.
//!
//! Templates are literal text with placeholders:
//!
//! - `<name>` captures one or more characters other than `/ , ; ?`
//! - `<name:regex>` captures whatever `regex` matches
//!
//! Templates are compiled once, at registration, and an invalid regex is
//! reported there rather than when a request arrives.

use super::resources::ResourcesHandler;
use super::{responses, Error, HttpRequest, HttpResponse, Params, Result};
use bytes::Bytes;
use regex::Regex;
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{trace, warn};

/// Capture used by `<name>` placeholders
const DEFAULT_CAPTURE: &str = "[^/,;?]+";

/// Something that can answer a request
///
/// `Ok(None)` means "not mine"; it is not an error.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>>;

    /// Release resources held by the handler
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>> {
        (**self).handle(request)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>> {
        (**self).handle(request)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// Handler backed by a closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut HttpRequest<'_>) -> Result<Option<HttpResponse>> + Send + Sync,
{
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>> {
        (self.f)(request)
    }
}

/// Turn a closure into a [`Handler`]
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut HttpRequest<'_>) -> Result<Option<HttpResponse>> + Send + Sync,
{
    HandlerFn { f }
}

fn key_regex() -> &'static Regex {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| {
        Regex::new(r"<([a-z_][a-zA-Z0-9_]*)(?::([^>]*))?>").expect("placeholder regex")
    })
}

/// A compiled path template
#[derive(Clone)]
pub struct PathTemplate {
    template: String,
    regex: Regex,
    keys: Vec<String>,
}

impl PathTemplate {
    /// Compile a template into an anchored regex plus the ordered capture names
    pub fn compile(template: &str) -> Result<Self> {
        let mut pattern = String::from("^");
        let mut keys = Vec::new();
        let mut last = 0;

        for caps in key_regex().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let capture = caps.get(2).map_or(DEFAULT_CAPTURE, |m| m.as_str());
            Regex::new(capture)
                .map_err(|e| Error::InvalidRoute(format!("{template}: {e}")))?;

            pattern.push_str(&regex::escape(&template[last..whole.start()]));
            // groups are numbered so inner groups of a custom regex cannot shift them
            let _ = write!(pattern, "(?P<p{}>{})", keys.len(), capture);
            keys.push(name.as_str().to_string());
            last = whole.end();
        }
        pattern.push_str(&regex::escape(&template[last..]));
        pattern.push('$');

        let regex =
            Regex::new(&pattern).map_err(|e| Error::InvalidRoute(format!("{template}: {e}")))?;
        Ok(PathTemplate {
            template: template.to_string(),
            regex,
            keys,
        })
    }

    /// Match a path, returning the captured parameters in template order
    pub fn matches(&self, path: &str) -> Option<Params> {
        let caps = self.regex.captures(path)?;
        let mut params = Params::new();
        for (i, key) in self.keys.iter().enumerate() {
            if let Some(value) = caps.name(&format!("p{i}")) {
                params.add(key.as_str(), value.as_str());
            }
        }
        Some(params)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathTemplate")
            .field("template", &self.template)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

/// Restores the request's previous parameters when dropped, even on unwind
struct ParamsGuard<'r, 'a> {
    request: &'r mut HttpRequest<'a>,
    saved: Option<Params>,
}

impl Drop for ParamsGuard<'_, '_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.request.set_params(saved);
        }
    }
}

struct Route {
    method: Option<String>,
    template: PathTemplate,
    handler: Box<dyn Handler>,
}

impl Route {
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>> {
        if let Some(method) = &self.method {
            if !method.eq_ignore_ascii_case(request.method()) {
                return Ok(None);
            }
        }
        let Some(params) = self.template.matches(request.path()) else {
            return Ok(None);
        };

        trace!(
            template = self.template.as_str(),
            path = request.path(),
            "route matched"
        );
        let saved = request.set_params(params);
        let mut guard = ParamsGuard {
            request,
            saved: Some(saved),
        };
        self.handler.handle(&mut *guard.request)
    }
}

enum Entry {
    Route(Route),
    Handler(Box<dyn Handler>),
}

impl Entry {
    fn handler(&self) -> &dyn Handler {
        match self {
            Entry::Route(route) => route.handler.as_ref(),
            Entry::Handler(handler) => handler.as_ref(),
        }
    }
}

/// Ordered route table
///
/// ```
/// use leanhttp::http::{responses, HttpRequest, Router};
///
/// let mut router = Router::new();
/// router
///     .get("/users/<id:[0-9]+>", |request: &mut HttpRequest<'_>| {
///         let id: u32 = request.param("id").parse()?;
///         Ok(Some(responses::ok(format!("user {id}"))))
///     })
///     .unwrap();
///
/// assert!(router.get("/broken/<x:[>", |_: &mut HttpRequest<'_>| Ok(None)).is_err());
/// ```
#[derive(Default)]
pub struct Router {
    entries: Vec<Entry>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            entries: Vec::new(),
        }
    }

    /// Register a handler for a method (`None` matches any) and template
    pub fn route<H>(&mut self, method: Option<&str>, template: &str, handler: H) -> Result<&mut Self>
    where
        H: Handler + 'static,
    {
        let template = PathTemplate::compile(template)?;
        self.entries.push(Entry::Route(Route {
            method: method.map(str::to_string),
            template,
            handler: Box::new(handler),
        }));
        Ok(self)
    }

    pub fn get<F>(&mut self, template: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&mut HttpRequest<'_>) -> Result<Option<HttpResponse>> + Send + Sync + 'static,
    {
        self.route(Some("GET"), template, handler_fn(f))
    }

    pub fn post<F>(&mut self, template: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&mut HttpRequest<'_>) -> Result<Option<HttpResponse>> + Send + Sync + 'static,
    {
        self.route(Some("POST"), template, handler_fn(f))
    }

    pub fn put<F>(&mut self, template: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&mut HttpRequest<'_>) -> Result<Option<HttpResponse>> + Send + Sync + 'static,
    {
        self.route(Some("PUT"), template, handler_fn(f))
    }

    pub fn delete<F>(&mut self, template: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(&mut HttpRequest<'_>) -> Result<Option<HttpResponse>> + Send + Sync + 'static,
    {
        self.route(Some("DELETE"), template, handler_fn(f))
    }

    /// Append a handler that sees every request reaching this position,
    /// typically a nested router
    pub fn handler<H: Handler + 'static>(&mut self, handler: H) -> &mut Self {
        self.entries.push(Entry::Handler(Box::new(handler)));
        self
    }

    /// Answer 404 with `body` for any request reaching this position
    pub fn not_found(&mut self, body: impl Into<Bytes>) -> &mut Self {
        let body: Bytes = body.into();
        self.handler(handler_fn(move |_| Ok(Some(responses::not_found(body.clone())))))
    }

    /// Serve files under `root` for GET requests below `prefix`
    pub fn resources(&mut self, prefix: &str, root: impl Into<PathBuf>) -> Result<&mut Self> {
        let template = format!("{prefix}/<resource:.+>");
        self.route(Some("GET"), &template, ResourcesHandler::new(root))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Handler for Router {
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>> {
        for entry in &self.entries {
            let response = match entry {
                Entry::Route(route) => route.handle(request)?,
                Entry::Handler(handler) => handler.handle(request)?,
            };
            if response.is_some() {
                return Ok(response);
            }
        }
        Ok(None)
    }

    /// Close every entry, last registered first
    ///
    /// All entries are closed even if one fails; the first failure is
    /// returned.
    fn close(&self) -> Result<()> {
        let mut first_error = None;
        for entry in self.entries.iter().rev() {
            if let Err(e) = entry.handler().close() {
                warn!("failed to close handler: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for entry in &self.entries {
            match entry {
                Entry::Route(route) => list.entry(&format_args!(
                    "{} {}",
                    route.method.as_deref().unwrap_or("*"),
                    route.template.as_str()
                )),
                Entry::Handler(_) => list.entry(&format_args!("<handler>")),
            };
        }
        list.finish()
    }
}
