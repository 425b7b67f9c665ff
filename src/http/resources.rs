//! Static file serving

use super::router::Handler;
use super::{responses, HttpRequest, HttpResponse, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Guess a Content-Type from a file extension
pub fn content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "application/font-woff",
        "ttf" => "application/font-sfnt",
        "eot" => "application/vnd.ms-fontobject",
        _ => return None,
    };
    Some(content_type)
}

/// `true` if `path` contains a `.` or `..` segment
fn is_traversal(path: &str) -> bool {
    path.starts_with("../")
        || path.contains("/../")
        || path.starts_with("./")
        || path.contains("/./")
}

/// Serves files below a root directory
///
/// The relative path comes from the `resource` route parameter. Paths with
/// traversal segments and paths that are not regular files are not matched.
#[derive(Debug, Clone)]
pub struct ResourcesHandler {
    root: PathBuf,
}

impl ResourcesHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ResourcesHandler { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path, or `None` if it may not be served
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        if is_traversal(relative) {
            debug!(path = relative, "rejected resource path");
            return None;
        }
        let path = self.root.join(relative.trim_start_matches('/'));
        path.is_file().then_some(path)
    }
}

impl Handler for ResourcesHandler {
    fn handle(&self, request: &mut HttpRequest<'_>) -> Result<Option<HttpResponse>> {
        let relative = request.param("resource").get()?;
        match self.resolve(relative) {
            Some(path) => responses::resource(&path).map(Some),
            None => Ok(None),
        }
    }
}
