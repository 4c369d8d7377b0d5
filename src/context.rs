use http::{HeaderMap, Method, StatusCode, Version};
use std::path::PathBuf;
use std::time::SystemTime;

/// Handler name of the host's static content handler.
///
/// Responses produced by it are never substituted, only dynamically generated ones are.
pub const DEFAULT_HANDLER: &str = "default-handler";

/// Per-request view of the host's request and response state.
///
/// Created fresh for every response and discarded afterwards. The filter reads the request
/// side and rewrites the response side in place.
#[derive(Debug)]
pub struct RequestContext {
    /// The request line as received from the client, e.g. `GET /app/ HTTP/1.1`.
    pub the_request: String,
    /// Request method.
    pub method: Method,
    /// Current URI path, possibly rewritten internally since the request line was received.
    pub uri: String,
    /// Filesystem path the current URI maps to.
    pub filename: Option<PathBuf>,
    /// Whether `filename` designates a directory.
    pub is_directory: bool,
    /// Response status.
    pub status: StatusCode,
    /// Name of the handler that produced the response.
    pub handler: Option<String>,
    /// Whether this is an internally generated sub-request.
    pub is_subrequest: bool,
    /// Request headers, consulted for conditional requests.
    pub headers_in: HeaderMap,
    /// Primary outbound headers.
    pub headers_out: HeaderMap,
    /// Outbound headers that are kept on error responses as well.
    pub err_headers_out: HeaderMap,
    /// Identity of the file the response represents.
    pub inode: Option<u64>,
    /// Size of the file the response represents.
    pub size: Option<u64>,
    /// Last modification time of the response.
    pub mtime: Option<SystemTime>,
    /// The response must not be cached.
    pub no_cache: bool,
    /// Conditional request headers must be ignored for this response.
    pub no_local_copy: bool,
}

impl RequestContext {
    /// Creates the context for a request with an `200 OK` response and no headers yet.
    pub fn new(method: Method, request_target: &str, version: Version) -> Self {
        let uri = request_target
            .split_once('?')
            .map_or(request_target, |(path, _)| path)
            .to_owned();
        Self {
            the_request: format!("{method} {request_target} {version:?}"),
            method,
            uri,
            filename: None,
            is_directory: false,
            status: StatusCode::OK,
            handler: None,
            is_subrequest: false,
            headers_in: HeaderMap::new(),
            headers_out: HeaderMap::new(),
            err_headers_out: HeaderMap::new(),
            inode: None,
            size: None,
            mtime: None,
            no_cache: false,
            no_local_copy: false,
        }
    }

    /// Whether the response came from the host's static content handler.
    pub fn is_default_handler(&self) -> bool {
        self.handler.as_deref() == Some(DEFAULT_HANDLER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line() {
        let ctx = RequestContext::new(Method::GET, "/app/report.php?id=3", Version::HTTP_11);
        assert_eq!(ctx.the_request, "GET /app/report.php?id=3 HTTP/1.1");
        assert_eq!(ctx.uri, "/app/report.php");
        assert_eq!(ctx.status, StatusCode::OK);
        assert!(!ctx.is_default_handler());
    }
}
