//! Recovery of the directory that anchors relative `X-Sendfile` paths.
//!
//! Handlers name files relative to the directory of the URI the client asked for. By the time
//! the response is filtered, the request may have been rewritten internally (a directory index,
//! a front controller, ...), so the directory is derived from the request line instead of the
//! current URI whenever the two differ.

use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::SendFileError;

/// Result of mapping a URI onto the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequestPath {
    /// Filesystem path the URI maps to.
    pub filename: PathBuf,
    /// Whether `filename` designates a directory.
    pub is_dir: bool,
}

/// Maps URIs onto filesystem paths the way the host would for an internal sub-request.
///
/// Lookups are purely lexical and must not block on IO. Whether an existing path is a
/// directory is checked on disk by the caller.
pub trait UriResolver {
    /// Looks up the filesystem path for a URI (path and optional query string).
    fn lookup(&self, uri: &str) -> Result<SubRequestPath, SendFileError>;
}

impl<T: UriResolver + ?Sized> UriResolver for Arc<T> {
    fn lookup(&self, uri: &str) -> Result<SubRequestPath, SendFileError> {
        (**self).lookup(uri)
    }
}

/// Resolver mapping URI paths below a single document root.
///
/// The URI path is percent-decoded and normalized, it can never point above the root. A
/// trailing slash marks a directory.
#[derive(Debug, Clone)]
pub struct DocumentRoot {
    /// The document root. May be absolute or relative.
    pub root: PathBuf,
}

impl DocumentRoot {
    /// Create a new resolver for the given document root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a URI path onto a path below the root.
    ///
    /// Segments are split after percent-decoding, so `%2f` separates segments as well. Empty
    /// and `.` segments are skipped, `..` drops the previous segment and is ignored at the top.
    /// Segments that would not form a single plain path component (drive letters, prefixes)
    /// are dropped.
    fn map_path(&self, path: &str) -> PathBuf {
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        let mut segments: Vec<&str> = Vec::new();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => {
                    let mut components = Path::new(segment).components();
                    if let (Some(Component::Normal(_)), None) =
                        (components.next(), components.next())
                    {
                        segments.push(segment);
                    }
                }
            }
        }
        segments
            .into_iter()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl UriResolver for DocumentRoot {
    fn lookup(&self, uri: &str) -> Result<SubRequestPath, SendFileError> {
        let path = uri.split_once('?').map_or(uri, |(path, _)| path);
        if !path.starts_with('/') {
            return Err(SendFileError::PathResolution(format!(
                "not a local URI: {uri}"
            )));
        }

        Ok(SubRequestPath {
            filename: self.map_path(path),
            is_dir: path.ends_with('/'),
        })
    }
}

/// Extracts the request target from a request line: the method is skipped, the target ends at
/// the next whitespace.
pub fn request_target(the_request: &str) -> Option<&str> {
    let rest = the_request.trim_start();
    let rest = rest.trim_start_matches(|c: char| !c.is_whitespace());
    let target = rest.split_whitespace().next()?;
    Some(target)
}

/// Whether `path` names an existing directory. Missing paths are not directories.
pub(crate) async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map_or(false, |metadata| metadata.is_dir())
}

fn containing_directory(filename: PathBuf, is_dir: bool) -> PathBuf {
    if is_dir {
        return filename;
    }
    match filename.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => filename,
    }
}

/// Determines the directory of the URI the client originally requested.
///
/// If the request target from the request line is a prefix of the current URI, the request's
/// current filesystem path is used. Otherwise the target is looked up with `resolver`, and the
/// path found counts as a directory if the resolver says so or it is one on disk. Unless it
/// designates a directory, its last component is removed.
pub async fn original_directory<R>(
    ctx: &RequestContext,
    resolver: &R,
) -> Result<PathBuf, SendFileError>
where
    R: UriResolver + ?Sized,
{
    let target = request_target(&ctx.the_request)
        .ok_or_else(|| SendFileError::PathResolution("empty request URI".to_owned()))?;
    let target_path = target.split_once('?').map_or(target, |(path, _)| path);

    let (filename, is_dir) = match &ctx.filename {
        Some(filename) if !target_path.is_empty() && ctx.uri.starts_with(target_path) => {
            (filename.clone(), ctx.is_directory)
        }
        _ => {
            let found = resolver.lookup(target)?;
            let is_dir = found.is_dir || is_directory(&found.filename).await;
            (found.filename, is_dir)
        }
    };

    Ok(containing_directory(filename, is_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Version};
    use std::fs::create_dir_all;
    use tempdir::TempDir;

    struct Unresolvable;

    impl UriResolver for Unresolvable {
        fn lookup(&self, uri: &str) -> Result<SubRequestPath, SendFileError> {
            Err(SendFileError::PathResolution(uri.to_owned()))
        }
    }

    fn context(target: &str, current_uri: &str, filename: &str) -> RequestContext {
        let mut ctx = RequestContext::new(Method::GET, target, Version::HTTP_11);
        ctx.uri = current_uri.to_owned();
        ctx.filename = Some(PathBuf::from(filename));
        ctx
    }

    #[test]
    fn parses_request_line() {
        assert_eq!(request_target("GET /a/b HTTP/1.1"), Some("/a/b"));
        assert_eq!(request_target("GET   /a/b"), Some("/a/b"));
        assert_eq!(request_target("GET "), None);
        assert_eq!(request_target(""), None);
    }

    #[tokio::test]
    async fn unchanged_uri_uses_current_path() {
        let ctx = context("/app/index.php", "/app/index.php", "/srv/app/index.php");
        let dir = original_directory(&ctx, &Unresolvable).await.unwrap();
        assert_eq!(dir, Path::new("/srv/app"));
    }

    #[tokio::test]
    async fn directory_index_counts_as_unchanged() {
        let ctx = context("/app/", "/app/index.php", "/srv/app/index.php");
        let dir = original_directory(&ctx, &Unresolvable).await.unwrap();
        assert_eq!(dir, Path::new("/srv/app"));
    }

    #[tokio::test]
    async fn current_directory_is_kept() {
        let mut ctx = context("/app", "/app", "/srv/app");
        ctx.is_directory = true;
        let dir = original_directory(&ctx, &Unresolvable).await.unwrap();
        assert_eq!(dir, Path::new("/srv/app"));
    }

    #[tokio::test]
    async fn rewritten_uri_is_looked_up() {
        let ctx = context(
            "/downloads/report?id=5",
            "/front.php",
            "/srv/app/front.php",
        );
        let dir = original_directory(&ctx, &DocumentRoot::new("/var/www")).await.unwrap();
        assert_eq!(dir, Path::new("/var/www/downloads"));

        let ctx = context("/downloads/", "/front.php", "/srv/app/front.php");
        let dir = original_directory(&ctx, &DocumentRoot::new("/var/www")).await.unwrap();
        assert_eq!(dir, Path::new("/var/www/downloads"));
    }

    #[tokio::test]
    async fn failures() {
        let ctx = context("/downloads/report", "/front.php", "/srv/app/front.php");
        assert!(matches!(
            original_directory(&ctx, &Unresolvable).await,
            Err(SendFileError::PathResolution(_))
        ));

        let mut ctx = context("/", "/", "/srv");
        ctx.the_request = "GET".to_owned();
        assert!(matches!(
            original_directory(&ctx, &DocumentRoot::new("/srv")).await,
            Err(SendFileError::PathResolution(_))
        ));
    }

    #[tokio::test]
    async fn rewritten_uri_naming_a_directory() {
        let dir = TempDir::new("xsendfile-original").unwrap();
        create_dir_all(dir.path().join("downloads")).unwrap();
        let root = DocumentRoot::new(dir.path());

        let ctx = context("/downloads", "/front.php", "/srv/app/front.php");
        let found = original_directory(&ctx, &root).await.unwrap();
        assert_eq!(found, dir.path().join("downloads"));

        let ctx = context("/downloads/latest", "/front.php", "/srv/app/front.php");
        let found = original_directory(&ctx, &root).await.unwrap();
        assert_eq!(found, dir.path().join("downloads"));
    }

    #[test]
    fn document_root() {
        let root = DocumentRoot::new("/var/www");
        assert_eq!(
            root.lookup("/a/../b.php?x=1").unwrap(),
            SubRequestPath {
                filename: PathBuf::from("/var/www/b.php"),
                is_dir: false,
            }
        );
        assert!(root.lookup("/").unwrap().is_dir);
        assert!(root.lookup("http://example.com/").is_err());
    }

    #[test]
    fn document_root_stays_below_root() {
        let root = DocumentRoot::new("/var/www");
        assert_eq!(
            root.lookup("/xxx/..%2f..%2f../etc/passwd").unwrap().filename,
            Path::new("/var/www/etc/passwd")
        );
        assert_eq!(
            root.lookup("/../../").unwrap(),
            SubRequestPath {
                filename: PathBuf::from("/var/www"),
                is_dir: true,
            }
        );

        let found = root.lookup("/app/has%20space/./").unwrap();
        assert_eq!(found.filename, Path::new("/var/www/app/has space"));
        assert!(found.is_dir);
    }
}
