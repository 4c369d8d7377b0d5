use http::header::{self, HeaderMap, HeaderValue};
use http::{Request, Response, Uri};
use httpdate::fmt_http_date;
use hyper::service::Service;
use std::borrow::Cow;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use crate::brigade::Brigade;
use crate::conditional::{ConditionalEvaluator, Preconditions};
use crate::config::ConfigTree;
use crate::context::RequestContext;
use crate::filter::{SubstitutionOutcome, XSendFileFilter};
use crate::original_path::{is_directory, DocumentRoot, UriResolver};
use crate::util::Body;

/// Request extension holding the URI the client originally sent.
///
/// Layers that rewrite the request URI before it reaches the handler insert this, so that
/// relative `X-Sendfile` paths keep resolving against the directory the client asked for.
#[derive(Debug, Clone)]
pub struct OriginalUri(pub Uri);

/// Request extension marking an internally generated sub-request. Responses to these are
/// never substituted.
#[derive(Debug, Clone, Copy)]
pub struct SubRequest;

/// Response extension with headers that are sent on error responses as well.
///
/// Handlers may place the `X-Sendfile` header here instead of on the response itself.
#[derive(Debug, Clone, Default)]
pub struct ErrorHeaders(pub HeaderMap);

/// Response extension naming the handler that produced the response.
#[derive(Debug, Clone)]
pub struct Handler(pub Cow<'static, str>);

/// Response extension with caching restrictions set by the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSuppression {
    /// The response must not be cached.
    pub no_cache: bool,
    /// Conditional request headers must be ignored.
    pub no_local_copy: bool,
}

/// Hyper service wrapping a handler service and filtering its responses.
///
/// Requests are passed to the inner service unchanged. Responses carrying an `X-Sendfile`
/// header are rewritten to send the named file, if `XSendFile` is on for the request. The
/// filesystem path of a request is determined with the resolver, a [`DocumentRoot`] by default.
pub struct XSendFile<S, R = DocumentRoot, C = Preconditions> {
    inner: S,
    filter: Arc<XSendFileFilter<R, C>>,
}

impl<S> XSendFile<S> {
    /// Create a new instance of `XSendFile` mapping requests below the given document root.
    pub fn new(inner: S, config: impl Into<Arc<ConfigTree>>, root: impl Into<PathBuf>) -> Self {
        Self::with_filter(inner, XSendFileFilter::new(config, DocumentRoot::new(root)))
    }
}

impl<S, R, C> XSendFile<S, R, C> {
    /// Create a new instance of `XSendFile` using a custom filter.
    pub fn with_filter(inner: S, filter: XSendFileFilter<R, C>) -> Self {
        Self {
            inner,
            filter: Arc::new(filter),
        }
    }

    /// The filter applied to responses.
    pub fn filter(&self) -> &XSendFileFilter<R, C> {
        &self.filter
    }
}

impl<S: Clone, R, C> Clone for XSendFile<S, R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl<S, R, C> std::fmt::Debug for XSendFile<S, R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XSendFile").finish_non_exhaustive()
    }
}

fn request_context<B, R>(req: &Request<B>, resolver: &R) -> RequestContext
where
    R: UriResolver,
{
    let original = req
        .extensions()
        .get::<OriginalUri>()
        .map_or(req.uri(), |original| &original.0);
    let target = original.path_and_query().map_or("/", |pq| pq.as_str());

    let mut ctx = RequestContext::new(req.method().clone(), target, req.version());
    ctx.uri = req.uri().path().to_owned();
    ctx.headers_in = req.headers().clone();
    ctx.is_subrequest = req.extensions().get::<SubRequest>().is_some();

    let current = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    if let Ok(found) = resolver.lookup(current) {
        ctx.filename = Some(found.filename);
        ctx.is_directory = found.is_dir;
    }
    ctx
}

fn append_all(headers: &mut HeaderMap, extra: HeaderMap) {
    let mut last = None;
    for (name, value) in extra {
        if name.is_some() {
            last = name;
        }
        if let Some(name) = &last {
            headers.append(name.clone(), value);
        }
    }
}

impl<R, C> XSendFileFilter<R, C>
where
    R: UriResolver,
    C: ConditionalEvaluator,
{
    /// Filters a complete response produced for the request described by `ctx`.
    pub async fn filter_response<B>(
        &self,
        mut ctx: RequestContext,
        response: Response<B>,
    ) -> Response<Body<B>> {
        let (mut parts, body) = response.into_parts();
        ctx.status = parts.status;
        ctx.headers_out = std::mem::take(&mut parts.headers);
        if let Some(ErrorHeaders(headers)) = parts.extensions.remove::<ErrorHeaders>() {
            ctx.err_headers_out = headers;
        }
        if let Some(Handler(name)) = parts.extensions.get::<Handler>() {
            ctx.handler = Some(name.to_string());
        }
        if let Some(suppression) = parts.extensions.get::<CacheSuppression>() {
            ctx.no_cache = suppression.no_cache;
            ctx.no_local_copy = suppression.no_local_copy;
        }

        let mut brigade = Brigade::from_stream(body);
        let outcome = match self.activate(&ctx) {
            Some(activation) => {
                if let Some(filename) = &ctx.filename {
                    ctx.is_directory = is_directory(filename).await;
                }
                activation.run(&mut ctx, &mut brigade).await
            }
            None => SubstitutionOutcome::NotApplicable,
        };

        parts.status = ctx.status;
        parts.headers = if let SubstitutionOutcome::Rejected(_) = outcome {
            ctx.err_headers_out
        } else {
            let mut headers = ctx.headers_out;
            append_all(&mut headers, ctx.err_headers_out);
            headers
        };
        if ctx.no_cache && !parts.headers.contains_key(header::EXPIRES) {
            if let Ok(now) = HeaderValue::try_from(fmt_http_date(SystemTime::now())) {
                parts.headers.insert(header::EXPIRES, now);
            }
        }

        Response::from_parts(parts, Body::from(brigade))
    }
}

impl<S, R, C, ReqB, ResB> Service<Request<ReqB>> for XSendFile<S, R, C>
where
    S: Service<Request<ReqB>, Response = Response<ResB>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    R: UriResolver + Send + Sync + 'static,
    C: ConditionalEvaluator + Send + Sync + 'static,
    ResB: Send + 'static,
{
    type Response = Response<Body<ResB>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<ReqB>) -> Self::Future {
        let ctx = request_context(&req, &self.filter.resolver);
        let filter = self.filter.clone();
        let response = self.inner.call(req);
        Box::pin(async move {
            let response = response.await?;
            Ok(filter.filter_response(ctx, response).await)
        })
    }
}
