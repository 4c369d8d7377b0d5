//! The response rewriter.
//!
//! For every response, [`XSendFileFilter::activate`] decides once whether the filter takes part.
//! The resulting [`Activation`] is consumed by [`Activation::run`], which looks for the
//! `X-Sendfile` header and, if present, replaces the generated body with the named file.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use log::{debug, info, trace, warn};
use mime_guess::MimeGuess;
use std::path::PathBuf;
use std::sync::Arc;

use crate::brigade::{Brigade, FileSegment, Segment};
use crate::conditional::{ConditionalEvaluator, Preconditions, Verdict};
use crate::config::{ConfigTree, EffectiveConfig};
use crate::context::RequestContext;
use crate::error::SendFileError;
use crate::original_path::{original_directory, DocumentRoot, UriResolver};
use crate::probe::{self, FileMetadata, ResolvedFile};
use crate::secure_path;

/// Name of the header handlers use to request a file substitution.
pub const X_SENDFILE: HeaderName = HeaderName::from_static("x-sendfile");

/// What happened to a response passed through the filter.
#[derive(Debug)]
pub enum SubstitutionOutcome {
    /// The filter did not touch the response.
    NotApplicable,
    /// The header named a file that can't be sent. The response status has been set to the
    /// error's status and the generated body was discarded.
    Rejected(SendFileError),
    /// The request's conditions short-circuited the response, which has no body.
    ConditionalShortCircuit(StatusCode),
    /// The generated body was replaced with this file.
    Substituted(FileMetadata),
}

/// Replaces generated response bodies with files named by their `X-Sendfile` header.
///
/// The filter itself is immutable and can be shared by any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct XSendFileFilter<R = DocumentRoot, C = Preconditions> {
    config: Arc<ConfigTree>,
    pub(crate) resolver: R,
    evaluator: C,
}

impl<R> XSendFileFilter<R> {
    /// Create a filter with the default conditional request evaluator.
    pub fn new(config: impl Into<Arc<ConfigTree>>, resolver: R) -> Self {
        Self {
            config: config.into(),
            resolver,
            evaluator: Preconditions,
        }
    }
}

impl<R, C> XSendFileFilter<R, C> {
    /// Replace the conditional request evaluator.
    pub fn with_evaluator<C2>(self, evaluator: C2) -> XSendFileFilter<R, C2> {
        XSendFileFilter {
            config: self.config,
            resolver: self.resolver,
            evaluator,
        }
    }

    /// The configuration tree in use.
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Decides whether the filter takes part in the given request.
    ///
    /// Returns `None` unless `XSendFile` is on for the request's directory and location.
    pub fn activate(&self, ctx: &RequestContext) -> Option<Activation<'_, R, C>> {
        let config = self.config.resolve(ctx);
        if config.enabled {
            debug!("X-Sendfile active for {}", ctx.uri);
            Some(Activation {
                filter: self,
                config,
            })
        } else {
            trace!("X-Sendfile disabled for {}", ctx.uri);
            None
        }
    }
}

impl<R, C> XSendFileFilter<R, C>
where
    R: UriResolver,
    C: ConditionalEvaluator,
{
    /// Activates the filter for a request and runs it on the response in one go.
    pub async fn process<B>(
        &self,
        ctx: &mut RequestContext,
        brigade: &mut Brigade<B>,
    ) -> SubstitutionOutcome {
        match self.activate(ctx) {
            Some(activation) => activation.run(ctx, brigade).await,
            None => SubstitutionOutcome::NotApplicable,
        }
    }
}

/// The filter's participation in a single response.
#[must_use = "an activation does nothing unless run"]
#[derive(Debug)]
pub struct Activation<'a, R, C> {
    filter: &'a XSendFileFilter<R, C>,
    config: EffectiveConfig,
}

/// Removes the `X-Sendfile` header from both header maps, empty values included, and returns
/// the first non-empty value, primary headers first.
fn take_header(ctx: &mut RequestContext) -> Option<HeaderValue> {
    let non_empty = |value: Option<HeaderValue>| value.filter(|value| !value.is_empty());
    let primary = non_empty(ctx.headers_out.remove(&X_SENDFILE));
    let fallback = non_empty(ctx.err_headers_out.remove(&X_SENDFILE));
    primary.or(fallback)
}

/// Path named by a header value. Unix file names are arbitrary bytes, elsewhere the value must
/// be UTF-8.
#[cfg(unix)]
fn header_path(value: &HeaderValue) -> Option<PathBuf> {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};
    Some(PathBuf::from(OsStr::from_bytes(value.as_bytes())))
}

#[cfg(not(unix))]
fn header_path(value: &HeaderValue) -> Option<PathBuf> {
    std::str::from_utf8(value.as_bytes()).ok().map(PathBuf::from)
}

fn reject(ctx: &mut RequestContext, err: SendFileError) -> SubstitutionOutcome {
    warn!("X-Sendfile for {} rejected: {err}", ctx.uri);
    ctx.status = err.status();
    SubstitutionOutcome::Rejected(err)
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    match HeaderValue::try_from(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => debug!("not setting {name}: {err}"),
    }
}

impl<'a, R, C> Activation<'a, R, C>
where
    R: UriResolver,
    C: ConditionalEvaluator,
{
    /// Settings in effect for this response.
    pub fn config(&self) -> EffectiveConfig {
        self.config
    }

    /// Runs the filter on a response.
    ///
    /// The response is only considered if it is a plain `200 OK` produced for a top-level
    /// request by a handler other than the default one. If the `X-Sendfile` header is found,
    /// it is removed and the body is discarded, whatever happens afterwards.
    pub async fn run<B>(
        self,
        ctx: &mut RequestContext,
        brigade: &mut Brigade<B>,
    ) -> SubstitutionOutcome {
        if ctx.status != StatusCode::OK || ctx.is_subrequest || ctx.is_default_handler() {
            trace!("response to {} is not eligible for X-Sendfile", ctx.uri);
            return SubstitutionOutcome::NotApplicable;
        }

        let Some(value) = take_header(ctx) else {
            trace!("no X-Sendfile header in response to {}", ctx.uri);
            return SubstitutionOutcome::NotApplicable;
        };

        brigade.clear();

        match self.substitute(ctx, brigade, value).await {
            Ok(outcome) => outcome,
            Err(err) => reject(ctx, err),
        }
    }

    async fn substitute<B>(
        &self,
        ctx: &mut RequestContext,
        brigade: &mut Brigade<B>,
        value: HeaderValue,
    ) -> Result<SubstitutionOutcome, SendFileError> {
        let base = original_directory(ctx, &self.filter.resolver).await?;
        let relative =
            header_path(&value).ok_or_else(|| SendFileError::SecurityViolation {
                base: base.clone(),
                path: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })?;
        debug!("resolving {relative:?} against {base:?}");

        let path = secure_path::join(&base, &relative, self.config.allow_escape).await?;
        let ResolvedFile { handle, metadata } = probe::open(path).await?;

        ctx.inode = Some(metadata.inode);
        ctx.size = Some(metadata.size);
        ctx.mtime = metadata.modified;
        ctx.no_cache = false;
        ctx.no_local_copy = false;

        ctx.headers_out.remove(header::CONTENT_ENCODING);
        ctx.err_headers_out.remove(header::CONTENT_ENCODING);
        if let Some(last_modified) = metadata.last_modified() {
            set_header(&mut ctx.headers_out, header::LAST_MODIFIED, last_modified);
        }
        set_header(&mut ctx.headers_out, header::ETAG, metadata.etag());
        ctx.headers_out
            .insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.size));
        if !ctx.headers_out.contains_key(header::CONTENT_TYPE) {
            let mime = MimeGuess::from_path(&metadata.path).first_or_octet_stream();
            set_header(
                &mut ctx.headers_out,
                header::CONTENT_TYPE,
                mime.as_ref().to_owned(),
            );
        }

        if let Verdict::ShortCircuit(status) = self.filter.evaluator.evaluate(ctx) {
            drop(handle);
            debug!("conditions answered {} with {status}", ctx.uri);
            ctx.status = status;
            ctx.headers_out.remove(header::CONTENT_LENGTH);
            return Ok(SubstitutionOutcome::ConditionalShortCircuit(status));
        }

        if !self.config.sendfile {
            debug!("sendfile disabled for {:?}", metadata.path);
        }
        if !self.config.mmap {
            debug!("mmap disabled for {:?}", metadata.path);
        }
        brigade.push_back(Segment::File(FileSegment {
            file: handle,
            offset: 0,
            length: metadata.size,
            sendfile: self.config.sendfile,
            mmap: self.config.mmap,
        }));
        brigade.push_back(Segment::Eos);

        info!(
            "sending {:?} ({} bytes) for {}",
            metadata.path, metadata.size, ctx.uri
        );
        Ok(SubstitutionOutcome::Substituted(metadata))
    }
}
