//! Conditional request evaluation.
//!
//! After the substituted file's validators have been placed on the response, the host decides
//! whether the request's conditions let it answer without a body. [`Preconditions`] is the
//! default evaluator, hosts with their own logic implement [`ConditionalEvaluator`].

use http::{header, HeaderMap, Method, StatusCode};
use httpdate::parse_http_date;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::RequestContext;

/// Outcome of evaluating request conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send the full response.
    Proceed,
    /// Answer with this status and no body, e.g. `304 Not Modified`.
    ShortCircuit(StatusCode),
}

/// Evaluates the conditional headers of a request against the response metadata in the
/// request context (`ETag` from the outbound headers, `mtime`).
pub trait ConditionalEvaluator {
    /// Evaluate the request conditions.
    fn evaluate(&self, ctx: &RequestContext) -> Verdict;
}

/// Default evaluator following the precedence rules of RFC 7232, section 6.
///
/// Conditions are ignored for non-2xx responses and for responses flagged `no_local_copy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preconditions;

fn header_str<'a>(headers: &'a HeaderMap, name: &header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn unix_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs())
}

/// Checks an `If-Match`/`If-None-Match` list against the current entity tag.
fn etag_matches(list: &str, etag: Option<&str>, weak: bool) -> bool {
    let Some(etag) = etag else {
        return false;
    };
    if list.trim() == "*" {
        return true;
    }

    let is_weak = |tag: &str| tag.starts_with("W/");
    let opaque = |tag: &str| tag.trim_start_matches("W/").to_owned();
    if !weak && is_weak(etag) {
        return false;
    }
    list.split(',').map(str::trim).any(|candidate| {
        if weak {
            opaque(candidate) == opaque(etag)
        } else {
            !is_weak(candidate) && candidate == etag
        }
    })
}

impl ConditionalEvaluator for Preconditions {
    fn evaluate(&self, ctx: &RequestContext) -> Verdict {
        if !ctx.status.is_success() || ctx.no_local_copy {
            return Verdict::Proceed;
        }

        let headers = &ctx.headers_in;
        let etag = header_str(&ctx.headers_out, &header::ETAG);
        let modified = ctx.mtime.and_then(unix_seconds);
        let is_get_or_head = matches!(ctx.method, Method::GET | Method::HEAD);

        if let Some(list) = header_str(headers, &header::IF_MATCH) {
            if !etag_matches(list, etag, false) {
                return Verdict::ShortCircuit(StatusCode::PRECONDITION_FAILED);
            }
        } else if let Some(since) = header_str(headers, &header::IF_UNMODIFIED_SINCE)
            .and_then(|value| parse_http_date(value).ok())
            .and_then(unix_seconds)
        {
            if modified.is_some_and(|modified| modified > since) {
                return Verdict::ShortCircuit(StatusCode::PRECONDITION_FAILED);
            }
        }

        if let Some(list) = header_str(headers, &header::IF_NONE_MATCH) {
            if etag_matches(list, etag, true) {
                return Verdict::ShortCircuit(if is_get_or_head {
                    StatusCode::NOT_MODIFIED
                } else {
                    StatusCode::PRECONDITION_FAILED
                });
            }
        } else if is_get_or_head {
            if let Some(since) = header_str(headers, &header::IF_MODIFIED_SINCE)
                .and_then(|value| parse_http_date(value).ok())
                .and_then(unix_seconds)
            {
                if modified.is_some_and(|modified| modified <= since) {
                    return Verdict::ShortCircuit(StatusCode::NOT_MODIFIED);
                }
            }
        }

        Verdict::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Version};
    use httpdate::fmt_http_date;
    use std::time::Duration;

    const ETAG: &str = "\"2a-d-5f5e100\"";

    fn modified() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn context(method: Method, headers: &[(header::HeaderName, String)]) -> RequestContext {
        let mut ctx = RequestContext::new(method, "/", Version::HTTP_11);
        ctx.headers_out
            .insert(header::ETAG, HeaderValue::from_static(ETAG));
        ctx.mtime = Some(modified() + Duration::from_millis(300));
        for (name, value) in headers {
            ctx.headers_in
                .insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        ctx
    }

    fn evaluate(method: Method, headers: &[(header::HeaderName, String)]) -> Verdict {
        Preconditions.evaluate(&context(method, headers))
    }

    #[test]
    fn unconditional() {
        assert_eq!(evaluate(Method::GET, &[]), Verdict::Proceed);
    }

    #[test]
    fn if_none_match() {
        let matching = [(header::IF_NONE_MATCH, format!("\"other\", {ETAG}"))];
        assert_eq!(
            evaluate(Method::GET, &matching),
            Verdict::ShortCircuit(StatusCode::NOT_MODIFIED)
        );
        assert_eq!(
            evaluate(Method::POST, &matching),
            Verdict::ShortCircuit(StatusCode::PRECONDITION_FAILED)
        );
        let weak = [(header::IF_NONE_MATCH, format!("W/{ETAG}"))];
        assert_eq!(
            evaluate(Method::HEAD, &weak),
            Verdict::ShortCircuit(StatusCode::NOT_MODIFIED)
        );
        let star = [(header::IF_NONE_MATCH, "*".to_owned())];
        assert_eq!(
            evaluate(Method::GET, &star),
            Verdict::ShortCircuit(StatusCode::NOT_MODIFIED)
        );
        let other = [(header::IF_NONE_MATCH, "\"other\"".to_owned())];
        assert_eq!(evaluate(Method::GET, &other), Verdict::Proceed);
    }

    #[test]
    fn if_none_match_takes_precedence_over_if_modified_since() {
        let headers = [
            (header::IF_NONE_MATCH, "\"other\"".to_owned()),
            (header::IF_MODIFIED_SINCE, fmt_http_date(modified())),
        ];
        assert_eq!(evaluate(Method::GET, &headers), Verdict::Proceed);
    }

    #[test]
    fn if_modified_since() {
        let same = [(header::IF_MODIFIED_SINCE, fmt_http_date(modified()))];
        assert_eq!(
            evaluate(Method::GET, &same),
            Verdict::ShortCircuit(StatusCode::NOT_MODIFIED)
        );
        assert_eq!(evaluate(Method::POST, &same), Verdict::Proceed);

        let older = [(
            header::IF_MODIFIED_SINCE,
            fmt_http_date(modified() - Duration::from_secs(3600)),
        )];
        assert_eq!(evaluate(Method::GET, &older), Verdict::Proceed);

        let garbage = [(header::IF_MODIFIED_SINCE, "yesterday".to_owned())];
        assert_eq!(evaluate(Method::GET, &garbage), Verdict::Proceed);
    }

    #[test]
    fn if_match() {
        let matching = [(header::IF_MATCH, ETAG.to_owned())];
        assert_eq!(evaluate(Method::GET, &matching), Verdict::Proceed);

        let weak = [(header::IF_MATCH, format!("W/{ETAG}"))];
        assert_eq!(
            evaluate(Method::GET, &weak),
            Verdict::ShortCircuit(StatusCode::PRECONDITION_FAILED)
        );
        let other = [(header::IF_MATCH, "\"other\"".to_owned())];
        assert_eq!(
            evaluate(Method::PUT, &other),
            Verdict::ShortCircuit(StatusCode::PRECONDITION_FAILED)
        );
    }

    #[test]
    fn if_unmodified_since() {
        let older = [(
            header::IF_UNMODIFIED_SINCE,
            fmt_http_date(modified() - Duration::from_secs(60)),
        )];
        assert_eq!(
            evaluate(Method::GET, &older),
            Verdict::ShortCircuit(StatusCode::PRECONDITION_FAILED)
        );
        let same = [(header::IF_UNMODIFIED_SINCE, fmt_http_date(modified()))];
        assert_eq!(evaluate(Method::GET, &same), Verdict::Proceed);
    }

    #[test]
    fn ignored_without_local_copy_or_for_errors() {
        let headers = [(header::IF_NONE_MATCH, ETAG.to_owned())];

        let mut ctx = context(Method::GET, &headers);
        ctx.no_local_copy = true;
        assert_eq!(Preconditions.evaluate(&ctx), Verdict::Proceed);

        let mut ctx = context(Method::GET, &headers);
        ctx.status = StatusCode::NOT_FOUND;
        assert_eq!(Preconditions.evaluate(&ctx), Verdict::Proceed);
    }
}
