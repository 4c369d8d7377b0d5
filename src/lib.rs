#![crate_name = "hyper_xsendfile"]
#![deny(missing_docs)]

//! `X-Sendfile` response substitution for [Hyper 1.0](https://github.com/hyperium/hyper).
//!
//! Application handlers often decide *which* file a client may download, but shouldn't have to
//! stream it themselves. With this library, a handler answers with an `X-Sendfile` header naming
//! a file, and the response is rewritten to carry that file instead of the generated body, with
//! caching headers computed from the file.
//!
//! ## Basic usage
//!
//! The `XSendFile` type wraps a handler service. It also implements the `hyper::Service` trait,
//! so it can be handed to a Hyper connection directly:
//!
//! ```rust
//! use http_body_util::Full;
//! use hyper::body::Bytes;
//! use hyper::service::service_fn;
//! use hyper_xsendfile::{ConfigTree, XSendFile, XSendFileConf};
//! use std::convert::Infallible;
//!
//! let conf = XSendFileConf::from_yaml_str("xsendfile: on").unwrap();
//!
//! // A handler that delegates sending the actual file.
//! let handler = service_fn(|_req: http::Request<hyper::body::Incoming>| async {
//!     let response = http::Response::builder()
//!         .header("X-Sendfile", "report.pdf")
//!         .body(Full::new(Bytes::from("generated body, never sent")))
//!         .unwrap();
//!     Ok::<_, Infallible>(response)
//! });
//!
//! // Relative paths in the header resolve against the directory of the request, mapped below
//! // the given document root.
//! let service = XSendFile::new(handler, ConfigTree::new(conf), "my/doc/root/");
//! ```
//!
//! ## Configuration
//!
//! `XSendFile` is off unless enabled. Settings can be made at server scope, per filesystem
//! directory and per URI location, see [`XSendFileConf`] and [`ConfigTree`]. By default, files
//! named in the header must lie below the directory of the request, unless
//! `XSendFileAllowAbove` is on.
//!
//! ## Advanced usage
//!
//! Hosts with their own request processing can use [`XSendFileFilter`] directly. A
//! [`RequestContext`] describes the request and response state, and a [`Brigade`] holds the
//! response body. The filter is activated once per response, and the activation rewrites both in
//! place. Mapping URIs to files and evaluating conditional requests are delegated to a
//! [`UriResolver`] and a [`ConditionalEvaluator`], which hosts may implement themselves.
//!
//! Finally, there's [`Body`], which sends a `Brigade` as a Hyper body, and [`FileBytesStream`],
//! which streams a portion of a file as `Bytes`s.

pub mod brigade;
pub mod conditional;
pub mod config;
mod context;
mod error;
mod filter;
pub mod original_path;
pub mod probe;
pub mod secure_path;
mod service;
mod util;

pub use crate::brigade::{Brigade, FileSegment, Segment};
pub use crate::conditional::{ConditionalEvaluator, Preconditions, Verdict};
pub use crate::config::{ConfigTree, DirectoryConfig, EffectiveConfig, TriFlag, XSendFileConf};
pub use crate::context::*;
pub use crate::error::*;
pub use crate::filter::*;
pub use crate::original_path::{DocumentRoot, SubRequestPath, UriResolver};
pub use crate::probe::{FileMetadata, ResolvedFile};
pub use crate::service::*;
pub use crate::util::{Body, BoxError, FileBytesStream};
