use http::StatusCode;
use std::io::Error as IoError;
use std::path::PathBuf;

/// Reasons a substitution attempt was rejected.
///
/// Every variant is terminal for the current response. The client only ever learns the status
/// code from `SendFileError::status`, the details are meant for the log.
#[derive(Debug, thiserror::Error)]
pub enum SendFileError {
    /// The directory of the original request could not be recovered.
    #[error("unable to recover the original request path: {0}")]
    PathResolution(String),
    /// The header named a path that could not be canonicalized, or that lies outside the base
    /// directory while escaping it is not allowed.
    #[error("unable to find file {path:?} relative to {base:?}")]
    SecurityViolation {
        /// Base directory the path was resolved against.
        base: PathBuf,
        /// Untrusted path as given in the header.
        path: String,
    },
    /// The resolved file could not be opened.
    #[error("cannot open file {path:?}: {source}")]
    Open {
        /// Resolved file path.
        path: PathBuf,
        /// Underlying IO error.
        source: IoError,
    },
    /// Metadata could not be retrieved from the opened file.
    #[error("unable to stat file {path:?}: {source}")]
    Stat {
        /// Resolved file path.
        path: PathBuf,
        /// Underlying IO error.
        source: IoError,
    },
    /// The resolved path is not a regular file.
    #[error("not a file {0:?}")]
    WrongFileType(PathBuf),
}

impl SendFileError {
    /// Status code presented to the client.
    ///
    /// Containment violations are reported as `404 Not Found`, same as a missing file, so that
    /// the header cannot be used to probe for paths outside the base directory.
    pub fn status(&self) -> StatusCode {
        match self {
            SendFileError::Stat { .. } => StatusCode::FORBIDDEN,
            SendFileError::PathResolution(_)
            | SendFileError::SecurityViolation { .. }
            | SendFileError::Open { .. }
            | SendFileError::WrongFileType(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Errors produced while building configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed reading configuration file: {0}")]
    Io(#[from] IoError),
    /// The configuration file is not valid YAML for this crate.
    #[error("failed parsing configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A directive name that this crate doesn't know.
    #[error("unknown directive {0}")]
    UnknownDirective(String),
    /// A flag value other than `On` or `Off`.
    #[error("{directive} must be On or Off, got {value:?}")]
    InvalidFlag {
        /// Directive the value was given for.
        directive: String,
        /// The offending value.
        value: String,
    },
}
