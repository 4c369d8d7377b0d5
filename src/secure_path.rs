//! Joining untrusted header values onto the base directory.

use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::SendFileError;

/// Joins `relative` onto `base` and canonicalizes the result, resolving `.`, `..` and symbolic
/// links.
///
/// Unless `allow_escape` is set, the canonical result must lie strictly below the canonical
/// `base`. An absolute `relative` replaces `base`, but is subject to the same check. Any IO
/// error while canonicalizing is a failure, never a pass.
pub async fn join(
    base: &Path,
    relative: impl AsRef<Path>,
    allow_escape: bool,
) -> Result<PathBuf, SendFileError> {
    let relative = relative.as_ref();
    let violation = || SendFileError::SecurityViolation {
        base: base.to_path_buf(),
        path: relative.display().to_string(),
    };

    if relative.as_os_str().is_empty() {
        return Err(violation());
    }

    let joined = base.join(relative);
    let canonical = fs::canonicalize(&joined).await.map_err(|err| {
        debug!("canonicalizing {joined:?} failed: {err}");
        violation()
    })?;

    if allow_escape {
        return Ok(canonical);
    }

    let canonical_base = fs::canonicalize(base).await.map_err(|err| {
        debug!("canonicalizing base directory {base:?} failed: {err}");
        violation()
    })?;

    if canonical != canonical_base && canonical.starts_with(&canonical_base) {
        Ok(canonical)
    } else {
        debug!("{canonical:?} is outside of {canonical_base:?}");
        Err(violation())
    }
}
