//! Opening the substituted file and collecting its metadata.

use httpdate::fmt_http_date;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::task::{spawn_blocking, JoinHandle};

use crate::error::SendFileError;

/// Metadata of a resolved file, as used for caching headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Canonical path of the file.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Unique file identity on its device, `0` where the platform has none.
    pub inode: u64,
}

impl FileMetadata {
    /// Strong entity tag built from identity, size and modification time in microseconds.
    pub fn etag(&self) -> String {
        match self.modified_micros() {
            Some(micros) => format!("\"{:x}-{:x}-{:x}\"", self.inode, self.size, micros),
            None => format!("\"{:x}-{:x}\"", self.inode, self.size),
        }
    }

    /// Modification time formatted for the `Last-Modified` header.
    pub fn last_modified(&self) -> Option<String> {
        self.modified.map(fmt_http_date)
    }

    fn modified_micros(&self) -> Option<u128> {
        self.modified
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_micros())
    }
}

/// An opened regular file along with its metadata.
///
/// Dropping this closes the file handle.
#[derive(Debug)]
pub struct ResolvedFile {
    /// Open file handle.
    pub handle: File,
    /// Metadata retrieved from the open handle.
    pub metadata: FileMetadata,
}

#[cfg(unix)]
fn inode(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode(_metadata: &std::fs::Metadata) -> u64 {
    0
}

fn open_blocking(path: PathBuf) -> Result<ResolvedFile, SendFileError> {
    let handle = match OpenOptions::new().read(true).open(&path) {
        Ok(handle) => handle,
        Err(source) => return Err(SendFileError::Open { path, source }),
    };

    // The metadata is taken from the handle, so that it describes exactly the file being sent.
    let metadata = match handle.metadata() {
        Ok(metadata) => metadata,
        Err(source) => return Err(SendFileError::Stat { path, source }),
    };

    if !metadata.is_file() {
        return Err(SendFileError::WrongFileType(path));
    }

    Ok(ResolvedFile {
        handle: File::from_std(handle),
        metadata: FileMetadata {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            inode: inode(&metadata),
            path,
        },
    })
}

/// Opens a file for reading and retrieves its metadata.
///
/// Open and stat happen in one go on the blocking thread pool. Anything other than a regular
/// file is rejected, with the handle closed before the error is returned.
pub fn open(path: impl Into<PathBuf>) -> ProbeFuture {
    let path = path.into();
    ProbeFuture {
        inner: spawn_blocking(move || open_blocking(path)),
    }
}

/// Future type produced by `open`.
pub struct ProbeFuture {
    inner: JoinHandle<Result<ResolvedFile, SendFileError>>,
}

impl std::fmt::Debug for ProbeFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeFuture").finish_non_exhaustive()
    }
}

impl Future for ProbeFuture {
    type Output = Result<ResolvedFile, SendFileError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SendFileError::Open {
                path: PathBuf::new(),
                source: IoError::new(ErrorKind::Other, "background task failed"),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempdir::TempDir;

    #[tokio::test]
    async fn regular_file() {
        let dir = TempDir::new("xsendfile-probe").unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "hello world").unwrap();

        let file = open(&path).await.unwrap();
        assert_eq!(file.metadata.size, 11);
        assert_eq!(file.metadata.path, path);
        assert!(file.metadata.modified.is_some());
        assert!(file.metadata.last_modified().is_some());
    }

    #[tokio::test]
    async fn rejections() {
        let dir = TempDir::new("xsendfile-probe").unwrap();

        assert!(matches!(
            open(dir.path().join("missing")).await,
            Err(SendFileError::Open { .. })
        ));
        assert!(matches!(
            open(dir.path()).await,
            Err(SendFileError::WrongFileType(_)) | Err(SendFileError::Open { .. })
        ));
    }

    #[test]
    fn etag_format() {
        let meta = FileMetadata {
            path: PathBuf::from("/srv/app/report.pdf"),
            size: 0x1234,
            modified: Some(UNIX_EPOCH + Duration::from_micros(0xabcdef)),
            inode: 0x42,
        };
        assert_eq!(meta.etag(), "\"42-1234-abcdef\"");
        assert_eq!(
            meta.last_modified().unwrap(),
            "Thu, 01 Jan 1970 00:00:11 GMT"
        );

        let meta = FileMetadata {
            modified: None,
            ..meta
        };
        assert_eq!(meta.etag(), "\"42-1234\"");
        assert_eq!(meta.last_modified(), None);
    }
}
