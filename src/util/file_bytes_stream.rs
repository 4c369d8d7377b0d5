use std::{
    cmp::min,
    io::{Error as IoError, ErrorKind, SeekFrom},
    mem::MaybeUninit,
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::stream::Stream;
use hyper::body::Bytes;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncSeek, ReadBuf},
};

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum SeekState {
    NeedSeek(u64),
    Seeking,
    Reading,
}

/// Wraps an `AsyncRead + AsyncSeek`, like a tokio `File`, and implements a stream of `Bytes`s
/// covering `length` bytes starting at `offset`.
///
/// The stream fails with `UnexpectedEof` if the file ends early, e.g. because it was truncated
/// after its size was taken.
pub struct FileBytesStream<F = File> {
    file: F,
    buf: Box<[MaybeUninit<u8>; BUF_SIZE]>,
    remaining: u64,
    seek_state: SeekState,
}

impl<F> FileBytesStream<F> {
    /// Create a new stream over a portion of the given file.
    pub fn new(file: F, offset: u64, length: u64) -> Self {
        Self {
            file,
            buf: Box::new([MaybeUninit::uninit(); BUF_SIZE]),
            remaining: length,
            seek_state: if offset == 0 {
                SeekState::Reading
            } else {
                SeekState::NeedSeek(offset)
            },
        }
    }

    /// Number of bytes still to be produced.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<F> std::fmt::Debug for FileBytesStream<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBytesStream")
            .field("remaining", &self.remaining)
            .field("seek_state", &self.seek_state)
            .finish_non_exhaustive()
    }
}

impl<F> Stream for FileBytesStream<F>
where
    F: AsyncRead + AsyncSeek + Unpin,
{
    type Item = Result<Bytes, IoError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Self {
            ref mut file,
            ref mut buf,
            ref mut remaining,
            ref mut seek_state,
        } = *self;

        if let SeekState::NeedSeek(offset) = *seek_state {
            *seek_state = SeekState::Seeking;
            if let Err(e) = Pin::new(&mut *file).start_seek(SeekFrom::Start(offset)) {
                return Poll::Ready(Some(Err(e)));
            }
        }
        if *seek_state == SeekState::Seeking {
            match Pin::new(&mut *file).poll_complete(cx) {
                Poll::Ready(Ok(..)) => *seek_state = SeekState::Reading,
                Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                Poll::Pending => return Poll::Pending,
            }
        }

        if *remaining == 0 {
            return Poll::Ready(None);
        }

        let max_read_length = min(*remaining, buf.len() as u64) as usize;
        let mut read_buf = ReadBuf::uninit(&mut buf[..max_read_length]);
        match Pin::new(file).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    let missing = *remaining;
                    *remaining = 0;
                    Poll::Ready(Some(Err(IoError::new(
                        ErrorKind::UnexpectedEof,
                        format!("file ended with {missing} bytes left to be sent"),
                    ))))
                } else {
                    *remaining -= filled.len() as u64;
                    Poll::Ready(Some(Ok(Bytes::copy_from_slice(filled))))
                }
            }
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::io::Cursor;

    async fn collect(mut stream: FileBytesStream<Cursor<Vec<u8>>>) -> Result<Vec<u8>, IoError> {
        let mut result = Vec::new();
        while let Some(chunk) = stream.next().await {
            result.extend_from_slice(&chunk?);
        }
        Ok(result)
    }

    #[tokio::test]
    async fn reads_portion() {
        let data = b"0123456789".to_vec();
        let all = FileBytesStream::new(Cursor::new(data.clone()), 0, 10);
        assert_eq!(collect(all).await.unwrap(), b"0123456789");

        let middle = FileBytesStream::new(Cursor::new(data), 3, 4);
        assert_eq!(collect(middle).await.unwrap(), b"3456");
    }

    #[tokio::test]
    async fn truncated_file_fails() {
        let stream = FileBytesStream::new(Cursor::new(b"short".to_vec()), 0, 10);
        let err = collect(stream).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
