use std::{
    collections::VecDeque,
    error::Error as StdError,
    pin::Pin,
    task::{ready, Context, Poll},
};

use futures_util::stream::Stream;
use hyper::body::{Body as HttpBody, Bytes, Frame, SizeHint};

use crate::brigade::{Brigade, Segment};
use crate::util::FileBytesStream;

/// Boxed error type produced by [`Body`].
pub type BoxError = Box<dyn StdError + Send + Sync>;

enum Active<B> {
    Idle,
    Stream(B),
    File(FileBytesStream),
}

/// Hyper Body implementation sending the segments of a [`Brigade`] in order.
///
/// Handler bodies are forwarded frame by frame, files are read in chunks. Nothing after an
/// end of stream marker is sent.
pub struct Body<B> {
    segments: VecDeque<Segment<B>>,
    active: Active<B>,
}

impl<B> Body<B> {
    /// A body without any content.
    pub fn empty() -> Self {
        Self {
            segments: VecDeque::new(),
            active: Active::Idle,
        }
    }
}

impl<B> From<Brigade<B>> for Body<B> {
    fn from(brigade: Brigade<B>) -> Self {
        Self {
            segments: brigade.into_iter().collect(),
            active: Active::Idle,
        }
    }
}

impl<B> std::fmt::Debug for Body<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("segments", &self.segments)
            .finish_non_exhaustive()
    }
}

impl<B> HttpBody for Body<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        loop {
            match this.active {
                Active::Idle => match this.segments.pop_front() {
                    None | Some(Segment::Eos) => {
                        this.segments.clear();
                        return Poll::Ready(None);
                    }
                    Some(Segment::Data(bytes)) if bytes.is_empty() => {}
                    Some(Segment::Data(bytes)) => return Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Some(Segment::Stream(body)) => this.active = Active::Stream(body),
                    Some(Segment::File(file)) => {
                        this.active = Active::File(FileBytesStream::new(
                            file.file,
                            file.offset,
                            file.length,
                        ))
                    }
                },
                Active::Stream(ref mut body) => match ready!(Pin::new(body).poll_frame(cx)) {
                    Some(res) => return Poll::Ready(Some(res.map_err(Into::into))),
                    None => this.active = Active::Idle,
                },
                Active::File(ref mut stream) => match ready!(Pin::new(stream).poll_next(cx)) {
                    Some(res) => {
                        return Poll::Ready(Some(res.map(Frame::data).map_err(Into::into)))
                    }
                    None => this.active = Active::Idle,
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.active {
            Active::Idle => matches!(self.segments.front(), None | Some(Segment::Eos)),
            Active::Stream(ref body) => body.is_end_stream() && self.segments.is_empty(),
            Active::File(ref stream) => {
                stream.remaining() == 0
                    && matches!(self.segments.front(), None | Some(Segment::Eos))
            }
        }
    }

    fn size_hint(&self) -> SizeHint {
        let active = match self.active {
            Active::Idle => SizeHint::with_exact(0),
            Active::File(ref stream) => SizeHint::with_exact(stream.remaining()),
            Active::Stream(ref body) => body.size_hint(),
        };
        self.segments
            .iter()
            .take_while(|segment| !matches!(segment, Segment::Eos))
            .map(|segment| match segment {
                Segment::Stream(body) => body.size_hint(),
                segment => SizeHint::with_exact(segment.content_length().unwrap_or(0)),
            })
            .fold(active, add_hints)
    }
}

fn add_hints(total: SizeHint, next: SizeHint) -> SizeHint {
    let mut hint = SizeHint::new();
    hint.set_lower(total.lower().saturating_add(next.lower()));
    if let (Some(a), Some(b)) = (total.upper(), next.upper()) {
        hint.set_upper(a.saturating_add(b));
    }
    hint
}
