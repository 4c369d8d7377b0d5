//! Output pipeline: an ordered queue of body segments.
//!
//! A response body starts out as a single [`Segment::Stream`] holding whatever the handler
//! produced. Filters may drop segments, append data or files, and mark the end of the stream.
//! [`crate::Body`] turns the result into a `hyper` body.

use hyper::body::Bytes;
use std::collections::vec_deque::{IntoIter, Iter};
use std::collections::VecDeque;
use std::fmt;
use tokio::fs::File;

/// A file, or a portion of it, to be transmitted as part of the body.
///
/// The segment owns the file handle. It is closed once the segment has been transmitted or
/// dropped.
#[derive(Debug)]
pub struct FileSegment {
    /// Open file handle.
    pub file: File,
    /// Offset of the first byte to send.
    pub offset: u64,
    /// Number of bytes to send.
    pub length: u64,
    /// The file may be handed to the kernel for sending.
    pub sendfile: bool,
    /// The file may be memory-mapped for sending.
    pub mmap: bool,
}

/// One element of the output pipeline.
pub enum Segment<B> {
    /// In-memory data.
    Data(Bytes),
    /// A body stream that hasn't been consumed yet.
    Stream(B),
    /// File contents.
    File(FileSegment),
    /// End of the response body. Anything after it is never sent.
    Eos,
}

impl<B> Segment<B> {
    /// Exact number of bytes this segment produces, if known.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Segment::Data(bytes) => Some(bytes.len() as u64),
            Segment::File(file) => Some(file.length),
            Segment::Eos => Some(0),
            Segment::Stream(_) => None,
        }
    }
}

impl<B> fmt::Debug for Segment<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Data(bytes) => f.debug_tuple("Data").field(&bytes.len()).finish(),
            Segment::Stream(_) => f.write_str("Stream"),
            Segment::File(file) => f.debug_tuple("File").field(file).finish(),
            Segment::Eos => f.write_str("Eos"),
        }
    }
}

/// Ordered queue of body segments.
pub struct Brigade<B> {
    segments: VecDeque<Segment<B>>,
}

impl<B> Brigade<B> {
    /// Creates an empty brigade.
    pub fn new() -> Self {
        Self {
            segments: VecDeque::new(),
        }
    }

    /// Creates a brigade holding a handler's unread body.
    pub fn from_stream(body: B) -> Self {
        let mut brigade = Self::new();
        brigade.push_back(Segment::Stream(body));
        brigade
    }

    /// Appends a segment.
    pub fn push_back(&mut self, segment: Segment<B>) {
        self.segments.push_back(segment);
    }

    /// Removes the first segment.
    pub fn pop_front(&mut self) -> Option<Segment<B>> {
        self.segments.pop_front()
    }

    /// Drops all segments. File handles and unread streams are closed.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Whether there are no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Iterates over the segments in order.
    pub fn iter(&self) -> Iter<'_, Segment<B>> {
        self.segments.iter()
    }

    /// Exact body length up to the end of stream marker, if every segment's length is known.
    pub fn content_length(&self) -> Option<u64> {
        let mut total = 0;
        for segment in &self.segments {
            if let Segment::Eos = segment {
                break;
            }
            total += segment.content_length()?;
        }
        Some(total)
    }
}

impl<B> Default for Brigade<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> fmt::Debug for Brigade<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.segments.iter()).finish()
    }
}

impl<B> IntoIterator for Brigade<B> {
    type Item = Segment<B>;
    type IntoIter = IntoIter<Segment<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

impl<'a, B> IntoIterator for &'a Brigade<B> {
    type Item = &'a Segment<B>;
    type IntoIter = Iter<'a, Segment<B>>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}
