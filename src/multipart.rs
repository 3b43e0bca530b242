//! Multipart boundary extraction.
//!
//! Splits a `multipart/mixed` body into one byte stream per part:
//!
//! ```text
//! preamble (ignored)\r\n
//! --boundary\r\n
//! GET /items/1 HTTP/1.1\r\n
//! \r\n
//! \r\n
//! --boundary--\r\n
//! ```
//!
//! The source is scanned line by line and only the offsets of marker lines
//! are recorded. A part is copied out once its closing marker is found, by
//! seeking back to its start, so the whole body is never held at once.

use std::io::{BufRead, Cursor, Read, Seek, SeekFrom};

use crate::error::BatchError;
use crate::media_type::MediaType;

// ---------------------------------------------------------------------------
// PartStream
// ---------------------------------------------------------------------------

/// One part of a multipart body, owned by its consumer and positioned at its
/// first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartStream {
    inner: Cursor<Vec<u8>>,
}

impl PartStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.get_ref()
    }

    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for PartStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for PartStream {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

impl Seek for PartStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

// ---------------------------------------------------------------------------
// PartsExtractor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first marker line.
    Preamble,
    /// Inside a part starting at the given offset.
    InPart(u64),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Delimiter,
    Close,
}

/// Lazy, forward-only sequence of the parts of a multipart body.
///
/// Without a boundary the whole remaining stream is yielded as a single part.
/// The sequence is finite and cannot be restarted; an error ends it.
pub struct PartsExtractor<R> {
    reader: R,
    marker: Option<Vec<u8>>,
    state: State,
    line: Vec<u8>,
}

impl<R: BufRead + Seek> PartsExtractor<R> {
    /// Extract parts delimited by `--boundary` lines.
    pub fn new(reader: R, boundary: Option<&str>) -> Self {
        Self {
            reader,
            marker: boundary.map(|b| format!("--{b}").into_bytes()),
            state: State::Preamble,
            line: Vec::with_capacity(128),
        }
    }

    /// Extract parts using the `boundary` parameter of `media_type`.
    pub fn from_media_type(reader: R, media_type: &MediaType) -> Self {
        Self::new(reader, media_type.boundary())
    }

    fn advance(&mut self) -> Result<Option<PartStream>, BatchError> {
        let Some(marker) = self.marker.as_deref() else {
            let mut whole = Vec::new();
            self.reader.read_to_end(&mut whole)?;
            self.state = State::Done;
            return Ok(Some(PartStream::new(whole)));
        };

        loop {
            let line_start = self.reader.stream_position()?;
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return match self.state {
                    State::InPart(_) => Err(BatchError::MalformedRequest(
                        "multipart body ended before its closing delimiter".into(),
                    )),
                    _ => Ok(None),
                };
            }

            let Some(kind) = classify(&self.line, marker) else {
                continue;
            };
            let after_line = self.reader.stream_position()?;

            match (self.state, kind) {
                (State::Preamble, Marker::Delimiter) => {
                    tracing::trace!(offset = after_line, "multipart body started");
                    self.state = State::InPart(after_line);
                }
                (State::Preamble, Marker::Close) => return Ok(None),
                (State::InPart(start), kind) => {
                    let part = copy_range(&mut self.reader, start, line_start)?;
                    self.reader.seek(SeekFrom::Start(after_line))?;
                    tracing::trace!(
                        start,
                        end = line_start,
                        len = part.len(),
                        "multipart part closed"
                    );

                    self.state = match kind {
                        Marker::Delimiter => State::InPart(after_line),
                        Marker::Close => State::Done,
                    };
                    return Ok(Some(part));
                }
                (State::Done, _) => return Ok(None),
            }
        }
    }
}

impl<R: BufRead + Seek> Iterator for PartsExtractor<R> {
    type Item = Result<PartStream, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        match self.advance() {
            Ok(Some(part)) => Some(Ok(part)),
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

/// Copy `[start, end)` of `reader`, minus the line break owned by the
/// closing delimiter.
fn copy_range<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
) -> Result<PartStream, BatchError> {
    let len = usize::try_from(end.saturating_sub(start)).map_err(|_| {
        BatchError::MalformedRequest("multipart part exceeds addressable size".into())
    })?;
    reader.seek(SeekFrom::Start(start))?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;

    if bytes.ends_with(b"\r\n") {
        bytes.truncate(bytes.len() - 2);
    } else if bytes.ends_with(b"\n") {
        bytes.truncate(bytes.len() - 1);
    }
    Ok(PartStream::new(bytes))
}

/// Classify a raw line (line break included) as a marker, if it is one.
///
/// Trailing whitespace after the marker is tolerated (RFC 2046 transport
/// padding); anything else makes the line ordinary content.
fn classify(line: &[u8], marker: &[u8]) -> Option<Marker> {
    let rest = line.strip_prefix(marker)?;
    let (rest, kind) = match rest.strip_prefix(b"--") {
        Some(rest) => (rest, Marker::Close),
        None => (rest, Marker::Delimiter),
    };
    rest.iter()
        .all(|b| b.is_ascii_whitespace())
        .then_some(kind)
}

/// Open a multipart body for extraction given its `Content-Type` value.
///
/// This is the body-decoding boundary: header problems surface as
/// [`BatchError::Unprocessable`] here rather than as `MalformedHeader`.
pub fn decode_body(
    content_type: &str,
    body: Vec<u8>,
) -> Result<PartsExtractor<Cursor<Vec<u8>>>, BatchError> {
    let media_type = MediaType::parse(content_type).map_err(into_unprocessable)?;
    Ok(PartsExtractor::from_media_type(Cursor::new(body), &media_type))
}

pub(crate) fn into_unprocessable(error: BatchError) -> BatchError {
    match error {
        BatchError::MalformedHeader(msg) => BatchError::Unprocessable(msg),
        other => other,
    }
}
