use std::io::{ErrorKind, Read};

use crate::error::BatchError;
use crate::headers::NormalizedHeaders;
use crate::types::{Header, HttpMethod, HttpVersion, RequestDescriptor};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configurable limits for the raw request decoder.
///
/// All sizes are in bytes unless stated otherwise.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Maximum length of the start line or of a header line (default: 8 192).
    pub max_line_len: usize,
    /// Maximum number of header fields (default: 128).
    pub max_headers_count: usize,
    /// Maximum body size (default: 10 MiB).
    pub max_body_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_line_len: 8_192,
            max_headers_count: 128,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder state
// ---------------------------------------------------------------------------

/// Where the decoder is within the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Nothing but (optionally) a partial line seen so far.
    AwaitingStartLine,
    /// Start line recorded; header lines accumulate until an empty line.
    AwaitingHeadersOrBody,
    /// Headers normalized; every further byte belongs to the body.
    InBody,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// An incremental, line-oriented decoder for one raw HTTP request message.
///
/// Lines end with LF; a CR preceding the LF is stripped, so both CRLF and
/// bare LF framing are accepted. The body runs until the end of input.
///
/// # Usage
///
/// ```rust
/// use wirebatch::{DecoderState, Parser};
///
/// let mut parser = Parser::new();
///
/// let state = parser.feed(b"GET /items?page=2 HTTP/1.1\r\n").unwrap();
/// assert_eq!(state, DecoderState::AwaitingHeadersOrBody);
///
/// let state = parser.feed(b"Accept: application/json\r\n\r\n").unwrap();
/// assert_eq!(state, DecoderState::InBody);
///
/// let request = parser.finish().unwrap();
/// assert_eq!(request.path_info, "/items");
/// assert_eq!(request.query.get("page"), Some("2"));
/// ```
pub struct Parser {
    state: DecoderState,
    config: ParserConfig,
    bytes_consumed: usize,

    line_buf: Vec<u8>,
    pending_headers: Vec<Header>,
    body_buf: Vec<u8>,

    method: Option<HttpMethod>,
    uri: Option<String>,
    version: Option<HttpVersion>,
    headers: NormalizedHeaders,
}

impl Parser {
    /// Create a new parser with default configuration.
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Create a new parser with custom limits.
    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            state: DecoderState::AwaitingStartLine,
            config,
            bytes_consumed: 0,
            line_buf: Vec::with_capacity(256),
            pending_headers: Vec::new(),
            body_buf: Vec::new(),
            method: None,
            uri: None,
            version: None,
            headers: NormalizedHeaders::new(),
        }
    }

    /// Reset the parser so it can be reused for another request.
    pub fn reset(&mut self) {
        self.state = DecoderState::AwaitingStartLine;
        self.bytes_consumed = 0;
        self.line_buf.clear();
        self.pending_headers.clear();
        self.body_buf.clear();
        self.method = None;
        self.uri = None;
        self.version = None;
        self.headers = NormalizedHeaders::new();
    }

    /// Feed a slice of bytes into the parser.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::MalformedRequest`] on a grammar violation, or the
    /// matching limit error when a [`ParserConfig`] limit is exceeded.
    pub fn feed(&mut self, data: &[u8]) -> Result<DecoderState, BatchError> {
        let mut i = 0;

        while i < data.len() {
            // Bulk-copy path once the body has started.
            if self.state == DecoderState::InBody {
                let rest = &data[i..];
                if self.body_buf.len() + rest.len() > self.config.max_body_size {
                    return Err(BatchError::BodyTooLarge);
                }
                self.body_buf.extend_from_slice(rest);
                self.bytes_consumed += rest.len();
                break;
            }

            match data[i..].iter().position(|&b| b == b'\n') {
                Some(offset) => {
                    self.push_line_bytes(&data[i..i + offset])?;
                    self.bytes_consumed += offset + 1;
                    i += offset + 1;

                    let mut line = std::mem::take(&mut self.line_buf);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    self.process_line(&line)?;
                    line.clear();
                    self.line_buf = line;
                }
                None => {
                    self.push_line_bytes(&data[i..])?;
                    self.bytes_consumed += data.len() - i;
                    i = data.len();
                }
            }
        }

        Ok(self.state)
    }

    /// Feed every byte of `reader` into the parser and finish.
    ///
    /// # Errors
    ///
    /// [`BatchError::StreamResource`] when reading fails, plus everything
    /// [`Parser::feed`] and [`Parser::finish`] return.
    pub fn decode<R: Read>(mut self, mut reader: R) -> Result<RequestDescriptor, BatchError> {
        let mut chunk = [0u8; 8 * 1024];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.feed(&chunk[..n])?;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BatchError::StreamResource(e)),
            }
        }
        self.finish()
    }

    // ----- helpers --------------------------------------------------------

    fn push_line_bytes(&mut self, bytes: &[u8]) -> Result<(), BatchError> {
        if self.line_buf.len() + bytes.len() > self.config.max_line_len {
            return Err(BatchError::LineTooLong);
        }
        self.line_buf.extend_from_slice(bytes);
        Ok(())
    }

    fn process_line(&mut self, line: &[u8]) -> Result<(), BatchError> {
        match self.state {
            DecoderState::AwaitingStartLine => {
                if line.is_empty() {
                    return Err(BatchError::MalformedRequest(
                        "empty line before the start line".into(),
                    ));
                }
                self.parse_start_line(line)?;
                self.state = DecoderState::AwaitingHeadersOrBody;
            }
            DecoderState::AwaitingHeadersOrBody => {
                if line.is_empty() {
                    self.normalize_headers()?;
                    self.state = DecoderState::InBody;
                } else {
                    if self.pending_headers.len() >= self.config.max_headers_count {
                        return Err(BatchError::TooManyHeaders);
                    }
                    let header = parse_header_line(line)?;
                    self.pending_headers.push(header);
                }
            }
            DecoderState::InBody => unreachable!("body bytes take the bulk-copy path"),
        }
        Ok(())
    }

    /// `METHOD SP request-target SP HTTP-version`
    fn parse_start_line(&mut self, line: &[u8]) -> Result<(), BatchError> {
        let mut parts = line.split(|&b| b == b' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(BatchError::MalformedRequest(format!(
                "not a request line: '{}'",
                String::from_utf8_lossy(line)
            )));
        };

        if !method.iter().all(|&b| is_tchar(b)) {
            return Err(BatchError::MalformedRequest(
                "invalid character in request method".into(),
            ));
        }
        let method = HttpMethod::from_bytes(method)?;

        if target.is_empty() {
            return Err(BatchError::MalformedRequest("empty URI".into()));
        }
        if let Some(&found) = target.iter().find(|&&b| b <= b' ' || b == 0x7F) {
            return Err(BatchError::MalformedRequest(format!(
                "unexpected byte 0x{found:02X} in request URI"
            )));
        }

        self.method = Some(method);
        self.uri = Some(String::from_utf8_lossy(target).into_owned());
        self.version = Some(HttpVersion::from_bytes(version)?);
        Ok(())
    }

    /// Run the header normalizer once over every buffered header.
    fn normalize_headers(&mut self) -> Result<(), BatchError> {
        for header in &self.pending_headers {
            self.headers.apply(&header.name, &header.value)?;
        }
        Ok(())
    }

    // ----- public query / finalization ------------------------------------

    /// Consume the parser and return the decoded [`RequestDescriptor`].
    ///
    /// A start line followed by headers but no empty line is finalized with
    /// an empty body.
    ///
    /// # Errors
    ///
    /// - [`BatchError::MalformedRequest`] if no start line was found.
    /// - [`BatchError::MissingExpectedHeader`] for a `POST`/`PUT` carrying a
    ///   body but no `Content-Type`.
    pub fn finish(mut self) -> Result<RequestDescriptor, BatchError> {
        if self.state != DecoderState::InBody && !self.line_buf.is_empty() {
            let mut line = std::mem::take(&mut self.line_buf);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line)?;
        }

        match self.state {
            DecoderState::AwaitingStartLine => {
                return Err(BatchError::MalformedRequest("no start line found".into()));
            }
            DecoderState::AwaitingHeadersOrBody => self.normalize_headers()?,
            DecoderState::InBody => {}
        }

        let (Some(method), Some(uri), Some(version)) = (self.method, self.uri, self.version)
        else {
            return Err(BatchError::MalformedRequest("no start line found".into()));
        };

        if !self.body_buf.is_empty()
            && method.accepts_form_body()
            && !self.headers.server.contains_key("CONTENT_TYPE")
            && !self.headers.server.contains_key("HTTP_CONTENT_TYPE")
        {
            return Err(BatchError::MissingExpectedHeader(format!(
                "the Content-Type header is missing on a {method} request with a body"
            )));
        }

        Ok(RequestDescriptor::from_parts(
            method,
            uri,
            version,
            self.headers,
            self.body_buf,
        ))
    }

    /// Current decoder state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Total number of bytes consumed across all `feed` calls.
    pub fn bytes_consumed(&self) -> usize {
        self.bytes_consumed
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// `field-name ":" OWS field-value OWS`
fn parse_header_line(line: &[u8]) -> Result<Header, BatchError> {
    let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
        BatchError::MalformedRequest(format!(
            "not a header line: '{}'",
            String::from_utf8_lossy(line)
        ))
    })?;
    let (name, value) = (&line[..colon], &line[colon + 1..]);

    if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
        return Err(BatchError::MalformedRequest(format!(
            "invalid header name: '{}'",
            String::from_utf8_lossy(name)
        )));
    }
    if let Some(&found) = value.iter().find(|&&b| !is_field_content_byte(b)) {
        return Err(BatchError::MalformedRequest(format!(
            "unexpected byte 0x{found:02X} in header value"
        )));
    }

    Ok(Header {
        name: String::from_utf8_lossy(name).into_owned(),
        value: String::from_utf8_lossy(value).trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Character classification helpers (RFC 9110 / RFC 9112)
// ---------------------------------------------------------------------------

/// `tchar` – characters allowed in HTTP tokens (method, header names).
///
/// ```text
/// tchar = "!" / "#" / "$" / "%" / "&" / "'" / "*" / "+" / "-" / "." /
///         "^" / "_" / "`" / "|" / "~" / DIGIT / ALPHA
/// ```
#[inline]
fn is_tchar(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~'
            | b'0'..=b'9'
            | b'a'..=b'z'
            | b'A'..=b'Z'
    )
}

/// Bytes permitted inside a header field value:
/// `SP / HTAB / VCHAR / obs-text`.
#[inline]
fn is_field_content_byte(b: u8) -> bool {
    b == b' ' || b == b'\t' || (0x21..=0x7E).contains(&b) || b >= 0x80
}

// ---------------------------------------------------------------------------
// Tests (unit)
// ---------------------------------------------------------------------------
