use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::BatchError;
use crate::headers::{NormalizedHeaders, canonical_name};
use crate::query;

// ---------------------------------------------------------------------------
// HttpMethod
// ---------------------------------------------------------------------------

/// Request methods a batch part may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    PATCH,
    DELETE,
    PURGE,
    OPTIONS,
    TRACE,
    CONNECT,
}

impl HttpMethod {
    /// Parse an HTTP method from a byte slice (exact, upper-case match).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BatchError> {
        match bytes {
            b"GET" => Ok(Self::GET),
            b"HEAD" => Ok(Self::HEAD),
            b"POST" => Ok(Self::POST),
            b"PUT" => Ok(Self::PUT),
            b"PATCH" => Ok(Self::PATCH),
            b"DELETE" => Ok(Self::DELETE),
            b"PURGE" => Ok(Self::PURGE),
            b"OPTIONS" => Ok(Self::OPTIONS),
            b"TRACE" => Ok(Self::TRACE),
            b"CONNECT" => Ok(Self::CONNECT),
            _ => Err(BatchError::MalformedRequest(format!(
                "invalid HTTP method: '{}'",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    /// Parse a method ignoring ASCII case (JSON batch entries use `get`, `post`, …).
    pub fn from_str_ignore_case(s: &str) -> Result<Self, BatchError> {
        Self::from_bytes(s.trim().to_ascii_uppercase().as_bytes())
    }

    /// Return the method as a static string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::HEAD => "HEAD",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::PATCH => "PATCH",
            Self::DELETE => "DELETE",
            Self::PURGE => "PURGE",
            Self::OPTIONS => "OPTIONS",
            Self::TRACE => "TRACE",
            Self::CONNECT => "CONNECT",
        }
    }

    /// Methods whose url-encoded bodies are decoded into form parameters.
    pub fn accepts_form_body(&self) -> bool {
        matches!(self, Self::POST | Self::PUT)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HttpVersion
// ---------------------------------------------------------------------------

/// HTTP protocol version named on a request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
    /// HTTP/2
    Http2,
}

impl HttpVersion {
    /// Parse an HTTP version from a byte slice (e.g. `b"HTTP/1.1"`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BatchError> {
        match bytes {
            b"HTTP/1.0" => Ok(Self::Http10),
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/2" | b"HTTP/2.0" => Ok(Self::Http2),
            _ => Err(BatchError::MalformedRequest(format!(
                "invalid HTTP version: '{}'",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    /// Return the version as a static string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HttpVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// A single HTTP header field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Header field name (original casing preserved).
    pub name: String,
    /// Header field value (leading/trailing OWS trimmed).
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Look up the first header value by name (case-insensitive).
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

// ---------------------------------------------------------------------------
// ParamMap
// ---------------------------------------------------------------------------

/// Insertion-ordered string map; re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, String)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for ParamMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// RequestDescriptor
// ---------------------------------------------------------------------------

/// Server variable holding the request method.
pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
/// Server variable holding the raw request target.
pub const REQUEST_URI: &str = "REQUEST_URI";
/// Server variable holding the path component of the request target.
pub const PATH_INFO: &str = "PATH_INFO";
/// Server variable holding the raw query string.
pub const QUERY_STRING: &str = "QUERY_STRING";
/// Server variable holding the protocol version.
pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
/// Server variable correlating a part with its response.
pub const HTTP_CONTENT_ID: &str = "HTTP_CONTENT_ID";

/// One decomposed sub-request, ready for dispatch.
///
/// Created by an extractor in a single pass over its input; the batch engine
/// only rewrites the request target (entity references) before dispatching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    /// Raw request target, query string included.
    pub uri: String,
    /// Path component of `uri`.
    pub path_info: String,
    pub version: HttpVersion,
    pub query: ParamMap,
    /// Populated only for `POST`/`PUT` url-encoded bodies.
    pub form: ParamMap,
    /// Canonicalized header and request variables (`HTTP_ACCEPT`, `CONTENT_TYPE`, …).
    pub server: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Vec<u8>,
    /// Correlation id (JSON batches only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Ids of earlier entries that must have succeeded (JSON batches only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Always `true` for descriptors produced by an extractor.
    pub sub_request: bool,
}

/// Serialize body bytes as a UTF-8 string (lossy) for JSON output.
fn serialize_body<S: Serializer>(body: &[u8], s: S) -> Result<S::Ok, S::Error> {
    if body.is_empty() {
        s.serialize_none()
    } else {
        s.serialize_str(&String::from_utf8_lossy(body))
    }
}

impl RequestDescriptor {
    /// Build a descriptor from a request line, normalized headers and a body.
    ///
    /// Seeds the request variables, splits the query string off `uri` and,
    /// for `POST`/`PUT` url-encoded bodies, decodes the form parameters.
    pub fn from_parts(
        method: HttpMethod,
        uri: String,
        version: HttpVersion,
        headers: NormalizedHeaders,
        body: Vec<u8>,
    ) -> Self {
        let (path_info, query_string) = match uri.split_once('?') {
            Some((path, qs)) => (path.to_string(), Some(qs.to_string())),
            None => (uri.clone(), None),
        };

        let NormalizedHeaders {
            mut server,
            cookies,
        } = headers;
        server.insert(REQUEST_METHOD.into(), method.as_str().into());
        server.insert(REQUEST_URI.into(), uri.clone());
        server.insert(SERVER_PROTOCOL.into(), version.as_str().into());
        server.insert(PATH_INFO.into(), path_info.clone());

        let query = match &query_string {
            Some(qs) => {
                server.insert(QUERY_STRING.into(), qs.clone());
                query::parse_query(qs)
            }
            None => ParamMap::new(),
        };

        let is_form = server
            .get("CONTENT_TYPE")
            .or_else(|| server.get("HTTP_CONTENT_TYPE"))
            .is_some_and(|ct| {
                ct.to_ascii_lowercase()
                    .contains("application/x-www-form-urlencoded")
            });
        let form = if method.accepts_form_body() && is_form && !body.is_empty() {
            query::parse_form(&String::from_utf8_lossy(&body))
        } else {
            ParamMap::new()
        };

        Self {
            method,
            uri,
            path_info,
            version,
            query,
            form,
            server,
            cookies,
            body,
            id: None,
            depends_on: Vec::new(),
            sub_request: true,
        }
    }

    /// Look up a request header by its wire name (`Content-Type`, `accept`, …).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.server
            .get(&format!("HTTP_{}", canonical_name(name)))
            .map(String::as_str)
    }

    /// The normalized `Content-Type`, prefixed or not.
    pub fn content_type(&self) -> Option<&str> {
        self.server
            .get("CONTENT_TYPE")
            .or_else(|| self.server.get("HTTP_CONTENT_TYPE"))
            .map(String::as_str)
    }

    /// The `Content-ID` correlating this part with its response.
    pub fn content_id(&self) -> Option<&str> {
        self.server.get(HTTP_CONTENT_ID).map(String::as_str)
    }

    /// Return the body as a UTF-8 `&str` if it is valid UTF-8.
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Rewrite `uri` with `f`, then re-derive `path_info`, the query string
    /// and `query` from the new target.
    pub(crate) fn rewrite_target(&mut self, f: impl FnOnce(&str) -> String) {
        self.uri = f(&self.uri);
        let (path_info, query_string) = match self.uri.split_once('?') {
            Some((path, qs)) => (path.to_string(), Some(qs.to_string())),
            None => (self.uri.clone(), None),
        };
        self.path_info = path_info;
        self.server.insert(REQUEST_URI.into(), self.uri.clone());
        self.server.insert(PATH_INFO.into(), self.path_info.clone());
        match query_string {
            Some(qs) => {
                self.query = query::parse_query(&qs);
                self.server.insert(QUERY_STRING.into(), qs);
            }
            None => {
                self.query = ParamMap::new();
                self.server.remove(QUERY_STRING);
            }
        }
    }
}
