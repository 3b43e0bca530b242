//! # WireBatch
//!
//! A **batch-request protocol engine**: one HTTP request carrying several
//! sub-requests, encoded either as `multipart/mixed` (one raw HTTP message per
//! part) or as a JSON `{"requests": [...]}` envelope, is decomposed into
//! [`RequestDescriptor`]s, dispatched strictly in order through a caller
//! supplied [`Dispatcher`], and reassembled into a single response in the
//! same encoding.
//!
//! Sub-requests may refer to resources created earlier in the same batch
//! (`/items/$1`), and `Prefer: continue-on-error` decides whether one failure
//! stops the rest.
//!
//! ## Quick start — decoding one raw sub-request
//!
//! ```rust
//! use wirebatch::decode_request;
//!
//! let raw = b"GET /items/1?fields=name HTTP/1.1\r\nAccept: application/json\r\n\r\n";
//! let request = decode_request(raw).expect("valid request");
//! assert_eq!(request.method.as_str(), "GET");
//! assert_eq!(request.path_info, "/items/1");
//! assert_eq!(request.query.get("fields"), Some("name"));
//! ```
//!
//! ## Quick start — running a batch
//!
//! ```rust
//! use wirebatch::{BatchEngine, BatchRequest, DispatchError, RequestDescriptor, SubResponse};
//!
//! let dispatcher = |req: &RequestDescriptor, _catch: bool| -> Result<SubResponse, DispatchError> {
//!     Ok(SubResponse::new(200).with_body(req.path_info.clone()))
//! };
//! let mut engine = BatchEngine::new(dispatcher);
//!
//! let body = "--b\r\nGET /items/1 HTTP/1.1\r\n\r\n\r\n--b--\r\n";
//! let request =
//!     BatchRequest::new(body).with_header("Content-Type", "multipart/mixed; boundary=b");
//! let response = engine.process(request).unwrap();
//! assert_eq!(response.status, 200);
//!
//! let body = String::from_utf8(response.into_bytes().unwrap()).unwrap();
//! assert!(body.contains("HTTP/1.1 200 OK\r\n\r\n/items/1"));
//! ```

mod engine;
mod error;
mod headers;
mod json;
mod media_type;
mod multipart;
mod output;
mod parser;
mod query;
mod response;
mod types;

// Re-export public API.
pub use engine::{
    BatchEngine, BatchRequest, BatchResponse, Dispatcher, EngineConfig, MultipartStream,
    PreferenceSet, ResponseBody, decompose,
};
pub use error::{BatchError, DispatchError};
pub use headers::{NormalizedHeaders, canonical_name};
pub use json::{
    BatchDecoder, JsonBatchRequest, JsonPartsExtractor, JsonRequestEntry, SerdeJsonDecoder,
};
pub use media_type::{
    ContentTypeParameter, MediaType, MediaTypeHeader, is_json_content_type, is_known_media_type,
};
pub use multipart::{PartStream, PartsExtractor, decode_body};
pub use output::{format_debug, format_headers_only, format_json, format_response};
pub use parser::{DecoderState, Parser, ParserConfig};
pub use query::{parse_form, parse_query};
pub use response::{
    BatchFormat, JsonBatchResponse, JsonResponsePart, ResponsePart, SubResponse, assemble,
    generate_boundary, reason_phrase,
};
pub use types::{
    HTTP_CONTENT_ID, Header, HttpMethod, HttpVersion, PATH_INFO, ParamMap, QUERY_STRING,
    REQUEST_METHOD, REQUEST_URI, RequestDescriptor, SERVER_PROTOCOL,
};

/// Decode a **complete** raw HTTP request from a byte slice in one call.
///
/// This is a convenience wrapper around [`Parser`]. For incremental /
/// streaming use-cases, create a `Parser` directly.
///
/// # Errors
///
/// Returns [`BatchError`] if the data is malformed.
pub fn decode_request(data: &[u8]) -> Result<RequestDescriptor, BatchError> {
    Parser::new().decode(data)
}

/// Decode a **complete** raw HTTP request using custom [`ParserConfig`] limits.
///
/// # Errors
///
/// Returns [`BatchError`] if the data is malformed or exceeds the configured
/// limits.
pub fn decode_request_with_config(
    data: &[u8],
    config: ParserConfig,
) -> Result<RequestDescriptor, BatchError> {
    Parser::with_config(config).decode(data)
}

/// Decompose a batch body into its sub-requests given the outer
/// `Content-Type`, without dispatching anything.
///
/// # Errors
///
/// Returns [`BatchError`] for invalid headers, undecodable parts or invalid
/// JSON entries.
pub fn extract_descriptors(
    content_type: &str,
    body: &[u8],
) -> Result<Vec<RequestDescriptor>, BatchError> {
    let request = BatchRequest::new(body).with_header("Content-Type", content_type);
    decompose(&request, &EngineConfig::default())
}
