use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BatchError;
use crate::media_type::is_json_content_type;
use crate::types::{Header, find_header};

// ---------------------------------------------------------------------------
// SubResponse
// ---------------------------------------------------------------------------

/// The response a dispatcher produced for one sub-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResponse {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    /// Identifier of a resource the sub-request created (e.g. `/items/42`).
    pub created_resource: Option<String>,
}

impl SubResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            created_resource: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_created_resource(mut self, identifier: impl Into<String>) -> Self {
        self.created_resource = Some(identifier.into());
        self
    }

    /// A `text/plain` error response for a sub-request that never produced one.
    pub fn from_error(error: &BatchError) -> Self {
        Self::new(error.status_code())
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(error.to_string())
    }

    /// `true` for statuses below 400.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Serialize as a full HTTP/1.1 response message.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.headers.len() * 32 + self.body.len());
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes(),
        );
        for header in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", header.name, header.value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Canonical reason phrase for a status code (empty when unknown).
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        410 => "Gone",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Content",
        424 => "Failed Dependency",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// JSON response envelope
// ---------------------------------------------------------------------------

/// One entry of a JSON batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonResponsePart {
    pub id: String,
    pub status: u16,
    /// Lower-cased names; the first value of a repeated header wins.
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl JsonResponsePart {
    pub fn from_response(id: impl Into<String>, response: &SubResponse) -> Self {
        let mut headers = BTreeMap::new();
        for header in &response.headers {
            headers
                .entry(header.name.to_ascii_lowercase())
                .or_insert_with(|| header.value.clone());
        }

        Self {
            id: id.into(),
            status: response.status,
            body: json_body(response),
            headers,
        }
    }
}

fn json_body(response: &SubResponse) -> Option<Value> {
    let text = String::from_utf8_lossy(&response.body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if response.header("Content-Type").is_some_and(is_json_content_type) {
        if let Ok(value) = serde_json::from_str(text) {
            return Some(value);
        }
    }
    Some(Value::String(text.to_string()))
}

/// The `{"responses": [...]}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonBatchResponse {
    pub responses: Vec<JsonResponsePart>,
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Wire format of an assembled batch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    Multipart,
    Json,
}

/// A collected response and its correlation id (JSON batches only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePart {
    pub id: Option<String>,
    pub response: SubResponse,
}

/// Generate a boundary token: 6 random bytes, URL-safe base64 (8 characters).
pub fn generate_boundary() -> String {
    let bytes: [u8; 6] = rand::random();
    URL_SAFE.encode(bytes)
}

/// The opening delimiter and serialized response of one multipart part.
pub fn multipart_part(boundary: &str, response: &SubResponse) -> Vec<u8> {
    let wire = response.to_wire();
    let mut out = Vec::with_capacity(boundary.len() + wire.len() + 6);
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&wire);
    out.extend_from_slice(b"\r\n");
    out
}

/// The closing delimiter of a multipart body.
pub fn multipart_close(boundary: &str) -> Vec<u8> {
    format!("--{boundary}--\r\n").into_bytes()
}

/// Pack collected responses into a multipart/mixed or JSON batch body.
///
/// `boundary` is only used for [`BatchFormat::Multipart`].
pub fn assemble(
    parts: &[ResponsePart],
    format: BatchFormat,
    boundary: &str,
) -> Result<Vec<u8>, BatchError> {
    match format {
        BatchFormat::Multipart => {
            let mut out = Vec::new();
            for part in parts {
                out.extend_from_slice(&multipart_part(boundary, &part.response));
            }
            out.extend_from_slice(&multipart_close(boundary));
            Ok(out)
        }
        BatchFormat::Json => {
            let envelope = JsonBatchResponse {
                responses: parts
                    .iter()
                    .map(|p| {
                        let id = p.id.clone().unwrap_or_default();
                        JsonResponsePart::from_response(id, &p.response)
                    })
                    .collect(),
            };
            Ok(serde_json::to_vec(&envelope)?)
        }
    }
}
