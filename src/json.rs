//! JSON batch format.
//!
//! ```json
//! {"requests": [
//!   {"id": "1", "method": "POST", "url": "/items", "body": {"name": "a"}},
//!   {"id": "2", "method": "GET", "url": "/items/$1", "dependsOn": ["1"]}
//! ]}
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::BatchError;
use crate::headers::NormalizedHeaders;
use crate::types::{HTTP_CONTENT_ID, HttpMethod, HttpVersion, RequestDescriptor};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The decoded `{"requests": [...]}` envelope.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonBatchRequest {
    pub requests: Vec<JsonRequestEntry>,
}

/// One entry of a JSON batch.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRequestEntry {
    /// Correlates the entry with its response (the multipart `Content-ID`).
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub method: String,
    pub url: String,
    /// Ids of preceding entries; forward references are not allowed.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, found {other}"
        ))),
    }
}

impl JsonRequestEntry {
    /// The raw body: strings verbatim, objects and arrays re-serialized.
    pub fn body_bytes(&self) -> Result<Vec<u8>, BatchError> {
        match &self.body {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(s.clone().into_bytes()),
            Some(value @ (Value::Object(_) | Value::Array(_))) => serde_json::to_vec(value)
                .map_err(|e| BatchError::InvalidIndividualRequest(e.to_string())),
            Some(scalar) => Ok(scalar.to_string().into_bytes()),
        }
    }

    fn into_descriptor(self) -> Result<RequestDescriptor, BatchError> {
        let method = HttpMethod::from_str_ignore_case(&self.method).map_err(|_| {
            BatchError::InvalidIndividualRequest(format!(
                "request '{}' has an unsupported method '{}'",
                self.id, self.method
            ))
        })?;
        if self.url.trim().is_empty() {
            return Err(BatchError::InvalidIndividualRequest(format!(
                "request '{}' has an empty url",
                self.id
            )));
        }
        let body = self.body_bytes()?;

        let mut headers = NormalizedHeaders::new();
        for (name, value) in &self.headers {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => value.to_string(),
                other => {
                    return Err(BatchError::InvalidIndividualRequest(format!(
                        "header '{name}' of request '{}' must be a scalar, found {other}",
                        self.id
                    )));
                }
            };
            headers.apply(name, &value)?;
        }
        headers
            .server
            .insert(HTTP_CONTENT_ID.to_string(), self.id.clone());

        let mut descriptor =
            RequestDescriptor::from_parts(method, self.url, HttpVersion::Http11, headers, body);
        descriptor.id = Some(self.id);
        descriptor.depends_on = self.depends_on;
        Ok(descriptor)
    }
}

// ---------------------------------------------------------------------------
// Structured decode capability
// ---------------------------------------------------------------------------

/// Decodes a JSON batch body into its envelope.
pub trait BatchDecoder {
    fn decode(&self, body: &[u8]) -> Result<JsonBatchRequest, BatchError>;
}

/// [`BatchDecoder`] backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonDecoder;

impl BatchDecoder for SerdeJsonDecoder {
    fn decode(&self, body: &[u8]) -> Result<JsonBatchRequest, BatchError> {
        serde_json::from_slice(body).map_err(|e| {
            BatchError::InvalidIndividualRequest(format!("invalid JSON batch payload: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Turns a JSON batch body into ordered [`RequestDescriptor`]s.
pub struct JsonPartsExtractor<'d, D: ?Sized> {
    decoder: &'d D,
}

impl<'d, D: BatchDecoder + ?Sized> JsonPartsExtractor<'d, D> {
    pub fn new(decoder: &'d D) -> Self {
        Self { decoder }
    }

    /// Decode and validate every entry.
    ///
    /// # Errors
    ///
    /// [`BatchError::InvalidIndividualRequest`] when the current request is
    /// itself a sub-request (JSON batches cannot nest), when the payload does
    /// not decode, or when an entry repeats an id or depends on an id that does
    /// not appear earlier in the batch.
    pub fn extract(
        &self,
        body: &[u8],
        is_sub_request: bool,
    ) -> Result<Vec<RequestDescriptor>, BatchError> {
        if is_sub_request {
            return Err(BatchError::InvalidIndividualRequest(
                "a JSON batch cannot be nested inside another batch".into(),
            ));
        }

        let batch = self.decoder.decode(body)?;
        let mut seen: HashSet<String> = HashSet::with_capacity(batch.requests.len());
        let mut descriptors = Vec::with_capacity(batch.requests.len());

        for entry in batch.requests {
            if let Some(dependency) = entry.depends_on.iter().find(|d| !seen.contains(*d)) {
                return Err(BatchError::InvalidIndividualRequest(format!(
                    "request '{}' depends on '{dependency}', which does not precede it",
                    entry.id
                )));
            }
            if !seen.insert(entry.id.clone()) {
                return Err(BatchError::InvalidIndividualRequest(format!(
                    "duplicate request id '{}'",
                    entry.id
                )));
            }
            descriptors.push(entry.into_descriptor()?);
        }

        Ok(descriptors)
    }
}
