//! RFC 2046 media types (`Content-Type` / `Accept` values).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::BatchError;
use crate::types::{Header, find_header};

/// `type/subtype` pairs this crate recognizes. Lookup is case-insensitive.
const KNOWN_MEDIA_TYPES: &[&str] = &[
    // Any unrecognized multipart subtype should be treated as "mixed", but
    // only the RFC 2046 subtypes plus form-data are accepted here.
    "multipart/mixed",
    "multipart/alternative",
    "multipart/digest",
    "multipart/parallel",
    "multipart/form-data",
    "application/json",
    "application/http",
    "application/x-www-form-urlencoded",
    "application/xml",
    "application/ld+json",
    "application/merge-patch+json",
    "application/problem+json",
    "application/octet-stream",
    "text/plain",
    "text/html",
    "text/xml",
    "*/*",
];

/// Returns `true` if `type_and_subtype` is a registered media type.
pub fn is_known_media_type(type_and_subtype: &str) -> bool {
    KNOWN_MEDIA_TYPES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(type_and_subtype))
}

// ---------------------------------------------------------------------------
// ContentTypeParameter
// ---------------------------------------------------------------------------

/// Parameters kept when parsing a media type; anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentTypeParameter {
    Boundary,
    Charset,
}

impl ContentTypeParameter {
    /// Match a lower-cased parameter name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "boundary" => Some(Self::Boundary),
            "charset" => Some(Self::Charset),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boundary => "boundary",
            Self::Charset => "charset",
        }
    }
}

// ---------------------------------------------------------------------------
// MediaTypeHeader
// ---------------------------------------------------------------------------

/// Headers whose value is a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTypeHeader {
    ContentType,
    Accept,
}

impl MediaTypeHeader {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ContentType => "Content-Type",
            Self::Accept => "Accept",
        }
    }
}

// ---------------------------------------------------------------------------
// MediaType
// ---------------------------------------------------------------------------

/// A parsed media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// The raw header value.
    pub media_type: String,
    /// Lower-cased `type/subtype`.
    pub type_and_subtype: String,
    pub r#type: String,
    pub sub_type: String,
    pub parameters: BTreeMap<ContentTypeParameter, String>,
}

impl MediaType {
    /// Parse a header value.
    ///
    /// # Errors
    ///
    /// [`BatchError::MalformedHeader`] when `type/subtype` is not a known media
    /// type or a parameter lacks its `=` separator.
    pub fn parse(value: &str) -> Result<Self, BatchError> {
        let (head, params) = match value.split_once(';') {
            Some((head, params)) => (head, Some(params)),
            None => (value, None),
        };

        let type_and_subtype = head.trim().to_ascii_lowercase();
        if !is_known_media_type(&type_and_subtype) {
            return Err(BatchError::MalformedHeader(format!(
                "Content Type {} is invalid.",
                head.trim()
            )));
        }
        let (r#type, sub_type) = type_and_subtype
            .split_once('/')
            .ok_or_else(|| BatchError::MalformedHeader(format!("'{head}' lacks a subtype")))?;
        let (r#type, sub_type) = (r#type.to_string(), sub_type.to_string());

        let mut parameters = BTreeMap::new();
        if let Some(params) = params {
            for segment in params.split(';') {
                let segment = segment.trim();
                if segment.is_empty() {
                    continue;
                }
                let (name, value) = segment.split_once('=').ok_or_else(|| {
                    BatchError::MalformedHeader(
                        "ContentType parameter malformed: keypair `=` separator not found."
                            .into(),
                    )
                })?;
                // Unrecognized parameters must be ignored (RFC 2046 §5.1).
                let name = name.trim().to_ascii_lowercase();
                if let Some(param) = ContentTypeParameter::from_name(&name) {
                    parameters.insert(param, unquote(value.trim()).to_string());
                }
            }
        }

        Ok(Self {
            media_type: value.to_string(),
            type_and_subtype,
            r#type,
            sub_type,
            parameters,
        })
    }

    /// Parse the media type carried by `header` in a header list.
    ///
    /// # Errors
    ///
    /// [`BatchError::MalformedHeader`] if the header is absent or invalid.
    pub fn from_headers(headers: &[Header], header: MediaTypeHeader) -> Result<Self, BatchError> {
        let value = find_header(headers, header.name()).ok_or_else(|| {
            BatchError::MalformedHeader(format!("{} not found.", header.name()))
        })?;
        Self::parse(value)
    }

    pub fn parameter(&self, param: ContentTypeParameter) -> Option<&str> {
        self.parameters.get(&param).map(String::as_str)
    }

    pub fn boundary(&self) -> Option<&str> {
        self.parameter(ContentTypeParameter::Boundary)
    }

    /// Compare `type/subtype`, ignoring parameters and case.
    pub fn is(&self, type_and_subtype: &str) -> bool {
        self.type_and_subtype.eq_ignore_ascii_case(type_and_subtype)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_and_subtype)?;
        for (name, value) in &self.parameters {
            write!(f, "; {}={}", name.as_str(), value)?;
        }
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// `true` for `application/json` and any `application/…+json` variant.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.strip_prefix("application/") {
        Some(sub) => sub == "json" || sub.ends_with("+json"),
        None => false,
    }
}
