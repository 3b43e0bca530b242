//! Header normalization into CGI-style server variables.
//!
//! Every header lands under an `HTTP_`-prefixed, upper-cased key with `-`
//! mapped to `_`. `Content-Type`, `Content-Disposition` and `Content-Length`
//! are additionally exposed without the prefix. `Authorization` is decomposed
//! into its scheme and credentials, and `Cookie` feeds the cookie map.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::BatchError;
use crate::query::{decode_component, decode_name};

/// Headers that are also stored without the `HTTP_` prefix.
const UNPREFIXED: [&str; 3] = ["CONTENT_TYPE", "CONTENT_DISPOSITION", "CONTENT_LENGTH"];

/// Accumulator for one request's normalized headers.
///
/// A fresh value is built per decoded request; nothing is shared between
/// requests or batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedHeaders {
    pub server: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

impl NormalizedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one header line into the accumulator.
    ///
    /// # Errors
    ///
    /// [`BatchError::UnsupportedAuthScheme`] for an `Authorization` scheme other
    /// than Basic/Digest, [`BatchError::MalformedHeader`] for undecodable
    /// credentials.
    pub fn apply(&mut self, name: &str, raw_value: &str) -> Result<(), BatchError> {
        let name = canonical_name(name);
        let value = raw_value.trim();

        if name == "AUTHORIZATION" {
            self.apply_authorization(value)?;
        } else if value.contains(',') {
            for fragment in split_unquoted(value, ',') {
                self.apply_fragment(&name, fragment);
            }
        } else {
            self.apply_fragment(&name, value);
        }

        self.server.insert(format!("HTTP_{name}"), value.to_string());
        Ok(())
    }

    fn apply_fragment(&mut self, name: &str, fragment: &str) {
        if UNPREFIXED.contains(&name) {
            self.server.insert(name.to_string(), fragment.to_string());
        } else if name == "COOKIE" {
            self.apply_cookie(fragment);
        }
    }

    fn apply_authorization(&mut self, value: &str) -> Result<(), BatchError> {
        let (scheme, credential) = value.split_once(' ').ok_or_else(|| {
            BatchError::MalformedHeader("authorization header lacks a credential".into())
        })?;
        let credential = credential.trim();

        match scheme.to_ascii_lowercase().as_str() {
            "basic" => {
                let decoded = STANDARD.decode(credential).map_err(|e| {
                    BatchError::MalformedHeader(format!("invalid basic credentials: {e}"))
                })?;
                let decoded = String::from_utf8(decoded).map_err(|_| {
                    BatchError::MalformedHeader("basic credentials are not UTF-8".into())
                })?;
                let (user, password) = decoded.split_once(':').ok_or_else(|| {
                    BatchError::MalformedHeader("basic credentials lack ':' separator".into())
                })?;
                self.server.insert("AUTH_TYPE".into(), "Basic".into());
                self.server.insert("AUTH_USER".into(), user.to_string());
                self.server.insert("AUTH_PW".into(), password.to_string());
            }
            "digest" => {
                self.server.insert("AUTH_TYPE".into(), "Digest".into());
                self.server.insert("AUTH_DIGEST".into(), credential.to_string());
            }
            other => return Err(BatchError::UnsupportedAuthScheme(other.to_string())),
        }
        Ok(())
    }

    fn apply_cookie(&mut self, value: &str) {
        for cookie in value.split(';') {
            if cookie.trim().is_empty() {
                continue;
            }
            let (name, value) = cookie.split_once('=').unwrap_or((cookie, ""));
            let name = decode_name(name);
            if !name.is_empty() {
                self.cookies.insert(name, decode_component(value.trim()));
            }
        }
    }
}

/// Upper-case a header name and map `-` to `_` (`Content-Type` → `CONTENT_TYPE`).
pub fn canonical_name(name: &str) -> String {
    name.trim().to_ascii_uppercase().replace('-', "_")
}

/// Split `value` on `sep`, ignoring separators inside double-quoted strings.
///
/// Fragments are trimmed; empty fragments are dropped.
pub(crate) fn split_unquoted(value: &str, sep: char) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                fragments.push(value[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    fragments.push(value[start..].trim());
    fragments.retain(|f| !f.is_empty());
    fragments
}
