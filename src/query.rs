//! Query-string and url-encoded form decoding.
//!
//! Pairs are split on `&`, then on the first `=`. Both sides are trimmed and
//! percent-decoded (`+` decodes to a space); spaces in a decoded *name* are
//! then replaced by `_`, so `a b=1` yields the key `a_b`.

use crate::types::ParamMap;

/// Decode a query string (without the leading `?`).
pub fn parse_query(query: &str) -> ParamMap {
    parse_pairs(query)
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &str) -> ParamMap {
    parse_pairs(body.trim_end_matches(['\r', '\n']))
}

fn parse_pairs(input: &str) -> ParamMap {
    let mut params = ParamMap::new();
    if input.is_empty() {
        return params;
    }

    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_name(key);
        if key.is_empty() {
            continue;
        }
        params.insert(key, decode_component(value.trim()));
    }

    params
}

/// Percent-decode a name and map spaces to underscores.
pub(crate) fn decode_name(raw: &str) -> String {
    decode_component(raw.trim()).replace(' ', "_")
}

/// Percent-decode a component, treating `+` as a space.
///
/// Invalid UTF-8 sequences fall back to lossy decoding rather than failing.
pub(crate) fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes()))
            .into_owned(),
    }
}
