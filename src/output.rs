use crate::response::reason_phrase;
use crate::types::{Header, RequestDescriptor};

/// Serialize decomposed sub-requests to a JSON array.
///
/// When `pretty` is `true` the output is indented for readability.
pub fn format_json(requests: &[RequestDescriptor], pretty: bool) -> String {
    let result = if pretty {
        serde_json::to_string_pretty(requests)
    } else {
        serde_json::to_string(requests)
    };
    result.unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Render sub-requests in a human-readable debug format.
pub fn format_debug(requests: &[RequestDescriptor]) -> String {
    let mut out = String::with_capacity(256 * requests.len().max(1));

    for (index, request) in requests.iter().enumerate() {
        out.push_str(&format!("=== Sub-request #{} ===\n", index + 1));
        out.push_str(&format!("Method:  {}\n", request.method));
        out.push_str(&format!("URI:     {}\n", request.uri));
        out.push_str(&format!("Path:    {}\n", request.path_info));
        out.push_str(&format!("Version: {}\n", request.version));
        if let Some(id) = request.id.as_deref().or(request.content_id()) {
            out.push_str(&format!("Id:      {id}\n"));
        }
        if !request.depends_on.is_empty() {
            out.push_str(&format!("Depends: {}\n", request.depends_on.join(", ")));
        }

        out.push_str(&format!("\n--- Server variables ({}) ---\n", request.server.len()));
        for (name, value) in &request.server {
            out.push_str(&format!("  {name} = {value}\n"));
        }

        if !request.query.is_empty() {
            out.push_str(&format!("\n--- Query ({}) ---\n", request.query.len()));
            for (name, value) in request.query.iter() {
                out.push_str(&format!("  {name} = {value}\n"));
            }
        }
        if !request.form.is_empty() {
            out.push_str(&format!("\n--- Form ({}) ---\n", request.form.len()));
            for (name, value) in request.form.iter() {
                out.push_str(&format!("  {name} = {value}\n"));
            }
        }
        if !request.cookies.is_empty() {
            out.push_str(&format!("\n--- Cookies ({}) ---\n", request.cookies.len()));
            for (name, value) in &request.cookies {
                out.push_str(&format!("  {name} = {value}\n"));
            }
        }

        if request.body.is_empty() {
            out.push_str("\n--- No Body ---\n");
        } else {
            out.push_str(&format!("\n--- Body ({} bytes) ---\n", request.body.len()));
            match request.body_as_str() {
                Some(s) => out.push_str(s),
                None => out.push_str(&format!("<binary data: {} bytes>", request.body.len())),
            }
            out.push('\n');
        }
    }

    out.push_str("====================\n");
    out
}

/// Render only the request line and `HTTP_*` variables of each sub-request.
pub fn format_headers_only(requests: &[RequestDescriptor]) -> String {
    let mut out = String::new();

    for request in requests {
        out.push_str(&format!(
            "{} {} {}\n",
            request.method, request.uri, request.version
        ));
        for (name, value) in &request.server {
            if let Some(header) = name.strip_prefix("HTTP_") {
                out.push_str(&format!("{header}: {value}\n"));
            }
        }
        out.push('\n');
    }

    out
}

/// Render an assembled batch response as an HTTP/1.1 message.
pub fn format_response(status: u16, headers: &[Header], body: &[u8]) -> String {
    let mut out = format!("HTTP/1.1 {status} {}\n", reason_phrase(status));
    for header in headers {
        out.push_str(&format!("{}: {}\n", header.name, header.value));
    }
    out.push('\n');
    out.push_str(&String::from_utf8_lossy(body));
    out
}
