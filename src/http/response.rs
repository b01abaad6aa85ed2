//! Response synthesis (spec §4.6).

use crate::decision::{Body, Response};

use super::date::imf_fixdate;

fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Serializes `response` to raw HTTP/1.1 response bytes.
///
/// - `server_header`: default `Server:` value if the step didn't set one.
/// - `is_head`: whether the originating request was `HEAD` — the body is
///   omitted but a step-declared `Content-Length` is preserved (spec §4.3
///   rule 7, §4.6, §9 Open Question (b)).
pub fn serialize(response: &Response, server_header: &str, is_head: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", response.status, reason_phrase(response.status)).as_bytes());

    let has_server = response.header_value("server").is_some();
    let has_date = response.header_value("date").is_some();
    let emit_date = !matches!(response.status, 204 | 304);

    let body_bytes: &[u8] = match &response.body {
        Body::Complete(b) => b.as_ref(),
        Body::Streaming(_) => &[],
    };

    let declared_content_length = response.header_value("content-length").map(|s| s.to_string());
    let content_length = if is_head {
        declared_content_length.unwrap_or_else(|| body_bytes.len().to_string())
    } else {
        body_bytes.len().to_string()
    };

    if !has_server {
        out.extend_from_slice(format!("server: {server_header}\r\n").as_bytes());
    }
    if emit_date && !has_date {
        out.extend_from_slice(format!("date: {}\r\n", imf_fixdate(chrono::Utc::now())).as_bytes());
    }

    let mut wrote_content_length = false;
    for header in &response.headers {
        if header.name.eq_ignore_ascii_case("date") && !emit_date {
            continue;
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            wrote_content_length = true;
            out.extend_from_slice(format!("{}: {}\r\n", header.name, content_length).as_bytes());
            continue;
        }
        out.extend_from_slice(format!("{}: {}\r\n", header.name, header.value).as_bytes());
    }
    if !wrote_content_length && !matches!(response.status, 204 | 304) {
        out.extend_from_slice(format!("content-length: {content_length}\r\n").as_bytes());
    }

    out.extend_from_slice(b"\r\n");

    if !is_head && emit_body(response.status) {
        out.extend_from_slice(body_bytes);
    }
    out
}

fn emit_body(status: u16) -> bool {
    !matches!(status, 204 | 304)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Response;

    #[test]
    fn serializes_status_and_body() {
        let resp = Response::with_body(200, "Hello, Zerver!");
        let bytes = serialize(&resp, "Zerver/1.0", false);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("Hello, Zerver!"));
        assert!(text.contains("content-length: 14\r\n"));
    }

    #[test]
    fn omits_date_for_204_and_304() {
        let resp = Response::new(204);
        let bytes = serialize(&resp, "Zerver/1.0", false);
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.to_lowercase().contains("date:"));
        assert!(!text.to_lowercase().contains("content-length:"));
    }

    #[test]
    fn head_preserves_declared_length_and_omits_body() {
        let resp = Response::with_body(200, "Hello, Zerver!").header("content-length", "14");
        let bytes = serialize(&resp, "Zerver/1.0", true);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("content-length: 14\r\n"));
        assert!(!text.contains("Hello"));
    }
}
