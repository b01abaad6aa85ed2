//! HTTP/1.1 request parsing, RFC 9110/9112 conformant (spec §4.6).

use super::chunked;
use super::percent;

/// A malformed-HTTP-stratum error (spec §7.1): never enters the pipeline,
/// turned directly into a response by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    pub status: u16,
    pub message: String,
}

impl WireError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: 400, message: message.into() }
    }
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self { status: 413, message: message.into() }
    }
    pub fn uri_too_long(message: impl Into<String>) -> Self {
        Self { status: 414, message: message.into() }
    }
    pub fn expectation_failed(message: impl Into<String>) -> Self {
        Self { status: 417, message: message.into() }
    }
    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self { status: 406, message: message.into() }
    }
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self { status: 501, message: message.into() }
    }
}

/// Case-insensitive, order-preserving header store (spec §3 Request Context).
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into().to_ascii_lowercase(), value.into()));
    }

    /// Combined value: multiple instances of the same name are joined by
    /// `", "` in order, except `set-cookie`, which returns only the first
    /// (callers needing every `Set-Cookie` instance should use
    /// [`Headers::get_all`]).
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        if name == "set-cookie" {
            return self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v.clone());
        }
        let values: Vec<&str> = self
            .entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().filter(|(n, _)| *n == name).map(|(_, v)| v.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.iter().any(|(n, _)| *n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A parsed, validated HTTP/1.1 request (spec §3 Request Context: (b)).
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: http::Method,
    /// Normalized request target: the decoded path, without query string.
    pub path: String,
    pub raw_path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: bytes::Bytes,
    pub is_asterisk_form: bool,
}

const RECOGNIZED_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
        )
}

fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
    input[from..].windows(2).position(|w| w == b"\r\n").map(|p| from + p)
}

/// Parses one HTTP/1.1 request from `input`. Does not require the full body
/// to be present for `Content-Length`-framed requests beyond what `input`
/// contains; callers performing real socket I/O are expected to have
/// buffered a complete message (spec §1: the socket accept loop is out of
/// scope).
pub fn parse_request(input: &[u8]) -> Result<ParsedRequest, WireError> {
    let line_end = find_crlf(input, 0).ok_or(WireError::bad_request("missing request line"))?;
    let request_line = std::str::from_utf8(&input[..line_end])
        .map_err(|_| WireError::bad_request("request line is not valid UTF-8"))?;

    let mut parts = request_line.split(' ').filter(|s| !s.is_empty());
    let method_tok = parts.next().ok_or(WireError::bad_request("missing method"))?;
    let target = parts.next().ok_or(WireError::bad_request("missing path"))?;
    let version = parts.next().ok_or(WireError::bad_request("missing version"))?;
    if parts.next().is_some() {
        return Err(WireError::bad_request("too many tokens in request line"));
    }
    if version != "HTTP/1.1" {
        return Err(WireError::bad_request("unsupported HTTP version"));
    }
    if !RECOGNIZED_METHODS.contains(&method_tok) {
        return Err(WireError::bad_request("unknown method"));
    }
    let method = http::Method::from_bytes(method_tok.as_bytes())
        .map_err(|_| WireError::bad_request("invalid method token"))?;

    let is_asterisk_form = target == "*";
    if is_asterisk_form && method != http::Method::OPTIONS {
        return Err(WireError::bad_request("asterisk-form target only valid for OPTIONS"));
    }

    let (raw_path, raw_query) = if is_asterisk_form {
        (String::new(), None)
    } else {
        parse_target(target)?
    };

    let mut pos = line_end + 2;
    let mut headers = Headers::new();
    loop {
        let hdr_end = find_crlf(input, pos).ok_or(WireError::bad_request("truncated headers"))?;
        if hdr_end == pos {
            pos = hdr_end + 2;
            break;
        }
        let line = &input[pos..hdr_end];
        let colon = line.iter().position(|&b| b == b':').ok_or(WireError::bad_request("malformed header line"))?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
            return Err(WireError::bad_request("invalid header field name"));
        }
        let value = &line[colon + 1..];
        let value = std::str::from_utf8(value)
            .map_err(|_| WireError::bad_request("header value is not valid UTF-8"))?
            .trim();
        let name = std::str::from_utf8(name).unwrap();
        headers.push(name, value);
        pos = hdr_end + 2;
    }

    if !is_asterisk_form && !headers.contains("host") {
        return Err(WireError::bad_request("Host header required"));
    }

    validate_expect(&headers)?;

    let content_length = parse_content_length(&headers)?;
    let is_chunked = is_chunked_encoding(&headers)?;
    if content_length.is_some() && is_chunked {
        return Err(WireError::bad_request("Content-Length and chunked Transfer-Encoding both present"));
    }

    let body_bytes = &input[pos..];
    let body = if is_chunked {
        let declared_trailers: Vec<String> = headers
            .get("trailer")
            .map(|v| v.split(',').map(|s| s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let decoded = chunked::decode(body_bytes, &declared_trailers)?;
        for (name, value) in decoded.trailers {
            headers.push(name, value);
        }
        bytes::Bytes::from(decoded.data)
    } else if let Some(len) = content_length {
        if body_bytes.len() < len {
            return Err(WireError::bad_request("body shorter than Content-Length"));
        }
        bytes::Bytes::copy_from_slice(&body_bytes[..len])
    } else {
        bytes::Bytes::new()
    };

    super::conneg::validate_conneg_headers(&headers)?;

    let (path, query) = if is_asterisk_form {
        (String::new(), Vec::new())
    } else {
        let path = percent::decode_utf8(&raw_path).ok_or(WireError::bad_request("invalid percent-encoding in path"))?;
        let query = parse_query(raw_query.as_deref().unwrap_or(""))?;
        (path, query)
    };

    Ok(ParsedRequest {
        method,
        path,
        raw_path,
        query,
        headers,
        body,
        is_asterisk_form,
    })
}

/// Splits a request target into `(path, query)`, handling origin-form and
/// absolute-form (rejecting userinfo) per spec §4.6.
fn parse_target(target: &str) -> Result<(String, Option<String>), WireError> {
    let without_query = target;
    if target.starts_with('/') {
        return Ok(split_query(without_query));
    }
    if let Some(scheme_end) = target.find("://") {
        let _scheme = &target[..scheme_end];
        let rest = &target[scheme_end + 3..];
        let authority_end = rest.find('/').unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        if authority.contains('@') {
            return Err(WireError::bad_request("absolute-form target with userinfo is rejected"));
        }
        let path_and_query = &rest[authority_end..];
        let path_and_query = if path_and_query.is_empty() { "/" } else { path_and_query };
        return Ok(split_query(path_and_query));
    }
    Err(WireError::bad_request("unsupported request target form"))
}

fn split_query(path_and_query: &str) -> (String, Option<String>) {
    match path_and_query.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (path_and_query.to_string(), None),
    }
}

fn parse_query(raw: &str) -> Result<Vec<(String, String)>, WireError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = percent::decode_utf8(k).ok_or(WireError::bad_request("invalid percent-encoding in query key"))?;
        let value = percent::decode_utf8(v).ok_or(WireError::bad_request("invalid percent-encoding in query value"))?;
        out.push((key, value));
    }
    Ok(out)
}

fn parse_content_length(headers: &Headers) -> Result<Option<usize>, WireError> {
    match headers.get("content-length") {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| WireError::bad_request("invalid Content-Length")),
    }
}

fn is_chunked_encoding(headers: &Headers) -> Result<bool, WireError> {
    match headers.get("transfer-encoding") {
        None => Ok(false),
        Some(v) => {
            let tokens: Vec<&str> = v.split(',').map(|s| s.trim()).collect();
            match tokens.as_slice() {
                ["chunked"] => Ok(true),
                [] => Ok(false),
                _ => Err(WireError::bad_request("unsupported Transfer-Encoding")),
            }
        }
    }
}

/// Validates `Expect:` per spec §4.6: the only accepted expectation is
/// `100-continue`; anything else is 417.
fn validate_expect(headers: &Headers) -> Result<(), WireError> {
    let Some(combined) = headers.get("expect") else {
        return Ok(());
    };
    let tokens: Vec<String> = combined.split(',').map(|s| s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()).collect();
    if tokens.is_empty() || tokens.iter().any(|t| t != "100-continue") {
        return Err(WireError::expectation_failed("unsupported expectation"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_happy_get() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, http::Method::GET);
        assert_eq!(req.path, "/hello");
        assert!(req.body.is_empty());
    }

    #[test]
    fn rejects_missing_host() {
        let raw = b"GET /hello HTTP/1.1\r\n\r\n";
        let err = parse_request(raw).unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn rejects_unknown_method() {
        let raw = b"FROB /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 400);
    }

    #[test]
    fn parses_query_string_with_bare_keys() {
        let raw = b"GET /s?a=1&b&c=x%20y HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.query, vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "".to_string()),
            ("c".to_string(), "x y".to_string()),
        ]);
    }

    #[test]
    fn rejects_content_length_and_chunked_together() {
        let raw = b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\nhello";
        assert_eq!(parse_request(raw).unwrap_err().status, 400);
    }

    #[test]
    fn decodes_chunked_body() {
        let raw = b"POST /test HTTP/1.1\r\nHost:x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(&req.body[..], b"helloworld");
    }

    #[test]
    fn rejects_undeclared_trailer() {
        let raw = b"POST /test HTTP/1.1\r\nHost:x\r\nTransfer-Encoding: chunked\r\nTrailer: X-Allowed\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\nX-Other: y\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 400);
    }

    #[test]
    fn expect_100_continue_accepted() {
        let raw = b"POST /x HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nhi";
        assert!(parse_request(raw).is_ok());
    }

    #[test]
    fn expect_other_rejected_with_417() {
        let raw = b"POST /x HTTP/1.1\r\nHost: x\r\nExpect: 200-ok\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 417);
    }

    #[test]
    fn rejects_absolute_form_with_userinfo() {
        let raw = b"GET http://user:pass@x/path HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 400);
    }

    #[test]
    fn malformed_accept_weight_is_406() {
        let raw = b"GET /x HTTP/1.1\r\nHost: x\r\nAccept: text/html;q=2\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 406);
    }

    #[test]
    fn overprecise_accept_language_weight_is_406() {
        let raw = b"GET /x HTTP/1.1\r\nHost: x\r\nAccept-Language: en;q=0.1234\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 406);
    }

    #[test]
    fn malformed_te_weight_is_501() {
        let raw = b"GET /x HTTP/1.1\r\nHost: x\r\nTE: trailers;q=1.0001\r\n\r\n";
        assert_eq!(parse_request(raw).unwrap_err().status, 501);
    }

    #[test]
    fn well_formed_conneg_headers_are_accepted() {
        let raw = b"GET /x HTTP/1.1\r\nHost: x\r\nAccept: text/html;q=0.8, application/json\r\nAccept-Encoding: gzip\r\n\r\n";
        assert!(parse_request(raw).is_ok());
    }

    #[test]
    fn asterisk_form_only_valid_for_options() {
        let raw = b"OPTIONS * HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert!(req.is_asterisk_form);

        let raw2 = b"GET * HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(parse_request(raw2).unwrap_err().status, 400);
    }
}
