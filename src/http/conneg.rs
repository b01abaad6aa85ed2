//! Content negotiation for `Accept`, `Accept-Language`, `Accept-Charset`,
//! `Accept-Encoding`, and `TE` (RFC 9110 §12, spec §4.6).

use super::parse::WireError;

/// One negotiable element: its token (e.g. `"text/html"`, `"gzip"`,
/// `"en-US"`) and its parsed `q` weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Weighted {
    pub token: String,
    pub q: f32,
}

/// Strips `(...)` comments, honoring `\(` and `\)` escapes and nesting.
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut depth = 0u32;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if depth > 0 => {
                // Escaped char inside a comment: consume and discard.
                chars.next();
            }
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Validates the `q=` grammar: `0|0.[0-9]{0,3}|1|1.0{0,3}`.
fn parse_q(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    if raw == "0" || raw == "1" {
        return raw.parse().ok();
    }
    let (whole, frac) = raw.split_once('.')?;
    match whole {
        "0" => {
            if frac.len() <= 3 && frac.chars().all(|c| c.is_ascii_digit()) {
                raw.parse().ok()
            } else {
                None
            }
        }
        "1" => {
            if frac.len() <= 3 && frac.chars().all(|c| c == '0') {
                Some(1.0)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Parses a comma-separated weighted list (e.g. an `Accept-Language`
/// value). Returns `Err` if any element's `q` parameter is malformed,
/// over-precise, or out of `[0, 1]`.
pub fn parse_weighted_list(value: &str) -> Result<Vec<Weighted>, ()> {
    let value = strip_comments(value);
    let mut out = Vec::new();
    for element in value.split(',') {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        let mut parts = element.split(';').map(str::trim);
        let token = parts.next().unwrap_or("").to_string();
        if token.is_empty() {
            continue;
        }
        let mut q = 1.0f32;
        for param in parts {
            if let Some(raw_q) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
                q = parse_q(raw_q).ok_or(())?;
            }
            // Other parameters (charset on media ranges, etc.) are
            // preserved as part of the token's identity by callers that
            // care; this module only negotiates on `token` + `q`.
        }
        out.push(Weighted { token, q });
    }
    Ok(out)
}

/// Whether `candidate` is matched by `pattern`, where `pattern` may be `*`,
/// or, for slash-structured tokens (media types), `type/*`.
fn matches(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" || pattern == "*/*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        if let Some((cand_type, _)) = candidate.split_once('/') {
            return cand_type.eq_ignore_ascii_case(prefix);
        }
    }
    pattern.eq_ignore_ascii_case(candidate)
}

/// Negotiates one of `available` against an `Accept`-family header value.
/// Absent header: anything is acceptable, first available wins. Present
/// header: picks the highest-`q`, most-specific matching entry; empty
/// result (no wildcard, nothing matches with `q>0`) is a negotiation
/// failure the caller turns into 406 (or 501 for `TE`).
pub fn negotiate<'a>(header: Option<&str>, available: &'a [&'a str]) -> Result<Option<&'a str>, ()> {
    let Some(header) = header else {
        return Ok(available.first().copied());
    };
    let weighted = parse_weighted_list(header)?;
    if weighted.is_empty() {
        return Ok(available.first().copied());
    }
    let mut best: Option<(&str, f32, bool)> = None; // (candidate, q, is_wildcard)
    for candidate in available {
        for w in &weighted {
            if w.q <= 0.0 {
                continue;
            }
            if matches(&w.token, candidate) {
                let is_wildcard = w.token.contains('*');
                let better = match &best {
                    None => true,
                    Some((_, best_q, best_wild)) => {
                        w.q > *best_q || (w.q == *best_q && *best_wild && !is_wildcard)
                    }
                };
                if better {
                    best = Some((candidate, w.q, is_wildcard));
                }
            }
        }
    }
    Ok(best.map(|(c, _, _)| c))
}

/// `Accept-Encoding` has a special rule: `identity;q=0` with no wildcard
/// rejects the identity coding even though it is always otherwise
/// acceptable (spec §4.6).
pub fn negotiate_encoding(header: Option<&str>, available: &[&str]) -> Result<Option<String>, WireError> {
    let Some(header) = header else {
        return Ok(Some("identity".to_string()));
    };
    let weighted = parse_weighted_list(header).map_err(|_| WireError::not_acceptable("invalid Accept-Encoding"))?;
    let has_wildcard = weighted.iter().any(|w| w.token == "*" && w.q > 0.0);
    let identity_explicit_zero = weighted.iter().any(|w| w.token.eq_ignore_ascii_case("identity") && w.q == 0.0);

    if identity_explicit_zero && !has_wildcard {
        // identity rejected; fall through to normal candidate matching only.
        let mut best: Option<(&str, f32)> = None;
        for candidate in available {
            for w in &weighted {
                if w.q > 0.0 && matches(&w.token, candidate) {
                    if best.map(|(_, q)| w.q > q).unwrap_or(true) {
                        best = Some((candidate, w.q));
                    }
                }
            }
        }
        return match best {
            Some((c, _)) => Ok(Some(c.to_string())),
            None => Err(WireError::not_acceptable("no acceptable content-coding (identity excluded)")),
        };
    }

    match negotiate(Some(header), available).map_err(|_| WireError::not_acceptable("invalid Accept-Encoding"))? {
        Some(c) => Ok(Some(c.to_string())),
        None => {
            // identity is always acceptable unless explicitly excluded above.
            Ok(Some("identity".to_string()))
        }
    }
}

/// `TE` negotiation rejects with 501 (Not Implemented) rather than 406.
pub fn negotiate_te(header: Option<&str>, available: &[&str]) -> Result<Option<String>, WireError> {
    let Some(header) = header else {
        return Ok(None);
    };
    let weighted = parse_weighted_list(header).map_err(|_| WireError::not_implemented("invalid TE"))?;
    if weighted.is_empty() {
        return Ok(None);
    }
    match negotiate(Some(header), available).map_err(|_| WireError::not_implemented("invalid TE"))? {
        Some(c) => Ok(Some(c.to_string())),
        None => Err(WireError::not_implemented("no acceptable transfer-coding")),
    }
}

/// Generic `Accept`/`Accept-Language`/`Accept-Charset` negotiation: 406 on
/// failure.
pub fn negotiate_406(header: Option<&str>, available: &[&str]) -> Result<Option<String>, WireError> {
    match negotiate(header, available).map_err(|_| WireError::not_acceptable("invalid weight grammar"))? {
        Some(c) => Ok(Some(c.to_string())),
        None => {
            if header.map(|h| !h.trim().is_empty()).unwrap_or(false) {
                Err(WireError::not_acceptable("no acceptable representation"))
            } else {
                Ok(available.first().map(|s| s.to_string()))
            }
        }
    }
}

/// Grammar-level validation run during parsing (spec §4.6, §8): malformed
/// weights are rejected unconditionally, before routing even knows what
/// representations a handler could produce. `Accept`/`Accept-Language`/
/// `Accept-Charset` reject with 406, `TE` with 501; `Accept-Encoding` also
/// enforces the identity-exclusion invariant against the only content-coding
/// this codec ever produces (`identity` — it does no compression).
pub fn validate_conneg_headers(headers: &super::parse::Headers) -> Result<(), WireError> {
    for name in ["accept", "accept-language", "accept-charset"] {
        if let Some(value) = headers.get(name) {
            parse_weighted_list(&value).map_err(|_| WireError::not_acceptable(format!("invalid weight grammar in {name}")))?;
        }
    }
    if let Some(value) = headers.get("accept-encoding") {
        negotiate_encoding(Some(&value), &["identity"])?;
    }
    if let Some(value) = headers.get("te") {
        parse_weighted_list(&value).map_err(|_| WireError::not_implemented("invalid weight grammar in TE"))?;
    }
    Ok(())
}
