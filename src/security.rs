//! SSRF/host allowlist, forbidden schemes, SQL denylist, and cap
//! enforcement, run before any effect is dispatched (spec §4.5 "Security
//! validation"). No direct teacher analogue — rollup full nodes don't proxy
//! arbitrary outbound HTTP — built from the spec text, cross-checked
//! against `other_examples`' SSRF-adjacent proxy allowlist idiom (see
//! `DESIGN.md`).

use crate::config::{ResourceBudget, SecurityPolicy};
use crate::decision::{Effect, Error, ErrorKind};

fn forbidden(entity: &str, reason: impl Into<String>) -> Error {
    Error::new(ErrorKind::Forbidden, entity, reason)
}

/// Whether `host` matches at least one entry in `allowed`: a literal match
/// or a `*.suffix` wildcard (spec §4.5).
fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix("*.") {
            let suffix = suffix.to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            host == pattern.to_ascii_lowercase()
        }
    })
}

fn validate_http_call(
    url: &str,
    timeout_ms: u64,
    body: &Option<bytes::Bytes>,
    security: &SecurityPolicy,
    budget: &ResourceBudget,
) -> Result<(), Error> {
    let uri: http::Uri = url
        .parse()
        .map_err(|_| forbidden("http_call", format!("malformed URL: {url}")))?;

    let scheme = uri
        .scheme_str()
        .ok_or_else(|| forbidden("http_call", "URL has no scheme"))?
        .to_ascii_lowercase();
    if security.forbidden_schemes.iter().any(|s| s.eq_ignore_ascii_case(&scheme)) {
        return Err(forbidden("http_call", format!("scheme '{scheme}' is forbidden")));
    }

    let host = uri.host().ok_or_else(|| forbidden("http_call", "URL has no host"))?;
    if !host_allowed(host, &security.allowed_hosts) {
        return Err(forbidden("http_call", format!("host '{host}' is not in allowed_hosts")));
    }

    if timeout_ms > security.default_timeout_ms {
        return Err(forbidden(
            "http_call",
            format!("timeout_ms {timeout_ms} exceeds default_timeout_ms {}", security.default_timeout_ms),
        ));
    }

    if let Some(body) = body {
        if body.len() > budget.max_outbound_bytes {
            return Err(forbidden(
                "http_call",
                format!("body of {} bytes exceeds max_outbound_bytes {}", body.len(), budget.max_outbound_bytes),
            ));
        }
    }

    Ok(())
}

/// Number of distinct `$N` placeholders referenced in `sql`.
fn count_placeholders(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut seen = std::collections::HashSet::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                seen.insert(&sql[start..end]);
                i = end;
                continue;
            }
        }
        i += 1;
    }
    seen.len()
}

fn validate_db_query(sql: &str, params: &[String], security: &SecurityPolicy) -> Result<(), Error> {
    if sql.len() > security.max_query_length {
        return Err(forbidden("db_query", format!("sql of {} chars exceeds max_query_length", sql.len())));
    }

    let upper = sql.to_ascii_uppercase();
    for keyword in &security.forbidden_sql_keywords {
        let keyword_upper = keyword.to_ascii_uppercase();
        if contains_word(&upper, &keyword_upper) {
            return Err(forbidden("db_query", format!("sql contains forbidden keyword '{keyword}'")));
        }
    }

    if security.require_parameterized {
        let placeholders = count_placeholders(sql);
        if placeholders != params.len() {
            return Err(forbidden(
                "db_query",
                format!("sql references {placeholders} placeholders but {} params were supplied", params.len()),
            ));
        }
    }

    Ok(())
}

/// A whole-word, case-normalized substring scan: `needle` must be bordered
/// by non-alphanumeric characters (or string bounds) in `haystack_upper`.
fn contains_word(haystack_upper: &str, needle_upper: &str) -> bool {
    let hay = haystack_upper.as_bytes();
    let needle = needle_upper.as_bytes();
    if needle.is_empty() || needle.len() > hay.len() {
        return false;
    }
    for start in 0..=(hay.len() - needle.len()) {
        if &hay[start..start + needle.len()] != needle {
            continue;
        }
        let before_ok = start == 0 || !hay[start - 1].is_ascii_alphanumeric();
        let end = start + needle.len();
        let after_ok = end == hay.len() || !hay[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

/// Validates `effect` against `security`/`budget` before the executor
/// dispatches it. Effect kinds with no security surface (`DbGet`, `DbPut`,
/// `DbDel`, `Compute`) pass unconditionally here — `Compute`'s `cpu_budget_ms`
/// is a resource-budget concern, not a security one, and is checked
/// separately by the executor (`check_compute_budget`) against
/// `ResourceBudget::max_cpu_ms`. `Compensate` recurses into its `original`.
pub fn validate_effect(effect: &Effect, security: &SecurityPolicy, budget: &ResourceBudget) -> Result<(), Error> {
    match effect {
        Effect::HttpCall { url, timeout_ms, body, .. } => validate_http_call(url, *timeout_ms, body, security, budget),
        Effect::DbQuery { sql, params, .. } => validate_db_query(sql, params, security),
        Effect::DbGet { .. } | Effect::DbPut { .. } | Effect::DbDel { .. } | Effect::Compute { .. } => Ok(()),
        Effect::Compensate { original, .. } => validate_effect(original, security, budget),
    }
}
