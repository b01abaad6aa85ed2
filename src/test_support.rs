//! Test-only helpers (spec §10.4), mirroring `sov_rest_utils::test_utils`:
//! a fake [`EffectHandler`], a terse raw-request builder, and response
//! assertion helpers. Not for use by application code.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::decision::{Body, Effect, Error, ErrorKind, Response};
use crate::executor::EffectHandler;
use crate::slot::SlotId;

/// A stable string key for an effect, independent of its `token`: the kind
/// tag plus whatever the caller would naturally seed by (key, url, sql,
/// operation name).
fn effect_key(effect: &Effect) -> String {
    match effect {
        Effect::DbGet { key, .. } => format!("db_get:{key}"),
        Effect::DbPut { key, .. } => format!("db_put:{key}"),
        Effect::DbDel { key, .. } => format!("db_del:{key}"),
        Effect::DbQuery { sql, .. } => format!("db_query:{sql}"),
        Effect::HttpCall { url, .. } => format!("http_call:{url}"),
        Effect::Compute { operation, .. } => format!("compute:{operation}"),
        Effect::Compensate { original, .. } => format!("compensate:{}", effect_key(original)),
    }
}

/// Resolves effects from a pre-seeded table keyed by [`effect_key`]. An
/// unseeded effect fails with `ErrorKind::NotFound` rather than panicking,
/// so tests exercising partial-failure paths don't need a seed for every
/// branch they don't take.
#[derive(Default)]
pub struct FakeEffectHandler {
    table: Mutex<HashMap<String, Result<bytes::Bytes, Error>>>,
}

impl FakeEffectHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: impl Into<String>, value: impl Into<bytes::Bytes>) {
        self.table.lock().unwrap().insert(key.into(), Ok(value.into()));
    }

    pub fn seed_failure(&self, key: impl Into<String>, error: Error) {
        self.table.lock().unwrap().insert(key.into(), Err(error));
    }
}

#[async_trait::async_trait]
impl EffectHandler for FakeEffectHandler {
    async fn handle(&self, effect: &Effect, _token: SlotId) -> Result<bytes::Bytes, Error> {
        let key = effect_key(effect);
        self.table
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(Error::new(ErrorKind::NotFound, "effect", format!("no seed for '{key}'"))))
    }
}

/// Builds a raw HTTP/1.1 request byte string from a terse literal form.
/// Fills in `Host` and `Content-Length` when the caller didn't supply them,
/// so call sites only spell out what the scenario actually cares about.
pub fn raw_request(method: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("{method} {path} HTTP/1.1\r\n").into_bytes();
    let mut has_host = false;
    let mut has_content_length = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !has_host {
        out.extend_from_slice(b"Host: test\r\n");
    }
    if !has_content_length && !body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

pub fn body_bytes(response: &Response) -> bytes::Bytes {
    match &response.body {
        Body::Complete(b) => b.clone(),
        Body::Streaming(_) => bytes::Bytes::new(),
    }
}

pub fn assert_status(response: &Response, expected: u16) {
    assert_eq!(response.status, expected, "expected status {expected}, got {}", response.status);
}

pub fn assert_header(response: &Response, name: &str, expected: &str) {
    let actual = response.header_value(name);
    assert_eq!(actual, Some(expected), "header '{name}': expected {expected:?}, got {actual:?}");
}

pub fn assert_body(response: &Response, expected: &[u8]) {
    let actual = body_bytes(response);
    assert_eq!(&actual[..], expected);
}
