//! `Fail(Error)` -> `Response` wiring via a pluggable renderer (spec §4.8,
//! §10.2).
//!
//! `ErrorRenderer` is itself a tiny one-step sub-pipeline: it runs in its
//! own protected frame, and if it too fails, a hard-coded `500 Internal
//! Server Error` is emitted instead (spec §4.8, §7). The default renderer
//! shipped by this crate renders `Error` as a small JSON envelope, grounded
//! directly on `sov_rest_utils::{ResponseObject, ErrorObject}` (see
//! `DESIGN.md`).

use std::sync::Arc;

use crate::context::CtxBase;
use crate::decision::{Decision, Response};

/// `ErrorRenderer(&mut CtxBase) -> Decision` (spec §6). Reads `ctx.last_error`
/// and is expected to return `Decision::Done`; any other decision (including
/// `Fail`) is treated as renderer failure.
pub type ErrorRendererFn = Arc<dyn Fn(&mut CtxBase) -> Decision + Send + Sync>;

#[derive(Clone)]
pub struct ErrorRenderer(pub ErrorRendererFn);

impl ErrorRenderer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut CtxBase) -> Decision + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

fn hard_coded_500() -> Response {
    Response::with_body(500, "Internal Server Error").header("content-type", "text/plain; charset=utf-8")
}

/// Runs `renderer` against `ctx` (spec §4.8). The renderer's own failure
/// (returning anything other than `Done`) is swallowed into the hard-coded
/// static 500 — this is the one path in the engine that must never itself
/// fail.
pub fn render(ctx: &mut CtxBase, renderer: &ErrorRenderer) -> Response {
    match (renderer.0)(ctx) {
        Decision::Done(response) => response,
        _ => hard_coded_500(),
    }
}

/// The default `ErrorRenderer` shipped by the crate: a JSON envelope
/// `{"error": {"kind", "entity", "reason", "context"}}`, status mapped via
/// `ErrorKind::status()` (spec §11 "Supplemented Features").
pub fn default_error_renderer() -> ErrorRenderer {
    ErrorRenderer::new(|ctx: &mut CtxBase| {
        let Some(err) = ctx.last_error.clone() else {
            return Decision::Done(hard_coded_500());
        };
        let body = serde_json::json!({
            "error": {
                "kind": format!("{:?}", err.kind),
                "entity": err.entity,
                "reason": err.reason,
                "context": err.context,
            }
        });
        let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
        Decision::Done(
            Response::with_body(err.kind.status(), bytes).header("content-type", "application/json"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::decision::{Error, ErrorKind};
    use crate::http::parse::ParsedRequest;

    fn ctx_with_error(err: Error) -> CtxBase {
        let request = ParsedRequest {
            method: http::Method::GET,
            path: "/".to_string(),
            raw_path: "/".to_string(),
            query: Vec::new(),
            headers: crate::http::Headers::new(),
            body: bytes::Bytes::new(),
            is_asterisk_form: false,
        };
        let mut ctx = CtxBase::new(request, Arena::new(64, 4096), "req-1".to_string());
        ctx.last_error = Some(err);
        ctx
    }

    #[test]
    fn default_renderer_maps_error_kind_to_status() {
        let mut ctx = ctx_with_error(Error::new(ErrorKind::NotFound, "widget", "missing"));
        let renderer = default_error_renderer();
        let response = render(&mut ctx, &renderer);
        assert_eq!(response.status, 404);
    }

    #[test]
    fn renderer_failure_falls_back_to_hard_coded_500() {
        let mut ctx = ctx_with_error(Error::new(ErrorKind::Internal, "x", "y"));
        let renderer = ErrorRenderer::new(|ctx: &mut CtxBase| Decision::Fail(ctx.last_error.clone().unwrap()));
        let response = render(&mut ctx, &renderer);
        assert_eq!(response.status, 500);
    }

    #[test]
    fn missing_last_error_still_yields_a_500() {
        let mut ctx = ctx_with_error(Error::new(ErrorKind::Internal, "x", "y"));
        ctx.last_error = None;
        let renderer = default_error_renderer();
        let response = render(&mut ctx, &renderer);
        assert_eq!(response.status, 500);
    }
}
