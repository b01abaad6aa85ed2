//! The embedding surface (spec §6): `Server::{new, use_middleware,
//! add_route, handle_request, listen}`.
//!
//! Registration (`use_middleware`/`add_route`/`with_error_renderer`/
//! `with_trace_sink`) follows the crate's consuming-builder idiom
//! (`RouteSpec::with_before`, `Need::with_continuation`); it happens once at
//! startup, before `listen()` or the first `handle_request` call. The accept
//! loop itself is grounded on `sov-stf-runner::StateTransitionRunner::
//! start_axum_server` (bind a `TcpListener`, spawn per-connection tasks off
//! an `Arc`-shared handle) generalized from handing a pre-built
//! `axum::Router` to driving this crate's own codec/interpreter directly,
//! since the spec's wire protocol isn't axum's (see `DESIGN.md`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::arena::Arena;
use crate::config::ServerConfig;
use crate::context::CtxBase;
use crate::decision::{Decision, Error, ErrorKind, Response};
use crate::error_pipeline::{self, ErrorRenderer};
use crate::executor::EffectHandler;
use crate::http::{parse_request, response as http_response, WireError};
use crate::interpreter;
use crate::route::{RouteMatch, RouteSpec, Router};
use crate::step::Step;
use crate::trace::{NoopSink, TraceSink};

fn wire_error_response(err: WireError) -> Response {
    Response::with_body(err.status, err.message).header("content-type", "text/plain; charset=utf-8")
}

/// A random per-instance prefix, generated once at construction, so
/// `request_id`s from two server instances (e.g. across a restart) never
/// collide even if their sequence counters happen to line up — the
/// sequence counter alone is only unique within one process lifetime.
fn instance_nonce() -> String {
    let bytes: [u8; 4] = rand::random();
    hex::encode(bytes)
}

fn next_request_id(seq: &AtomicU64, instance_nonce: &str) -> String {
    let n = seq.fetch_add(1, Ordering::Relaxed);
    format!("req-{instance_nonce}-{n:016x}")
}

/// One embedded server: the route table, global-before middleware, and the
/// pluggable collaborators an embedder supplies (`EffectHandler`,
/// `ErrorRenderer`, `TraceSink`) (spec §6).
pub struct Server {
    router: Router,
    global_before: Vec<Step>,
    config: ServerConfig,
    handler: Arc<dyn EffectHandler>,
    error_renderer: ErrorRenderer,
    trace_sink: Arc<dyn TraceSink>,
    request_seq: AtomicU64,
    instance_nonce: String,
}

impl Server {
    /// `config` carries `addr`, `server_header`, budgets, security policy,
    /// and assertion policy (spec §6 `Server::new`). `config.normalized()`
    /// is applied immediately, so out-of-range values are clamped once, at
    /// construction, rather than on every request.
    pub fn new(config: ServerConfig, handler: Arc<dyn EffectHandler>) -> Self {
        Self {
            router: Router::new(),
            global_before: Vec::new(),
            config: config.normalized(),
            handler,
            error_renderer: error_pipeline::default_error_renderer(),
            trace_sink: Arc::new(NoopSink),
            request_seq: AtomicU64::new(0),
            instance_nonce: instance_nonce(),
        }
    }

    /// Registers global-before middleware, run ahead of every route's own
    /// `before`/`steps`, in declaration order (spec §4.4, §6 `Server::use`).
    pub fn use_middleware(mut self, steps: Vec<Step>) -> Self {
        self.global_before.extend(steps);
        self
    }

    /// Registers `spec` under `(method, pattern)`; re-registering the same
    /// pair replaces it in place (spec §6 `add_route`).
    pub fn add_route(mut self, method: http::Method, pattern: &str, spec: RouteSpec) -> Self {
        self.router.add_route(method, pattern, spec);
        self
    }

    /// Overrides the default JSON `ErrorRenderer` (spec §6 `ErrorRenderer`).
    pub fn with_error_renderer(mut self, renderer: ErrorRenderer) -> Self {
        self.error_renderer = renderer;
        self
    }

    /// Overrides the default no-op `TraceSink` (spec §6 `TraceSink::emit`).
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    /// Allocates a fresh [`Arena`] sized from this server's default
    /// `max_memory_bytes` budget and dispatches `raw_bytes` through it.
    pub async fn handle_request(&self, raw_bytes: &[u8]) -> Response {
        let arena = Arena::new(4096, self.config.default_budget.max_memory_bytes);
        self.handle_request_with_arena(raw_bytes, arena).await
    }

    /// The pure entry point (spec §6 `handle_request`): parses `raw_bytes`,
    /// dispatches to a route, drives the interpreter, and returns the
    /// resulting [`Response`]. Touches no socket; callers supply the arena
    /// so tests can pin a tight memory budget.
    pub async fn handle_request_with_arena(&self, raw_bytes: &[u8], arena: Arena) -> Response {
        let request = match parse_request(raw_bytes) {
            Ok(request) => request,
            Err(err) => return wire_error_response(err),
        };

        let request_id = next_request_id(&self.request_seq, &self.instance_nonce);
        let method = request.method.clone();
        let path = request.path.clone();
        let is_asterisk_form = request.is_asterisk_form;

        let mut ctx = CtxBase::new(request, arena, request_id);
        ctx.assertion_policy = self.config.assertion_policy;

        match self.router.dispatch(&method, &path, is_asterisk_form) {
            RouteMatch::Options { allow } => {
                let allow_header = allow.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", ");
                Response::new(200).header("allow", allow_header)
            }
            RouteMatch::NotFound => {
                ctx.last_error = Some(Error::new(ErrorKind::NotFound, "route", format!("no route matches {method} {path}")));
                error_pipeline::render(&mut ctx, &self.error_renderer)
            }
            RouteMatch::Found { route, params, is_head_fallback: _ } => {
                ctx.route_params = params;
                let budget = route.effective_budget(self.config.default_budget);

                let steps: Vec<&Step> = self
                    .global_before
                    .iter()
                    .chain(route.before.iter())
                    .chain(route.steps.iter())
                    .collect();

                let decision = interpreter::run(
                    &mut ctx,
                    &steps,
                    self.config.max_iterations,
                    budget,
                    &self.config.security,
                    &self.handler,
                    self.trace_sink.as_ref(),
                )
                .await;

                // interpreter::run only ever returns Done or Fail (spec
                // §4.4); Continue/Need fall into the same render path only
                // so this match stays exhaustive.
                match decision {
                    Decision::Done(response) => response,
                    Decision::Fail(_) | Decision::Continue | Decision::Need(_) => {
                        error_pipeline::render(&mut ctx, &self.error_renderer)
                    }
                }
            }
        }
    }

    /// Binds `self.config.addr` and serves connections until `shutdown`
    /// receives `true` (spec §11 "Graceful listen() shutdown"). Out of the
    /// core's tested surface (spec §1 scope) — a thin wrapper an embedder
    /// opts into explicitly.
    pub async fn listen(self, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let addr = self.config.addr.clone();
        let server_header = self.config.server_header.clone();
        let listener = TcpListener::bind(&addr).await?;
        let server = Arc::new(self);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(addr = %addr, "listen: shutdown requested");
                        return Ok(());
                    }
                }
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    let server = Arc::clone(&server);
                    let server_header = server_header.clone();
                    tokio::spawn(async move {
                        if let Err(error) = serve_connection(socket, &server, &server_header).await {
                            tracing::warn!(%peer, %error, "connection ended with an error");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    server: &Server,
    server_header: &str,
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut chunk = [0u8; 4096];

    let (response, is_head) = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 && buf.is_empty() {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        match parse_request(&buf) {
            Ok(request) => {
                let is_head = request.method == http::Method::HEAD;
                let arena = Arena::new(4096, server.config.default_budget.max_memory_bytes);
                break (server.handle_request_with_arena(&buf, arena).await, is_head);
            }
            Err(_) if n > 0 => continue,
            Err(err) => break (wire_error_response(err), false),
        }
    };

    let bytes = http_response::serialize(&response, server_header, is_head);
    socket.write_all(&bytes).await?;
    socket.flush().await
}
