//! Route registry and dispatcher (spec §4.3).
//!
//! Patterns are compiled once, at registration time, into a small sequence
//! of [`Segment`]s. Dispatch walks every registered pattern for the request
//! method (plus `GET` for a `HEAD` request, spec rule 7) and ranks the
//! candidates that match by the precedence spec §4.3 rule 2 defines: longest
//! literal prefix, fewest parameters, declaration order.

use std::collections::HashMap;

use crate::step::Step;

use crate::config::ResourceBudget;

/// `{ before?, steps, budget? }` (spec §3 `RouteSpec`).
pub struct RouteSpec {
    pub before: Vec<Step>,
    pub steps: Vec<Step>,
    pub budget: Option<ResourceBudget>,
}

impl RouteSpec {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { before: Vec::new(), steps, budget: None }
    }

    pub fn with_before(mut self, before: Vec<Step>) -> Self {
        self.before = before;
        self
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// The budget a request on this route runs under: the route's own
    /// override, merged over `default_budget`, or `default_budget` verbatim
    /// (spec §3 RouteSpec leaves inheritance open; resolved in
    /// `SPEC_FULL.md` §11 / `DESIGN.md`).
    pub fn effective_budget(&self, default_budget: ResourceBudget) -> ResourceBudget {
        match self.budget {
            Some(route_budget) => default_budget.merge(route_budget),
            None => default_budget,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

fn compile_pattern(pattern: &str) -> CompiledPattern {
    let raw_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw_segments.len());
    for (i, raw) in raw_segments.iter().enumerate() {
        if let Some(name) = raw.strip_prefix(':') {
            assert!(!name.is_empty(), "route pattern {pattern:?}: empty :param name");
            segments.push(Segment::Param(name.to_string()));
        } else if let Some(name) = raw.strip_prefix('*') {
            assert!(!name.is_empty(), "route pattern {pattern:?}: empty *wildcard name");
            assert!(i == raw_segments.len() - 1, "route pattern {pattern:?}: *wildcard must be the last segment");
            segments.push(Segment::Wildcard(name.to_string()));
        } else {
            segments.push(Segment::Literal(raw.to_string()));
        }
    }
    let literal_count = segments.iter().filter(|s| matches!(s, Segment::Literal(_))).count();
    let param_count = segments.iter().filter(|s| matches!(s, Segment::Param(_))).count();
    let has_wildcard = segments.iter().any(|s| matches!(s, Segment::Wildcard(_)));
    CompiledPattern { segments, literal_count, param_count, has_wildcard }
}

/// A compiled pattern plus the precedence key it sorts by (spec §4.3 rule 2).
struct CompiledPattern {
    segments: Vec<Segment>,
    literal_count: usize,
    param_count: usize,
    has_wildcard: bool,
}

/// Matches `path_segments` against a compiled pattern, returning the
/// extracted, percent-decoded parameter bindings on success.
fn match_segments(compiled: &CompiledPattern, path_segments: &[&str]) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut pi = 0usize;
    for seg in &compiled.segments {
        match seg {
            Segment::Literal(lit) => {
                let actual = path_segments.get(pi)?;
                if actual != lit {
                    return None;
                }
                pi += 1;
            }
            Segment::Param(name) => {
                let actual = path_segments.get(pi)?;
                let decoded = crate::http::percent::decode_utf8(actual)?;
                params.insert(name.clone(), decoded);
                pi += 1;
            }
            Segment::Wildcard(name) => {
                let rest = &path_segments[pi.min(path_segments.len())..];
                let joined = rest.join("/");
                let decoded = crate::http::percent::decode_utf8(&joined)?;
                params.insert(name.clone(), decoded);
                return Some(params);
            }
        }
    }
    if pi == path_segments.len() {
        Some(params)
    } else {
        None
    }
}

struct Entry {
    method: http::Method,
    pattern: String,
    compiled: CompiledPattern,
    spec: RouteSpec,
    seq: usize,
}

/// The route registry (spec §4.3). Routes are appended in declaration order;
/// re-registering the same `(method, pattern)` replaces the existing entry
/// in place, preserving its original position (spec §6 `add_route`: "duplicate
/// (method, path) replaces the previous").
#[derive(Default)]
pub struct Router {
    entries: Vec<Entry>,
    next_seq: usize,
}

/// The outcome of dispatching one request (spec §4.3, §4.4).
pub enum RouteMatch<'a> {
    Found {
        route: &'a RouteSpec,
        params: HashMap<String, String>,
        /// Set when this is a `HEAD` request satisfied by falling back to
        /// the path's registered `GET` route (spec §4.3 rule 7).
        is_head_fallback: bool,
    },
    /// `OPTIONS <path>` or `OPTIONS *` with no step sequence to run; the
    /// dispatcher's caller synthesizes the 200 response directly (spec §4.3
    /// rule 6).
    Options { allow: Vec<http::Method> },
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spec` under `(method, pattern)`. Panics on a malformed
    /// pattern (empty `:name`/`*name`, a non-trailing wildcard) — these are
    /// programmer errors caught at startup, not request-time failures,
    /// matching the teacher's axum-router registration idiom.
    pub fn add_route(&mut self, method: http::Method, pattern: &str, spec: RouteSpec) {
        let compiled = compile_pattern(pattern);
        if let Some(existing) = self.entries.iter_mut().find(|e| e.method == method && e.pattern == pattern) {
            existing.compiled = compiled;
            existing.spec = spec;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { method, pattern: pattern.to_string(), compiled, spec, seq });
    }

    fn candidates<'a>(&'a self, method: &http::Method, path_segments: &[&str]) -> Vec<(&'a Entry, HashMap<String, String>)> {
        let mut out: Vec<(&Entry, HashMap<String, String>)> = self
            .entries
            .iter()
            .filter(|e| &e.method == method)
            .filter_map(|e| match_segments(&e.compiled, path_segments).map(|params| (e, params)))
            .collect();
        out.sort_by(|(a, _), (b, _)| {
            b.compiled
                .literal_count
                .cmp(&a.compiled.literal_count)
                .then(a.compiled.param_count.cmp(&b.compiled.param_count))
                .then(a.compiled.has_wildcard.cmp(&b.compiled.has_wildcard))
                .then(a.seq.cmp(&b.seq))
        });
        out
    }

    /// All methods with a registered route matching `path`, plus `OPTIONS`
    /// (always present) and `HEAD` (when `GET` is registered) — spec §4.3
    /// rule 6.
    pub fn allowed_methods(&self, path: &str) -> Vec<http::Method> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut methods: Vec<http::Method> = self
            .entries
            .iter()
            .filter(|e| match_segments(&e.compiled, &path_segments).is_some())
            .map(|e| e.method.clone())
            .collect();
        if methods.contains(&http::Method::GET) && !methods.contains(&http::Method::HEAD) {
            methods.push(http::Method::HEAD);
        }
        if !methods.contains(&http::Method::OPTIONS) {
            methods.push(http::Method::OPTIONS);
        }
        methods.sort_by_key(|m| m.to_string());
        methods.dedup();
        methods
    }

    /// Dispatches `(method, path)` to a route (spec §4.3, §4.4).
    pub fn dispatch(&self, method: &http::Method, path: &str, is_asterisk_form: bool) -> RouteMatch<'_> {
        if *method == http::Method::OPTIONS {
            if is_asterisk_form {
                return RouteMatch::Options { allow: vec![http::Method::OPTIONS] };
            }
            return RouteMatch::Options { allow: self.allowed_methods(path) };
        }

        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let direct = self.candidates(method, &path_segments);
        if let Some((entry, params)) = direct.into_iter().next() {
            return RouteMatch::Found { route: &entry.spec, params, is_head_fallback: false };
        }

        if *method == http::Method::HEAD {
            let fallback = self.candidates(&http::Method::GET, &path_segments);
            if let Some((entry, params)) = fallback.into_iter().next() {
                return RouteMatch::Found { route: &entry.spec, params, is_head_fallback: true };
            }
        }

        RouteMatch::NotFound
    }
}
