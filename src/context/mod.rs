//! The per-request context (spec §3 Request Context).

pub mod bitset;
pub mod view;

use std::collections::HashMap;

use crate::arena::Arena;
use crate::config::AssertionPolicy;
use crate::decision::Error;
use crate::http::parse::ParsedRequest;
use view::SlotStore;

/// Owns everything a request needs: the arena, the parsed request, route
/// params, the slot store, and request-lifetime bookkeeping (spec §3).
/// Created when a request is accepted, mutated only through a
/// [`view::CtxView`], destroyed (arena released, by `Drop`) once the final
/// response is serialized.
pub struct CtxBase {
    pub arena: Arena,
    pub request: ParsedRequest,
    pub route_params: HashMap<String, String>,
    pub slot_store: SlotStore,
    pub last_error: Option<Error>,
    pub request_id: String,
    pub assertion_policy: AssertionPolicy,
    pub iteration: u32,
    pub response_override_headers: Vec<crate::decision::Header>,
    /// Effects dispatched so far this request, checked against
    /// `ResourceBudget::max_total_effects` by the executor (spec §4.5).
    pub effects_dispatched: u32,
    /// Sum of `cpu_budget_ms` over `Compute` effects dispatched so far this
    /// request, checked against `ResourceBudget::max_cpu_ms` by the executor
    /// (spec §4.5: `max_cpu_ms` bounds compute effects "per effect and per
    /// request").
    pub compute_cpu_ms_used: u64,
}

impl CtxBase {
    pub fn new(request: ParsedRequest, arena: Arena, request_id: String) -> Self {
        Self {
            arena,
            request,
            route_params: HashMap::new(),
            slot_store: SlotStore::new(),
            last_error: None,
            request_id,
            assertion_policy: AssertionPolicy::default(),
            iteration: 0,
            response_override_headers: Vec::new(),
            effects_dispatched: 0,
            compute_cpu_ms_used: 0,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.route_params.get(name).map(|s| s.as_str())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}
