//! The effect executor: sequential/parallel dispatch, join strategies,
//! compensations, cancellation, and budgets (spec §4.5, §5).
//!
//! Grounded on `sov-sequencer::Sequencer::submit_batch`'s mutex-guarded
//! batch-processing idiom (one `tokio`-driven batch of work per call,
//! `tracing::info!` at each lifecycle point), generalized here from one
//! DA-submission batch to an arbitrary batch of [`Effect`]s (see
//! `DESIGN.md`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::config::{ResourceBudget, SecurityPolicy};
use crate::context::CtxBase;
use crate::decision::{CompensateAction, Effect, Error, ErrorKind, Join, Mode, Need};
use crate::slot::SlotId;
use crate::trace::{EffectOutcome, Event, TraceSink};

/// Caller-supplied effect handler (spec §6 `EffectHandler(&Effect, token) ->
/// Result<EffectResult, Error>`). Effect results are raw bytes into the
/// slot named by `token` unless the effect is itself a typed variant (spec
/// §9 Open Question (a)); a `Compute` handler that wants to hand back a
/// structured value serializes it before returning.
#[async_trait::async_trait]
pub trait EffectHandler: Send + Sync {
    async fn handle(&self, effect: &Effect, token: SlotId) -> Result<bytes::Bytes, Error>;
}

fn budget_exceeded(reason: impl Into<String>) -> Error {
    Error::new(ErrorKind::Internal, "executor", reason)
}

fn timeout_error(effect: &Effect) -> Error {
    Error::new(ErrorKind::Timeout, "executor", format!("{} timed out", effect.kind_name()))
}

/// Enforces `ResourceBudget::max_cpu_ms` against `Compute` effects, both per
/// effect and cumulatively per request (spec §4.5 Budgets). Any other effect
/// kind, including a `Compensate` wrapping one, has no compute budget and
/// passes through — compensation actions are delete/restore/rollback, never
/// recomputation.
fn check_compute_budget(ctx: &mut CtxBase, effect: &Effect, budget: &ResourceBudget) -> Result<(), Error> {
    let Effect::Compute { cpu_budget_ms, .. } = effect else { return Ok(()) };

    if *cpu_budget_ms > budget.max_cpu_ms {
        return Err(budget_exceeded(format!(
            "compute cpu_budget_ms {cpu_budget_ms} exceeds max_cpu_ms ({})",
            budget.max_cpu_ms
        )));
    }

    let projected = ctx.compute_cpu_ms_used.saturating_add(*cpu_budget_ms);
    if projected > budget.max_cpu_ms {
        return Err(budget_exceeded(format!(
            "cumulative compute cpu_budget_ms for this request would reach {projected}, exceeding max_cpu_ms ({})",
            budget.max_cpu_ms
        )));
    }
    ctx.compute_cpu_ms_used = projected;
    Ok(())
}

fn effect_timeout(effect: &Effect, security: &SecurityPolicy) -> Duration {
    match effect {
        Effect::HttpCall { timeout_ms, .. } => Duration::from_millis(*timeout_ms),
        Effect::Compute { timeout_ms, .. } => Duration::from_millis(*timeout_ms),
        _ => Duration::from_millis(security.default_timeout_ms),
    }
}

/// Executes one `Need` batch to completion, writing results (or empty
/// failure markers for non-required failures) into the slots named by each
/// effect's `token`, then returns. `Err` means the whole batch failed and
/// the pipeline must terminate with that error (spec §4.5).
pub async fn run_batch(
    ctx: &mut CtxBase,
    need: &Need,
    budget: &ResourceBudget,
    security: &SecurityPolicy,
    handler: &Arc<dyn EffectHandler>,
    sink: &dyn TraceSink,
) -> Result<(), Error> {
    let remaining_budget = (budget.max_total_effects as u64).saturating_sub(ctx.effects_dispatched as u64);
    if (need.effects.len() as u64) > remaining_budget {
        return Err(budget_exceeded(format!(
            "batch of {} effects would exceed max_total_effects ({})",
            need.effects.len(),
            budget.max_total_effects
        )));
    }

    for effect in &need.effects {
        crate::security::validate_effect(effect, security, budget)?;
        check_compute_budget(ctx, effect, budget)?;
    }

    match need.mode {
        Mode::Sequential => run_sequential(ctx, need, budget, security, handler, sink).await,
        Mode::Parallel => run_parallel(ctx, need, budget, security, handler, sink).await,
    }
}

fn write_result(ctx: &mut CtxBase, token: SlotId, bytes: bytes::Bytes, sink: &dyn TraceSink) -> Result<(), Error> {
    let arena_bytes = ctx.arena.alloc(&bytes)?;
    ctx.slot_store.insert_raw(token.0, arena_bytes);
    sink.emit(Event::SlotWrite { request_id: ctx.request_id.clone(), slot: token });
    Ok(())
}

async fn dispatch_one(
    effect: &Effect,
    security: &SecurityPolicy,
    handler: &Arc<dyn EffectHandler>,
    sink: &dyn TraceSink,
    request_id: &str,
) -> (EffectOutcome, Result<bytes::Bytes, Error>) {
    sink.emit(Event::EffectStart { request_id: request_id.to_string(), effect: effect.kind_name(), token: effect.token() });
    let start = Instant::now();
    let timeout = effect_timeout(effect, security);
    let outcome = match tokio::time::timeout(timeout, handler.handle(effect, effect.token())).await {
        Ok(Ok(bytes)) => (EffectOutcome::Success, Ok(bytes)),
        Ok(Err(err)) => (EffectOutcome::Failure, Err(err)),
        Err(_elapsed) => (EffectOutcome::Timeout, Err(timeout_error(effect))),
    };
    sink.emit(Event::EffectEnd {
        request_id: request_id.to_string(),
        effect: effect.kind_name(),
        token: effect.token(),
        outcome: outcome.0,
        duration: start.elapsed(),
    });
    outcome
}

/// Runs compensations for `completed` effect indices, in reverse order
/// (spec §4.5). Best-effort: a compensation failure is logged but never
/// blocks running the rest, and never alters the response (spec §7).
async fn run_compensations(
    need: &Need,
    completed: &[usize],
    budget: &ResourceBudget,
    security: &SecurityPolicy,
    handler: &Arc<dyn EffectHandler>,
    sink: &dyn TraceSink,
    request_id: &str,
) {
    for &idx in completed.iter().rev() {
        let Some(Some(original)) = need.compensations.get(idx) else { continue };
        let compensation = Effect::Compensate {
            original: Box::new(original.clone()),
            action: infer_action(original),
        };
        if crate::security::validate_effect(&compensation, security, budget).is_err() {
            continue;
        }
        let (outcome, result) = dispatch_one(&compensation, security, handler, sink, request_id).await;
        if matches!(outcome, EffectOutcome::Failure | EffectOutcome::Timeout) {
            tracing::warn!(
                request_id,
                effect = compensation.kind_name(),
                error = ?result.err(),
                "compensation failed, continuing with remaining compensations"
            );
        }
    }
}

fn infer_action(original: &Effect) -> CompensateAction {
    match original {
        Effect::DbPut { .. } => CompensateAction::DbDelete,
        Effect::DbDel { .. } => CompensateAction::DbRestore,
        Effect::HttpCall { .. } => CompensateAction::HttpRollback,
        _ => CompensateAction::Custom,
    }
}

async fn run_sequential(
    ctx: &mut CtxBase,
    need: &Need,
    budget: &ResourceBudget,
    security: &SecurityPolicy,
    handler: &Arc<dyn EffectHandler>,
    sink: &dyn TraceSink,
) -> Result<(), Error> {
    let request_id = ctx.request_id.clone();
    let mut completed = Vec::new();

    for (idx, effect) in need.effects.iter().enumerate() {
        ctx.effects_dispatched += 1;
        let (outcome, result) = dispatch_one(effect, security, handler, sink, &request_id).await;
        match result {
            Ok(bytes) => {
                write_result(ctx, effect.token(), bytes, sink)?;
                completed.push(idx);
            }
            Err(err) => {
                let required = effect.required() || matches!(need.join, Join::AllRequired);
                if required {
                    run_compensations(need, &completed, budget, security, handler, sink, &request_id).await;
                    return Err(err);
                }
                debug_assert!(matches!(outcome, EffectOutcome::Failure | EffectOutcome::Timeout));
                write_result(ctx, effect.token(), bytes::Bytes::new(), sink)?;
            }
        }
    }
    Ok(())
}

enum TaskResult {
    Success { idx: usize, bytes: bytes::Bytes },
    Failure { idx: usize, err: Error },
}

async fn run_parallel(
    ctx: &mut CtxBase,
    need: &Need,
    budget: &ResourceBudget,
    security: &SecurityPolicy,
    handler: &Arc<dyn EffectHandler>,
    sink: &dyn TraceSink,
) -> Result<(), Error> {
    let request_id = ctx.request_id.clone();
    let concurrency = budget.max_concurrent_effects.max(1);

    let mut pending: Vec<usize> = (0..need.effects.len()).collect();
    let mut in_flight: JoinSet<TaskResult> = JoinSet::new();
    let mut completed: Vec<usize> = Vec::new();
    let mut first_success = false;
    let mut failure: Option<Error> = None;

    let spawn_next = |in_flight: &mut JoinSet<TaskResult>, pending: &mut Vec<usize>| {
        if pending.is_empty() {
            return;
        }
        let idx = pending.remove(0);
        let effect = need.effects[idx].clone();
        let security = security.clone();
        let handler = Arc::clone(handler);
        let timeout = effect_timeout(&effect, &security);
        in_flight.spawn(async move {
            match tokio::time::timeout(timeout, handler.handle(&effect, effect.token())).await {
                Ok(Ok(bytes)) => TaskResult::Success { idx, bytes },
                Ok(Err(err)) => TaskResult::Failure { idx, err },
                Err(_elapsed) => TaskResult::Failure { idx, err: timeout_error(&effect) },
            }
        });
    };

    for _ in 0..concurrency.min(need.effects.len()) {
        spawn_next(&mut in_flight, &mut pending);
    }

    ctx.effects_dispatched += need.effects.len() as u32;

    while let Some(joined) = in_flight.join_next().await {
        let result = joined.unwrap_or_else(|join_err| TaskResult::Failure {
            idx: usize::MAX,
            err: Error::new(ErrorKind::Internal, "executor", format!("effect task panicked: {join_err}")),
        });

        match result {
            TaskResult::Success { idx, bytes } => {
                sink.emit(Event::EffectEnd {
                    request_id: request_id.clone(),
                    effect: need.effects.get(idx).map(Effect::kind_name).unwrap_or("unknown"),
                    token: need.effects.get(idx).map(Effect::token).unwrap_or(SlotId(u32::MAX)),
                    outcome: EffectOutcome::Success,
                    duration: Duration::ZERO,
                });
                write_result(ctx, need.effects[idx].token(), bytes, sink)?;
                completed.push(idx);
                first_success = true;

                let done = match need.join {
                    Join::Any | Join::FirstSuccess => true,
                    Join::All | Join::AllRequired => false,
                };
                if done {
                    if matches!(need.join.cancellation_policy(), crate::decision::CancellationPolicy::CancelAndCompensate | crate::decision::CancellationPolicy::CancelOnly) {
                        in_flight.abort_all();
                    }
                    break;
                }

                if !pending.is_empty() {
                    spawn_next(&mut in_flight, &mut pending);
                }
            }
            TaskResult::Failure { idx, err } => {
                let outcome = if matches!(err.kind, ErrorKind::Timeout) { EffectOutcome::Timeout } else { EffectOutcome::Failure };
                sink.emit(Event::EffectEnd {
                    request_id: request_id.clone(),
                    effect: need.effects.get(idx).map(Effect::kind_name).unwrap_or("unknown"),
                    token: need.effects.get(idx).map(Effect::token).unwrap_or(SlotId(u32::MAX)),
                    outcome,
                    duration: Duration::ZERO,
                });

                // Parallel join semantics decide fatality by policy alone
                // (spec §4.5): only `AllRequired` aborts the batch on the
                // first failure; `All`/`Any`/`FirstSuccess` record the
                // failure and keep draining the rest.
                if matches!(need.join, Join::AllRequired) {
                    in_flight.abort_all();
                    run_compensations(need, &completed, budget, security, handler, sink, &request_id).await;
                    return Err(err);
                }

                if idx != usize::MAX {
                    write_result(ctx, need.effects[idx].token(), bytes::Bytes::new(), sink)?;
                }
                failure.get_or_insert(err);

                if !pending.is_empty() {
                    spawn_next(&mut in_flight, &mut pending);
                }
            }
        }
    }

    match need.join {
        Join::FirstSuccess if !first_success => Err(failure.unwrap_or_else(|| Error::new(ErrorKind::UpstreamUnavailable, "executor", "all effects in batch failed"))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::decision::Mode;
    use crate::http::parse::ParsedRequest;
    use crate::trace::NoopSink;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct TableHandler {
        table: Mutex<HashMap<String, Result<bytes::Bytes, Error>>>,
    }

    impl TableHandler {
        fn new(entries: Vec<(&str, Result<bytes::Bytes, Error>)>) -> Arc<dyn EffectHandler> {
            Arc::new(Self { table: Mutex::new(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()) })
        }
    }

    fn key(effect: &Effect) -> String {
        match effect {
            Effect::DbGet { key, .. } => key.clone(),
            Effect::DbPut { key, .. } => key.clone(),
            Effect::DbDel { key, .. } => key.clone(),
            _ => "other".to_string(),
        }
    }

    #[async_trait::async_trait]
    impl EffectHandler for TableHandler {
        async fn handle(&self, effect: &Effect, _token: SlotId) -> Result<bytes::Bytes, Error> {
            let table = self.table.lock().unwrap();
            table.get(&key(effect)).cloned().unwrap_or_else(|| Err(Error::new(ErrorKind::NotFound, "effect", "unseeded")))
        }
    }

    fn make_ctx() -> CtxBase {
        let request = ParsedRequest {
            method: http::Method::GET,
            path: "/".to_string(),
            raw_path: "/".to_string(),
            query: Vec::new(),
            headers: crate::http::Headers::new(),
            body: bytes::Bytes::new(),
            is_asterisk_form: false,
        };
        CtxBase::new(request, Arena::new(4096, 1024 * 1024), "req-1".to_string())
    }

    #[tokio::test]
    async fn sequential_batch_writes_all_results_in_order() {
        let mut ctx = make_ctx();
        let handler = TableHandler::new(vec![
            ("a", Ok(bytes::Bytes::from_static(b"1"))),
            ("b", Ok(bytes::Bytes::from_static(b"2"))),
        ]);
        let need = Need::sequential(vec![
            Effect::DbGet { key: "a".to_string(), token: SlotId(0), required: true },
            Effect::DbGet { key: "b".to_string(), token: SlotId(1), required: true },
        ]);
        run_batch(&mut ctx, &need, &ResourceBudget::default(), &SecurityPolicy::default(), &handler, &NoopSink)
            .await
            .unwrap();
        assert_eq!(&ctx.slot_store.get_raw(0).unwrap()[..], b"1");
        assert_eq!(&ctx.slot_store.get_raw(1).unwrap()[..], b"2");
    }

    #[tokio::test]
    async fn sequential_required_failure_compensates_completed_in_reverse() {
        let mut ctx = make_ctx();
        let handler = TableHandler::new(vec![
            ("a", Ok(bytes::Bytes::from_static(b"ok"))),
            ("b", Err(Error::new(ErrorKind::Internal, "b", "boom"))),
        ]);
        let need = Need {
            effects: vec![
                Effect::DbPut { key: "a".to_string(), value: bytes::Bytes::new(), token: SlotId(0), idempotency_key: None },
                Effect::DbPut { key: "b".to_string(), value: bytes::Bytes::new(), token: SlotId(1), idempotency_key: None },
            ],
            mode: Mode::Sequential,
            join: Join::AllRequired,
            compensations: vec![
                Some(Effect::DbDel { key: "a".to_string(), token: SlotId(0) }),
                Some(Effect::DbDel { key: "b".to_string(), token: SlotId(1) }),
            ],
            continuation: None,
        };
        let err = run_batch(&mut ctx, &need, &ResourceBudget::default(), &SecurityPolicy::default(), &handler, &NoopSink)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn batch_over_total_effects_budget_is_rejected() {
        let mut ctx = make_ctx();
        ctx.effects_dispatched = 49;
        let handler = TableHandler::new(vec![]);
        let need = Need::sequential(vec![
            Effect::DbGet { key: "a".to_string(), token: SlotId(0), required: true },
            Effect::DbGet { key: "b".to_string(), token: SlotId(1), required: true },
        ]);
        let budget = ResourceBudget { max_total_effects: 50, ..ResourceBudget::default() };
        let err = run_batch(&mut ctx, &need, &budget, &SecurityPolicy::default(), &handler, &NoopSink).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn compute_effect_over_max_cpu_ms_is_rejected() {
        let mut ctx = make_ctx();
        let handler = TableHandler::new(vec![]);
        let need = Need::sequential(vec![Effect::Compute {
            operation: "resize".to_string(),
            input_slots: vec![],
            token: SlotId(0),
            timeout_ms: 1_000,
            cpu_budget_ms: 10_000,
            priority: 0,
        }]);
        let budget = ResourceBudget { max_cpu_ms: 5_000, ..ResourceBudget::default() };
        let err = run_batch(&mut ctx, &need, &budget, &SecurityPolicy::default(), &handler, &NoopSink).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn compute_effects_within_per_effect_budget_but_over_cumulative_are_rejected() {
        let mut ctx = make_ctx();
        ctx.compute_cpu_ms_used = 4_000;
        let handler = TableHandler::new(vec![]);
        let need = Need::sequential(vec![Effect::Compute {
            operation: "resize".to_string(),
            input_slots: vec![],
            token: SlotId(0),
            timeout_ms: 1_000,
            cpu_budget_ms: 2_000,
            priority: 0,
        }]);
        let budget = ResourceBudget { max_cpu_ms: 5_000, ..ResourceBudget::default() };
        let err = run_batch(&mut ctx, &need, &budget, &SecurityPolicy::default(), &handler, &NoopSink).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn parallel_all_required_joins_both_results() {
        let mut ctx = make_ctx();
        let handler = TableHandler::new(vec![
            ("user:1", Ok(bytes::Bytes::from_static(br#"{"plan":"pro"}"#))),
            ("quota:1", Ok(bytes::Bytes::from_static(br#"{"remaining":3}"#))),
        ]);
        let need = Need::parallel(
            vec![
                Effect::DbGet { key: "user:1".to_string(), token: SlotId(0), required: true },
                Effect::DbGet { key: "quota:1".to_string(), token: SlotId(1), required: true },
            ],
            Join::AllRequired,
        );
        run_batch(&mut ctx, &need, &ResourceBudget::default(), &SecurityPolicy::default(), &handler, &NoopSink)
            .await
            .unwrap();
        assert!(ctx.slot_store.get_raw(0).is_some());
        assert!(ctx.slot_store.get_raw(1).is_some());
    }
}
