//! The pipeline interpreter: drives steps to the next boundary, loops with
//! the effect executor, and enforces the iteration cap (spec §4.4).

use std::sync::Arc;
use std::time::Instant;

use crate::config::{ResourceBudget, SecurityPolicy};
use crate::context::CtxBase;
use crate::decision::{Decision, Error};
use crate::executor::{self, EffectHandler};
use crate::step::{EngineFault, Step, Trampoline};
use crate::trace::{Event, TraceSink};

fn decision_tag(decision: &Decision) -> &'static str {
    match decision {
        Decision::Continue => "Continue",
        Decision::Need(_) => "Need",
        Decision::Done(_) => "Done",
        Decision::Fail(_) => "Fail",
    }
}

/// What the main loop should do after handling one step's (or
/// continuation's) decision.
enum StepOutcome {
    Advance,
    Terminal(Decision),
}

/// Drives `steps` (already `global_before ++ route.before ++ route.steps`,
/// spec §4.4) against `ctx` to a terminal `Decision`. Returns `Done` or
/// `Fail` only — `Continue`/`Need` never escape this function.
pub async fn run(
    ctx: &mut CtxBase,
    steps: &[&Step],
    max_iterations: u32,
    budget: ResourceBudget,
    security: &SecurityPolicy,
    handler: &Arc<dyn EffectHandler>,
    sink: &dyn TraceSink,
) -> Decision {
    sink.emit(Event::RequestStart {
        request_id: ctx.request_id.clone(),
        method: ctx.request.method.to_string(),
        path: ctx.request.path.clone(),
    });

    let mut idx = 0usize;
    loop {
        if idx >= steps.len() {
            return terminal(ctx, sink, EngineFault::PipelineEndedWithoutDecision.into());
        }

        ctx.iteration += 1;
        if ctx.iteration > max_iterations {
            return terminal(ctx, sink, EngineFault::IterationCapExceeded(max_iterations).into());
        }

        let step = steps[idx];
        sink.emit(Event::StepStart { request_id: ctx.request_id.clone(), step: step.name });
        let t0 = Instant::now();
        let decision = Trampoline::invoke(step, ctx, ctx.assertion_policy);
        sink.emit(Event::StepEnd {
            request_id: ctx.request_id.clone(),
            step: step.name,
            decision: decision_tag(&decision),
            duration: t0.elapsed(),
        });

        match run_decision(ctx, decision, &budget, security, handler, sink, max_iterations).await {
            StepOutcome::Advance => idx += 1,
            StepOutcome::Terminal(decision) => return terminal(ctx, sink, unwrap_terminal(decision)),
        }
    }
}

/// A terminal `Decision` is always exactly `Done` or `Fail` by construction
/// of [`run_decision`]; this just documents that invariant at the boundary.
fn unwrap_terminal(decision: Decision) -> Decision {
    debug_assert!(matches!(decision, Decision::Done(_) | Decision::Fail(_)));
    decision
}

fn terminal(ctx: &mut CtxBase, sink: &dyn TraceSink, decision: Decision) -> Decision {
    let status = match &decision {
        Decision::Done(response) => response.status,
        Decision::Fail(error) => {
            ctx.last_error = Some(error.clone());
            error.kind.status()
        }
        _ => 500,
    };
    sink.emit(Event::RequestEnd { request_id: ctx.request_id.clone(), status });
    decision
}

/// Handles one `Decision`, recursing through `continuation`s until the
/// trajectory reaches `Continue` (hand control back to the main loop),
/// `Done`, or `Fail` (spec §4.4, §9 "coroutine-like control flow").
fn run_decision<'a>(
    ctx: &'a mut CtxBase,
    decision: Decision,
    budget: &'a ResourceBudget,
    security: &'a SecurityPolicy,
    handler: &'a Arc<dyn EffectHandler>,
    sink: &'a dyn TraceSink,
    max_iterations: u32,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = StepOutcome> + Send + 'a>> {
    Box::pin(async move {
        match decision {
            Decision::Continue => StepOutcome::Advance,
            Decision::Done(response) => StepOutcome::Terminal(Decision::Done(response)),
            Decision::Fail(error) => {
                ctx.last_error = Some(error.clone());
                StepOutcome::Terminal(Decision::Fail(error))
            }
            Decision::Need(need) => {
                let continuation = need.continuation.clone();
                if let Err(error) = executor::run_batch(ctx, &need, budget, security, handler, sink).await {
                    ctx.last_error = Some(error.clone());
                    return StepOutcome::Terminal(Decision::Fail(error));
                }

                match continuation {
                    Some(continuation) => {
                        ctx.iteration += 1;
                        if ctx.iteration > max_iterations {
                            let fault: Error = EngineFault::IterationCapExceeded(max_iterations).into();
                            return StepOutcome::Terminal(Decision::Fail(fault));
                        }
                        sink.emit(Event::StepStart { request_id: ctx.request_id.clone(), step: continuation.name });
                        let t0 = Instant::now();
                        let next_decision = (continuation.run)(ctx);
                        sink.emit(Event::StepEnd {
                            request_id: ctx.request_id.clone(),
                            step: continuation.name,
                            decision: decision_tag(&next_decision),
                            duration: t0.elapsed(),
                        });
                        run_decision(ctx, next_decision, budget, security, handler, sink, max_iterations).await
                    }
                    None => StepOutcome::Advance,
                }
            }
        }
    })
}
