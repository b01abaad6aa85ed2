//! The step trampoline (spec §4.2).
//!
//! [`Step`] is the type-erased, route-registrable wrapper around a step
//! function authored against a concrete `CtxView<R, W>`. [`compile_step`]
//! performs the erasure; [`Trampoline::invoke`] drives one call and
//! validates declared-vs-actual slot usage against the active
//! [`AssertionPolicy`].

use crate::config::AssertionPolicy;
use crate::context::bitset::Bitset256;
use crate::context::view::CtxView;
use crate::context::CtxBase;
use crate::decision::{Decision, Error, ErrorKind};
use crate::slot::SlotId;

/// An engine-internal fault (spec §7 "Engine faults"): never constructed
/// by application code, always mapped to `Error{kind: Internal, ..}`
/// before reaching the error pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineFault {
    #[error("slot {0} was read before being written")]
    SlotNotFilled(SlotId),
    #[error("step '{step}' declared read {slot} but never exercised it")]
    UnusedDeclaredRead { step: &'static str, slot: SlotId },
    #[error("step '{step}' declared write {slot} but never exercised it")]
    UnusedDeclaredWrite { step: &'static str, slot: SlotId },
    #[error("pipeline exceeded max_iterations ({0})")]
    IterationCapExceeded(u32),
    #[error("resource budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("step sequence ended without a terminal Decision")]
    PipelineEndedWithoutDecision,
    #[error("step handler panicked: {0}")]
    HandlerPanicked(String),
}

impl From<EngineFault> for Error {
    fn from(fault: EngineFault) -> Self {
        Error::new(ErrorKind::Internal, "engine", fault.to_string())
    }
}

type CompiledRun = Box<dyn Fn(&mut CtxBase) -> (Decision, Bitset256, Bitset256) + Send + Sync>;

/// A type-erased, route-registrable step (spec §3 `Step`).
pub struct Step {
    pub name: &'static str,
    pub declared_reads: Vec<SlotId>,
    pub declared_writes: Vec<SlotId>,
    run: CompiledRun,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Wraps a step function `f: Fn(&mut CtxView<R, W>) -> Decision` into a
/// [`Step`] that the route registry can hold alongside steps written
/// against unrelated `R`/`W` marker types. The view is passed by
/// reference so the trampoline can recover its usage bitsets after the
/// call, for assertion-policy validation (spec §4.2).
pub fn compile_step<R, W, F>(
    name: &'static str,
    declared_reads: Vec<SlotId>,
    declared_writes: Vec<SlotId>,
    f: F,
) -> Step
where
    R: 'static,
    W: 'static,
    F: Fn(&mut CtxView<'_, R, W>) -> Decision + Send + Sync + 'static,
{
    let run: CompiledRun = Box::new(move |base: &mut CtxBase| {
        let mut view: CtxView<'_, R, W> = CtxView::new(base);
        let decision = f(&mut view);
        let (actual_reads, actual_writes) = view.into_usage();
        (decision, actual_reads, actual_writes)
    });
    Step { name, declared_reads, declared_writes, run }
}

/// Drives one step invocation and validates declared-vs-actual slot usage
/// (spec §4.2). Validation only runs in debug builds — in release it is a
/// single `cfg!` check away from being a no-op, matching "compiled out in
/// optimized builds (zero runtime cost)".
pub struct Trampoline;

impl Trampoline {
    pub fn invoke(step: &Step, ctx: &mut CtxBase, policy: AssertionPolicy) -> Decision {
        let (decision, actual_reads, actual_writes) = (step.run)(ctx);

        if cfg!(debug_assertions) {
            if let Some(fault) = Self::validate(step, &decision, &actual_reads, &actual_writes, policy) {
                return Decision::Fail(fault.into());
            }
        }

        decision
    }

    fn validate(
        step: &Step,
        decision: &Decision,
        actual_reads: &Bitset256,
        actual_writes: &Bitset256,
        policy: AssertionPolicy,
    ) -> Option<EngineFault> {
        let declared_reads = Bitset256::from_ids(&step.declared_reads.iter().map(|s| s.0).collect::<Vec<_>>());
        let declared_writes = Bitset256::from_ids(&step.declared_writes.iter().map(|s| s.0).collect::<Vec<_>>());

        match decision {
            Decision::Fail(_) => None,
            Decision::Continue | Decision::Done(_) => {
                if policy.must_use_reads {
                    if let Some(&slot) = declared_reads.difference(actual_reads).first() {
                        return Some(EngineFault::UnusedDeclaredRead { step: step.name, slot: SlotId(slot) });
                    }
                }
                if policy.must_use_writes {
                    if let Some(&slot) = declared_writes.difference(actual_writes).first() {
                        return Some(EngineFault::UnusedDeclaredWrite { step: step.name, slot: SlotId(slot) });
                    }
                }
                None
            }
            Decision::Need(_) => {
                // Declared reads must be exercised before yielding;
                // declared writes may be deferred to the continuation.
                if policy.must_use_reads {
                    if let Some(&slot) = declared_reads.difference(actual_reads).first() {
                        return Some(EngineFault::UnusedDeclaredRead { step: step.name, slot: SlotId(slot) });
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::http::parse::ParsedRequest;

    crate::define_slots! {
        enum Slots { A: bytes::Bytes, B: bytes::Bytes }
    }
    crate::step_perms! { struct Perms; reads: [A]; writes: [B]; }

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
        CtxBase::new(request, Arena::new(64, 1024), "req-1".to_string())
    }

    fn step_with_full_usage() -> Step {
        compile_step::<Perms, Perms, _>("full", vec![A::id()], vec![B::id()], |view| {
            let _ = view.optional::<A>();
            view.put::<B>(bytes::Bytes::from_static(b"x"));
            Decision::Continue
        })
    }

    fn step_with_missing_write() -> Step {
        compile_step::<Perms, Perms, _>("missing_write", vec![A::id()], vec![B::id()], |view| {
            let _ = view.optional::<A>();
            Decision::Continue
        })
    }

    #[test]
    fn full_usage_passes_trampoline() {
        let mut ctx = make_ctx();
        let step = step_with_full_usage();
        let decision = Trampoline::invoke(&step, &mut ctx, AssertionPolicy::default());
        assert!(matches!(decision, Decision::Continue));
    }

    #[test]
    fn unused_declared_write_fails_under_assertion_policy() {
        let mut ctx = make_ctx();
        let step = step_with_missing_write();
        let decision = Trampoline::invoke(&step, &mut ctx, AssertionPolicy::default());
        assert!(matches!(decision, Decision::Fail(_)));
    }
}
