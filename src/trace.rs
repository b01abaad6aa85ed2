//! Structured observability events (spec §4.7, §10.1).
//!
//! [`TraceSink`] is the injected interface; the engine never depends on a
//! concrete sink. [`NoopSink`] is the spec-mandated default. [`TracingSink`]
//! is the ambient, non-noop default this crate ships, built on `tracing` the
//! way `sov-rest-utils::preconfigured_router_layers` wires a per-request
//! span (see `DESIGN.md`).

use std::time::Duration;

use crate::slot::SlotId;

/// Coarse outcome of one effect dispatch, for `effect_end` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectOutcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

/// One lifecycle point the interpreter/executor report (spec §4.7). Every
/// variant carries the `request_id` for correlation.
#[derive(Debug, Clone)]
pub enum Event {
    RequestStart {
        request_id: String,
        method: String,
        path: String,
    },
    StepStart {
        request_id: String,
        step: &'static str,
    },
    StepEnd {
        request_id: String,
        step: &'static str,
        decision: &'static str,
        duration: Duration,
    },
    EffectStart {
        request_id: String,
        effect: &'static str,
        token: SlotId,
    },
    EffectEnd {
        request_id: String,
        effect: &'static str,
        token: SlotId,
        outcome: EffectOutcome,
        duration: Duration,
    },
    SlotWrite {
        request_id: String,
        slot: SlotId,
    },
    RequestEnd {
        request_id: String,
        status: u16,
    },
}

/// Caller-supplied observability sink (spec §6 `TraceSink::emit`).
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// The spec-mandated default: discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// A `tracing`-backed sink shipped as the crate's ambient, non-noop default
/// (spec §10.1). Each lifecycle point becomes one structured `tracing`
/// record carrying `request_id` plus the event's own fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, event: Event) {
        match event {
            Event::RequestStart { request_id, method, path } => {
                tracing::info!(request_id = %request_id, method = %method, path = %path, "request_start");
            }
            Event::StepStart { request_id, step } => {
                tracing::debug!(request_id = %request_id, step, "step_start");
            }
            Event::StepEnd { request_id, step, decision, duration } => {
                tracing::debug!(
                    request_id = %request_id,
                    step,
                    decision,
                    duration_us = duration.as_micros() as u64,
                    "step_end"
                );
            }
            Event::EffectStart { request_id, effect, token } => {
                tracing::debug!(request_id = %request_id, effect, token = %token, "effect_start");
            }
            Event::EffectEnd { request_id, effect, token, outcome, duration } => {
                let outcome_str = match outcome {
                    EffectOutcome::Success => "success",
                    EffectOutcome::Failure => "failure",
                    EffectOutcome::Timeout => "timeout",
                    EffectOutcome::Cancelled => "cancelled",
                };
                if matches!(outcome, EffectOutcome::Success) {
                    tracing::debug!(
                        request_id = %request_id,
                        effect,
                        token = %token,
                        outcome = outcome_str,
                        duration_us = duration.as_micros() as u64,
                        "effect_end"
                    );
                } else {
                    tracing::warn!(
                        request_id = %request_id,
                        effect,
                        token = %token,
                        outcome = outcome_str,
                        duration_us = duration.as_micros() as u64,
                        "effect_end"
                    );
                }
            }
            Event::SlotWrite { request_id, slot } => {
                tracing::debug!(request_id = %request_id, slot = %slot, "slot_write");
            }
            Event::RequestEnd { request_id, status } => {
                if status >= 500 {
                    tracing::error!(request_id = %request_id, status, "request_end");
                } else {
                    tracing::info!(request_id = %request_id, status, "request_end");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_discards_everything() {
        let sink = NoopSink;
        sink.emit(Event::RequestStart { request_id: "r1".into(), method: "GET".into(), path: "/".into() });
        sink.emit(Event::RequestEnd { request_id: "r1".into(), status: 200 });
    }

    #[test]
    fn tracing_sink_does_not_panic_on_any_event() {
        let sink = TracingSink;
        sink.emit(Event::StepStart { request_id: "r1".into(), step: "s" });
        sink.emit(Event::StepEnd { request_id: "r1".into(), step: "s", decision: "Continue", duration: Duration::from_millis(1) });
        sink.emit(Event::EffectStart { request_id: "r1".into(), effect: "DbGet", token: SlotId(0) });
        sink.emit(Event::EffectEnd {
            request_id: "r1".into(),
            effect: "DbGet",
            token: SlotId(0),
            outcome: EffectOutcome::Timeout,
            duration: Duration::from_millis(5),
        });
        sink.emit(Event::SlotWrite { request_id: "r1".into(), slot: SlotId(0) });
    }
}
