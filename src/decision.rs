//! The Decision and Effect intermediate representations (spec §3).
//!
//! Steps are pure: they read/write slots through a [`crate::context::view::CtxView`]
//! and return a [`Decision`] describing what should happen next. Everything
//! impure — I/O, compute — is represented as data (an [`Effect`]) for the
//! [`crate::executor`] to carry out.

use std::fmt;

use smallvec::SmallVec;

use crate::slot::SlotId;

/// An HTTP response header. Names are lowercase once parsed/declared;
/// original casing (for values set by application code) is preserved as
/// given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A complete or streaming response body.
#[derive(Debug, Clone)]
pub enum Body {
    Complete(bytes::Bytes),
    /// An opaque handle to a streaming body source. The core ships no
    /// concrete streaming backend (spec §1 scope); this variant exists so
    /// embedders can plug one in without changing the `Response` shape.
    Streaming(StreamHandle),
}

/// Opaque streaming body handle. Equality/Debug are handle-identity only.
#[derive(Clone)]
pub struct StreamHandle(pub std::sync::Arc<dyn StreamSource>);

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamHandle(..)")
    }
}

/// A source of streamed body chunks, supplied by an embedder.
pub trait StreamSource: Send + Sync {
    fn next_chunk(&self) -> Option<bytes::Bytes>;
}

/// `{ status, headers: SmallVec<Header, 4>, body }` (spec §3).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: SmallVec<[Header; 4]>,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: SmallVec::new(),
            body: Body::Complete(bytes::Bytes::new()),
        }
    }

    pub fn with_body(status: u16, body: impl Into<bytes::Bytes>) -> Self {
        Self {
            status,
            headers: SmallVec::new(),
            body: Body::Complete(body.into()),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Error classification (spec §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    TooManyRequests,
    UpstreamUnavailable,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// `InvalidInput→400, NotFound→404, ... Internal→500` (spec §4.8).
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::UpstreamUnavailable => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }
}

/// `{ kind, entity, reason, context? }` (spec §3). Data, not
/// `std::error::Error` — it crosses the step/continuation boundary and is
/// rendered by an [`crate::error_pipeline::ErrorRenderer`], not propagated with `?`.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub entity: String,
    pub reason: String,
    pub context: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            reason: reason.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({:?})", self.entity, self.reason, self.kind)
    }
}

/// Cancellation behavior for effects still in flight when a `Join` policy
/// is satisfied early (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationPolicy {
    CompleteAll,
    CancelOnly,
    CancelAndCompensate,
}

/// What undoes an already-completed effect on batch failure (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensateAction {
    DbDelete,
    DbRestore,
    HttpRollback,
    Custom,
}

/// The effect sum type (spec §3). Every variant carries a `token`: the slot
/// the executor writes its raw result into.
#[derive(Debug, Clone)]
pub enum Effect {
    DbGet {
        key: String,
        token: SlotId,
        required: bool,
    },
    DbPut {
        key: String,
        value: bytes::Bytes,
        token: SlotId,
        idempotency_key: Option<String>,
    },
    DbDel {
        key: String,
        token: SlotId,
    },
    DbQuery {
        sql: String,
        params: Vec<String>,
        token: SlotId,
    },
    HttpCall {
        method: http::Method,
        url: String,
        headers: Vec<Header>,
        body: Option<bytes::Bytes>,
        token: SlotId,
        timeout_ms: u64,
    },
    Compute {
        operation: String,
        input_slots: Vec<SlotId>,
        token: SlotId,
        timeout_ms: u64,
        cpu_budget_ms: u64,
        priority: u8,
    },
    Compensate {
        original: Box<Effect>,
        action: CompensateAction,
    },
}

impl Effect {
    /// The slot this effect's result (or failure marker) is written to.
    pub fn token(&self) -> SlotId {
        match self {
            Effect::DbGet { token, .. }
            | Effect::DbPut { token, .. }
            | Effect::DbDel { token, .. }
            | Effect::DbQuery { token, .. }
            | Effect::HttpCall { token, .. }
            | Effect::Compute { token, .. } => *token,
            Effect::Compensate { original, .. } => original.token(),
        }
    }

    /// Whether the caller marked this effect as required to succeed (spec
    /// §4.5 sequential mode; defaults to `true` for effect kinds that carry
    /// no explicit flag, since silent partial failure should be opt-in).
    pub fn required(&self) -> bool {
        match self {
            Effect::DbGet { required, .. } => *required,
            _ => true,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Effect::DbGet { .. } => "DbGet",
            Effect::DbPut { .. } => "DbPut",
            Effect::DbDel { .. } => "DbDel",
            Effect::DbQuery { .. } => "DbQuery",
            Effect::HttpCall { .. } => "HttpCall",
            Effect::Compute { .. } => "Compute",
            Effect::Compensate { .. } => "Compensate",
        }
    }
}

/// Execution mode for a batch of effects (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Parallel,
}

/// Join policy for a parallel effect batch (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    All,
    AllRequired,
    Any,
    FirstSuccess,
}

impl Join {
    pub fn cancellation_policy(self) -> CancellationPolicy {
        match self {
            Join::All | Join::AllRequired => CancellationPolicy::CompleteAll,
            Join::Any | Join::FirstSuccess => CancellationPolicy::CancelAndCompensate,
        }
    }
}

/// The step (or implicit "next in sequence") to resume at once an effect
/// batch settles. See `DESIGN.md` for the Open Question resolution on this
/// type's shape.
pub type ContinuationFn =
    std::sync::Arc<dyn Fn(&mut crate::context::CtxBase) -> Decision + Send + Sync>;

#[derive(Clone)]
pub struct Continuation {
    pub name: &'static str,
    pub run: ContinuationFn,
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Continuation({})", self.name)
    }
}

/// Bundles `effects[]`, `mode`, `join`, optional `compensations[]` and
/// `continuation` (spec §3).
#[derive(Debug, Clone)]
pub struct Need {
    pub effects: Vec<Effect>,
    pub mode: Mode,
    pub join: Join,
    pub compensations: Vec<Option<Effect>>,
    pub continuation: Option<Continuation>,
}

impl Need {
    pub fn sequential(effects: Vec<Effect>) -> Self {
        Self {
            effects,
            mode: Mode::Sequential,
            join: Join::AllRequired,
            compensations: Vec::new(),
            continuation: None,
        }
    }

    pub fn parallel(effects: Vec<Effect>, join: Join) -> Self {
        Self {
            effects,
            mode: Mode::Parallel,
            join,
            compensations: Vec::new(),
            continuation: None,
        }
    }

    pub fn with_compensations(mut self, compensations: Vec<Option<Effect>>) -> Self {
        self.compensations = compensations;
        self
    }

    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }
}

/// What a step decided (spec §3).
#[derive(Debug, Clone)]
pub enum Decision {
    Continue,
    Need(Need),
    Done(Response),
    Fail(Error),
}
