//! The typed, permission-checked [`CtxView`] (spec §4.1).
//!
//! `CtxView<R, W>` is generic over two marker types, `R` and `W`, that name
//! the slots a step declared as its `reads` and `writes` sets. Permission is
//! enforced at compile time through the [`Reads`]/[`Writes`] traits: calling
//! [`CtxView::require`] or [`CtxView::optional`] for a slot `S` requires
//! `R: Reads<S>`; calling [`CtxView::put`] requires `W: Writes<S>`. A step
//! that tries to read or write a slot it didn't declare simply fails to
//! compile — there is no runtime permission check to get wrong.
//!
//! [`crate::step_perms!`] generates the marker types and trait impls from a
//! terse declaration; see its docs for the idiom.

use std::any::Any;

use crate::context::bitset::Bitset256;
use crate::context::CtxBase;
use crate::decision::{Error, ErrorKind};
use crate::slot::SlotDef;

/// Marker trait: `R: Reads<S>` means a view with read-set `R` may read
/// slot `S`.
pub trait Reads<S: SlotDef> {}

/// Marker trait: `W: Writes<S>` means a view with write-set `W` may write
/// slot `S`.
pub trait Writes<S: SlotDef> {}

/// A typed, permission-checked accessor over a [`CtxBase`], borrowed for
/// the duration of one step invocation (spec §3 Context View).
pub struct CtxView<'a, R, W> {
    base: &'a mut CtxBase,
    actual_reads: Bitset256,
    actual_writes: Bitset256,
    _reads: std::marker::PhantomData<R>,
    _writes: std::marker::PhantomData<W>,
}

impl<'a, R, W> CtxView<'a, R, W> {
    pub fn new(base: &'a mut CtxBase) -> Self {
        Self {
            base,
            actual_reads: Bitset256::empty(),
            actual_writes: Bitset256::empty(),
            _reads: std::marker::PhantomData,
            _writes: std::marker::PhantomData,
        }
    }

    /// Escape hatch for the arena, request, route params, and other
    /// context not mediated by slot permissions (spec §4.1 `base()`).
    pub fn base(&self) -> &CtxBase {
        self.base
    }

    pub fn base_mut(&mut self) -> &mut CtxBase {
        self.base
    }

    /// Required read: fails with `SlotNotFilled` (mapped to `Internal`)
    /// when the slot has no value.
    pub fn require<S>(&mut self) -> Result<S::Value, Error>
    where
        S: SlotDef,
        R: Reads<S>,
    {
        self.actual_reads.set(S::ID);
        self.base
            .slot_store
            .get(S::ID)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal, "slot", "SlotNotFilled")
                    .with_context(format!("slot {} ({}) was read before being written", S::ID, S::NAME))
            })
    }

    /// Optional read: `None` when the slot has no value.
    pub fn optional<S>(&mut self) -> Option<S::Value>
    where
        S: SlotDef,
        R: Reads<S>,
    {
        self.actual_reads.set(S::ID);
        self.base.slot_store.get(S::ID)
    }

    /// Writes `value` into slot `S`. The value must already be
    /// arena-owned (e.g. `bytes::Bytes` allocated through
    /// [`crate::arena::Arena`]); this module doesn't enforce that
    /// mechanically, the way the spec's §9 "lint-time rule" is left to
    /// tooling outside the core.
    pub fn put<S>(&mut self, value: S::Value)
    where
        S: SlotDef,
        W: Writes<S>,
    {
        self.actual_writes.set(S::ID);
        self.base.slot_store.insert(S::ID, value);
    }

    pub(crate) fn into_usage(self) -> (Bitset256, Bitset256) {
        (self.actual_reads, self.actual_writes)
    }
}

/// Type-erased, `Any`-backed per-request slot storage.
#[derive(Default)]
pub struct SlotStore {
    values: std::collections::HashMap<u32, Box<dyn Any + Send>>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: SlotDef>(&mut self, id: u32, value: S::Value) {
        debug_assert_eq!(id, S::ID);
        self.values.insert(id, Box::new(value));
    }

    pub fn get<S: SlotDef>(&self, id: u32) -> Option<S::Value> {
        debug_assert_eq!(id, S::ID);
        self.values.get(&id).and_then(|v| v.downcast_ref::<S::Value>()).cloned()
    }

    /// Raw insert keyed only by numeric id, used by the effect executor to
    /// write results it only knows the token (`SlotId`) for, not the
    /// static `SlotDef` type (spec §9 Open Question (a)).
    pub fn insert_raw(&mut self, id: u32, value: bytes::Bytes) {
        self.values.insert(id, Box::new(value));
    }

    pub fn get_raw(&self, id: u32) -> Option<bytes::Bytes> {
        self.values.get(&id).and_then(|v| v.downcast_ref::<bytes::Bytes>()).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.values.contains_key(&id)
    }
}

/// Generates a zero-sized permission marker type implementing [`Reads`]
/// and/or [`Writes`] for the listed slots.
///
/// ```ignore
/// zerver::step_perms! {
///     struct RenderPerms;
///     reads: [UserId, Quota];
///     writes: [RenderedBody];
/// }
/// ```
#[macro_export]
macro_rules! step_perms {
    ($(#[$meta:meta])* $vis:vis struct $name:ident; reads: [$($r:ty),* $(,)?]; writes: [$($w:ty),* $(,)?]$(;)?) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        $vis struct $name;
        $( impl $crate::context::view::Reads<$r> for $name {} )*
        $( impl $crate::context::view::Writes<$w> for $name {} )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::context::CtxBase;
    use crate::http::parse::ParsedRequest;

    crate::define_slots! {
        enum Slots {
            A: bytes::Bytes,
            B: bytes::Bytes,
        }
    }

    crate::step_perms! {
        struct Perms;
        reads: [A];
        writes: [B];
    }

    fn empty_request() -> ParsedRequest {
        ParsedRequest {
            method: http::Method::GET,
            path: "/".to_string(),
            raw_path: "/".to_string(),
            query: Vec::new(),
            headers: crate::http::Headers::new(),
            body: bytes::Bytes::new(),
            is_asterisk_form: false,
        }
    }

    #[test]
    fn put_then_require_round_trips_through_the_store() {
        let arena = Arena::new(64, 1024);
        let mut base = CtxBase::new(empty_request(), arena, "req-1".to_string());
        {
            let mut view: CtxView<Perms, Perms> = CtxView::new(&mut base);
            view.put::<B>(bytes::Bytes::from_static(b"hi"));
        }
        base.slot_store.insert::<A>(A::ID, bytes::Bytes::from_static(b"seed"));
        let mut view: CtxView<Perms, Perms> = CtxView::new(&mut base);
        let a = view.require::<A>().unwrap();
        assert_eq!(&a[..], b"seed");
        let b = view.optional::<B>().unwrap();
        assert_eq!(&b[..], b"hi");
    }

    #[test]
    fn require_unfilled_slot_is_internal_error() {
        let arena = Arena::new(64, 1024);
        let mut base = CtxBase::new(empty_request(), arena, "req-1".to_string());
        let mut view: CtxView<Perms, Perms> = CtxView::new(&mut base);
        let err = view.require::<A>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
