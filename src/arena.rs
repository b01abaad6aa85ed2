//! Per-request bump allocator.
//!
//! Slot values and response bodies must have request lifetime only (spec
//! §3, §9). Rather than hand a borrowed `&'arena [u8]` out of a classic bump
//! allocator (which would force every slot-bearing type in this crate to
//! carry an arena lifetime parameter), the arena hands out [`bytes::Bytes`]:
//! a refcounted, cheaply-cloneable, owned view into the arena's backing
//! buffer. Bump allocation still happens — writes are append-only into a
//! single growing buffer, released in one shot when the `Arena` (and, with
//! it, the `CtxBase` that owns it) is dropped — but callers never see a
//! lifetime.

use bytes::{Bytes, BytesMut};

use crate::decision::{Error, ErrorKind};

/// A per-request bump arena. Not `Sync`; one arena per request, used from a
/// single worker at a time (spec §5).
pub struct Arena {
    buf: BytesMut,
    used: usize,
    max_bytes: usize,
}

impl Arena {
    /// `capacity_hint` pre-reserves space to avoid reallocation churn on the
    /// hot path; `max_bytes` enforces `ResourceBudget::max_memory_bytes`.
    pub fn new(capacity_hint: usize, max_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity_hint.min(max_bytes)),
            used: 0,
            max_bytes,
        }
    }

    /// Copies `data` into the arena and returns an owned, refcounted view
    /// of it. Fails with `Internal` when the request's memory budget would
    /// be exceeded.
    pub fn alloc(&mut self, data: &[u8]) -> Result<Bytes, Error> {
        if self.used.saturating_add(data.len()) > self.max_bytes {
            return Err(Error {
                kind: ErrorKind::Internal,
                entity: "arena".to_string(),
                reason: "max_memory_bytes exceeded".to_string(),
                context: Some(format!(
                    "requested {} bytes, {} already used, budget {}",
                    data.len(),
                    self.used,
                    self.max_bytes
                )),
            });
        }
        self.buf.extend_from_slice(data);
        self.used += data.len();
        Ok(self.buf.split_to(self.buf.len()).freeze())
    }

    /// Convenience wrapper over [`Arena::alloc`] for UTF-8 text.
    pub fn alloc_str(&mut self, s: &str) -> Result<Bytes, Error> {
        self.alloc(s.as_bytes())
    }

    /// Bytes consumed against the request's memory budget so far.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_copies_and_tracks_usage() {
        let mut arena = Arena::new(64, 1024);
        let a = arena.alloc(b"hello").unwrap();
        let b = arena.alloc(b"world").unwrap();
        assert_eq!(&a[..], b"hello");
        assert_eq!(&b[..], b"world");
        assert_eq!(arena.used_bytes(), 10);
    }

    #[test]
    fn alloc_rejects_over_budget() {
        let mut arena = Arena::new(8, 8);
        assert!(arena.alloc(b"12345678").is_ok());
        let err = arena.alloc(b"9").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
