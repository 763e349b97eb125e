//! Handle table - backend-side arena for wire handles.
//!
//! Marshaled arguments carry opaque [`RemoteHandle`] identities. The
//! plugin that owns a resource keeps the only mapping from handle to real
//! local value here; the raw value never crosses the trust boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::protocol::RemoteHandle;

/// Arena mapping minted handles to local resources of one type.
///
/// Shared by every connection worker dispatching into the owning plugin;
/// lookups clone the stored value, so `T` is typically a small id or a
/// wrapped pointer type.
#[derive(Debug)]
pub struct HandleTable<T> {
    entries: Mutex<HashMap<u64, T>>,
    next: AtomicU64,
}

impl<T: Clone> HandleTable<T> {
    /// Create an empty table. The first minted handle is 1; 0 stays the
    /// null handle.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Store `value` and mint its handle.
    pub fn insert(&self, value: T) -> RemoteHandle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(raw, value);
        RemoteHandle::from_raw(raw)
    }

    /// The value behind `handle`, if it is live.
    pub fn lookup(&self, handle: RemoteHandle) -> Option<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.raw())
            .cloned()
    }

    /// Drop the mapping, returning the value if it was live.
    pub fn remove(&self, handle: RemoteHandle) -> Option<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.raw())
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_lookup_remove() {
        let table = HandleTable::new();
        let handle = table.insert("stream-3".to_string());

        assert!(!handle.is_null());
        assert_eq!(table.lookup(handle).as_deref(), Some("stream-3"));
        assert_eq!(table.remove(handle).as_deref(), Some("stream-3"));
        assert_eq!(table.lookup(handle), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_handles_are_distinct() {
        let table = HandleTable::new();
        let a = table.insert(1u64);
        let b = table.insert(2u64);

        assert_ne!(a, b);
        assert_eq!(table.lookup(a), Some(1));
        assert_eq!(table.lookup(b), Some(2));
    }

    #[test]
    fn test_unknown_handle_is_none() {
        let table: HandleTable<u64> = HandleTable::new();
        assert_eq!(table.lookup(RemoteHandle::from_raw(42)), None);
        assert_eq!(table.remove(RemoteHandle::NULL), None);
    }
}
