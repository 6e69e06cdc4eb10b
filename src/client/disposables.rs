//! Keyed disposables for remote-owned registrations
//!
//! The extension host registers things under caller-assigned numeric ids and
//! later cancels any one of them by the same id. The local side never owns the
//! remote resource, only the disposer, so the map stores plain callbacks and
//! every removal is an idempotent no-op when the id is absent.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::warn;

type Disposer = Box<dyn FnOnce() + Send>;

/// A mapping from an opaque numeric id to a cancelable registration.
#[derive(Default)]
pub struct DisposableSet {
    entries: Mutex<FxHashMap<u64, Disposer>>,
}

impl DisposableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `dispose` under `id`. If the id is already taken the previous
    /// disposer runs first; ids are a caller contract and duplicates indicate
    /// a peer that reused an id before retiring it.
    pub fn add(&self, id: u64, dispose: impl FnOnce() + Send + 'static) {
        let previous = self.entries.lock().insert(id, Box::new(dispose));
        if let Some(previous) = previous {
            warn!(id, "duplicate registration id; disposing previous entry");
            previous();
        }
    }

    /// Disposes and removes the entry under `id`. Removing an absent id is a
    /// no-op.
    pub fn remove(&self, id: u64) {
        let disposer = self.entries.lock().remove(&id);
        if let Some(dispose) = disposer {
            dispose();
        }
    }

    /// Disposes every remaining entry exactly once and clears the set.
    pub fn dispose_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (_, dispose) in entries {
            dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Drop for DisposableSet {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_remove_disposes_once() {
        let set = DisposableSet::new();
        let count = Arc::new(AtomicU32::new(0));

        let c = count.clone();
        set.add(1, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        set.remove(1);
        set.remove(1); // absent: no-op
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_dispose_all_runs_each_disposer_exactly_once() {
        let set = DisposableSet::new();
        let count = Arc::new(AtomicU32::new(0));

        for id in 0..4 {
            let c = count.clone();
            set.add(id, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        set.dispose_all();
        set.dispose_all();
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicate_id_disposes_previous() {
        let set = DisposableSet::new();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let f = first.clone();
        set.add(7, move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        set.add(7, move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        // The stale entry was disposed on replacement, the new one on remove.
        assert_eq!(first.load(Ordering::SeqCst), 1);
        set.remove(7);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_disposes_remaining() {
        let count = Arc::new(AtomicU32::new(0));
        {
            let set = DisposableSet::new();
            let c = count.clone();
            set.add(1, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
