//! Global revision allocation.
//!
//! Every accepted mutation (and, see [`crate::reducer`], every rejected one)
//! consumes exactly one revision. Revisions start after 0, are never reused,
//! and are not persisted.

use std::sync::atomic::{AtomicI64, Ordering};

/// An etcd MVCC revision.
pub type Revision = i64;

/// Monotonic revision counter shared by everything that writes the cache.
///
/// This is an owned value rather than a global so each adapter (and each
/// test) gets its own timeline. Share it with `Arc`.
#[derive(Debug, Default)]
pub struct RevisionAllocator {
    current: AtomicI64,
}

impl RevisionAllocator {
    /// Create an allocator whose first revision will be 1.
    pub fn new() -> Self {
        Self {
            current: AtomicI64::new(0),
        }
    }

    /// Allocate the next revision.
    ///
    /// Two callers never observe the same value. Values are increasing in
    /// the order the compare-and-swap commits.
    pub fn next(&self) -> Revision {
        let mut old = self.current.load(Ordering::Acquire);
        loop {
            match self.current.compare_exchange_weak(
                old,
                old + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return old + 1,
                Err(observed) => old = observed,
            }
        }
    }

    /// The last allocated revision, 0 if none has been allocated.
    pub fn current(&self) -> Revision {
        self.current.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let revisions = RevisionAllocator::new();
        assert_eq!(revisions.current(), 0);
        assert_eq!(revisions.next(), 1);
        assert_eq!(revisions.next(), 2);
        assert_eq!(revisions.current(), 2);
    }

    #[test]
    fn test_independent_allocators() {
        let a = RevisionAllocator::new();
        let b = RevisionAllocator::new();
        a.next();
        a.next();
        assert_eq!(b.next(), 1);
    }

    #[test]
    fn test_concurrent_next_is_unique() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;

        let revisions = Arc::new(RevisionAllocator::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let revisions = Arc::clone(&revisions);
                std::thread::spawn(move || {
                    let mut seen = Vec::with_capacity(PER_THREAD);
                    for _ in 0..PER_THREAD {
                        seen.push(revisions.next());
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let seen = handle.join().unwrap();
            // Each thread observes its own values in increasing order.
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            for rev in seen {
                assert!(all.insert(rev), "revision {rev} handed out twice");
            }
        }

        assert_eq!(all.len(), THREADS * PER_THREAD);
        assert_eq!(revisions.current(), (THREADS * PER_THREAD) as Revision);
    }
}
