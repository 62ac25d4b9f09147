//! Resource tracker: the one place that knows about every live socket and
//! background task so `disconnect()` can tear the agent down in one shot.
//!
//! Grounded in the teacher's shutdown story
//! (`router-core::system::terminator` + `system::signal`), generalized
//! from "flip one atomic flag" to "hold a registry of arbitrary close
//! actions" because this agent's sockets and per-request tasks come and go
//! far more often than the teacher's long-lived listeners do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;

type Closer = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    closers: std::collections::HashMap<u64, Closer>,
    tasks: std::collections::HashMap<u64, JoinHandle<()>>,
}

/// Concurrent registry of closeable resources and background tasks.
///
/// Safe to register against concurrently with `close_all` — a
/// registration racing a teardown either lands before the drain (and gets
/// closed with everything else) or after it (and is dropped immediately,
/// relying on the resource's own owner to clean it up on exit, per
/// `spec.md` §4.G).
pub struct ResourceTracker {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

/// Opaque handle returned by registration, used to unregister a resource
/// that closed itself cleanly (so `close_all` doesn't try to close it
/// again).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        ResourceTracker {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> ResourceId {
        ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a closure that closes a socket (or any other closeable)
    /// when invoked. Returns a handle to unregister it later.
    pub fn register_closer(&self, closer: Closer) -> ResourceId {
        let id = self.alloc_id();
        self.inner.lock().unwrap().closers.insert(id.0, closer);
        id
    }

    /// Registers a background task handle; `close_all` aborts any still
    /// present.
    pub fn register_task(&self, handle: JoinHandle<()>) -> ResourceId {
        let id = self.alloc_id();
        self.inner.lock().unwrap().tasks.insert(id.0, handle);
        id
    }

    /// Drops a previously-registered resource without closing it — call
    /// this when the resource already closed itself normally.
    pub fn unregister(&self, id: ResourceId) {
        let mut inner = self.inner.lock().unwrap();
        inner.closers.remove(&id.0);
        inner.tasks.remove(&id.0);
    }

    /// How many resources (closers + tasks) are currently tracked.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.closers.len() + inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically closes every tracked socket/closeable best-effort and
    /// aborts every tracked task, then clears both sets.
    pub fn close_all(&self) {
        let (closers, tasks) = {
            let mut inner = self.inner.lock().unwrap();
            (
                std::mem::take(&mut inner.closers),
                std::mem::take(&mut inner.tasks),
            )
        };

        for (_, closer) in closers {
            closer();
        }
        for (_, task) in tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn close_all_invokes_every_closer_and_empties_tracker() {
        let tracker = ResourceTracker::new();
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        tracker.register_closer(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert_eq!(tracker.len(), 1);

        tracker.close_all();

        assert!(closed.load(Ordering::SeqCst));
        assert!(tracker.is_empty());
    }

    #[test]
    fn unregister_prevents_double_close() {
        let tracker = ResourceTracker::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = tracker.register_closer(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        tracker.unregister(id);
        tracker.close_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_all_aborts_tracked_tasks() {
        let tracker = ResourceTracker::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        tracker.register_task(handle);
        tracker.close_all();
        // Give the abort a moment to land; no panic/hang means success.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(tracker.is_empty());
    }
}
