//! Notification dispatch
//!
//! Ordered fan-out to registered listeners. A dispatch round iterates a
//! point-in-time copy of the listener list, so listeners may add or remove
//! entries (themselves included) while being invoked without the round
//! skipping or repeating anyone. The listener being invoked is identified
//! through the [`DispatchContext`] passed to it.

pub mod listener;

pub use listener::{
    CallSessionListener, ChallengeContext, ListenerContext, SessionNotification, ToneEvent,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one registration in a [`ListenerSet`]
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct ListenerRecord<L: ?Sized> {
    id: ListenerId,
    listener: Arc<L>,
}

impl<L: ?Sized> Clone for ListenerRecord<L> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            listener: Arc::clone(&self.listener),
        }
    }
}

/// Context handed to a listener during a dispatch round
pub struct DispatchContext<'a, L: ?Sized> {
    set: &'a ListenerSet<L>,
    current: ListenerId,
    position: usize,
    round_size: usize,
}

impl<'a, L: ?Sized> DispatchContext<'a, L> {
    /// Registration being invoked
    pub fn current_listener(&self) -> ListenerId {
        self.current
    }

    /// Index of the current listener within this round
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of listeners captured when the round started
    pub fn round_size(&self) -> usize {
        self.round_size
    }

    /// The set being dispatched; safe to modify from inside a callback
    pub fn listeners(&self) -> &'a ListenerSet<L> {
        self.set
    }
}

/// Ordered listener registrations
pub struct ListenerSet<L: ?Sized> {
    records: RwLock<Vec<ListenerRecord<L>>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<L: ?Sized> fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; registering the same instance twice returns the
    /// existing id
    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let mut records = self.records.write();
        if let Some(existing) = records
            .iter()
            .find(|r| std::ptr::addr_eq(Arc::as_ptr(&r.listener), Arc::as_ptr(&listener)))
        {
            return existing.id;
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        records.push(ListenerRecord { id, listener });
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.records.read().iter().any(|r| r.id == id)
    }

    /// Invoke `f` once per listener registered when the round starts
    pub fn dispatch<F>(&self, mut f: F)
    where
        F: FnMut(&L, &DispatchContext<'_, L>),
    {
        let snapshot: Vec<ListenerRecord<L>> = self.records.read().clone();
        let round_size = snapshot.len();
        for (position, record) in snapshot.iter().enumerate() {
            let ctx = DispatchContext {
                set: self,
                current: record.id,
                position,
                round_size,
            };
            f(&*record.listener, &ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    trait Hook: Send + Sync {
        fn hit(&self, ctx: &DispatchContext<'_, dyn Hook>);
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        remove_self: bool,
        spawn: Option<Arc<dyn Hook>>,
    }

    impl Hook for Recorder {
        fn hit(&self, ctx: &DispatchContext<'_, dyn Hook>) {
            self.log
                .lock()
                .push(format!("{}@{}", self.name, ctx.position()));
            if self.remove_self {
                ctx.listeners().remove(ctx.current_listener());
            }
            if let Some(extra) = &self.spawn {
                ctx.listeners().add(Arc::clone(extra));
            }
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        remove_self: bool,
        spawn: Option<Arc<dyn Hook>>,
    ) -> Arc<dyn Hook> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            remove_self,
            spawn,
        })
    }

    #[test]
    fn test_mutation_during_dispatch_uses_snapshot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set: ListenerSet<dyn Hook> = ListenerSet::new();
        let late = recorder("late", &log, false, None);
        set.add(recorder("a", &log, true, None));
        set.add(recorder("b", &log, false, Some(Arc::clone(&late))));
        set.add(recorder("c", &log, false, None));

        set.dispatch(|l, ctx| l.hit(ctx));
        assert_eq!(*log.lock(), vec!["a@0", "b@1", "c@2"]);
        assert_eq!(set.len(), 3);

        log.lock().clear();
        set.dispatch(|l, ctx| l.hit(ctx));
        assert_eq!(*log.lock(), vec!["b@0", "c@1", "late@2"]);
    }

    #[test]
    fn test_add_is_deduplicated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set: ListenerSet<dyn Hook> = ListenerSet::new();
        let l = recorder("a", &log, false, None);
        let first = set.add(Arc::clone(&l));
        let second = set.add(l);
        assert_eq!(first, second);
        assert_eq!(set.len(), 1);
        assert!(set.remove(first));
        assert!(!set.remove(first));
        assert!(set.is_empty());
    }

    #[test]
    fn test_context_identifies_current_listener() {
        let set: ListenerSet<dyn Hook> = ListenerSet::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = set.add(recorder("a", &log, false, None));
        let b = set.add(recorder("b", &log, false, None));
        let mut seen = Vec::new();
        set.dispatch(|_, ctx| seen.push((ctx.current_listener(), ctx.round_size())));
        assert_eq!(seen, vec![(a, 2), (b, 2)]);
    }
}
