//! Host-side registry of callables/exceptions exposed to the remote side.
//!
//! Slots are dense and free-list-recycled, mirroring the teacher's
//! `VPriv<T>`: a single foreign-owned box, released by an explicit
//! foreign-side callback — generalized here into a vector of many such
//! slots instead of one per C object.

use std::any::Any;
use std::rc::Rc;

use crate::bridge::BridgeHandle;
use crate::proxy::{ExceptionProxy, Proxy};

/// All-ones sentinel marking the end of the free list.
pub const FREE_LIST_END: usize = usize::MAX;

/// What a host callable can report back across the boundary.
pub enum CallError {
    /// Re-raise a remote exception proxy the callable itself caught earlier.
    Remote(ExceptionProxy),
    /// Tunnel an arbitrary host value as a native exception.
    Native(Rc<dyn Any>),
}

pub type CallOutcome = Result<Proxy, CallError>;

/// A host closure invokable from the remote side. Takes the bridge (so it
/// can itself drive further commands — the dispatcher is reentrant) and the
/// consumed argument proxies.
pub type Callable = Rc<dyn Fn(&BridgeHandle, Vec<Proxy>) -> CallOutcome>;

pub(crate) enum RemoteSlot {
    Free { next: usize },
    Callable(Callable),
    ForwardedException(Rc<dyn Any>),
}

#[derive(Default)]
pub(crate) struct RemoteTable {
    slots: Vec<RemoteSlot>,
    free_head: usize,
}

impl RemoteTable {
    pub(crate) fn new() -> Self {
        RemoteTable {
            slots: Vec::new(),
            free_head: FREE_LIST_END,
        }
    }

    /// O(1): pop from the free list if nonempty, else append.
    pub(crate) fn register(&mut self, slot: RemoteSlot) -> usize {
        if self.free_head != FREE_LIST_END {
            let idx = self.free_head;
            let next = match &self.slots[idx] {
                RemoteSlot::Free { next } => *next,
                _ => unreachable!("free list points at a non-free slot"),
            };
            self.free_head = next;
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    /// Transition `idx` back to Free and splice it onto the head of the
    /// free list.
    pub(crate) fn release(&mut self, idx: usize) {
        self.slots[idx] = RemoteSlot::Free {
            next: self.free_head,
        };
        self.free_head = idx;
    }

    /// Clone the callable out of its slot without holding a borrow of the
    /// table across the (possibly reentrant) call.
    pub(crate) fn get_callable(&self, idx: usize) -> Option<Callable> {
        match self.slots.get(idx) {
            Some(RemoteSlot::Callable(c)) => Some(Rc::clone(c)),
            _ => None,
        }
    }

    pub(crate) fn get_forwarded_exception(&self, idx: usize) -> Option<Rc<dyn Any>> {
        match self.slots.get(idx) {
            Some(RemoteSlot::ForwardedException(e)) => Some(Rc::clone(e)),
            _ => None,
        }
    }

    pub(crate) fn any_free(&self) -> bool {
        self.free_head != FREE_LIST_END
    }

    /// Drop every slot's contents after clean termination: no more inbound
    /// calls or drops will arrive, so host-exposed closures and forwarded
    /// exceptions can be released.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free_head = FREE_LIST_END;
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, RemoteSlot::Free { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_callable() -> RemoteSlot {
        RemoteSlot::Callable(Rc::new(|_: &BridgeHandle, _args: Vec<Proxy>| {
            unreachable!("not invoked in these tests")
        }))
    }

    #[test]
    fn register_is_contiguous_from_zero() {
        let mut t = RemoteTable::new();
        let a = t.register(dummy_callable());
        let b = t.register(dummy_callable());
        let c = t.register(dummy_callable());
        assert_eq!([a, b, c], [0, 1, 2]);
        assert_eq!(t.live_count(), 3);
    }

    #[test]
    fn released_slots_are_recycled_before_growing() {
        let mut t = RemoteTable::new();
        let a = t.register(dummy_callable());
        let _b = t.register(dummy_callable());
        t.release(a);
        assert!(t.any_free());
        let c = t.register(dummy_callable());
        assert_eq!(c, a, "released slot should be reused, not appended");
        assert!(!t.any_free());
    }

    #[test]
    fn free_list_has_no_duplicates_concurrently_live() {
        let mut t = RemoteTable::new();
        let idxs: Vec<usize> = (0..5).map(|_| t.register(dummy_callable())).collect();
        for &i in &idxs[1..4] {
            t.release(i);
        }
        // Re-register enough to drain the free list, then one more to grow.
        let mut reused = Vec::new();
        for _ in 0..3 {
            reused.push(t.register(dummy_callable()));
        }
        assert!(!t.any_free());
        let grown = t.register(dummy_callable());
        assert_eq!(grown, 5);
        let mut all: Vec<usize> = idxs
            .iter()
            .copied()
            .filter(|i| !reused.contains(i))
            .chain(reused.iter().copied())
            .chain([grown])
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 6, "no HostIndex should be live twice at once");
    }
}
