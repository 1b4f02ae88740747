//! Ordered listener list with safe detachment during dispatch.
//!
//! A literal pointer-linked list needs `unsafe` to express safely in Rust;
//! a generation-tagged slab gives the same externally-observable behavior
//! (stable attach order, a listener's own detach call never invalidates the
//! in-progress dispatch loop) without it.

use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A detach token returned by [`EventMux::attach`]. Detaching twice, or
/// detaching after the mux has moved on to a later generation in the same
/// slot, is a harmless no-op.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Handle {
    index: usize,
    generation: u64,
}

struct Slot<T> {
    generation: u64,
    listener: Option<Listener<T>>,
}

pub struct EventMux<T> {
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T> Default for EventMux<T> {
    fn default() -> Self {
        EventMux {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<T> EventMux<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a listener at the tail of the list. Valid at any time,
    /// including after a disconnect — the listener simply sees no events
    /// until the next connect.
    pub fn attach<F>(&self, listener: F) -> Handle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut slots = self.slots.lock().unwrap();
        let index = slots.len();
        let generation = 1;
        slots.push(Slot {
            generation,
            listener: Some(Arc::new(listener)),
        });
        Handle { index, generation }
    }

    /// Detaches a previously-attached listener. Safe to call from inside a
    /// listener callback, including the callback currently being dispatched.
    pub fn detach(&self, handle: Handle) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(handle.index) {
            if slot.generation == handle.generation {
                slot.listener = None;
            }
        }
    }

    /// Invokes every attached listener in attach order. Listeners attached
    /// or detached by another listener mid-dispatch neither crash nor are
    /// retroactively included/excluded inconsistently: the snapshot of
    /// "which slots existed at dispatch start" is fixed up front, but each
    /// slot's liveness is re-checked just before its listener runs.
    pub fn dispatch(&self, event: &T) {
        let slot_count = self.slots.lock().unwrap().len();
        for index in 0..slot_count {
            let listener = {
                let slots = self.slots.lock().unwrap();
                slots.get(index).and_then(|slot| slot.listener.clone())
            };
            if let Some(listener) = listener {
                listener(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_order_matches_attach_order() {
        let mux = EventMux::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        mux.attach(move |_: &()| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        mux.attach(move |_: &()| o2.lock().unwrap().push(2));

        mux.dispatch(&());
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn detach_during_dispatch_does_not_panic_and_stops_future_events() {
        let mux: Arc<EventMux<()>> = Arc::new(EventMux::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mux2 = mux.clone();
        let calls2 = calls.clone();
        let handle = std::sync::Mutex::new(None);
        let h2: Arc<std::sync::Mutex<Option<Handle>>> = Arc::new(handle);
        let h3 = h2.clone();

        let self_detaching = mux.attach(move |_: &()| {
            calls2.fetch_add(1, Ordering::SeqCst);
            if let Some(h) = *h3.lock().unwrap() {
                mux2.detach(h);
            }
        });
        *h2.lock().unwrap() = Some(self_detaching);

        mux.dispatch(&());
        mux.dispatch(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_is_idempotent() {
        let mux = EventMux::new();
        let handle = mux.attach(|_: &()| {});
        mux.detach(handle);
        mux.detach(handle);
    }
}
