//! Observer registry
//!
//! A small synchronous event registry: observers are invoked in insertion
//! order, deregistered by the id returned at registration, and cleared
//! wholesale when the owning object is disposed.
//!
//! Callbacks run with the registry locked by the emitting object, so an
//! observer must not register or deregister observers on the same object
//! from inside its callback.

/// Handle for deregistering one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Insertion-ordered observer list for one event type.
pub struct Observers<E> {
    next_id: u64,
    entries: Vec<(u64, Box<dyn FnMut(&E) + Send>)>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Observers {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&E) + Send + 'static) -> ObserverId {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push((id, Box::new(observer)));
        ObserverId(id)
    }

    /// Returns true when the observer was present.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id.0);
        self.entries.len() != before
    }

    /// Fire all observers synchronously, in insertion order.
    pub fn emit(&mut self, event: &E) {
        for (_, observer) in &mut self.entries {
            observer(event);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_emit_in_insertion_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut observers: Observers<u32> = Observers::new();

        for tag in 0..3 {
            let order = order.clone();
            observers.subscribe(move |event: &u32| order.lock().push((tag, *event)));
        }
        observers.emit(&7);

        assert_eq!(*order.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_unsubscribe() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut observers: Observers<()> = Observers::new();

        let hits_a = hits.clone();
        let first = observers.subscribe(move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        let hits_b = hits.clone();
        observers.subscribe(move |_| {
            hits_b.fetch_add(10, Ordering::SeqCst);
        });

        assert!(observers.unsubscribe(first));
        assert!(!observers.unsubscribe(first));

        observers.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_clear_detaches_everything() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut observers: Observers<()> = Observers::new();
        let hits_inner = hits.clone();
        observers.subscribe(move |_| {
            hits_inner.fetch_add(1, Ordering::SeqCst);
        });

        observers.clear();
        assert!(observers.is_empty());
        observers.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
