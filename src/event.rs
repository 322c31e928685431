//! Minimal synchronous events
//!
//! An [`Emitter`] owns the listener list and fires; the [`Event`] it hands
//! out is the subscribe-only side. Each subscription is an independently
//! disposable [`Subscription`].

use crate::{Disposable, Subscription, lock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Event callback
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

type SubscribeFn<E> = Arc<dyn Fn(Listener<E>) -> Subscription + Send + Sync>;

/// Subscribe side of an event source
pub struct Event<E> {
    subscribe: SubscribeFn<E>,
}

impl<E: 'static> Event<E> {
    /// Create from a subscribe function
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(Listener<E>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            subscribe: Arc::new(subscribe),
        }
    }

    /// An event that never fires
    pub fn none() -> Self {
        Self::new(|_| Subscription::empty())
    }

    /// Register a callback
    #[inline]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_listener(Arc::new(listener))
    }

    /// Register an already shared callback
    #[inline]
    pub fn subscribe_listener(&self, listener: Listener<E>) -> Subscription {
        (self.subscribe)(listener)
    }
}

impl<E> Clone for Event<E> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
        }
    }
}

impl<E> std::fmt::Debug for Event<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").finish_non_exhaustive()
    }
}

struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener<E>)>>,
}

/// Fire side of an event source.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{Disposable, Emitter};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// let emitter = Emitter::<u32>::new();
/// let total = Arc::new(AtomicU32::new(0));
///
/// let sum = total.clone();
/// let subscription = emitter.event().subscribe(move |n| {
///     sum.fetch_add(*n, Ordering::SeqCst);
/// });
///
/// emitter.fire(&2);
/// subscription.dispose();
/// emitter.fire(&3);
/// assert_eq!(total.load(Ordering::SeqCst), 2);
/// ```
pub struct Emitter<E> {
    listeners: Arc<Listeners<E>>,
}

impl<E: 'static> Emitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(0),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The subscribe side. Subscriptions do not keep the emitter alive.
    pub fn event(&self) -> Event<E> {
        let listeners = Arc::downgrade(&self.listeners);
        Event::new(move |listener| {
            let Some(strong) = listeners.upgrade() else {
                return Subscription::empty();
            };
            let id = strong.next_id.fetch_add(1, Ordering::Relaxed);
            lock(&strong.entries).push((id, listener));

            let listeners = Arc::downgrade(&strong);
            Subscription::new(move || {
                if let Some(strong) = listeners.upgrade() {
                    lock(&strong.entries).retain(|(entry, _)| *entry != id);
                }
            })
        })
    }

    /// Call every current listener. Listeners may subscribe or dispose
    /// during delivery; changes apply from the next fire.
    pub fn fire(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = lock(&self.listeners.entries)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    #[inline]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners.entries).len()
    }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Disposable for Emitter<E> {
    /// Drop every listener
    fn dispose(&self) {
        lock(&self.listeners.entries).clear();
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}
