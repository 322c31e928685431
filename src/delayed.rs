//! Lazily initialised service slot
//!
//! A delayed descriptor hands its proxy a [`Delayed<T>`] instead of a built
//! service. The proxy forwards every call through [`Delayed::value`], which
//! builds the service on first use. Construction also runs on its own when
//! the idle scheduler gets to it, whichever happens first.
//!
//! Event subscriptions made through [`Delayed::on_event`] before the service
//! exists are buffered and attached to the real event source once it does.

use crate::container::ConstructionLock;
use crate::event::{Event, Listener};
use crate::idle::{IdleHandle, IdleScheduler};
use crate::{DiError, Disposable, Injectable, Result, ServiceId, Subscription, lock};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

type Executor<T> = Box<dyn FnOnce() -> Result<Arc<T>> + Send>;

enum PendingState {
    Pending,
    Attached(Subscription),
    Disposed,
}

struct PendingListener<T: ?Sized> {
    attach: Box<dyn FnOnce(&Arc<T>) -> Subscription + Send>,
    state: Arc<Mutex<PendingState>>,
}

enum Listeners<T: ?Sized> {
    Buffering(Vec<PendingListener<T>>),
    Live(Arc<T>),
}

struct DelayedInner<T: ?Sized> {
    id: ServiceId,
    construction: Option<ConstructionLock>,
    executor: Mutex<Option<Executor<T>>>,
    cell: OnceCell<Result<Arc<T>>>,
    initializing: Mutex<Option<ThreadId>>,
    listeners: Mutex<Listeners<T>>,
    idle: Mutex<Option<IdleHandle>>,
}

/// Slot holding a service that is built on first access.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{Delayed, ServiceId};
/// use std::sync::Arc;
///
/// let slot = Delayed::new(ServiceId::new("answer"), || Ok(Arc::new(42u32)));
/// assert!(!slot.is_initialized());
///
/// assert_eq!(*slot.value().unwrap(), 42);
/// assert!(slot.is_initialized());
/// ```
pub struct Delayed<T: ?Sized> {
    inner: Arc<DelayedInner<T>>,
}

impl<T: ?Sized + Injectable> Delayed<T> {
    /// Create a slot that runs `executor` at most once
    pub fn new<F>(id: ServiceId, executor: F) -> Self
    where
        F: FnOnce() -> Result<Arc<T>> + Send + 'static,
    {
        Self::with_construction_lock(id, None, executor)
    }

    /// Slot whose construction holds `construction`, so it never overlaps
    /// other construction in the same lineage
    pub(crate) fn with_construction_lock<F>(
        id: ServiceId,
        construction: Option<ConstructionLock>,
        executor: F,
    ) -> Self
    where
        F: FnOnce() -> Result<Arc<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(DelayedInner {
                id,
                construction,
                executor: Mutex::new(Some(Box::new(executor))),
                cell: OnceCell::new(),
                initializing: Mutex::new(None),
                listeners: Mutex::new(Listeners::Buffering(Vec::new())),
                idle: Mutex::new(None),
            }),
        }
    }

    /// Identifier of the service in the slot
    #[inline]
    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    /// Check if construction has run, successfully or not
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.inner.cell.get().is_some()
    }

    /// The service, built now if needed.
    ///
    /// A failed construction is not retried; every later call returns the
    /// same error.
    pub fn value(&self) -> Result<Arc<T>> {
        if let Some(result) = self.inner.cell.get() {
            return result.clone();
        }

        // lineage lock first, then the cell; never the other way round
        let _serial = self.inner.construction.as_ref().map(|construction| construction.lock());

        let current = std::thread::current().id();
        if *lock(&self.inner.initializing) == Some(current) {
            return Err(DiError::ReentrantInstantiation { id: self.inner.id });
        }

        let result = self.inner.cell.get_or_init(|| {
            *lock(&self.inner.initializing) = Some(current);
            let _reset = InitializingGuard(&self.inner.initializing);

            if let Some(handle) = lock(&self.inner.idle).take() {
                handle.cancel();
            }

            #[cfg(feature = "logging")]
            debug!(
                target: "instantiation_service",
                service = %self.inner.id,
                "Building delayed service"
            );

            let executor = lock(&self.inner.executor).take();
            match executor {
                Some(executor) => executor(),
                None => Err(DiError::Internal(format!(
                    "delayed service '{}' lost its executor",
                    self.inner.id
                ))),
            }
        });

        let instance = result.clone()?;
        self.flush_pending(&instance);
        Ok(instance)
    }

    /// An event of the real service, usable before it exists.
    ///
    /// `select` picks the event source off the built service. Subscriptions
    /// made earlier are attached right after construction; each returned
    /// [`Subscription`] can be disposed independently, attached or not.
    pub fn on_event<E, S>(&self, select: S) -> Event<E>
    where
        E: 'static,
        S: Fn(&T) -> Event<E> + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let select = Arc::new(select);

        Event::new(move |listener: Listener<E>| {
            let mut guard = lock(&inner.listeners);
            let instance = match &mut *guard {
                Listeners::Live(instance) => Arc::clone(instance),
                Listeners::Buffering(pending) => {
                    let state = Arc::new(Mutex::new(PendingState::Pending));
                    let select = Arc::clone(&select);
                    pending.push(PendingListener {
                        attach: Box::new(move |instance: &Arc<T>| {
                            select(&**instance).subscribe_listener(listener)
                        }),
                        state: Arc::clone(&state),
                    });
                    return Subscription::new(move || {
                        let previous = std::mem::replace(&mut *lock(&state), PendingState::Disposed);
                        if let PendingState::Attached(subscription) = previous {
                            subscription.dispose();
                        }
                    });
                }
            };
            drop(guard);
            select(&*instance).subscribe_listener(listener)
        })
    }

    /// Queue construction for an idle moment. The task does not keep the
    /// slot alive.
    pub(crate) fn schedule(&self, scheduler: &dyn IdleScheduler) {
        let slot: Weak<DelayedInner<T>> = Arc::downgrade(&self.inner);
        let handle = scheduler.schedule(Box::new(move || {
            let Some(inner) = slot.upgrade() else {
                return;
            };
            let delayed = Delayed { inner };
            if let Err(_e) = delayed.value() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "instantiation_service",
                    service = %delayed.id(),
                    error = %_e,
                    "Idle construction of delayed service failed"
                );
            }
        }));
        *lock(&self.inner.idle) = Some(handle);
    }

    fn flush_pending(&self, instance: &Arc<T>) {
        let pending = {
            let mut guard = lock(&self.inner.listeners);
            match std::mem::replace(&mut *guard, Listeners::Live(Arc::clone(instance))) {
                Listeners::Buffering(pending) => pending,
                live @ Listeners::Live(_) => {
                    *guard = live;
                    return;
                }
            }
        };

        for listener in pending {
            if !matches!(*lock(&listener.state), PendingState::Pending) {
                continue;
            }
            let subscription = (listener.attach)(instance);
            let mut state = lock(&listener.state);
            if matches!(*state, PendingState::Pending) {
                *state = PendingState::Attached(subscription);
            } else {
                drop(state);
                subscription.dispose();
            }
        }
    }
}

struct InitializingGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

impl<T: ?Sized> Clone for Delayed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Delayed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delayed")
            .field("id", &self.inner.id)
            .field("initialized", &self.inner.cell.get().is_some())
            .finish()
    }
}
