//! Disposal
//!
//! Anything that owns resources beyond its memory implements [`Disposable`].
//! Containers keep every disposable service they create and dispose them,
//! in creation order, when they are disposed themselves.

use crate::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(feature = "logging")]
use tracing::warn;

/// Trait for services that need explicit disposal.
///
/// `dispose` takes `&self` because services are shared through `Arc`;
/// implementations must tolerate being called more than once.
pub trait Disposable: Send + Sync {
    /// Release the resources held by the service
    fn dispose(&self);
}

/// Ordered bag of disposables, disposed together.
///
/// Adding to an already disposed store disposes the item immediately.
/// Dropping the store disposes whatever it still holds.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{DisposableStore, Subscription};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let released = Arc::new(AtomicBool::new(false));
/// let flag = released.clone();
///
/// let store = DisposableStore::new();
/// store.add(Arc::new(Subscription::new(move || flag.store(true, Ordering::SeqCst))));
///
/// store.dispose();
/// assert!(released.load(Ordering::SeqCst));
/// ```
#[derive(Default)]
pub struct DisposableStore {
    items: Mutex<Vec<Arc<dyn Disposable>>>,
    disposed: AtomicBool,
}

impl DisposableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a disposable
    pub fn add(&self, item: Arc<dyn Disposable>) {
        if self.disposed.load(Ordering::Acquire) {
            #[cfg(feature = "logging")]
            warn!(
                target: "instantiation_service",
                "Trying to add a disposable to a DisposableStore that has already been disposed of. The added object will be leaked!"
            );
            item.dispose();
            return;
        }
        lock(&self.items).push(item);
    }

    /// Dispose every item once, in insertion order, and mark the store disposed
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear();
    }

    /// Dispose every item but keep accepting new ones
    pub fn clear(&self) {
        let items = std::mem::take(&mut *lock(&self.items));
        for item in items {
            item.dispose();
        }
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Disposable for DisposableStore {
    fn dispose(&self) {
        DisposableStore::dispose(self);
    }
}

impl Drop for DisposableStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DisposableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposableStore")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A disposable that runs a closure once
pub struct Subscription {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new<F: FnOnce() + Send + 'static>(release: F) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A subscription with nothing to release
    pub fn empty() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        lock(&self.release).is_none()
    }
}

impl Disposable for Subscription {
    fn dispose(&self) {
        let release = lock(&self.release).take();
        if let Some(release) = release {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
