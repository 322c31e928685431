//! Call-scoped service access for `invoke_function`

use crate::trace::Trace;
use crate::{DiError, Injectable, InstantiationService, Result, ServiceIdentifier};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Resolves services on behalf of an `invoke_function` callback.
///
/// Only valid while the callback runs; afterwards every call, including
/// calls on clones, returns [`DiError::AccessorExpired`].
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{InstantiationService, ServiceCollection, ServiceIdentifier};
/// use std::sync::Arc;
///
/// const NAME: ServiceIdentifier<String> = ServiceIdentifier::new("name");
///
/// let services = ServiceCollection::new();
/// services.set_instance(&NAME, Arc::new("editor".to_string()));
/// let container = InstantiationService::new(services);
///
/// let name = container
///     .invoke_function(|accessor| accessor.get(&NAME))
///     .unwrap();
/// assert_eq!(*name, "editor");
/// ```
#[derive(Clone)]
pub struct ServicesAccessor {
    container: InstantiationService,
    trace: Trace,
    done: Arc<AtomicBool>,
}

impl ServicesAccessor {
    pub(crate) fn new(container: InstantiationService, trace: Trace) -> Self {
        Self {
            container,
            trace,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Guard that expires this accessor and all its clones when dropped
    pub(crate) fn expire_on_drop(&self) -> ExpiryGuard {
        ExpiryGuard(Arc::clone(&self.done))
    }

    /// Resolve a service, constructing it if needed
    pub fn get<T: ?Sized + Injectable>(&self, id: &ServiceIdentifier<T>) -> Result<Arc<T>> {
        match self.get_if_exists(id)? {
            Some(service) => Ok(service),
            None => Err(DiError::missing(
                id.id(),
                format!("[invokeFunction] unknown service '{id}'"),
            )),
        }
    }

    /// Resolve a service if it is registered anywhere in the lineage
    pub fn get_if_exists<T: ?Sized + Injectable>(
        &self,
        id: &ServiceIdentifier<T>,
    ) -> Result<Option<Arc<T>>> {
        if self.done.load(Ordering::Acquire) {
            return Err(DiError::AccessorExpired);
        }
        let Some(instance) = self
            .container
            .get_or_create_service_instance(id.id(), &self.trace)?
        else {
            return Ok(None);
        };
        instance
            .downcast::<T>()
            .map(Some)
            .ok_or_else(|| DiError::type_mismatch::<T>(id.id()))
    }

    /// Check if the owning call has returned
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ServicesAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicesAccessor")
            .field("scope", &self.container.scope())
            .field("expired", &self.is_expired())
            .finish()
    }
}

pub(crate) struct ExpiryGuard(Arc<AtomicBool>);

impl Drop for ExpiryGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}
