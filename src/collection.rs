//! Service collection: identifier -> live instance | descriptor
//!
//! Uses DashMap for lock-free concurrent access. A collection is owned by
//! exactly one container and never falls back to a parent; read-through is
//! the container's job.

use crate::descriptor::ErasedDescriptor;
use crate::{Injectable, ServiceDescriptor, ServiceId, ServiceIdentifier};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// Type-erased value; always holds an `Arc<T>` for the service contract `T`
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// A realized service instance.
///
/// Stores the `Arc<T>` type-erased so trait-object contracts survive the
/// round trip through the collection.
#[derive(Clone)]
pub struct Instance {
    value: Value,
    type_name: &'static str,
}

impl Instance {
    /// Wrap a live service
    #[inline]
    pub fn new<T: ?Sized + Injectable>(instance: Arc<T>) -> Self {
        Self {
            value: Arc::new(instance),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Get the service back as its contract type
    #[inline]
    pub fn downcast<T: ?Sized + Injectable>(&self) -> Option<Arc<T>> {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }

    /// Contract type name the instance was stored as
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub(crate) fn into_value(self) -> Value {
        self.value
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Entry in a service collection
#[derive(Clone, Debug)]
pub enum ServiceEntry {
    /// Already realized
    Instance(Instance),
    /// Recipe, replaced by its instance at first resolution
    Descriptor(ErasedDescriptor),
}

impl ServiceEntry {
    /// Check if still unresolved
    #[inline]
    pub fn is_descriptor(&self) -> bool {
        matches!(self, ServiceEntry::Descriptor(_))
    }

    /// The instance, if realized
    #[inline]
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            ServiceEntry::Instance(instance) => Some(instance),
            ServiceEntry::Descriptor(_) => None,
        }
    }
}

impl From<Instance> for ServiceEntry {
    fn from(instance: Instance) -> Self {
        ServiceEntry::Instance(instance)
    }
}

impl<T: ?Sized + Injectable> From<ServiceDescriptor<T>> for ServiceEntry {
    fn from(descriptor: ServiceDescriptor<T>) -> Self {
        ServiceEntry::Descriptor(ErasedDescriptor::new(descriptor))
    }
}

/// Outcome of replacing a descriptor with its instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Graduation {
    /// The descriptor was replaced
    Stored,
    /// Someone else already replaced it; the offered instance was not stored
    AlreadyResolved,
    /// This collection has no entry for the id
    Missing,
}

/// Mapping from service identifier to instance or descriptor.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{ServiceCollection, ServiceIdentifier};
/// use std::sync::Arc;
///
/// const GREETING: ServiceIdentifier<String> = ServiceIdentifier::new("greeting");
///
/// let services = ServiceCollection::new();
/// assert!(services.set_instance(&GREETING, Arc::new("hello".to_string())).is_none());
/// assert!(services.has(GREETING.id()));
/// ```
pub struct ServiceCollection {
    entries: DashMap<ServiceId, ServiceEntry, RandomState>,
}

impl ServiceCollection {
    /// Create an empty collection.
    ///
    /// Uses 8 shards; typical collections hold a few dozen services.
    #[inline]
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
        }
    }

    /// Create with pre-allocated capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self {
            entries: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
        }
    }

    /// Create from a list of entries
    pub fn from_entries<I, E>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ServiceId, E)>,
        E: Into<ServiceEntry>,
    {
        entries.into_iter().collect()
    }

    /// Insert or replace an entry, returning the previous one
    #[inline]
    pub fn set(&self, id: ServiceId, entry: impl Into<ServiceEntry>) -> Option<ServiceEntry> {
        self.entries.insert(id, entry.into())
    }

    /// Register a live instance under a typed identifier
    #[inline]
    pub fn set_instance<T: ?Sized + Injectable>(
        &self,
        id: &ServiceIdentifier<T>,
        instance: Arc<T>,
    ) -> Option<ServiceEntry> {
        self.set(id.id(), Instance::new(instance))
    }

    /// Register a descriptor under a typed identifier
    #[inline]
    pub fn set_descriptor<T: ?Sized + Injectable>(
        &self,
        id: &ServiceIdentifier<T>,
        descriptor: ServiceDescriptor<T>,
    ) -> Option<ServiceEntry> {
        self.set(id.id(), descriptor)
    }

    /// Local-only lookup
    #[inline]
    pub fn get(&self, id: ServiceId) -> Option<ServiceEntry> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Check if the id has a local entry
    #[inline]
    pub fn has(&self, id: ServiceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Check if the local entry is still a descriptor
    #[inline]
    pub(crate) fn has_descriptor(&self, id: ServiceId) -> bool {
        self.entries
            .get(&id)
            .map(|entry| entry.is_descriptor())
            .unwrap_or(false)
    }

    /// Replace a descriptor with its instance, atomically per entry.
    pub(crate) fn graduate(&self, id: ServiceId, instance: Instance) -> Graduation {
        match self.entries.get_mut(&id) {
            Some(mut entry) if entry.is_descriptor() => {
                *entry = ServiceEntry::Instance(instance);
                Graduation::Stored
            }
            Some(_) => Graduation::AlreadyResolved,
            None => Graduation::Missing,
        }
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered ids
    pub fn ids(&self) -> Vec<ServiceId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Drop every entry
    #[inline]
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ServiceCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Into<ServiceEntry>> FromIterator<(ServiceId, E)> for ServiceCollection {
    fn from_iter<I: IntoIterator<Item = (ServiceId, E)>>(iter: I) -> Self {
        let collection = Self::new();
        for (id, entry) in iter {
            collection.set(id, entry);
        }
        collection
    }
}

impl std::fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("count", &self.len())
            .finish()
    }
}
