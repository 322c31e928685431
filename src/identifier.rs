//! Service identifiers and dependency declarations
//!
//! A service identifier is an opaque named token for a capability contract.
//! It is only ever used as a map key; the contract type parameter lets the
//! container hand back `Arc<T>` without the caller naming a concrete type.

use crate::InstantiationService;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker trait for types that can be stored in and resolved from a container.
///
/// This is automatically implemented for all types (including trait objects)
/// that are `Send + Sync + 'static`. You never need to implement this manually.
///
/// # Examples
///
/// ```rust
/// trait LogService: Send + Sync {
///     fn info(&self, message: &str);
/// }
///
/// // `dyn LogService` is Injectable because LogService requires Send + Sync.
/// ```
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Untyped service key.
///
/// Two identifiers with the same name are the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(&'static str);

impl ServiceId {
    /// Create a key from a service name
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The service name
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", self.0)
    }
}

/// Typed service identifier.
///
/// `T` is the contract handed out on resolution, usually a trait object.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::ServiceIdentifier;
///
/// trait FileService: Send + Sync {}
///
/// const FILE_SERVICE: ServiceIdentifier<dyn FileService> = ServiceIdentifier::new("fileService");
/// assert_eq!(FILE_SERVICE.name(), "fileService");
/// ```
pub struct ServiceIdentifier<T: ?Sized> {
    id: ServiceId,
    _contract: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> ServiceIdentifier<T> {
    /// Create an identifier for a named contract
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        Self {
            id: ServiceId::new(name),
            _contract: PhantomData,
        }
    }

    /// The untyped key
    #[inline]
    pub const fn id(&self) -> ServiceId {
        self.id
    }

    /// The service name
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Declare this service as the constructor parameter at `index`
    #[inline]
    pub const fn at(&self, index: usize) -> ServiceDependency {
        ServiceDependency { id: self.id, index }
    }
}

impl<T: ?Sized> Clone for ServiceIdentifier<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for ServiceIdentifier<T> {}

impl<T: ?Sized> fmt::Debug for ServiceIdentifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentifier")
            .field("id", &self.id.name())
            .field("contract", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: ?Sized> fmt::Display for ServiceIdentifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id.name())
    }
}

impl<T: ?Sized> From<ServiceIdentifier<T>> for ServiceId {
    fn from(identifier: ServiceIdentifier<T>) -> Self {
        identifier.id
    }
}

/// A declared service parameter of a constructor: `(index, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceDependency {
    /// Service being injected
    pub id: ServiceId,
    /// Position of the parameter in the constructor's argument list
    pub index: usize,
}

impl ServiceDependency {
    /// Create a dependency declaration
    #[inline]
    pub const fn new(index: usize, id: ServiceId) -> Self {
        Self { id, index }
    }
}

/// The container itself. Every container answers this identifier with its own
/// handle unless the collection it was created with overrides it.
pub const INSTANTIATION_SERVICE: ServiceIdentifier<InstantiationService> =
    ServiceIdentifier::new("instantiationService");

/// Helper macro to declare a service identifier constant
///
/// ```rust
/// use instantiation_service::service_identifier;
///
/// trait LogService: Send + Sync {}
///
/// service_identifier!(pub LOG_SERVICE: dyn LogService = "logService");
/// assert_eq!(LOG_SERVICE.name(), "logService");
/// ```
#[macro_export]
macro_rules! service_identifier {
    ($(#[$meta:meta])* $vis:vis $name:ident : $contract:ty = $id:literal) => {
        $(#[$meta])*
        $vis const $name: $crate::ServiceIdentifier<$contract> = $crate::ServiceIdentifier::new($id);
    };
    ($(#[$meta:meta])* $vis:vis $name:ident : $contract:ty) => {
        $(#[$meta])*
        $vis const $name: $crate::ServiceIdentifier<$contract> =
            $crate::ServiceIdentifier::new(stringify!($name));
    };
}
