//! Constructors, descriptors and positional arguments
//!
//! A [`Constructor`] is the explicit registration-table entry for a type: its
//! build function plus the ordered `(index, id)` list of service parameters.
//! A [`ServiceDescriptor`] adds pre-bound static arguments and the delayed
//! instantiation flag.
//!
//! Constructors receive their arguments positionally through [`Arguments`]:
//! static arguments first, then caller-supplied extras, then the resolved
//! services in declaration order.

use crate::collection::{Instance, Value};
use crate::trace::Trace;
use crate::{
    Delayed, DiError, Disposable, Injectable, InstantiationService, Result, ServiceDependency,
    ServiceId,
};
use std::sync::Arc;

// =============================================================================
// Arguments
// =============================================================================

/// Positional constructor arguments.
///
/// A slot can be empty: padding added by the container, or a service that
/// was missing in permissive mode.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::args;
///
/// let args = args!["workspace".to_string(), 3u32];
/// assert_eq!(args.arg::<String>(0).unwrap(), "workspace");
/// assert_eq!(args.arg::<u32>(1).unwrap(), 3);
/// assert!(args.arg::<u32>(0).is_err());
/// ```
#[derive(Clone)]
pub struct Arguments {
    target: &'static str,
    slots: Vec<Option<Value>>,
}

impl Arguments {
    /// Empty argument list
    #[inline]
    pub fn new() -> Self {
        Self {
            target: "<arguments>",
            slots: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn from_slots(target: &'static str, slots: Vec<Option<Value>>) -> Self {
        Self { target, slots }
    }

    #[inline]
    pub(crate) fn into_slots(self) -> Vec<Option<Value>> {
        self.slots
    }

    /// Append a value
    #[inline]
    pub fn with<T: Injectable>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Append an empty slot
    #[inline]
    pub fn with_empty(mut self) -> Self {
        self.slots.push(None);
        self
    }

    /// Append a value
    #[inline]
    pub fn push<T: Injectable>(&mut self, value: T) {
        self.slots.push(Some(Arc::new(value)));
    }

    /// Number of slots, empty ones included
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if there are no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check if the slot exists and holds a value
    #[inline]
    pub fn is_present(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Name of the constructor these arguments are for
    #[inline]
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Borrow a plain argument
    #[inline]
    pub fn arg_ref<T: Injectable>(&self, index: usize) -> Option<&T> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Clone a plain argument out
    #[inline]
    pub fn arg<T: Injectable + Clone>(&self, index: usize) -> Result<T> {
        self.arg_ref::<T>(index)
            .cloned()
            .ok_or_else(|| self.invalid::<T>(index))
    }

    /// A resolved service parameter
    #[inline]
    pub fn service<T: ?Sized + Injectable>(&self, index: usize) -> Result<Arc<T>> {
        self.optional_service::<T>(index)
            .ok_or_else(|| self.invalid::<Arc<T>>(index))
    }

    /// A service parameter that may be absent in permissive mode
    #[inline]
    pub fn optional_service<T: ?Sized + Injectable>(&self, index: usize) -> Option<Arc<T>> {
        self.arg_ref::<Arc<T>>(index).cloned()
    }

    fn invalid<T: ?Sized>(&self, index: usize) -> DiError {
        DiError::InvalidArgument {
            target: self.target,
            index,
            expected: std::any::type_name::<T>(),
        }
    }
}

impl Default for Arguments {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arguments")
            .field("target", &self.target)
            .field("len", &self.slots.len())
            .finish()
    }
}

/// Build an [`Arguments`] list from values
#[macro_export]
macro_rules! args {
    () => {
        $crate::Arguments::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Arguments::new()$(.with($value))+
    };
}

// =============================================================================
// Constructor
// =============================================================================

/// A built service plus the handle the owning container disposes it through
pub(crate) struct Created<T: ?Sized> {
    pub instance: Arc<T>,
    pub disposable: Option<Arc<dyn Disposable>>,
}

type BuildFn<T> = Arc<dyn Fn(&Arguments) -> Result<Created<T>> + Send + Sync>;

/// Constructor reference with its declared service parameters.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{Arguments, Constructor, ServiceIdentifier};
/// use std::sync::Arc;
///
/// const PREFIX: ServiceIdentifier<String> = ServiceIdentifier::new("prefix");
///
/// struct Greeter(String);
///
/// let ctor = Constructor::from_fn("Greeter", |args: &Arguments| {
///     let prefix = args.service::<String>(0)?;
///     Ok(Arc::new(Greeter(format!("{prefix}!"))))
/// })
/// .with_dependencies([PREFIX.at(0)]);
///
/// assert_eq!(ctor.dependencies().len(), 1);
/// ```
pub struct Constructor<T: ?Sized> {
    name: &'static str,
    dependencies: Arc<[ServiceDependency]>,
    build: BuildFn<T>,
}

impl<T: ?Sized + Injectable> Constructor<T> {
    /// Create from a build function. The built value is not disposed by the container.
    pub fn from_fn<F>(name: &'static str, build: F) -> Self
    where
        F: Fn(&Arguments) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            name,
            dependencies: Arc::from(Vec::new()),
            build: Arc::new(move |args: &Arguments| {
                Ok(Created {
                    instance: build(args)?,
                    disposable: None,
                })
            }),
        }
    }

    /// Declare the service parameters as `(index, id)` pairs
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = ServiceDependency>) -> Self {
        self.dependencies = dependencies.into_iter().collect::<Vec<_>>().into();
        self
    }

    /// Name used in diagnostics
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared service parameters, in declaration order
    #[inline]
    pub fn dependencies(&self) -> &[ServiceDependency] {
        &self.dependencies
    }

    /// Convert the product, typically to a trait object:
    /// `ctor.map(|s| s as Arc<dyn Contract>)`. Disposal ownership is kept.
    pub fn map<U, F>(self, convert: F) -> Constructor<U>
    where
        U: ?Sized + Injectable,
        F: Fn(Arc<T>) -> Arc<U> + Send + Sync + 'static,
    {
        let build = self.build;
        Constructor {
            name: self.name,
            dependencies: self.dependencies,
            build: Arc::new(move |args: &Arguments| {
                let created = build(args)?;
                Ok(Created {
                    instance: convert(created.instance),
                    disposable: created.disposable,
                })
            }),
        }
    }

    #[inline]
    pub(crate) fn build(&self, args: &Arguments) -> Result<Created<T>> {
        (self.build)(args)
    }
}

impl<T: Injectable + Disposable> Constructor<T> {
    /// Create from a build function; the container disposes what it builds
    pub fn disposable_from_fn<F>(name: &'static str, build: F) -> Self
    where
        F: Fn(&Arguments) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            name,
            dependencies: Arc::from(Vec::new()),
            build: Arc::new(move |args: &Arguments| {
                let instance = build(args)?;
                let disposable: Arc<dyn Disposable> = instance.clone();
                Ok(Created {
                    instance,
                    disposable: Some(disposable),
                })
            }),
        }
    }
}

impl<T: ?Sized> Clone for Constructor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            dependencies: Arc::clone(&self.dependencies),
            build: Arc::clone(&self.build),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Constructor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constructor")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Types that know how to build themselves from positional arguments.
///
/// `dependencies` is the explicit registration of the service parameters.
///
/// # Disposal
///
/// [`Construct::constructor`] and [`Construct::descriptor`] hand the container
/// no disposal handle, so a type that also implements [`Disposable`] is not
/// disposed with its container. Register it through
/// [`Construct::disposable_descriptor`] (or override [`Construct::disposable`])
/// to have the owning container dispose it.
///
/// # Example
///
/// ```rust
/// use instantiation_service::{Arguments, Construct, Result, ServiceDependency, ServiceIdentifier};
/// use std::sync::Arc;
///
/// const CONFIG: ServiceIdentifier<String> = ServiceIdentifier::new("config");
///
/// struct Window {
///     title: String,
///     config: Arc<String>,
/// }
///
/// impl Construct for Window {
///     fn dependencies() -> Vec<ServiceDependency> {
///         vec![CONFIG.at(1)]
///     }
///
///     fn construct(args: &Arguments) -> Result<Self> {
///         Ok(Window {
///             title: args.arg(0)?,
///             config: args.service(1)?,
///         })
///     }
/// }
/// ```
pub trait Construct: Sized + Send + Sync + 'static {
    /// Service parameters as `(index, id)` pairs
    fn dependencies() -> Vec<ServiceDependency> {
        Vec::new()
    }

    /// Build from static arguments, extra arguments and resolved services
    fn construct(args: &Arguments) -> Result<Self>;

    /// Handle the owning container disposes the instance through, if any
    fn disposable(_instance: &Arc<Self>) -> Option<Arc<dyn Disposable>> {
        None
    }

    /// Constructor entry for this type
    fn constructor() -> Constructor<Self> {
        Constructor {
            name: short_type_name::<Self>(),
            dependencies: Self::dependencies().into(),
            build: Arc::new(|args: &Arguments| {
                let instance = Arc::new(Self::construct(args)?);
                let disposable = Self::disposable(&instance);
                Ok(Created {
                    instance,
                    disposable,
                })
            }),
        }
    }

    /// Eager descriptor for this type, without static arguments
    fn descriptor() -> ServiceDescriptor<Self> {
        ServiceDescriptor::new(Self::constructor())
    }

    /// Constructor entry whose instances the owning container disposes
    fn disposable_constructor() -> Constructor<Self>
    where
        Self: Disposable,
    {
        Constructor::disposable_from_fn(short_type_name::<Self>(), |args: &Arguments| {
            Ok(Arc::new(Self::construct(args)?))
        })
        .with_dependencies(Self::dependencies())
    }

    /// Eager descriptor disposed with the container that builds it
    fn disposable_descriptor() -> ServiceDescriptor<Self>
    where
        Self: Disposable,
    {
        ServiceDescriptor::new(Self::disposable_constructor())
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

// =============================================================================
// Service Descriptor
// =============================================================================

type ProxyFactory<T> = Arc<dyn Fn(Delayed<T>) -> Arc<T> + Send + Sync>;

/// Recipe for a service: constructor, static arguments, delayed flag.
pub struct ServiceDescriptor<T: ?Sized> {
    ctor: Constructor<T>,
    static_arguments: Arguments,
    proxy: Option<ProxyFactory<T>>,
}

impl<T: ?Sized + Injectable> ServiceDescriptor<T> {
    /// Eager descriptor
    #[inline]
    pub fn new(ctor: Constructor<T>) -> Self {
        Self {
            ctor,
            static_arguments: Arguments::new(),
            proxy: None,
        }
    }

    /// Bind static arguments, passed before any caller-supplied ones
    #[inline]
    pub fn with_static_arguments(mut self, args: Arguments) -> Self {
        self.static_arguments = args;
        self
    }

    /// Support delayed instantiation.
    ///
    /// `proxy` wraps the [`Delayed`] slot in a type implementing the service
    /// contract; each of its methods forwards through [`Delayed::value`].
    pub fn delayed<P>(mut self, proxy: P) -> Self
    where
        P: Fn(Delayed<T>) -> Arc<T> + Send + Sync + 'static,
    {
        self.proxy = Some(Arc::new(proxy));
        self
    }

    /// The constructor
    #[inline]
    pub fn ctor(&self) -> &Constructor<T> {
        &self.ctor
    }

    /// The bound static arguments
    #[inline]
    pub fn static_arguments(&self) -> &Arguments {
        &self.static_arguments
    }

    /// Check if the service is built lazily behind a proxy
    #[inline]
    pub fn supports_delayed_instantiation(&self) -> bool {
        self.proxy.is_some()
    }
}

impl<T: ?Sized> std::fmt::Debug for ServiceDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("ctor", &self.ctor.name)
            .field("static_arguments", &self.static_arguments.len())
            .field("delayed", &self.proxy.is_some())
            .finish()
    }
}

/// Anything `create_instance` accepts: a constructor or a descriptor
pub trait Instantiable<T: ?Sized> {
    /// Constructor to run
    fn constructor(&self) -> &Constructor<T>;

    /// Arguments placed before the caller's extra arguments
    fn static_arguments(&self) -> Arguments {
        Arguments::new()
    }
}

impl<T: ?Sized + Injectable> Instantiable<T> for Constructor<T> {
    fn constructor(&self) -> &Constructor<T> {
        self
    }
}

impl<T: ?Sized + Injectable> Instantiable<T> for ServiceDescriptor<T> {
    fn constructor(&self) -> &Constructor<T> {
        &self.ctor
    }

    fn static_arguments(&self) -> Arguments {
        self.static_arguments.clone()
    }
}

// =============================================================================
// Type-erased descriptor
// =============================================================================

/// Instance produced for a descriptor, with its disposal handle
pub(crate) struct Realized {
    pub instance: Instance,
    pub disposable: Option<Arc<dyn Disposable>>,
}

pub(crate) trait DescriptorImpl: Send + Sync {
    fn name(&self) -> &'static str;
    fn dependencies(&self) -> &[ServiceDependency];
    fn supports_delayed_instantiation(&self) -> bool;
    fn instantiate(
        &self,
        owner: &InstantiationService,
        id: ServiceId,
        trace: &Trace,
    ) -> Result<Realized>;
}

impl<T: ?Sized + Injectable> DescriptorImpl for ServiceDescriptor<T> {
    fn name(&self) -> &'static str {
        self.ctor.name
    }

    fn dependencies(&self) -> &[ServiceDependency] {
        self.ctor.dependencies()
    }

    fn supports_delayed_instantiation(&self) -> bool {
        self.proxy.is_some()
    }

    fn instantiate(
        &self,
        owner: &InstantiationService,
        id: ServiceId,
        trace: &Trace,
    ) -> Result<Realized> {
        let args = self.static_arguments.clone().into_slots();
        match &self.proxy {
            None => {
                let created = owner.construct(&self.ctor, args, trace)?;
                Ok(Realized {
                    instance: Instance::new(created.instance),
                    disposable: created.disposable,
                })
            }
            Some(proxy) => {
                let slot = owner.delayed_slot(id, self.ctor.clone(), args, trace.clone());
                Ok(Realized {
                    instance: Instance::new(proxy(slot)),
                    disposable: None,
                })
            }
        }
    }
}

/// A descriptor with its contract type erased, as stored in a collection
#[derive(Clone)]
pub struct ErasedDescriptor {
    inner: Arc<dyn DescriptorImpl>,
}

impl ErasedDescriptor {
    pub(crate) fn new<T: ?Sized + Injectable>(descriptor: ServiceDescriptor<T>) -> Self {
        Self {
            inner: Arc::new(descriptor),
        }
    }

    /// Constructor name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Declared service parameters
    #[inline]
    pub fn dependencies(&self) -> &[ServiceDependency] {
        self.inner.dependencies()
    }

    /// Check if the service is built lazily behind a proxy
    #[inline]
    pub fn supports_delayed_instantiation(&self) -> bool {
        self.inner.supports_delayed_instantiation()
    }

    #[inline]
    pub(crate) fn instantiate(
        &self,
        owner: &InstantiationService,
        id: ServiceId,
        trace: &Trace,
    ) -> Result<Realized> {
        self.inner.instantiate(owner, id, trace)
    }
}

impl std::fmt::Debug for ErasedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedDescriptor")
            .field("ctor", &self.name())
            .field("delayed", &self.supports_delayed_instantiation())
            .finish()
    }
}
