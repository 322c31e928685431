//! The instantiation service
//!
//! An `InstantiationService` turns descriptors into live services on demand.
//! Resolution builds a dependency graph rooted at the requested service,
//! constructs its roots bottom-up and writes each instance back into the
//! container that owns the descriptor. Children read through to their
//! parent and may shadow its entries.

use crate::accessor::ServicesAccessor;
use crate::collection::{Graduation, Instance, ServiceEntry, Value};
use crate::descriptor::{Created, ErasedDescriptor};
use crate::graph::Graph;
use crate::idle::{IdleScheduler, TimerIdleScheduler};
use crate::trace::Trace;
use crate::{
    Arguments, Constructor, Delayed, DiError, Disposable, DisposableStore, INSTANTIATION_SERVICE,
    Injectable, Instantiable, Result, Scope, ServiceCollection, ServiceId, lock,
};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Graph construction gives up after visiting this many services
const MAX_VISITED: usize = 1000;

// =============================================================================
// Options
// =============================================================================

/// Container configuration, inherited by children.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{InstantiationOptions, ManualIdleScheduler};
/// use std::sync::Arc;
///
/// let options = InstantiationOptions::new()
///     .strict(true)
///     .tracing(true)
///     .idle_scheduler(Arc::new(ManualIdleScheduler::new()));
///
/// assert!(options.is_strict());
/// assert!(!options.is_strict_arity());
/// ```
#[derive(Clone)]
pub struct InstantiationOptions {
    strict: bool,
    tracing: bool,
    strict_arity: bool,
    idle_scheduler: Arc<dyn IdleScheduler>,
}

impl InstantiationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on missing services instead of passing an empty slot
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Record creation and invocation traces
    pub fn tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Fail when the plain argument count disagrees with the first service
    /// position instead of padding or truncating
    pub fn strict_arity(mut self, strict_arity: bool) -> Self {
        self.strict_arity = strict_arity;
        self
    }

    /// Where delayed services queue their construction
    pub fn idle_scheduler(mut self, scheduler: Arc<dyn IdleScheduler>) -> Self {
        self.idle_scheduler = scheduler;
        self
    }

    #[inline]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    #[inline]
    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    #[inline]
    pub fn is_strict_arity(&self) -> bool {
        self.strict_arity
    }
}

impl Default for InstantiationOptions {
    fn default() -> Self {
        Self {
            strict: false,
            tracing: false,
            strict_arity: false,
            idle_scheduler: Arc::new(TimerIdleScheduler::default()),
        }
    }
}

impl std::fmt::Debug for InstantiationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantiationOptions")
            .field("strict", &self.strict)
            .field("tracing", &self.tracing)
            .field("strict_arity", &self.strict_arity)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Re-entrancy guard
// =============================================================================

/// Held while a lineage builds services. Re-entrant, so a constructor may
/// resolve further services on its own thread.
pub(crate) type ConstructionLock = Arc<ReentrantMutex<()>>;

type ActiveSet = Arc<Mutex<HashSet<(ThreadId, ServiceId), RandomState>>>;

/// Marks a service as under construction on this thread until dropped
struct ActiveGuard {
    active: ActiveSet,
    key: (ThreadId, ServiceId),
}

impl ActiveGuard {
    fn enter(active: &ActiveSet, id: ServiceId) -> Result<Self> {
        let key = (std::thread::current().id(), id);
        if !lock(active).insert(key) {
            return Err(DiError::ReentrantInstantiation { id });
        }
        Ok(Self {
            active: Arc::clone(active),
            key,
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
    }
}

/// Service waiting in the resolution graph
#[derive(Clone)]
struct Pending {
    id: ServiceId,
    descriptor: ErasedDescriptor,
    trace: Trace,
}

// =============================================================================
// Container
// =============================================================================

struct Inner {
    scope: Scope,
    depth: u32,
    services: ServiceCollection,
    parent: Option<Weak<Inner>>,
    children: DashMap<Scope, InstantiationService, RandomState>,
    disposables: Mutex<Vec<Arc<dyn Disposable>>>,
    disposed: AtomicBool,
    options: InstantiationOptions,
    active: ActiveSet,
    construction: ConstructionLock,
    service_graph: Option<Arc<Mutex<Graph<ServiceId>>>>,
}

/// Dependency-injection container.
///
/// Cheap to clone; clones share the same container. Services that keep a
/// handle to their container keep it alive until it is disposed.
///
/// # Examples
///
/// ```rust
/// use instantiation_service::{
///     Arguments, Construct, InstantiationService, Result, ServiceCollection,
///     ServiceDependency, ServiceIdentifier, args,
/// };
/// use std::sync::Arc;
///
/// const PRODUCT: ServiceIdentifier<String> = ServiceIdentifier::new("product");
///
/// struct Window {
///     title: String,
/// }
///
/// impl Construct for Window {
///     fn dependencies() -> Vec<ServiceDependency> {
///         vec![PRODUCT.at(1)]
///     }
///
///     fn construct(args: &Arguments) -> Result<Self> {
///         let id: u32 = args.arg(0)?;
///         let product = args.service::<String>(1)?;
///         Ok(Window { title: format!("{product} #{id}") })
///     }
/// }
///
/// let services = ServiceCollection::new();
/// services.set_instance(&PRODUCT, Arc::new("Editor".to_string()));
/// let container = InstantiationService::new(services);
///
/// let window = container.create_instance(&Window::constructor(), args![1u32]).unwrap();
/// assert_eq!(window.title, "Editor #1");
/// ```
#[derive(Clone)]
pub struct InstantiationService {
    inner: Arc<Inner>,
}

impl InstantiationService {
    /// Create a root container with default options
    pub fn new(services: ServiceCollection) -> Self {
        Self::with_options(services, InstantiationOptions::default())
    }

    /// Create a root container
    pub fn with_options(services: ServiceCollection, options: InstantiationOptions) -> Self {
        let service_graph = options
            .tracing
            .then(|| Arc::new(Mutex::new(Graph::new(|id: &ServiceId| id.name().to_string()))));

        Self::build(
            services,
            None,
            0,
            options,
            Arc::default(),
            Arc::new(ReentrantMutex::new(())),
            service_graph,
        )
    }

    fn build(
        services: ServiceCollection,
        parent: Option<Weak<Inner>>,
        depth: u32,
        options: InstantiationOptions,
        active: ActiveSet,
        construction: ConstructionLock,
        service_graph: Option<Arc<Mutex<Graph<ServiceId>>>>,
    ) -> Self {
        let scope = Scope::new();

        #[cfg(feature = "logging")]
        debug!(
            target: "instantiation_service",
            scope = %scope,
            depth = depth,
            services = services.len(),
            strict = options.strict,
            tracing = options.tracing,
            "Creating instantiation service"
        );

        Self {
            inner: Arc::new(Inner {
                scope,
                depth,
                services,
                parent,
                children: DashMap::with_hasher(RandomState::new()),
                disposables: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                options,
                active,
                construction,
                service_graph,
            }),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Build a service from a constructor or descriptor.
    ///
    /// The constructor receives the descriptor's static arguments, then
    /// `args`, then its declared services in index order. The result is
    /// owned by the caller; the container does not dispose it.
    pub fn create_instance<T, C>(&self, target: &C, args: Arguments) -> Result<Arc<T>>
    where
        T: ?Sized + Injectable,
        C: Instantiable<T> + ?Sized,
    {
        self.ensure_alive()?;
        let ctor = target.constructor();
        let trace = Trace::creation(self.inner.options.tracing, ctor.name());

        let mut slots = target.static_arguments().into_slots();
        slots.extend(args.into_slots());

        let result = self.construct(ctor, slots, &trace).map(|created| created.instance);
        trace.stop();
        result
    }

    /// Run `f` with an accessor that resolves services for the duration of the call
    pub fn invoke_function<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ServicesAccessor) -> Result<R>,
    {
        self.ensure_alive()?;
        let trace = Trace::invocation(self.inner.options.tracing, std::any::type_name::<F>());
        let accessor = ServicesAccessor::new(self.clone(), trace.clone());

        let result = {
            let _expire = accessor.expire_on_drop();
            f(&accessor)
        };
        trace.stop();
        result
    }

    /// Create a child that reads through to this container.
    ///
    /// The child is disposed with this container, and also with `store` when given.
    pub fn create_child(
        &self,
        services: ServiceCollection,
        store: Option<&DisposableStore>,
    ) -> Result<InstantiationService> {
        self.ensure_alive()?;

        let child = Self::build(
            services,
            Some(Arc::downgrade(&self.inner)),
            self.inner.depth + 1,
            self.inner.options.clone(),
            Arc::clone(&self.inner.active),
            Arc::clone(&self.inner.construction),
            self.inner.service_graph.clone(),
        );
        self.inner.children.insert(child.scope(), child.clone());

        if let Some(store) = store {
            store.add(Arc::new(child.clone()));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "instantiation_service",
            parent = %self.inner.scope,
            child = %child.scope(),
            depth = child.depth(),
            "Created child instantiation service"
        );

        Ok(child)
    }

    /// Dispose children, then the services this container created, once.
    ///
    /// Every later operation fails with [`DiError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "instantiation_service",
            scope = %self.inner.scope,
            depth = self.inner.depth,
            children = self.inner.children.len(),
            "Disposing instantiation service"
        );

        let children: Vec<InstantiationService> = self
            .inner
            .children
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for child in children {
            child.dispose();
        }
        self.inner.children.clear();

        let disposables = std::mem::take(&mut *lock(&self.inner.disposables));
        for disposable in disposables {
            disposable.dispose();
        }

        if let Ok(Some(parent)) = self.parent() {
            parent.inner.children.remove(&self.inner.scope);
        }

        // Services holding this container would otherwise keep it alive
        self.inner.services.clear();
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn strict(&self) -> bool {
        self.inner.options.strict
    }

    #[inline]
    pub fn options(&self) -> &InstantiationOptions {
        &self.inner.options
    }

    /// Scope depth (0 = root)
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    #[inline]
    pub fn scope(&self) -> Scope {
        self.inner.scope
    }

    /// This container's own entries, without the parent's
    #[inline]
    pub fn services(&self) -> &ServiceCollection {
        &self.inner.services
    }

    /// Live children
    #[inline]
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    /// Dump of every service-to-service edge seen by the lineage, when tracing
    pub fn service_graph(&self) -> Option<String> {
        self.inner
            .service_graph
            .as_ref()
            .map(|graph| lock(graph).to_string())
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DiError::Disposed);
        }
        Ok(())
    }

    fn parent(&self) -> Result<Option<InstantiationService>> {
        match &self.inner.parent {
            None => Ok(None),
            Some(parent) => parent
                .upgrade()
                .map(|inner| Some(InstantiationService { inner }))
                .ok_or(DiError::ParentDropped),
        }
    }

    /// Find the entry for `id` here or in the nearest ancestor
    fn lookup(&self, id: ServiceId) -> Result<Option<ServiceEntry>> {
        if let Some(entry) = self.inner.services.get(id) {
            return Ok(Some(entry));
        }
        if id == INSTANTIATION_SERVICE.id() {
            return Ok(Some(ServiceEntry::Instance(Instance::new(Arc::new(
                self.clone(),
            )))));
        }

        let mut current = self.parent()?;
        while let Some(container) = current {
            if let Some(entry) = container.inner.services.get(id) {
                return Ok(Some(entry));
            }
            current = container.parent()?;
        }
        Ok(None)
    }

    /// The container whose own entry for `id` is still a descriptor
    fn owner_of(&self, id: ServiceId) -> Result<Option<InstantiationService>> {
        let mut current = Some(self.clone());
        while let Some(container) = current {
            if container.inner.services.has_descriptor(id) {
                return Ok(Some(container));
            }
            current = container.parent()?;
        }
        Ok(None)
    }

    pub(crate) fn get_or_create_service_instance(
        &self,
        id: ServiceId,
        trace: &Trace,
    ) -> Result<Option<Instance>> {
        self.ensure_alive()?;

        #[cfg(feature = "logging")]
        trace!(
            target: "instantiation_service",
            service = %id,
            scope = %self.inner.scope,
            depth = self.inner.depth,
            "Resolving service"
        );

        if let Some(ServiceEntry::Instance(instance)) = self.lookup(id)? {
            trace.branch(id, false);
            return Ok(Some(instance));
        }

        // one construction at a time per lineage; look again once we hold it
        let _serial = self.inner.construction.lock();
        match self.lookup(id)? {
            Some(ServiceEntry::Instance(instance)) => {
                trace.branch(id, false);
                Ok(Some(instance))
            }
            Some(ServiceEntry::Descriptor(descriptor)) => {
                let branch = trace.branch(id, true);
                let _active = ActiveGuard::enter(&self.inner.active, id)?;
                self.create_and_cache(id, descriptor, &branch).map(Some)
            }
            None => Ok(None),
        }
    }

    fn create_and_cache(
        &self,
        id: ServiceId,
        descriptor: ErasedDescriptor,
        trace: &Trace,
    ) -> Result<Instance> {
        let mut graph = Graph::new(|item: &Pending| item.id.name().to_string());
        let mut seen: HashSet<ServiceId, RandomState> = HashSet::default();
        let mut stack = vec![Pending {
            id,
            descriptor,
            trace: trace.clone(),
        }];
        let mut visited = 0usize;

        while let Some(item) = stack.pop() {
            if !seen.insert(item.id) {
                continue;
            }
            visited += 1;
            if visited > MAX_VISITED {
                return Err(cycle_error(&graph));
            }

            graph.lookup_or_insert_node(item.clone());

            for dependency in item.descriptor.dependencies() {
                let Some(entry) = self.lookup(dependency.id)? else {
                    self.throw_if_strict(
                        dependency.id,
                        format!(
                            "[createInstance] {} depends on {} which is NOT registered.",
                            item.id, dependency.id
                        ),
                        true,
                    )?;
                    continue;
                };

                if let Some(service_graph) = &self.inner.service_graph {
                    lock(service_graph).insert_edge(item.id, dependency.id);
                }

                if let ServiceEntry::Descriptor(descriptor) = entry {
                    let next = Pending {
                        id: dependency.id,
                        descriptor,
                        trace: item.trace.branch(dependency.id, true),
                    };
                    graph.insert_edge(item.clone(), next.clone());
                    stack.push(next);
                }
            }
        }

        loop {
            let roots: Vec<Pending> = graph
                .roots()
                .into_iter()
                .map(|node| node.data().clone())
                .collect();

            if roots.is_empty() {
                if !graph.is_empty() {
                    return Err(cycle_error(&graph));
                }
                break;
            }

            for root in roots {
                if matches!(self.lookup(root.id)?, Some(ServiceEntry::Descriptor(_))) {
                    // the requested id is already guarded by the caller
                    let _active = if root.id == id {
                        None
                    } else {
                        Some(ActiveGuard::enter(&self.inner.active, root.id)?)
                    };
                    let owner = self.owner_of(root.id)?.ok_or_else(|| {
                        DiError::Internal(format!(
                            "illegalState - creating UNKNOWN service instance {}",
                            root.descriptor.name()
                        ))
                    })?;
                    owner.realize(root.id, &root.descriptor, &root.trace)?;
                }
                graph.remove_node(&root);
            }
        }

        match self.lookup(id)? {
            Some(ServiceEntry::Instance(instance)) => Ok(instance),
            _ => Err(DiError::Internal(format!(
                "service '{id}' was not instantiated"
            ))),
        }
    }

    /// Build the service for a descriptor this container owns and store it
    fn realize(&self, id: ServiceId, descriptor: &ErasedDescriptor, trace: &Trace) -> Result<()> {
        self.ensure_alive()?;

        #[cfg(feature = "logging")]
        debug!(
            target: "instantiation_service",
            service = %id,
            ctor = descriptor.name(),
            delayed = descriptor.supports_delayed_instantiation(),
            scope = %self.inner.scope,
            "Creating service instance"
        );

        let realized = descriptor.instantiate(self, id, trace)?;
        match self.inner.services.graduate(id, realized.instance) {
            Graduation::Stored => {
                if let Some(disposable) = realized.disposable {
                    self.adopt(disposable)?;
                }
            }
            Graduation::AlreadyResolved => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "instantiation_service",
                    service = %id,
                    "Service was resolved concurrently, dropping duplicate"
                );
                if let Some(disposable) = realized.disposable {
                    disposable.dispose();
                }
            }
            Graduation::Missing => {
                return Err(DiError::Internal(format!(
                    "illegalState - setting UNKNOWN service instance {id}"
                )));
            }
        }
        Ok(())
    }

    /// Run a constructor with its services resolved from this container
    pub(crate) fn construct<T: ?Sized + Injectable>(
        &self,
        ctor: &Constructor<T>,
        mut args: Vec<Option<Value>>,
        trace: &Trace,
    ) -> Result<Created<T>> {
        let mut dependencies = ctor.dependencies().to_vec();
        dependencies.sort_by_key(|dependency| dependency.index);

        let mut service_args = Vec::with_capacity(dependencies.len());
        for dependency in &dependencies {
            let service = self.get_or_create_service_instance(dependency.id, trace)?;
            if service.is_none() {
                self.throw_if_strict(
                    dependency.id,
                    format!(
                        "[createInstance] {} depends on UNKNOWN service {}.",
                        ctor.name(),
                        dependency.id
                    ),
                    false,
                )?;
            }
            service_args.push(service.map(Instance::into_value));
        }

        let first_service_arg = dependencies.first().map_or(args.len(), |dependency| dependency.index);
        if args.len() != first_service_arg {
            if self.inner.options.strict_arity {
                return Err(DiError::ArityMismatch {
                    target: ctor.name(),
                    expected: first_service_arg,
                    actual: args.len(),
                });
            }

            #[cfg(feature = "logging")]
            warn!(
                target: "instantiation_service",
                ctor = ctor.name(),
                expected = first_service_arg,
                actual = args.len(),
                "[createInstance] First service dependency of {} at position {} conflicts with {} static arguments",
                ctor.name(),
                first_service_arg,
                args.len()
            );
            args.resize(first_service_arg, None);
        }
        args.extend(service_args);

        #[cfg(feature = "logging")]
        trace!(
            target: "instantiation_service",
            ctor = ctor.name(),
            arguments = args.len(),
            "Running constructor"
        );

        ctor.build(&Arguments::from_slots(ctor.name(), args))
    }

    /// Slot for a delayed service owned by this container
    pub(crate) fn delayed_slot<T: ?Sized + Injectable>(
        &self,
        id: ServiceId,
        ctor: Constructor<T>,
        args: Vec<Option<Value>>,
        trace: Trace,
    ) -> Delayed<T> {
        let owner = Arc::downgrade(&self.inner);
        let construction = Some(Arc::clone(&self.inner.construction));
        let slot = Delayed::with_construction_lock(id, construction, move || {
            let owner = owner
                .upgrade()
                .map(|inner| InstantiationService { inner })
                .ok_or(DiError::Disposed)?;
            owner.ensure_alive()?;

            let created = owner.construct(&ctor, args, &trace)?;
            if let Some(disposable) = created.disposable {
                owner.adopt(disposable)?;
            }
            Ok(created.instance)
        });
        slot.schedule(self.inner.options.idle_scheduler.as_ref());
        slot
    }

    /// Register a created service for disposal with this container
    fn adopt(&self, disposable: Arc<dyn Disposable>) -> Result<()> {
        let mut disposables = lock(&self.inner.disposables);
        if self.is_disposed() {
            drop(disposables);
            disposable.dispose();
            return Err(DiError::Disposed);
        }
        disposables.push(disposable);
        Ok(())
    }

    fn throw_if_strict(&self, id: ServiceId, message: String, print_warning: bool) -> Result<()> {
        if print_warning {
            #[cfg(feature = "logging")]
            warn!(target: "instantiation_service", service = %id, "{message}");
        }
        if self.inner.options.strict {
            return Err(DiError::missing(id, message));
        }
        Ok(())
    }
}

fn cycle_error<T>(graph: &Graph<T>) -> DiError {
    let cycle = graph
        .find_cycle_slow()
        .unwrap_or_else(|| format!("UNABLE to detect cycle, dumping graph: \n{graph}"));

    #[cfg(feature = "logging")]
    debug!(target: "instantiation_service", cycle = %cycle, "Cyclic dependency detected");

    DiError::cyclic(cycle)
}

impl Disposable for InstantiationService {
    fn dispose(&self) {
        InstantiationService::dispose(self);
    }
}

impl std::fmt::Debug for InstantiationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantiationService")
            .field("scope", &self.inner.scope)
            .field("depth", &self.inner.depth)
            .field("services", &self.inner.services.len())
            .field("children", &self.inner.children.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
