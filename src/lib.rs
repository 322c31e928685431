//! # Instantiation Service - Service Wiring for Modular Applications
//!
//! A dependency-injection container that turns declarative service
//! descriptors into live object graphs on demand.
//!
//! ## Features
//!
//! - **Typed identifiers** - `const` service ids carrying their contract, usually a trait object
//! - **Explicit dependencies** - constructors declare `(index, id)` pairs, no reflection
//! - **Cycle detection** - resolution builds a graph and reports the offending path
//! - **Delayed services** - proxies that build the real service on first use or when idle
//! - **Child containers** - read-through scopes that may shadow parent services
//! - **Ordered disposal** - children first, then the services each container created
//! - **Observable** - optional creation traces and `tracing` integration
//!
//! ## Quick Start
//!
//! ```rust
//! use instantiation_service::prelude::*;
//!
//! trait LogService: Send + Sync {
//!     fn info(&self, message: &str) -> String;
//! }
//!
//! struct ConsoleLog;
//!
//! impl LogService for ConsoleLog {
//!     fn info(&self, message: &str) -> String {
//!         format!("[info] {message}")
//!     }
//! }
//!
//! const LOG: ServiceIdentifier<dyn LogService> = ServiceIdentifier::new("logService");
//!
//! struct Workbench {
//!     log: Arc<dyn LogService>,
//! }
//!
//! impl Construct for Workbench {
//!     fn dependencies() -> Vec<ServiceDependency> {
//!         vec![LOG.at(0)]
//!     }
//!
//!     fn construct(args: &Arguments) -> Result<Self> {
//!         Ok(Workbench { log: args.service(0)? })
//!     }
//! }
//!
//! let services = ServiceCollection::new();
//! services.set_descriptor(
//!     &LOG,
//!     ServiceDescriptor::new(Constructor::from_fn("ConsoleLog", |_: &Arguments| {
//!         Ok(Arc::new(ConsoleLog) as Arc<dyn LogService>)
//!     })),
//! );
//!
//! let container = InstantiationService::new(services);
//! let workbench = container.create_instance(&Workbench::constructor(), args![]).unwrap();
//! assert_eq!(workbench.log.info("ready"), "[info] ready");
//!
//! // Same instance through an accessor
//! let log = container.invoke_function(|accessor| accessor.get(&LOG)).unwrap();
//! assert!(Arc::ptr_eq(&log, &workbench.log));
//! ```
//!
//! ## Child Containers
//!
//! ```rust
//! use instantiation_service::{InstantiationService, ServiceCollection, ServiceIdentifier};
//! use std::sync::Arc;
//!
//! const WORKSPACE: ServiceIdentifier<String> = ServiceIdentifier::new("workspace");
//!
//! let root = InstantiationService::new(ServiceCollection::new());
//!
//! let overrides = ServiceCollection::new();
//! overrides.set_instance(&WORKSPACE, Arc::new("/home/project".to_string()));
//! let window = root.create_child(overrides, None).unwrap();
//!
//! // The child sees its own services, the root does not
//! assert!(window.invoke_function(|a| a.get_if_exists(&WORKSPACE)).unwrap().is_some());
//! assert!(root.invoke_function(|a| a.get_if_exists(&WORKSPACE)).unwrap().is_none());
//!
//! root.dispose();
//! assert!(window.is_disposed());
//! ```

mod accessor;
mod collection;
mod container;
mod delayed;
mod descriptor;
mod error;
mod event;
pub mod graph;
mod identifier;
mod idle;
mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
mod scope;
pub mod trace;

pub use accessor::*;
pub use collection::{Instance, ServiceCollection, ServiceEntry};
pub use container::*;
pub use delayed::*;
pub use descriptor::{
    Arguments, Construct, Constructor, ErasedDescriptor, Instantiable, ServiceDescriptor,
};
pub use error::*;
pub use event::*;
pub use graph::Graph;
pub use identifier::*;
pub use idle::*;
pub use lifecycle::*;
pub use scope::*;

// Re-export for convenience
pub use std::sync::Arc;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, ignoring poisoning.
///
/// User constructors run outside every lock, so a poisoned mutex only means
/// another thread panicked between two plain updates.
#[inline]
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Arguments, Construct, Constructor, Delayed, DiError, Disposable, DisposableStore,
        INSTANTIATION_SERVICE, Injectable, InstantiationOptions, InstantiationService, Result,
        ServiceCollection, ServiceDependency, ServiceDescriptor, ServiceIdentifier,
        ServicesAccessor, args,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    // -------------------------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------------------------

    trait Storage: Send + Sync {
        fn get(&self, key: &str) -> Option<String>;
        fn store(&self, key: &str, value: &str);
        fn on_did_change(&self) -> Event<String>;
    }

    struct MemoryStorage {
        values: Mutex<HashMap<String, String>>,
        changed: Emitter<String>,
        disposed: Arc<AtomicU32>,
    }

    impl Storage for MemoryStorage {
        fn get(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }

        fn store(&self, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            self.changed.fire(&key.to_string());
        }

        fn on_did_change(&self) -> Event<String> {
            self.changed.event()
        }
    }

    impl Disposable for MemoryStorage {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Forwards to the real storage, building it on first use
    struct StorageProxy(Delayed<dyn Storage>);

    impl Storage for StorageProxy {
        fn get(&self, key: &str) -> Option<String> {
            self.0.value().ok()?.get(key)
        }

        fn store(&self, key: &str, value: &str) {
            if let Ok(storage) = self.0.value() {
                storage.store(key, value);
            }
        }

        fn on_did_change(&self) -> Event<String> {
            self.0.on_event(|storage| storage.on_did_change())
        }
    }

    const STORAGE: ServiceIdentifier<dyn Storage> = ServiceIdentifier::new("storageService");

    fn delayed_storage(built: Arc<AtomicU32>, disposed: Arc<AtomicU32>) -> ServiceDescriptor<dyn Storage> {
        let ctor = Constructor::disposable_from_fn("MemoryStorage", move |_: &Arguments| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryStorage {
                values: Mutex::new(HashMap::new()),
                changed: Emitter::new(),
                disposed: disposed.clone(),
            }))
        })
        .map(|storage| storage as Arc<dyn Storage>);

        ServiceDescriptor::new(ctor).delayed(|slot| Arc::new(StorageProxy(slot)) as Arc<dyn Storage>)
    }

    #[derive(Debug)]
    struct B;

    #[derive(Debug)]
    struct A {
        b: Arc<B>,
    }

    const SERVICE_A: ServiceIdentifier<A> = ServiceIdentifier::new("serviceA");
    const SERVICE_B: ServiceIdentifier<B> = ServiceIdentifier::new("serviceB");
    const MISSING: ServiceIdentifier<B> = ServiceIdentifier::new("missingService");

    fn counting<T: Injectable>(
        name: &'static str,
        built: Arc<AtomicU32>,
        make: impl Fn(&Arguments) -> Result<T> + Send + Sync + 'static,
    ) -> Constructor<T> {
        Constructor::from_fn(name, move |args: &Arguments| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(make(args)?))
        })
    }

    fn a_depends_on_b() -> Constructor<A> {
        Constructor::from_fn("A", |args: &Arguments| {
            Ok(Arc::new(A {
                b: args.service(0)?,
            }))
        })
        .with_dependencies([SERVICE_B.at(0)])
    }

    fn manual_options() -> (Arc<ManualIdleScheduler>, InstantiationOptions) {
        let scheduler = Arc::new(ManualIdleScheduler::new());
        let options = InstantiationOptions::new().idle_scheduler(scheduler.clone());
        (scheduler, options)
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolution_is_idempotent_across_lineage() {
        let built = Arc::new(AtomicU32::new(0));
        let services = ServiceCollection::new();
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(counting("B", built.clone(), |_| Ok(B))),
        );
        let root = InstantiationService::new(services);
        let child = root.create_child(ServiceCollection::new(), None).unwrap();
        let grandchild = child.create_child(ServiceCollection::new(), None).unwrap();

        let from_grandchild = grandchild.invoke_function(|a| a.get(&SERVICE_B)).unwrap();
        let from_root = root.invoke_function(|a| a.get(&SERVICE_B)).unwrap();
        let again = grandchild.invoke_function(|a| a.get(&SERVICE_B)).unwrap();

        assert!(Arc::ptr_eq(&from_grandchild, &from_root));
        assert!(Arc::ptr_eq(&from_root, &again));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_instance_shares_dependency_with_accessor() {
        let services = ServiceCollection::new();
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(Constructor::from_fn("B", |_: &Arguments| Ok(Arc::new(B)))),
        );
        let container = InstantiationService::new(services);

        let a = container.create_instance(&a_depends_on_b(), args![]).unwrap();
        let b = container.invoke_function(|accessor| accessor.get(&SERVICE_B)).unwrap();
        assert!(Arc::ptr_eq(&a.b, &b));
    }

    #[test]
    fn test_create_instance_is_not_cached() {
        let built = Arc::new(AtomicU32::new(0));
        let ctor = counting("B", built.clone(), |_| Ok(B));
        let container = InstantiationService::new(ServiceCollection::new());

        let first = container.create_instance(&ctor, args![]).unwrap();
        let second = container.create_instance(&ctor, args![]).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transitive_descriptors_built_bottom_up() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let services = ServiceCollection::new();

        let log = order.clone();
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(Constructor::from_fn("B", move |_: &Arguments| {
                log.lock().unwrap().push("B");
                Ok(Arc::new(B))
            })),
        );
        let log = order.clone();
        services.set_descriptor(
            &SERVICE_A,
            ServiceDescriptor::new(
                Constructor::from_fn("A", move |args: &Arguments| {
                    log.lock().unwrap().push("A");
                    Ok(Arc::new(A {
                        b: args.service(0)?,
                    }))
                })
                .with_dependencies([SERVICE_B.at(0)]),
            ),
        );
        let container = InstantiationService::new(services);

        container.invoke_function(|a| a.get(&SERVICE_A)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
    }

    #[test]
    fn test_concurrent_resolution_yields_one_instance() {
        let services = ServiceCollection::new();
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(Constructor::from_fn("B", |_: &Arguments| Ok(Arc::new(B)))),
        );
        let container = InstantiationService::new(services);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                std::thread::spawn(move || container.invoke_function(|a| a.get(&SERVICE_B)).unwrap())
            })
            .collect();
        let instances: Vec<Arc<B>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for instance in &instances {
            assert!(Arc::ptr_eq(instance, &instances[0]));
        }
    }

    // -------------------------------------------------------------------------
    // Cycles and re-entrancy
    // -------------------------------------------------------------------------

    #[test]
    fn test_direct_cycle_names_both_services() {
        let services = ServiceCollection::new();
        services.set_descriptor(&SERVICE_A, ServiceDescriptor::new(a_depends_on_b()));
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(
                Constructor::from_fn("B", |_: &Arguments| Ok(Arc::new(B)))
                    .with_dependencies([SERVICE_A.at(0)]),
            ),
        );
        let container = InstantiationService::new(services);

        let err = container.invoke_function(|a| a.get(&SERVICE_A)).unwrap_err();
        let DiError::CyclicDependency { cycle } = &err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle, "serviceA -> serviceB -> serviceA");
        assert!(err.to_string().contains("serviceA"));
        assert!(err.to_string().contains("serviceB"));

        // nothing stays marked as under construction
        let err = container.invoke_function(|a| a.get(&SERVICE_B)).unwrap_err();
        assert!(matches!(err, DiError::CyclicDependency { .. }));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let services = ServiceCollection::new();
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(
                Constructor::from_fn("B", |_: &Arguments| Ok(Arc::new(B)))
                    .with_dependencies([SERVICE_B.at(0)]),
            ),
        );
        let container = InstantiationService::new(services);

        let err = container.invoke_function(|a| a.get(&SERVICE_B)).unwrap_err();
        assert!(matches!(err, DiError::CyclicDependency { cycle } if cycle == "serviceB -> serviceB"));
    }

    #[test]
    fn test_visited_cap_stops_graph_construction() {
        #[derive(Debug)]
        struct Link;

        let services = ServiceCollection::new();
        let ids: Vec<ServiceId> = (0..1100)
            .map(|i| ServiceId::new(Box::leak(format!("link{i}").into_boxed_str())))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            let mut ctor = Constructor::from_fn("Link", |_: &Arguments| Ok(Arc::new(Link)));
            if let Some(next) = ids.get(i + 1) {
                ctor = ctor.with_dependencies([ServiceDependency::new(0, *next)]);
            }
            services.set(*id, ServiceDescriptor::new(ctor));
        }
        let container = InstantiationService::new(services);
        let first: ServiceIdentifier<Link> = ServiceIdentifier::new("link0");

        let err = container.invoke_function(|a| a.get(&first)).unwrap_err();
        assert!(matches!(&err, DiError::CyclicDependency { cycle } if cycle.starts_with("UNABLE to detect cycle")));
    }

    #[test]
    fn test_reentrant_construction_errors() {
        #[derive(Debug)]
        struct Recursive;
        const RECURSIVE: ServiceIdentifier<Recursive> = ServiceIdentifier::new("recursive");

        let services = ServiceCollection::new();
        services.set_descriptor(
            &RECURSIVE,
            ServiceDescriptor::new(
                Constructor::from_fn("Recursive", |args: &Arguments| {
                    let container = args.service::<InstantiationService>(0)?;
                    container.invoke_function(|a| a.get(&RECURSIVE))?;
                    Ok(Arc::new(Recursive))
                })
                .with_dependencies([INSTANTIATION_SERVICE.at(0)]),
            ),
        );
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(Constructor::from_fn("B", |_: &Arguments| Ok(Arc::new(B)))),
        );
        let container = InstantiationService::new(services);

        let err = container.invoke_function(|a| a.get(&RECURSIVE)).unwrap_err();
        assert!(matches!(err, DiError::ReentrantInstantiation { id } if id == RECURSIVE.id()));

        // the guard was released on the error path
        assert!(container.invoke_function(|a| a.get(&SERVICE_B)).is_ok());
        let err = container.invoke_function(|a| a.get(&RECURSIVE)).unwrap_err();
        assert!(matches!(err, DiError::ReentrantInstantiation { .. }));
    }

    // -------------------------------------------------------------------------
    // Missing services and arguments
    // -------------------------------------------------------------------------

    #[test]
    fn test_permissive_passes_empty_slot() {
        let services = ServiceCollection::new();
        services.set_descriptor(
            &SERVICE_A,
            ServiceDescriptor::new(
                Constructor::from_fn("A", |args: &Arguments| {
                    assert!(args.optional_service::<B>(0).is_none());
                    Ok(Arc::new(A { b: Arc::new(B) }))
                })
                .with_dependencies([MISSING.at(0)]),
            ),
        );
        let container = InstantiationService::new(services);

        assert!(container.invoke_function(|a| a.get(&SERVICE_A)).is_ok());
        assert!(container.invoke_function(|a| a.get_if_exists(&MISSING)).unwrap().is_none());
        let err = container.invoke_function(|a| a.get(&MISSING)).unwrap_err();
        assert_eq!(err.to_string(), "[invokeFunction] unknown service 'missingService'");
    }

    #[test]
    fn test_strict_missing_service_errors() {
        let services = ServiceCollection::new();
        services.set_descriptor(&SERVICE_A, ServiceDescriptor::new(a_depends_on_b()));
        let container =
            InstantiationService::with_options(services, InstantiationOptions::new().strict(true));

        let err = container.invoke_function(|a| a.get(&SERVICE_A)).unwrap_err();
        assert!(matches!(&err, DiError::MissingService { id, .. } if *id == SERVICE_B.id()));
        assert!(err.to_string().contains("NOT registered"));

        let err = container.create_instance(&a_depends_on_b(), args![]).unwrap_err();
        assert!(err.to_string().contains("depends on UNKNOWN service serviceB"));
    }

    #[test]
    fn test_arguments_order_static_extra_services() {
        struct Window {
            product: String,
            id: u32,
            b: Arc<B>,
        }

        let ctor = Constructor::from_fn("Window", |args: &Arguments| {
            Ok(Arc::new(Window {
                product: args.arg(0)?,
                id: args.arg(1)?,
                b: args.service(2)?,
            }))
        })
        .with_dependencies([SERVICE_B.at(2)]);

        let services = ServiceCollection::new();
        services.set_instance(&SERVICE_B, Arc::new(B));
        let container = InstantiationService::new(services);

        let descriptor = ServiceDescriptor::new(ctor).with_static_arguments(args!["Editor".to_string()]);
        let window = container.create_instance(&descriptor, args![7u32]).unwrap();
        assert_eq!(window.product, "Editor");
        assert_eq!(window.id, 7);
        let b = container.invoke_function(|a| a.get(&SERVICE_B)).unwrap();
        assert!(Arc::ptr_eq(&window.b, &b));
    }

    #[test]
    fn test_argument_count_is_corrected() {
        let ctor = Constructor::from_fn("Padded", |args: &Arguments| {
            Ok(Arc::new((args.len(), args.is_present(1), args.service::<B>(2).is_ok())))
        })
        .with_dependencies([SERVICE_B.at(2)]);

        let services = ServiceCollection::new();
        services.set_instance(&SERVICE_B, Arc::new(B));
        let container = InstantiationService::new(services);

        // padded with an empty slot
        let padded = container.create_instance(&ctor, args![1u8]).unwrap();
        assert_eq!(*padded, (3, false, true));

        // truncated to the first service position
        let truncated = container.create_instance(&ctor, args![1u8, 2u8, 3u8]).unwrap();
        assert_eq!(*truncated, (3, true, true));
    }

    #[test]
    fn test_strict_arity_rejects_mismatch() {
        let ctor = Constructor::from_fn("Exact", |_: &Arguments| Ok(Arc::new(())))
            .with_dependencies([SERVICE_B.at(1)]);

        let services = ServiceCollection::new();
        services.set_instance(&SERVICE_B, Arc::new(B));
        let container = InstantiationService::with_options(
            services,
            InstantiationOptions::new().strict_arity(true),
        );

        let err = container.create_instance(&ctor, args![]).unwrap_err();
        assert!(matches!(
            err,
            DiError::ArityMismatch { expected: 1, actual: 0, .. }
        ));
        assert!(container.create_instance(&ctor, args![0u8]).is_ok());
    }

    #[test]
    fn test_constructor_error_propagates() {
        let services = ServiceCollection::new();
        services.set_descriptor(
            &SERVICE_B,
            ServiceDescriptor::new(Constructor::from_fn("B", |_: &Arguments| {
                Err::<Arc<B>, _>(DiError::creation_failed::<B>("disk full"))
            })),
        );
        let container = InstantiationService::new(services);

        let err = container.invoke_function(|a| a.get(&SERVICE_B)).unwrap_err();
        assert!(matches!(err, DiError::CreationFailed { .. }));
        // the descriptor stays in place
        assert!(container.services().get(SERVICE_B.id()).unwrap().is_descriptor());
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let services = ServiceCollection::new();
        services.set_instance(&SERVICE_B, Arc::new(B));
        let container = InstantiationService::new(services);

        const WRONG: ServiceIdentifier<String> = ServiceIdentifier::new("serviceB");
        let err = container.invoke_function(|a| a.get(&WRONG)).unwrap_err();
        assert!(matches!(err, DiError::ServiceTypeMismatch { .. }));
    }

    // -------------------------------------------------------------------------
    // Accessor
    // -------------------------------------------------------------------------

    #[test]
    fn test_accessor_expires_after_call() {
        let services = ServiceCollection::new();
        services.set_instance(&SERVICE_B, Arc::new(B));
        let container = InstantiationService::new(services);

        let leaked = container
            .invoke_function(|accessor| {
                assert!(accessor.get(&SERVICE_B).is_ok());
                Ok(accessor.clone())
            })
            .unwrap();

        assert!(leaked.is_expired());
        assert!(matches!(leaked.get(&SERVICE_B), Err(DiError::AccessorExpired)));
        assert!(matches!(
            leaked.get_if_exists(&SERVICE_B),
            Err(DiError::AccessorExpired)
        ));
    }

    #[test]
    fn test_accessor_expires_on_error() {
        let container = InstantiationService::new(ServiceCollection::new());
        let slot = Arc::new(Mutex::new(None));

        let keep = slot.clone();
        let result: Result<()> = container.invoke_function(|accessor| {
            *keep.lock().unwrap() = Some(accessor.clone());
            Err(DiError::Internal("callback failed".into()))
        });

        assert!(result.is_err());
        let accessor = slot.lock().unwrap().take().unwrap();
        assert!(accessor.is_expired());
    }

    // -------------------------------------------------------------------------
    // Children
    // -------------------------------------------------------------------------

    #[test]
    fn test_child_shadowing() {
        const NAME: ServiceIdentifier<String> = ServiceIdentifier::new("name");
        const CHILD_ONLY: ServiceIdentifier<String> = ServiceIdentifier::new("childOnly");

        let services = ServiceCollection::new();
        services.set_instance(&NAME, Arc::new("root".to_string()));
        let root = InstantiationService::new(services);

        let overrides = ServiceCollection::new();
        overrides.set_instance(&NAME, Arc::new("child".to_string()));
        overrides.set_instance(&CHILD_ONLY, Arc::new("only".to_string()));
        let child = root.create_child(overrides, None).unwrap();

        assert_eq!(*child.invoke_function(|a| a.get(&NAME)).unwrap(), "child");
        assert_eq!(*root.invoke_function(|a| a.get(&NAME)).unwrap(), "root");
        assert!(child.invoke_function(|a| a.get_if_exists(&CHILD_ONLY)).unwrap().is_some());
        assert!(root.invoke_function(|a| a.get_if_exists(&CHILD_ONLY)).unwrap().is_none());
    }

    #[test]
    fn test_child_shadowing_applies_to_create_instance() {
        const CHILD_ONLY: ServiceIdentifier<String> = ServiceIdentifier::new("childOnly");

        let root = InstantiationService::with_options(
            ServiceCollection::new(),
            InstantiationOptions::new().strict(true),
        );
        let overrides = ServiceCollection::new();
        overrides.set_instance(&CHILD_ONLY, Arc::new("only".to_string()));
        let child = root.create_child(overrides, None).unwrap();

        let ctor = Constructor::from_fn("Banner", |args: &Arguments| {
            Ok(Arc::new(format!("[{}]", args.service::<String>(0)?)))
        })
        .with_dependencies([CHILD_ONLY.at(0)]);

        assert_eq!(*child.create_instance(&ctor, args![]).unwrap(), "[only]");
        assert!(matches!(
            root.create_instance(&ctor, args![]),
            Err(DiError::MissingService { id, .. }) if id == CHILD_ONLY.id()
        ));
    }

    #[test]
    fn test_child_inherits_options() {
        let root = InstantiationService::with_options(
            ServiceCollection::new(),
            InstantiationOptions::new().strict(true).strict_arity(true),
        );
        let child = root.create_child(ServiceCollection::new(), None).unwrap();

        assert!(child.strict());
        assert!(child.options().is_strict_arity());
        assert_eq!(child.depth(), 1);
        assert_ne!(child.scope(), root.scope());
    }

    // -------------------------------------------------------------------------
    // Disposal
    // -------------------------------------------------------------------------

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Disposable for Recorder {
        fn dispose(&self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> ServiceDescriptor<Recorder> {
        let log = log.clone();
        ServiceDescriptor::new(Constructor::disposable_from_fn(name, move |_: &Arguments| {
            Ok(Arc::new(Recorder {
                name,
                log: log.clone(),
            }))
        }))
    }

    #[test]
    fn test_disposal_order_children_first() {
        const FIRST: ServiceIdentifier<Recorder> = ServiceIdentifier::new("first");
        const SECOND: ServiceIdentifier<Recorder> = ServiceIdentifier::new("second");
        const NESTED: ServiceIdentifier<Recorder> = ServiceIdentifier::new("nested");
        const UNUSED: ServiceIdentifier<Recorder> = ServiceIdentifier::new("unused");

        let log = Arc::new(Mutex::new(Vec::new()));
        let services = ServiceCollection::new();
        services.set_descriptor(&FIRST, recorder("first", &log));
        services.set_descriptor(&SECOND, recorder("second", &log));
        services.set_descriptor(&UNUSED, recorder("unused", &log));
        let root = InstantiationService::new(services);

        let child_services = ServiceCollection::new();
        child_services.set_descriptor(&NESTED, recorder("nested", &log));
        let child = root.create_child(child_services, None).unwrap();

        root.invoke_function(|a| {
            a.get(&FIRST)?;
            a.get(&SECOND)
        })
        .unwrap();
        child.invoke_function(|a| a.get(&NESTED)).unwrap();

        // instances handed to the caller are not owned
        let loose = root.create_instance(recorder("loose", &log).ctor(), args![]).unwrap();

        root.dispose();
        assert_eq!(*log.lock().unwrap(), vec!["nested", "first", "second"]);
        assert!(child.is_disposed());

        root.dispose();
        assert_eq!(log.lock().unwrap().len(), 3);
        drop(loose);
    }

    #[test]
    fn test_construct_disposable_descriptor_is_disposed() {
        static DISPOSED: AtomicU32 = AtomicU32::new(0);
        const JOURNAL: ServiceIdentifier<Journal> = ServiceIdentifier::new("journal");

        struct Journal;

        impl Construct for Journal {
            fn construct(_: &Arguments) -> Result<Self> {
                Ok(Journal)
            }
        }

        impl Disposable for Journal {
            fn dispose(&self) {
                DISPOSED.fetch_add(1, Ordering::SeqCst);
            }
        }

        let services = ServiceCollection::new();
        services.set_descriptor(&JOURNAL, Journal::disposable_descriptor());
        let container = InstantiationService::new(services);

        container.invoke_function(|a| a.get(&JOURNAL)).unwrap();
        container.dispose();
        assert_eq!(DISPOSED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operations_after_dispose_fail() {
        let container = InstantiationService::new(ServiceCollection::new());
        container.dispose();

        assert!(matches!(
            container.create_instance(&a_depends_on_b(), args![]),
            Err(DiError::Disposed)
        ));
        assert!(matches!(
            container.invoke_function(|_| Ok(())),
            Err(DiError::Disposed)
        ));
    }

    // -------------------------------------------------------------------------
    // Delayed services
    // -------------------------------------------------------------------------

    #[test]
    fn test_idle_construction_does_not_overlap_caller() {
        const SLOW: ServiceIdentifier<B> = ServiceIdentifier::new("slowService");
        const WARMUP: ServiceIdentifier<dyn Warmup> = ServiceIdentifier::new("warmupService");

        trait Warmup: Send + Sync {}

        struct Warm(#[allow(dead_code)] Arc<B>);
        impl Warmup for Warm {}

        struct WarmupProxy(#[allow(dead_code)] Delayed<dyn Warmup>);
        impl Warmup for WarmupProxy {}

        let built = Arc::new(AtomicU32::new(0));
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let started_tx = Mutex::new(started_tx);

        let services = ServiceCollection::new();
        services.set_descriptor(
            &SLOW,
            ServiceDescriptor::new(counting("Slow", built.clone(), move |_| {
                let _ = started_tx.lock().unwrap().send(());
                std::thread::sleep(std::time::Duration::from_millis(100));
                Ok(B)
            })),
        );
        // resolves SLOW from inside its constructor, so the graph does not see the edge
        services.set_descriptor(
            &WARMUP,
            ServiceDescriptor::new(
                Constructor::from_fn("Warm", |args: &Arguments| {
                    let container = args.service::<InstantiationService>(0)?;
                    let slow = container.invoke_function(|a| a.get(&SLOW))?;
                    Ok(Arc::new(Warm(slow)) as Arc<dyn Warmup>)
                })
                .with_dependencies([INSTANTIATION_SERVICE.at(0)]),
            )
            .delayed(|slot| Arc::new(WarmupProxy(slot)) as Arc<dyn Warmup>),
        );
        let scheduler = Arc::new(TimerIdleScheduler::new(std::time::Duration::from_millis(1)));
        let container = InstantiationService::with_options(
            services,
            InstantiationOptions::new().idle_scheduler(scheduler),
        );

        let _warmup = container.invoke_function(|a| a.get(&WARMUP)).unwrap();
        started_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();

        let first = container.invoke_function(|a| a.get(&SLOW)).unwrap();
        let second = container.invoke_function(|a| a.get(&SLOW)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_never_accessed_never_builds() {
        let (scheduler, options) = manual_options();
        let built = Arc::new(AtomicU32::new(0));
        let disposed = Arc::new(AtomicU32::new(0));

        let services = ServiceCollection::new();
        services.set_descriptor(&STORAGE, delayed_storage(built.clone(), disposed.clone()));
        let container = InstantiationService::with_options(services, options);

        let storage = container.invoke_function(|a| a.get(&STORAGE)).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);

        container.dispose();
        scheduler.run_idle_tasks();

        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(disposed.load(Ordering::SeqCst), 0);
        assert!(storage.get("theme").is_none());
    }

    #[test]
    fn test_delayed_first_access_builds_once() {
        let (scheduler, options) = manual_options();
        let built = Arc::new(AtomicU32::new(0));
        let disposed = Arc::new(AtomicU32::new(0));

        let services = ServiceCollection::new();
        services.set_descriptor(&STORAGE, delayed_storage(built.clone(), disposed.clone()));
        let container = InstantiationService::with_options(services, options);

        let storage = container.invoke_function(|a| a.get(&STORAGE)).unwrap();
        storage.store("theme", "dark");
        assert_eq!(storage.get("theme").as_deref(), Some("dark"));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        // access cancelled the idle task
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.run_idle_tasks(), 0);

        let again = container.invoke_function(|a| a.get(&STORAGE)).unwrap();
        assert!(Arc::ptr_eq(&storage, &again));

        container.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_idle_task_builds() {
        let (scheduler, options) = manual_options();
        let built = Arc::new(AtomicU32::new(0));

        let services = ServiceCollection::new();
        services.set_descriptor(&STORAGE, delayed_storage(built.clone(), Arc::new(AtomicU32::new(0))));
        let container = InstantiationService::with_options(services, options);

        let storage = container.invoke_function(|a| a.get(&STORAGE)).unwrap();
        assert_eq!(scheduler.run_idle_tasks(), 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);

        storage.store("k", "v");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delayed_subscriptions_replay() {
        let (_scheduler, options) = manual_options();
        let built = Arc::new(AtomicU32::new(0));

        let services = ServiceCollection::new();
        services.set_descriptor(&STORAGE, delayed_storage(built.clone(), Arc::new(AtomicU32::new(0))));
        let container = InstantiationService::with_options(services, options);
        let storage = container.invoke_function(|a| a.get(&STORAGE)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _kept = storage.on_did_change().subscribe(move |key: &String| {
            sink.lock().unwrap().push(key.clone());
        });
        let dropped = storage.on_did_change().subscribe(|_| panic!("disposed listener fired"));
        dropped.dispose();
        assert_eq!(built.load(Ordering::SeqCst), 0);

        storage.store("theme", "dark");
        storage.store("font", "mono");
        assert_eq!(*seen.lock().unwrap(), vec!["theme", "font"]);
    }

    #[test]
    fn test_delayed_dependency_of_eager_service() {
        struct Consumer {
            storage: Arc<dyn Storage>,
        }
        const CONSUMER: ServiceIdentifier<Consumer> = ServiceIdentifier::new("consumer");

        let (_scheduler, options) = manual_options();
        let built = Arc::new(AtomicU32::new(0));

        let services = ServiceCollection::new();
        services.set_descriptor(&STORAGE, delayed_storage(built.clone(), Arc::new(AtomicU32::new(0))));
        services.set_descriptor(
            &CONSUMER,
            ServiceDescriptor::new(
                Constructor::from_fn("Consumer", |args: &Arguments| {
                    Ok(Arc::new(Consumer {
                        storage: args.service(0)?,
                    }))
                })
                .with_dependencies([STORAGE.at(0)]),
            ),
        );
        let container = InstantiationService::with_options(services, options);

        let consumer = container.invoke_function(|a| a.get(&CONSUMER)).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);
        consumer.storage.store("a", "b");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "async")]
    #[tokio::test(flavor = "multi_thread")]
    async fn test_tokio_scheduler_builds_delayed_service() {
        use std::time::Duration;

        let scheduler = TokioIdleScheduler::try_current(Duration::from_millis(1)).unwrap();
        let built = Arc::new(AtomicU32::new(0));

        let services = ServiceCollection::new();
        services.set_descriptor(&STORAGE, delayed_storage(built.clone(), Arc::new(AtomicU32::new(0))));
        let container = InstantiationService::with_options(
            services,
            InstantiationOptions::new().idle_scheduler(Arc::new(scheduler)),
        );
        let _storage = container.invoke_function(|a| a.get(&STORAGE)).unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while built.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok());
    }

    // -------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------

    #[test]
    fn test_creation_trace_is_retained() {
        struct Traced;
        const TRACED_DEP: ServiceIdentifier<B> = ServiceIdentifier::new("tracedDependency");

        let services = ServiceCollection::new();
        services.set_descriptor(
            &TRACED_DEP,
            ServiceDescriptor::new(Constructor::from_fn("B", |_: &Arguments| Ok(Arc::new(B)))),
        );
        let container =
            InstantiationService::with_options(services, InstantiationOptions::new().tracing(true));

        let ctor = Constructor::from_fn("TracedTarget", |_: &Arguments| Ok(Arc::new(Traced)))
            .with_dependencies([TRACED_DEP.at(0)]);
        container.create_instance(&ctor, args![]).unwrap();

        let report = trace::all()
            .into_iter()
            .find(|r| r.starts_with("CREATE TracedTarget"))
            .unwrap();
        assert!(report.contains("\tCREATES -> tracedDependency"));
        assert!(report.contains("DONE, took"));
    }
}
