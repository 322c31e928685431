#![no_main]

//! Fuzz target for container lifecycle operations
//!
//! Tests resolution through child containers, shadowing, and disposal in
//! arbitrary order.

use arbitrary::Arbitrary;
use instantiation_service::{
    Arguments, Constructor, DiError, InstantiationService, ServiceCollection, ServiceDescriptor,
    ServiceIdentifier,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Debug)]
struct Counter(u32);

const COUNTER: ServiceIdentifier<Counter> = ServiceIdentifier::new("counter");

fn counter(value: u32) -> ServiceDescriptor<Counter> {
    ServiceDescriptor::new(Constructor::from_fn("Counter", move |_: &Arguments| {
        Ok(Arc::new(Counter(value)))
    }))
}

/// Lifecycle operations
#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    CreateChild { parent: u8, shadow: Option<u32> },
    Resolve(u8),
    Dispose(u8),
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    let services = ServiceCollection::new();
    services.set_descriptor(&COUNTER, counter(0));

    let root = InstantiationService::new(services);
    let mut containers = vec![root.clone()];

    for op in ops.into_iter().take(100) {
        match op {
            LifecycleOp::CreateChild { parent, shadow } => {
                let parent = &containers[parent as usize % containers.len()];
                let services = ServiceCollection::new();
                if let Some(value) = shadow {
                    services.set_descriptor(&COUNTER, counter(value));
                }
                match parent.create_child(services, None) {
                    Ok(child) => containers.push(child),
                    Err(err) => assert!(parent.is_disposed(), "{err}"),
                }
            }
            LifecycleOp::Resolve(index) => {
                let container = &containers[index as usize % containers.len()];
                let first = container.invoke_function(|a| a.get(&COUNTER));
                let second = container.invoke_function(|a| a.get(&COUNTER));
                match (first, second) {
                    (Ok(a), Ok(b)) => assert!(Arc::ptr_eq(&a, &b)),
                    (Err(DiError::Disposed), _) | (_, Err(DiError::Disposed)) => {}
                    // a disposed ancestor surfaces as a missing parent
                    (Err(DiError::ParentDropped), _) | (_, Err(DiError::ParentDropped)) => {}
                    (Err(err), _) | (_, Err(err)) => panic!("unexpected error: {err}"),
                }
            }
            LifecycleOp::Dispose(index) => {
                let container = &containers[index as usize % containers.len()];
                container.dispose();
                assert!(container.is_disposed());
            }
        }
    }

    root.dispose();
    for container in &containers {
        assert!(container.is_disposed());
    }
});
