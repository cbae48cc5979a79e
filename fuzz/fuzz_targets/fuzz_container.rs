#![no_main]

//! Fuzz target for component graph creation
//!
//! Builds random dependency graphs, cycles included, with mixed scopes and
//! resolves every component. Creation must terminate, singletons must stay
//! unique, and an all-singleton graph must always resolve.

use arbitrary::Arbitrary;
use lifecycle_container::{ComponentDescriptor, Container, ContainerConfig, PropertySetter, PropertyValue, Scope};
use libfuzzer_sys::fuzz_target;
use parking_lot::Mutex;
use std::sync::Arc;

struct Node {
    deps: Mutex<Vec<Arc<Node>>>,
}

#[derive(Debug, Arbitrary)]
struct NodeSpec {
    prototype: bool,
    lazy: bool,
    // Indices of dependencies (taken modulo the node count)
    deps: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
struct GraphScenario {
    nodes: Vec<NodeSpec>,
    allow_circular: bool,
    refresh: bool,
    // Lookup order (taken modulo the node count)
    lookups: Vec<u8>,
}

fuzz_target!(|scenario: GraphScenario| {
    let nodes: Vec<NodeSpec> = scenario.nodes.into_iter().take(12).collect();
    if nodes.is_empty() {
        return;
    }
    let count = nodes.len();
    let all_singletons = nodes.iter().all(|n| !n.prototype);

    let config = ContainerConfig::default()
        .allow_circular_references(scenario.allow_circular)
        .eager_singletons(scenario.refresh);
    let container = Container::with_config(config);

    for (index, shape) in nodes.iter().enumerate() {
        let mut descriptor = ComponentDescriptor::new(format!("n{index}"))
            .supplier(|| Ok(Node { deps: Mutex::new(Vec::new()) }))
            .lazy_init(shape.lazy);
        if shape.prototype {
            descriptor = descriptor.scope(Scope::Prototype);
        }
        for (slot, dep) in shape.deps.iter().take(4).enumerate() {
            let property = format!("dep{slot}");
            descriptor = descriptor
                .setter(PropertySetter::new::<Node, Node, _>(property.clone(), |node, dep| {
                    node.deps.lock().push(dep);
                    Ok(())
                }))
                .property(property, PropertyValue::reference(format!("n{}", *dep as usize % count)));
        }
        container.define(descriptor).unwrap();
    }

    if scenario.refresh {
        let refreshed = container.refresh(&[]);
        if refreshed.is_err() {
            // Singleton cycles only fail without early exposure
            assert!(!(all_singletons && scenario.allow_circular));
            assert!(container.get("n0").is_err());
            return;
        }
    }

    for lookup in scenario.lookups.iter().take(32) {
        let name = format!("n{}", *lookup as usize % count);
        let first = container.get(&name);
        if all_singletons && scenario.allow_circular {
            assert!(first.is_ok());
        }
        if let Ok(first) = first {
            if !nodes[*lookup as usize % count].prototype {
                let second = container.get(&name).unwrap();
                assert!(Arc::ptr_eq(&first, &second));
            }
        }
    }

    container.destroy();
    assert!(container.get("n0").is_err());
});
