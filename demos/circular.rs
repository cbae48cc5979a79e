//! Circular references between singletons
//!
//! ```bash
//! cargo run --example circular
//! ```

use lifecycle_container::{
    ComponentDescriptor, Constructor, Container, ContainerConfig, ContainerError, Instance, InstanceHook,
    PropertySetter, PropertyValue, Result, instance,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;

#[derive(Default)]
struct Orders {
    billing: OnceCell<Arc<Billing>>,
}

#[derive(Default)]
struct Billing {
    orders: OnceCell<Arc<Orders>>,
}

#[allow(dead_code)]
struct Audited(Instance);

/// Wraps the billing component after initialization
struct Auditing;

impl InstanceHook for Auditing {
    fn after_initialization(&self, component: Instance, name: &str) -> Result<Instance> {
        if name == "billing" {
            Ok(instance(Audited(component)))
        } else {
            Ok(component)
        }
    }
}

fn define(container: &Container) {
    container
        .define(
            ComponentDescriptor::new("orders")
                .of::<Orders>()
                .constructor(Constructor::default_of::<Orders>())
                .setter(PropertySetter::new::<Orders, Billing, _>("billing", |o, b| {
                    o.billing.set(b).map_err(|_| ContainerError::custom("billing set twice"))
                }))
                .property("billing", PropertyValue::reference("billing")),
        )
        .unwrap();
    container
        .define(
            ComponentDescriptor::new("billing")
                .of::<Billing>()
                .constructor(Constructor::default_of::<Billing>())
                .setter(PropertySetter::new::<Billing, Orders, _>("orders", |b, o| {
                    b.orders.set(o).map_err(|_| ContainerError::custom("orders set twice"))
                }))
                .property("orders", PropertyValue::reference("orders")),
        )
        .unwrap();
}

fn main() {
    println!("=== Circular References Demo ===\n");

    // Early exposure resolves the cycle
    let container = Container::new();
    define(&container);
    container.refresh(&[]).unwrap();

    let orders = container.get_typed::<Orders>("orders").unwrap();
    let billing = container.get_typed::<Billing>("billing").unwrap();
    assert!(Arc::ptr_eq(orders.billing.get().unwrap(), &billing));
    assert!(Arc::ptr_eq(billing.orders.get().unwrap(), &orders));
    println!("1. orders <-> billing resolved to a single pair of instances");

    // Without early exposure the cycle cannot be broken
    let strict = Container::with_config(ContainerConfig::default().allow_circular_references(false));
    define(&strict);
    let err = strict.get("orders").unwrap_err();
    println!("2. circular references disabled: {}", err.root_cause());

    // Wrapping a component whose raw early reference was already handed out
    let wrapped = Container::new();
    wrapped.add_instance_hook(Arc::new(Auditing));
    define(&wrapped);
    let err = wrapped.get("billing").unwrap_err();
    println!("3. wrapped after early exposure: {}", err.root_cause());
    println!("   creation chain: {:?}", err.creation_chain());

    // ... unless raw injection is explicitly tolerated
    let tolerant = Container::with_config(ContainerConfig::default().allow_raw_injection_despite_wrapping(true));
    tolerant.add_instance_hook(Arc::new(Auditing));
    define(&tolerant);
    assert!(tolerant.get("billing").unwrap().is::<Audited>());
    println!("4. raw injection allowed: billing is wrapped, orders keeps the raw instance");

    println!("\n=== Demo Complete ===");
}
