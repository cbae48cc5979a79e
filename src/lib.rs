//! # Lifecycle Container - Component Creation and Wiring for Rust
//!
//! A component-lifecycle container: from a set of declarative component
//! descriptors it creates, wires and disposes instances, resolving their
//! dependencies and running extension hooks at fixed lifecycle points.
//!
//! ## Features
//!
//! - **Descriptors** - name, type, scope, construction strategy, property
//!   bindings, lifecycle methods and ordering markers
//! - **Construction strategies** - suppliers, static or instance factory
//!   methods, and greedy constructor selection with autowiring
//! - **Circular references** - singleton cycles resolve through staged
//!   early exposure; wrapped early references are detected
//! - **Ordered hooks** - definition-registration, factory and instance
//!   hooks run in priority-ordered, ordered, then plain tiers
//! - **Disposal** - dependents are destroyed before their dependencies
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use lifecycle_container::prelude::*;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//! container
//!     .define(ComponentDescriptor::new("db").supplier(|| {
//!         Ok(Database { url: "postgres://localhost".into() })
//!     }))
//!     .unwrap();
//! container
//!     .define(
//!         ComponentDescriptor::new("users")
//!             .of::<UserService>()
//!             .autowire(Autowire::Constructor)
//!             .constructor(Constructor::new(vec![ParamSpec::of::<Database>("db")], |args| {
//!                 Ok(UserService { db: args.get(0)? })
//!             })),
//!     )
//!     .unwrap();
//!
//! container.refresh(&[]).unwrap();
//!
//! let users = container.get_typed::<UserService>("users").unwrap();
//! let db = container.get_by_type_typed::<Database>().unwrap();
//! assert!(Arc::ptr_eq(&users.db, &db));
//! ```
//!
//! ## Circular References
//!
//! Singletons that depend on each other through properties resolve to the
//! same pair of instances on both sides. Late-bound fields use interior
//! mutability, since a component may already be shared while its
//! properties are populated.
//!
//! ```rust
//! use lifecycle_container::prelude::*;
//! use once_cell::sync::OnceCell;
//!
//! #[derive(Default)]
//! struct Left { right: OnceCell<Arc<Right>> }
//!
//! #[derive(Default)]
//! struct Right { left: OnceCell<Arc<Left>> }
//!
//! let container = Container::new();
//! container
//!     .define(
//!         ComponentDescriptor::new("left")
//!             .constructor(Constructor::default_of::<Left>())
//!             .setter(PropertySetter::new::<Left, Right, _>("right", |l, r| {
//!                 l.right.set(r).map_err(|_| ContainerError::custom("set twice"))
//!             }))
//!             .property("right", PropertyValue::reference("right")),
//!     )
//!     .unwrap();
//! container
//!     .define(
//!         ComponentDescriptor::new("right")
//!             .constructor(Constructor::default_of::<Right>())
//!             .setter(PropertySetter::new::<Right, Left, _>("left", |r, l| {
//!                 r.left.set(l).map_err(|_| ContainerError::custom("set twice"))
//!             }))
//!             .property("left", PropertyValue::reference("left")),
//!     )
//!     .unwrap();
//!
//! let left = container.get_typed::<Left>("left").unwrap();
//! let right = container.get_typed::<Right>("right").unwrap();
//! assert!(Arc::ptr_eq(left.right.get().unwrap(), &right));
//! assert!(Arc::ptr_eq(right.left.get().unwrap(), &left));
//! ```
//!
//! ## Hooks
//!
//! Hooks are components. Register them with
//! [`ComponentDescriptor::instance_hook`], [`ComponentDescriptor::factory_hook`]
//! or [`ComponentDescriptor::registry_hook`], or pass startup hooks
//! directly to [`Container::refresh`] as [`StartupHook`]s.

mod cache;
mod component;
mod config;
mod container;
mod descriptor;
mod error;
mod factory;
mod hook;
#[cfg(feature = "logging")]
pub mod logging;
mod pipeline;
mod resolver;
mod store;

pub use cache::{CacheStage, EarlyReferenceFn};
pub use component::{ComponentType, Injectable, Instance, Scope, downcast, instance};
pub use config::ContainerConfig;
pub use container::Container;
pub use descriptor::{
    Argument, Arguments, Autowire, Cardinality, ComponentDescriptor, ConstructionStrategy, Constructor,
    DependencyCheck, FactoryMethod, LifecycleMethod, MergedDescriptor, OrderMarker, ParamSpec, PropertySetter,
    PropertyValue, PropertyValues, Role, Tier, ValueParser,
};
pub use error::*;
pub use factory::ComponentFactory;
pub use hook::{
    DefinitionRegistryHook, FactoryHook, FactoryHookRef, HookCapabilities, HookChain, InstanceHook, InstanceHookRef,
    RegistryHookRef,
};
pub use pipeline::StartupHook;
pub use resolver::DependencyRequest;
pub use store::{DescriptorRegistry, DescriptorStore};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Autowire, ComponentDescriptor, Constructor, Container, ContainerConfig, ContainerError, FactoryMethod,
        Injectable, InstanceHook, LifecycleMethod, OrderMarker, ParamSpec, PropertySetter, PropertyValue, Result,
        Scope, StartupHook,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Database {
        url: String,
    }

    struct Counter(u32);

    #[test]
    fn test_get_by_name_and_type() {
        let container = Container::new();
        container
            .define(ComponentDescriptor::new("db").supplier(|| Ok(Database { url: "test".into() })))
            .unwrap();

        let by_name = container.get_typed::<Database>("db").unwrap();
        let by_type = container.get_by_type_typed::<Database>().unwrap();
        assert_eq!(by_name.url, "test");
        assert!(Arc::ptr_eq(&by_name, &by_type));
    }

    #[test]
    fn test_prototype_creates_new_instance() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let container = Container::new();
        container
            .define(
                ComponentDescriptor::new("counter")
                    .supplier(|| Ok(Counter(COUNTER.fetch_add(1, Ordering::SeqCst))))
                    .scope(Scope::Prototype),
            )
            .unwrap();

        let c1 = container.get_typed::<Counter>("counter").unwrap();
        let c2 = container.get_typed::<Counter>("counter").unwrap();
        assert_ne!(c1.0, c2.0);
    }

    #[test]
    fn test_alias_resolves_to_same_singleton() {
        let container = Container::new();
        container
            .define(ComponentDescriptor::new("db").supplier(|| Ok(Database { url: "test".into() })))
            .unwrap();
        container.alias("db", "database").unwrap();

        let a = container.get("db").unwrap();
        let b = container.get("database").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_not_found_error() {
        let container = Container::new();
        assert!(matches!(
            container.get("missing"),
            Err(ContainerError::NoSuchComponent { .. })
        ));
        assert!(container.get_by_type_typed::<Database>().is_err());
    }

    #[test]
    fn test_primary_wins_by_type() {
        let container = Container::new();
        container
            .define(ComponentDescriptor::new("main").supplier(|| Ok(Database { url: "main".into() })))
            .unwrap();
        container
            .define(
                ComponentDescriptor::new("replica")
                    .supplier(|| Ok(Database { url: "replica".into() }))
                    .primary(true),
            )
            .unwrap();

        let db = container.get_by_type_typed::<Database>().unwrap();
        assert_eq!(db.url, "replica");
    }
}
