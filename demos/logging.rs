//! Example demonstrating logging across the container lifecycle
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use lifecycle_container::{
    Autowire, ComponentDescriptor, ComponentFactory, Constructor, Container, DefinitionRegistryHook,
    DescriptorRegistry, FactoryHook, Instance, InstanceHook, LifecycleMethod, OrderMarker, ParamSpec, Result,
    StartupHook,
};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

/// Registers the database descriptor at startup
struct DatabaseRegistrar;

impl DefinitionRegistryHook for DatabaseRegistrar {
    fn post_process_registry(&self, registry: &dyn DescriptorRegistry) -> Result<()> {
        println!("  [App] Registering database descriptor");
        registry.define(
            ComponentDescriptor::new("db")
                .supplier(|| {
                    Ok(Database {
                        url: "postgres://localhost/mydb".into(),
                    })
                })
                .destroy_method(LifecycleMethod::new::<Database, _>("close", |_| {
                    println!("  [App] Closing database");
                    Ok(())
                })),
        )
    }
}

/// Reports the descriptor count once all descriptors are known
struct Inventory;

impl FactoryHook for Inventory {
    fn post_process_factory(&self, factory: &ComponentFactory) -> Result<()> {
        println!("  [App] {} descriptors registered", factory.store().len());
        Ok(())
    }
}

/// Announces every initialized application component
struct Announcer;

impl InstanceHook for Announcer {
    fn after_initialization(&self, instance: Instance, name: &str) -> Result<Instance> {
        println!("  [App] Component '{name}' ready");
        Ok(instance)
    }
}

fn main() {
    #[cfg(feature = "logging")]
    {
        lifecycle_container::logging::init();
    }

    println!("=== Lifecycle Container Logging Demo ===\n");

    // logs: "Creating lifecycle container"
    let container = Container::new();

    // logs: "Registering component descriptor"
    container
        .define(ComponentDescriptor::instance_hook("announcer", || Ok(Announcer)).order(OrderMarker::Ordered(0)))
        .unwrap();
    container
        .define(ComponentDescriptor::factory_hook("inventory", || Ok(Inventory)))
        .unwrap();
    container
        .define(
            ComponentDescriptor::new("users")
                .of::<UserService>()
                .autowire(Autowire::Constructor)
                .constructor(Constructor::new(vec![ParamSpec::of::<Database>("db")], |args| {
                    Ok(UserService { db: args.get(0)? })
                })),
        )
        .unwrap();

    // logs: hook pipeline progress, then "Creating instance of component" per singleton
    container
        .refresh(&[StartupHook::registry(DatabaseRegistrar)])
        .unwrap();

    // logs: "Returning cached singleton"
    let _users = container.get_typed::<UserService>("users").unwrap();

    // logs: "Destroying dependent components first"
    container.destroy();

    println!("\n=== Demo Complete ===");
}
