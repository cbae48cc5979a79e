//! Component lifecycle container
//!
//! The `Container` owns a [`ComponentFactory`] and drives its startup:
//! the hook pipeline, instance hook registration, freezing the descriptor
//! store and creating eager singletons.

use crate::config::ContainerConfig;
use crate::factory::ComponentFactory;
use crate::pipeline::{self, StartupHook};
use crate::store::{DescriptorRegistry, DescriptorStore};
use crate::{ContainerError, Result};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, info, warn};

/// Component lifecycle container.
///
/// Cloning is cheap; clones share the same factory, cache and hooks.
/// Lookup, registration and introspection come from the underlying
/// [`ComponentFactory`] through `Deref`.
///
/// # Examples
///
/// ```rust
/// use lifecycle_container::{Autowire, ComponentDescriptor, Constructor, Container, ParamSpec};
/// use std::sync::Arc;
///
/// struct Database { url: String }
/// struct UserService { db: Arc<Database> }
///
/// let container = Container::new();
/// container
///     .define(ComponentDescriptor::new("db").supplier(|| Ok(Database { url: "postgres://localhost".into() })))
///     .unwrap();
/// container
///     .define(
///         ComponentDescriptor::new("users")
///             .of::<UserService>()
///             .autowire(Autowire::Constructor)
///             .constructor(Constructor::new(vec![ParamSpec::of::<Database>("db")], |args| {
///                 Ok(UserService { db: args.get(0)? })
///             })),
///     )
///     .unwrap();
///
/// container.refresh(&[]).unwrap();
///
/// let users = container.get_typed::<UserService>("users").unwrap();
/// assert_eq!(users.db.url, "postgres://localhost");
/// ```
#[derive(Clone)]
pub struct Container {
    factory: Arc<ComponentFactory>,
}

impl Container {
    /// Create a container with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Create a container backed by a fresh [`DescriptorStore`].
    pub fn with_config(config: ContainerConfig) -> Self {
        let store = DescriptorStore::new();
        store.set_allow_overriding(config.descriptor_overriding_allowed());
        Self::with_store(Arc::new(store), config)
    }

    /// Create a container over a caller-provided descriptor registry.
    pub fn with_store(store: Arc<dyn DescriptorRegistry>, config: ContainerConfig) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            descriptors = store.len(),
            eager_singletons = config.singletons_eager(),
            "Creating lifecycle container"
        );

        Self {
            factory: Arc::new(ComponentFactory::new(store, config)),
        }
    }

    /// The shared creation engine
    #[inline]
    pub fn factory(&self) -> &Arc<ComponentFactory> {
        &self.factory
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Run every definition-registration and factory hook: the explicit
    /// ones first, then those discovered in the store, by tier.
    ///
    /// Merged descriptors are invalidated afterwards.
    pub fn run_startup_pipeline(&self, explicit: &[StartupHook]) -> Result<()> {
        pipeline::invoke_factory_hooks(&self.factory, explicit)
    }

    /// Create the instance hooks declared in the store and append them to
    /// the hook chain, by tier.
    pub fn register_instance_hooks(&self) -> Result<()> {
        pipeline::register_instance_hooks(&self.factory)
    }

    /// Start the container.
    ///
    /// Runs the startup pipeline, registers instance hooks, freezes the
    /// descriptor store and, unless disabled in [`ContainerConfig`],
    /// creates every non-lazy singleton. A failure disposes what was
    /// created so far and leaves the container unusable: later lookups
    /// report [`ContainerError::StartupFailed`].
    pub fn refresh(&self, explicit: &[StartupHook]) -> Result<()> {
        if self.factory.store().is_frozen() {
            return Err(ContainerError::custom("container has already been refreshed"));
        }

        #[cfg(feature = "logging")]
        info!(
            target: "lifecycle_container",
            descriptors = self.factory.store().len(),
            explicit_hooks = explicit.len(),
            "Refreshing container"
        );

        match self.do_refresh(explicit) {
            Ok(()) => {
                #[cfg(feature = "logging")]
                info!(
                    target: "lifecycle_container",
                    instance_hooks = self.factory.instance_hook_count(),
                    "Container refreshed"
                );
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "logging")]
                warn!(
                    target: "lifecycle_container",
                    error = %e,
                    "Startup failed - destroying already created singletons"
                );

                self.factory.destroy_singletons();
                self.factory.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    fn do_refresh(&self, explicit: &[StartupHook]) -> Result<()> {
        self.run_startup_pipeline(explicit)?;
        self.register_instance_hooks()?;
        self.factory.store().freeze();
        if self.factory.config().singletons_eager() {
            self.factory.preinstantiate_singletons()?;
        }
        Ok(())
    }

    /// Dispose every singleton and close the container
    pub fn destroy(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            "Destroying container"
        );

        self.factory.destroy_singletons();
        self.factory.mark_destroyed();
    }
}

impl Deref for Container {
    type Target = ComponentFactory;

    #[inline]
    fn deref(&self) -> &ComponentFactory {
        &self.factory
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("descriptors", &self.factory.store().len())
            .field("instance_hooks", &self.factory.instance_hook_count())
            .field("frozen", &self.factory.store().is_frozen())
            .field("active", &self.factory.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CreationPhase;
    use crate::component::{Instance, Scope, downcast, instance};
    use crate::descriptor::{
        Autowire, ComponentDescriptor, Constructor, LifecycleMethod, ParamSpec, PropertySetter, PropertyValue,
    };
    use crate::hook::{FactoryHook, HookCapabilities, InstanceHook};
    use once_cell::sync::OnceCell;
    use parking_lot::Mutex;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Repo {
        ready: AtomicBool,
    }

    struct Service {
        saw_ready_repo: bool,
    }

    #[derive(Default)]
    struct Left {
        right: OnceCell<Arc<Right>>,
    }

    #[derive(Default)]
    struct Right {
        left: OnceCell<Arc<Left>>,
        proxy_of: Option<Arc<Right>>,
    }

    struct Wrapped(#[allow(dead_code)] Instance);

    fn define_cycle(container: &Container) {
        container
            .define(
                ComponentDescriptor::new("left")
                    .of::<Left>()
                    .constructor(Constructor::default_of::<Left>())
                    .setter(PropertySetter::new::<Left, Right, _>("right", |l, r| {
                        l.right.set(r).map_err(|_| ContainerError::custom("right set twice"))
                    }))
                    .property("right", PropertyValue::reference("right")),
            )
            .unwrap();
        container
            .define(
                ComponentDescriptor::new("right")
                    .of::<Right>()
                    .constructor(Constructor::default_of::<Right>())
                    .setter(PropertySetter::new::<Right, Left, _>("left", |r, l| {
                        r.left.set(l).map_err(|_| ContainerError::custom("left set twice"))
                    }))
                    .property("left", PropertyValue::reference("left")),
            )
            .unwrap();
    }

    /// Wraps the named component after initialization
    struct Wrapping(&'static str);

    impl InstanceHook for Wrapping {
        fn after_initialization(&self, component: Instance, name: &str) -> Result<Instance> {
            if name == self.0 {
                Ok(instance(Wrapped(component)))
            } else {
                Ok(component)
            }
        }
    }

    #[test]
    fn test_dependency_initialized_before_dependent() {
        let container = Container::new();
        container
            .define(
                ComponentDescriptor::new("repo")
                    .of::<Repo>()
                    .constructor(Constructor::default_of::<Repo>())
                    .init_method(LifecycleMethod::new::<Repo, _>("open", |r| {
                        r.ready.store(true, Ordering::SeqCst);
                        Ok(())
                    })),
            )
            .unwrap();
        container
            .define(
                ComponentDescriptor::new("service")
                    .of::<Service>()
                    .autowire(Autowire::Constructor)
                    .constructor(Constructor::new(vec![ParamSpec::of::<Repo>("repo")], |args| {
                        let repo = args.get::<Repo>(0)?;
                        Ok(Service {
                            saw_ready_repo: repo.ready.load(Ordering::SeqCst),
                        })
                    })),
            )
            .unwrap();

        let service = container.get_typed::<Service>("service").unwrap();
        assert!(service.saw_ready_repo);
    }

    #[test]
    fn test_concurrent_singleton_created_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);

        let container = Container::new();
        container
            .define(ComponentDescriptor::new("slow").supplier(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(Repo::default())
            }))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                thread::spawn(move || container.get("slow").unwrap())
            })
            .collect();
        let results: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_singleton_cycle_resolves() {
        let container = Container::new();
        define_cycle(&container);

        let left = container.get_typed::<Left>("left").unwrap();
        let right = container.get_typed::<Right>("right").unwrap();

        assert!(Arc::ptr_eq(left.right.get().unwrap(), &right));
        assert!(Arc::ptr_eq(right.left.get().unwrap(), &left));
        assert_eq!(container.dependents_of("left"), vec!["right"]);
        assert_eq!(container.dependents_of("right"), vec!["left"]);
    }

    #[test]
    fn test_wrapping_after_early_exposure_fails() {
        let container = Container::new();
        container.add_instance_hook(Arc::new(Wrapping("right")));
        define_cycle(&container);

        let err = container.get("right").unwrap_err();
        assert!(matches!(err, ContainerError::Creation { phase: CreationPhase::CycleCheck, .. }));
        match err.root_cause() {
            ContainerError::CircularWrapping { name, dependents } => {
                assert_eq!(name, "right");
                assert_eq!(dependents, &vec!["left".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // nothing holding the stale reference survives
        assert!(container.singleton_stage("right").is_none());
        assert!(container.singleton_stage("left").is_none());
    }

    #[test]
    fn test_raw_injection_despite_wrapping() {
        let container = Container::with_config(ContainerConfig::default().allow_raw_injection_despite_wrapping(true));
        container.add_instance_hook(Arc::new(Wrapping("right")));
        define_cycle(&container);

        let right = container.get("right").unwrap();
        assert!(right.is::<Wrapped>());

        let left = container.get_typed::<Left>("left").unwrap();
        assert!(left.right.get().is_some());
    }

    /// Hands out a delegating proxy as the early reference
    #[derive(Default)]
    struct EarlyProxy {
        proxied: Mutex<Vec<String>>,
    }

    impl InstanceHook for EarlyProxy {
        fn capabilities(&self) -> HookCapabilities {
            HookCapabilities::EARLY_REFERENCE | HookCapabilities::INITIALIZATION
        }

        fn early_reference(&self, raw: Instance, name: &str) -> Result<Instance> {
            self.proxied.lock().push(name.to_string());
            let target = downcast::<Right>(name, raw)?;
            Ok(instance(Right {
                left: OnceCell::new(),
                proxy_of: Some(target),
            }))
        }
    }

    #[test]
    fn test_early_reference_hook_exposes_proxy() {
        let hook = Arc::new(EarlyProxy::default());
        let container = Container::new();
        container.add_instance_hook(hook.clone());
        define_cycle(&container);

        let right = container.get_typed::<Right>("right").unwrap();
        let left = container.get_typed::<Left>("left").unwrap();

        // the finished singleton is the early proxy every dependent saw
        let target = right.proxy_of.as_ref().unwrap();
        assert!(Arc::ptr_eq(left.right.get().unwrap(), &right));
        assert!(Arc::ptr_eq(target.left.get().unwrap(), &left));
        assert_eq!(*hook.proxied.lock(), vec!["right"]);
    }

    #[test]
    fn test_cycle_without_circular_references() {
        let container = Container::with_config(ContainerConfig::default().allow_circular_references(false));
        define_cycle(&container);

        let err = container.get("left").unwrap_err();
        assert!(matches!(err.root_cause(), ContainerError::CurrentlyInCreation { name, .. } if name == "left"));
        assert_eq!(err.creation_chain(), vec!["left", "right"]);
    }

    #[test]
    fn test_prototype_self_cycle() {
        struct Node {
            _next: Arc<Node>,
        }

        let container = Container::new();
        container
            .define(
                ComponentDescriptor::new("node")
                    .of::<Node>()
                    .scope(Scope::Prototype)
                    .autowire(Autowire::Constructor)
                    .constructor(Constructor::new(vec![ParamSpec::of::<Node>("next")], |args| {
                        Ok(Node { _next: args.get(0)? })
                    })),
            )
            .unwrap();

        let err = container.get("node").unwrap_err();
        match err.root_cause() {
            ContainerError::CurrentlyInCreation { name, cycle } => {
                assert_eq!(name, "node");
                assert_eq!(cycle, &vec!["node".to_string(), "node".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_refresh_creates_eager_singletons_and_freezes() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);

        let container = Container::new();
        container
            .define(ComponentDescriptor::new("eager").supplier(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Repo::default())
            }))
            .unwrap();
        container
            .define(
                ComponentDescriptor::new("lazy")
                    .supplier(|| Ok(Repo::default()))
                    .lazy_init(true),
            )
            .unwrap();

        container.refresh(&[]).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(container.is_singleton_instantiated("eager"));
        assert!(!container.is_singleton_instantiated("lazy"));
        assert!(matches!(
            container.define(ComponentDescriptor::new("late").supplier(|| Ok(Repo::default()))),
            Err(ContainerError::Frozen { .. })
        ));
        assert!(container.refresh(&[]).is_err());
    }

    struct Exploding;

    impl FactoryHook for Exploding {
        fn post_process_factory(&self, _factory: &ComponentFactory) -> Result<()> {
            Err(ContainerError::custom("placeholder could not be resolved"))
        }
    }

    #[test]
    fn test_refresh_failure_leaves_container_unusable() {
        let container = Container::new();
        container
            .define(ComponentDescriptor::new("repo").supplier(|| Ok(Repo::default())))
            .unwrap();

        let err = container
            .refresh(&[StartupHook::factory(Exploding)])
            .unwrap_err();
        assert!(matches!(err, ContainerError::Hook { .. }));
        assert!(!container.is_active());
        assert!(matches!(container.get("repo"), Err(ContainerError::StartupFailed { .. })));
    }

    /// Records application components passing through initialization
    struct Counting {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl InstanceHook for Counting {
        fn after_initialization(&self, instance: Instance, name: &str) -> Result<Instance> {
            self.seen.lock().push(name.to_string());
            Ok(instance)
        }
    }

    #[test]
    fn test_refresh_applies_discovered_instance_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);

        let container = Container::new();
        container
            .define(ComponentDescriptor::instance_hook("counting", move || {
                Ok(Counting {
                    seen: Arc::clone(&hook_seen),
                })
            }))
            .unwrap();
        container
            .define(ComponentDescriptor::new("repo").supplier(|| Ok(Repo::default())))
            .unwrap();

        container.refresh(&[]).unwrap();

        assert_eq!(*seen.lock(), vec!["repo"]);
        assert!(container.ineligible_components().is_empty());
    }

    #[test]
    fn test_destroy_disposes_dependents_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (repo_log, service_log) = (Arc::clone(&order), Arc::clone(&order));

        let container = Container::new();
        container
            .define(
                ComponentDescriptor::new("repo")
                    .of::<Repo>()
                    .constructor(Constructor::default_of::<Repo>())
                    .destroy_method(LifecycleMethod::new::<Repo, _>("close", move |_| {
                        repo_log.lock().push("repo");
                        Ok(())
                    })),
            )
            .unwrap();
        container
            .define(
                ComponentDescriptor::new("service")
                    .of::<Service>()
                    .autowire(Autowire::Constructor)
                    .constructor(Constructor::new(vec![ParamSpec::of::<Repo>("repo")], |args| {
                        args.get::<Repo>(0)?;
                        Ok(Service { saw_ready_repo: false })
                    }))
                    .destroy_method(LifecycleMethod::new::<Service, _>("close", move |_| {
                        service_log.lock().push("service");
                        Ok(())
                    })),
            )
            .unwrap();

        container.refresh(&[]).unwrap();
        container.destroy();

        assert_eq!(*order.lock(), vec!["service", "repo"]);
        assert!(matches!(container.get("repo"), Err(ContainerError::Destroyed { .. })));
    }

    #[test]
    fn test_destroy_waits_for_creation_in_progress() {
        let started = Arc::new(Barrier::new(2));
        let closed = Arc::new(AtomicUsize::new(0));
        let (gate, close_count) = (Arc::clone(&started), Arc::clone(&closed));

        let container = Container::new();
        container
            .define(
                ComponentDescriptor::new("slow")
                    .supplier(move || {
                        gate.wait();
                        thread::sleep(Duration::from_millis(100));
                        Ok(Repo::default())
                    })
                    .destroy_method(LifecycleMethod::new::<Repo, _>("close", move |_| {
                        close_count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
            )
            .unwrap();

        let creating = {
            let container = container.clone();
            thread::spawn(move || container.get("slow").is_ok())
        };
        started.wait();
        container.destroy();

        assert!(creating.join().unwrap());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!container.is_singleton_instantiated("slow"));
        assert!(matches!(container.get("slow"), Err(ContainerError::Destroyed { .. })));
    }

    #[test]
    fn test_manual_singleton_resolved_by_type() {
        let container = Container::new();
        container.register_singleton("settings", 8080u16).unwrap();

        let port = container.get_by_type_typed::<u16>().unwrap();
        assert_eq!(*port, 8080);
        assert!(container.register_singleton("settings", 1u8).is_err());
    }
}
