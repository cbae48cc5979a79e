//! Startup pipeline
//!
//! Runs definition-registration and factory hooks in tiers, then registers
//! instance hooks, before any application component is created.
//!
//! Within each tier hooks run in ascending order value; hooks with equal
//! values keep discovery order. A hook is never invoked twice.

use crate::component::ComponentType;
use crate::descriptor::{OrderMarker, Tier};
use crate::factory::ComponentFactory;
use crate::hook::{
    FactoryHookRef, HookCapabilities, InstanceHook, InstanceHookRef, RegistryHookRef, as_factory_hook,
    as_instance_hook, as_registry_hook, is_instance_hook, sort_by_order,
};
use crate::{ContainerError, Instance, Result};
use std::collections::HashSet;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// A hook handed to the pipeline directly instead of being discovered
#[derive(Clone)]
pub enum StartupHook {
    Registry(RegistryHookRef),
    Factory(FactoryHookRef),
}

impl StartupHook {
    pub fn registry<H: crate::DefinitionRegistryHook + 'static>(hook: H) -> Self {
        Self::Registry(Arc::new(hook))
    }

    pub fn factory<H: crate::FactoryHook + 'static>(hook: H) -> Self {
        Self::Factory(Arc::new(hook))
    }
}

fn order_of(factory: &ComponentFactory, name: &str) -> Result<OrderMarker> {
    Ok(factory.store.resolve(name)?.order_marker())
}

// =============================================================================
// Definition-registration and factory hooks
// =============================================================================

/// Invoke every registry and factory hook.
///
/// 1. explicit registry hooks, in the given order
/// 2. discovered registry hooks: priority-ordered, ordered, then repeated
///    passes over the rest until a pass discovers nothing new
/// 3. the factory phase of all registry hooks, then explicit factory hooks
/// 4. discovered factory hooks not yet processed, by tier
pub(crate) fn invoke_factory_hooks(factory: &ComponentFactory, explicit: &[StartupHook]) -> Result<()> {
    let registry_type = ComponentType::of::<RegistryHookRef>();
    let mut processed: HashSet<String> = HashSet::new();
    let mut registry_hooks: Vec<RegistryHookRef> = Vec::new();
    let mut regular_hooks: Vec<FactoryHookRef> = Vec::new();

    for hook in explicit {
        match hook {
            StartupHook::Registry(hook) => {
                hook.post_process_registry(factory.store())
                    .map_err(|e| ContainerError::hook("definition registration", e))?;
                registry_hooks.push(Arc::clone(hook));
            }
            StartupHook::Factory(hook) => regular_hooks.push(Arc::clone(hook)),
        }
    }

    // Priority-ordered, then every ordered registry hook. The second pass
    // also takes priority-ordered hooks registered during the first.
    for tier in [Tier::PriorityOrdered, Tier::Ordered] {
        let mut current = Vec::new();
        for name in factory.store.names_of_type(registry_type, true, false) {
            if processed.contains(&name) {
                continue;
            }
            let marker = order_of(factory, &name)?;
            if marker.tier() <= tier {
                let hook = as_registry_hook(&name, &factory.get(&name)?)?;
                current.push((marker, (name.clone(), hook)));
                processed.insert(name);
            }
        }
        run_registry_hooks(factory, tier, current, &mut registry_hooks)?;
    }

    // Everything else, until no pass registers a new registry hook
    let mut pass = 0usize;
    loop {
        let mut current = Vec::new();
        for name in factory.store.names_of_type(registry_type, true, false) {
            if processed.contains(&name) {
                continue;
            }
            let marker = order_of(factory, &name)?;
            let hook = as_registry_hook(&name, &factory.get(&name)?)?;
            current.push((marker, (name.clone(), hook)));
            processed.insert(name);
        }
        if current.is_empty() {
            break;
        }
        pass += 1;

        #[cfg(feature = "logging")]
        trace!(
            target: "lifecycle_container",
            pass = pass,
            discovered = current.len(),
            "Re-scanning for definition registration hooks"
        );

        run_registry_hooks(factory, Tier::Plain, current, &mut registry_hooks)?;
    }

    for hook in &registry_hooks {
        hook.post_process_factory(factory)
            .map_err(|e| ContainerError::hook("factory post-processing", e))?;
    }
    for hook in &regular_hooks {
        hook.post_process_factory(factory)
            .map_err(|e| ContainerError::hook("factory post-processing", e))?;
    }

    // Discovered factory hooks
    let factory_type = ComponentType::of::<FactoryHookRef>();
    let mut priority = Vec::new();
    let mut ordered_names = Vec::new();
    let mut plain_names = Vec::new();
    for name in factory.store.names_of_type(factory_type, true, false) {
        if processed.contains(&name) {
            continue;
        }
        let marker = order_of(factory, &name)?;
        match marker.tier() {
            Tier::PriorityOrdered => {
                let hook = as_factory_hook(&name, &factory.get(&name)?)?;
                priority.push((marker, (name, hook)));
            }
            Tier::Ordered => ordered_names.push((marker, name)),
            Tier::Plain => plain_names.push((marker, name)),
        }
    }
    run_factory_hooks(factory, Tier::PriorityOrdered, priority)?;

    for (tier, names) in [(Tier::Ordered, ordered_names), (Tier::Plain, plain_names)] {
        let mut hooks = Vec::with_capacity(names.len());
        for (marker, name) in names {
            let hook = as_factory_hook(&name, &factory.get(&name)?)?;
            hooks.push((marker, (name, hook)));
        }
        run_factory_hooks(factory, tier, hooks)?;
    }

    // hooks may have edited descriptors
    factory.store.invalidate_merged_cache();

    #[cfg(feature = "logging")]
    debug!(
        target: "lifecycle_container",
        registry_hooks = registry_hooks.len(),
        registry_passes = pass,
        "Factory hooks invoked"
    );

    Ok(())
}

fn run_registry_hooks(
    factory: &ComponentFactory,
    _tier: Tier,
    mut hooks: Vec<(OrderMarker, (String, RegistryHookRef))>,
    invoked: &mut Vec<RegistryHookRef>,
) -> Result<()> {
    sort_by_order(&mut hooks);
    for (_, (_name, hook)) in hooks {
        #[cfg(feature = "logging")]
        trace!(
            target: "lifecycle_container",
            hook = %_name,
            tier = _tier.as_str(),
            "Invoking definition registration hook"
        );

        hook.post_process_registry(factory.store())
            .map_err(|e| ContainerError::hook("definition registration", e))?;
        invoked.push(hook);
    }
    Ok(())
}

fn run_factory_hooks(
    factory: &ComponentFactory,
    tier: Tier,
    mut hooks: Vec<(OrderMarker, (String, FactoryHookRef))>,
) -> Result<()> {
    if tier != Tier::Plain {
        sort_by_order(&mut hooks);
    }
    for (_, (_name, hook)) in hooks {
        #[cfg(feature = "logging")]
        trace!(
            target: "lifecycle_container",
            hook = %_name,
            tier = tier.as_str(),
            "Invoking factory hook"
        );

        hook.post_process_factory(factory)
            .map_err(|e| ContainerError::hook("factory post-processing", e))?;
    }
    Ok(())
}

// =============================================================================
// Instance hooks
// =============================================================================

/// Bookkeeping hook that reports components created while the instance
/// hook chain was still incomplete.
struct HookCountChecker {
    factory: Weak<ComponentFactory>,
    target: usize,
}

impl InstanceHook for HookCountChecker {
    fn after_initialization(&self, instance: Instance, name: &str) -> Result<Instance> {
        if let Some(factory) = self.factory.upgrade() {
            if !is_instance_hook(&instance)
                && !factory.is_infrastructure(name)
                && factory.instance_hook_count() < self.target
            {
                #[cfg(feature = "logging")]
                warn!(
                    target: "lifecycle_container",
                    component = name,
                    registered = factory.instance_hook_count(),
                    expected = self.target,
                    "Component is not eligible for getting processed by all instance hooks"
                );
                factory.record_ineligible(name);
            }
        }
        Ok(instance)
    }
}

/// Discover and register instance hooks.
///
/// The checker goes first; then the priority-ordered, ordered and plain
/// tiers. Hooks handling merged descriptors are moved to the end, and the
/// checker is moved after them.
pub(crate) fn register_instance_hooks(factory: &Arc<ComponentFactory>) -> Result<()> {
    let hook_type = ComponentType::of::<InstanceHookRef>();
    let names = factory.store.names_of_type(hook_type, true, false);
    let target = factory.instance_hook_count() + 1 + names.len();

    let checker: InstanceHookRef = Arc::new(HookCountChecker {
        factory: Arc::downgrade(factory),
        target,
    });
    factory.add_instance_hook(Arc::clone(&checker));

    let mut priority = Vec::new();
    let mut ordered_names = Vec::new();
    let mut plain_names = Vec::new();
    let mut internal = Vec::new();

    for name in names {
        let marker = order_of(factory, &name)?;
        match marker.tier() {
            Tier::PriorityOrdered => {
                let hook = as_instance_hook(&name, &factory.get(&name)?)?;
                if hook.capabilities().contains(HookCapabilities::MERGED_DESCRIPTOR) {
                    internal.push((marker, Arc::clone(&hook)));
                }
                priority.push((marker, hook));
            }
            Tier::Ordered => ordered_names.push((marker, name)),
            Tier::Plain => plain_names.push((marker, name)),
        }
    }

    sort_by_order(&mut priority);
    register_all(factory, priority);

    let mut ordered = Vec::with_capacity(ordered_names.len());
    for (marker, name) in ordered_names {
        let hook = as_instance_hook(&name, &factory.get(&name)?)?;
        if hook.capabilities().contains(HookCapabilities::MERGED_DESCRIPTOR) {
            internal.push((marker, Arc::clone(&hook)));
        }
        ordered.push((marker, hook));
    }
    sort_by_order(&mut ordered);
    register_all(factory, ordered);

    let mut plain = Vec::with_capacity(plain_names.len());
    for (marker, name) in plain_names {
        let hook = as_instance_hook(&name, &factory.get(&name)?)?;
        if hook.capabilities().contains(HookCapabilities::MERGED_DESCRIPTOR) {
            internal.push((marker, Arc::clone(&hook)));
        }
        plain.push((marker, hook));
    }
    register_all(factory, plain);

    sort_by_order(&mut internal);
    register_all(factory, internal);

    factory.add_instance_hook(checker);

    #[cfg(feature = "logging")]
    debug!(
        target: "lifecycle_container",
        hook_count = factory.instance_hook_count(),
        "Instance hooks registered"
    );

    Ok(())
}

fn register_all(factory: &ComponentFactory, hooks: Vec<(OrderMarker, InstanceHookRef)>) {
    for (_, hook) in hooks {
        factory.add_instance_hook(hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::descriptor::{ComponentDescriptor, Constructor, ParamSpec};
    use crate::hook::{DefinitionRegistryHook, FactoryHook};
    use crate::store::{DescriptorRegistry, DescriptorStore};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn factory() -> Arc<ComponentFactory> {
        Arc::new(ComponentFactory::new(
            Arc::new(DescriptorStore::new()),
            ContainerConfig::default(),
        ))
    }

    struct Recorder {
        name: &'static str,
        log: Log,
        /// Registry hooks to register, each registering the next
        spawn: &'static [&'static str],
    }

    impl DefinitionRegistryHook for Recorder {
        fn post_process_registry(&self, registry: &dyn DescriptorRegistry) -> Result<()> {
            self.log.lock().push(format!("registry:{}", self.name));
            if let Some((child, rest)) = self.spawn.split_first() {
                registry.define(recorder(child, &self.log, rest))?;
            }
            Ok(())
        }

        fn post_process_factory(&self, _factory: &ComponentFactory) -> Result<()> {
            self.log.lock().push(format!("factory:{}", self.name));
            Ok(())
        }
    }

    struct FactoryRecorder {
        name: &'static str,
        log: Log,
    }

    impl FactoryHook for FactoryRecorder {
        fn post_process_factory(&self, _factory: &ComponentFactory) -> Result<()> {
            self.log.lock().push(format!("factory:{}", self.name));
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Log, spawn: &'static [&'static str]) -> ComponentDescriptor {
        let log = Arc::clone(log);
        ComponentDescriptor::registry_hook(name, move || {
            Ok(Recorder {
                name,
                log: Arc::clone(&log),
                spawn,
            })
        })
    }

    fn factory_recorder(name: &'static str, log: &Log) -> ComponentDescriptor {
        let log = Arc::clone(log);
        ComponentDescriptor::factory_hook(name, move || {
            Ok(FactoryRecorder {
                name,
                log: Arc::clone(&log),
            })
        })
    }

    #[test]
    fn test_tier_order() {
        let f = factory();
        let log: Log = Arc::default();

        f.define(factory_recorder("plain", &log)).unwrap();
        f.define(factory_recorder("ordered", &log).order(OrderMarker::Ordered(0)))
            .unwrap();
        f.define(factory_recorder("first", &log).order(OrderMarker::PriorityOrdered(0)))
            .unwrap();

        invoke_factory_hooks(&f, &[]).unwrap();
        assert_eq!(
            *log.lock(),
            vec!["factory:first", "factory:ordered", "factory:plain"]
        );
    }

    #[test]
    fn test_order_value_and_stability() {
        let f = factory();
        let log: Log = Arc::default();

        f.define(factory_recorder("b", &log).order(OrderMarker::Ordered(5)))
            .unwrap();
        f.define(factory_recorder("a", &log).order(OrderMarker::Ordered(-5)))
            .unwrap();
        f.define(factory_recorder("c", &log).order(OrderMarker::Ordered(5)))
            .unwrap();

        invoke_factory_hooks(&f, &[]).unwrap();
        assert_eq!(*log.lock(), vec!["factory:a", "factory:b", "factory:c"]);
    }

    #[test]
    fn test_registry_rescan_until_fixed_point() {
        let f = factory();
        let log: Log = Arc::default();

        // r1 registers r2, which registers r3
        f.define(recorder("r1", &log, &["r2", "r3"])).unwrap();
        let explicit = StartupHook::registry(Recorder {
            name: "explicit",
            log: Arc::clone(&log),
            spawn: &[],
        });

        invoke_factory_hooks(&f, &[explicit]).unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                "registry:explicit",
                "registry:r1",
                "registry:r2",
                "registry:r3",
                "factory:explicit",
                "factory:r1",
                "factory:r2",
                "factory:r3",
            ]
        );
    }

    struct RegistersPriorityHook {
        log: Log,
    }

    impl DefinitionRegistryHook for RegistersPriorityHook {
        fn post_process_registry(&self, registry: &dyn DescriptorRegistry) -> Result<()> {
            self.log.lock().push("registry:first".to_string());
            registry.define(recorder("late", &self.log, &[]).order(OrderMarker::PriorityOrdered(1)))?;
            Ok(())
        }
    }

    #[test]
    fn test_late_priority_registry_hook_runs_in_ordered_pass() {
        let f = factory();
        let log: Log = Arc::default();

        let first_log = Arc::clone(&log);
        f.define(
            ComponentDescriptor::registry_hook("first", move || {
                Ok(RegistersPriorityHook {
                    log: Arc::clone(&first_log),
                })
            })
            .order(OrderMarker::PriorityOrdered(0)),
        )
        .unwrap();
        f.define(recorder("ordered", &log, &[]).order(OrderMarker::Ordered(0)))
            .unwrap();
        f.define(recorder("plain", &log, &[])).unwrap();

        invoke_factory_hooks(&f, &[]).unwrap();
        let registry: Vec<String> = log
            .lock()
            .iter()
            .filter(|entry| entry.starts_with("registry:"))
            .cloned()
            .collect();
        assert_eq!(
            registry,
            vec!["registry:first", "registry:late", "registry:ordered", "registry:plain"]
        );
    }

    #[test]
    fn test_registry_hook_runs_once() {
        let f = factory();
        let log: Log = Arc::default();
        f.define(recorder("r", &log, &[]).order(OrderMarker::PriorityOrdered(0)))
            .unwrap();

        invoke_factory_hooks(&f, &[]).unwrap();
        let count = log.lock().iter().filter(|e| *e == "registry:r").count();
        assert_eq!(count, 1);
        let count = log.lock().iter().filter(|e| *e == "factory:r").count();
        assert_eq!(count, 1);
    }

    struct Failing;

    impl FactoryHook for Failing {
        fn post_process_factory(&self, _factory: &ComponentFactory) -> Result<()> {
            Err(ContainerError::custom("boom"))
        }
    }

    #[test]
    fn test_hook_failure_propagates() {
        let f = factory();
        let err = invoke_factory_hooks(&f, &[StartupHook::factory(Failing)]).unwrap_err();
        assert!(matches!(err, ContainerError::Hook { phase: "factory post-processing", .. }));
    }

    struct Marker(HookCapabilities);

    impl InstanceHook for Marker {
        fn capabilities(&self) -> HookCapabilities {
            self.0
        }
    }

    fn marker_hook(name: &'static str, caps: HookCapabilities) -> ComponentDescriptor {
        ComponentDescriptor::instance_hook(name, move || Ok(Marker(caps)))
    }

    #[test]
    fn test_instance_hook_registration_order() {
        let f = factory();
        f.define(marker_hook("plain", HookCapabilities::INITIALIZATION))
            .unwrap();
        f.define(
            marker_hook("merged", HookCapabilities::MERGED_DESCRIPTOR)
                .order(OrderMarker::PriorityOrdered(1)),
        )
        .unwrap();
        f.define(
            marker_hook("ordered", HookCapabilities::INITIALIZATION).order(OrderMarker::Ordered(0)),
        )
        .unwrap();
        f.define(
            marker_hook("priority", HookCapabilities::INITIALIZATION)
                .order(OrderMarker::PriorityOrdered(0)),
        )
        .unwrap();

        register_instance_hooks(&f).unwrap();
        assert_eq!(f.instance_hook_count(), 5);

        let position = |name: &str| {
            let hook = as_instance_hook(name, &f.get(name).unwrap()).unwrap();
            f.instance_hooks().position(&hook).unwrap()
        };
        assert_eq!(position("priority"), 0);
        assert_eq!(position("ordered"), 1);
        assert_eq!(position("plain"), 2);
        assert_eq!(position("merged"), 3);
    }

    struct Dependency;

    #[test]
    fn test_checker_flags_early_components() {
        let f = factory();
        f.define(ComponentDescriptor::new("dep").supplier(|| Ok(Dependency)))
            .unwrap();
        f.define(
            ComponentDescriptor::new("needy")
                .of::<InstanceHookRef>()
                .role(crate::descriptor::Role::Infrastructure)
                .constructor(Constructor::new(vec![ParamSpec::of::<Dependency>("dep")], |args| {
                    args.get::<Dependency>(0)?;
                    Ok(Arc::new(Marker(HookCapabilities::INITIALIZATION)) as InstanceHookRef)
                }))
                .autowire(crate::descriptor::Autowire::Constructor),
        )
        .unwrap();
        f.define(
            marker_hook("early", HookCapabilities::INITIALIZATION).order(OrderMarker::PriorityOrdered(0)),
        )
        .unwrap();

        register_instance_hooks(&f).unwrap();
        assert_eq!(f.ineligible_components(), vec!["dep"]);

        f.define(ComponentDescriptor::new("late").supplier(|| Ok(Dependency)))
            .unwrap();
        f.get("late").unwrap();
        assert_eq!(f.ineligible_components(), vec!["dep"]);
    }
}
