//! Component creation engine
//!
//! [`ComponentFactory`] turns merged descriptors into live instances:
//!
//! 1. resolve the effective descriptor
//! 2. let hooks short-circuit instantiation
//! 3. instantiate through a supplier, factory method or constructor
//! 4. run merged-descriptor hooks once per descriptor
//! 5. expose an early reference for singletons in creation
//! 6. populate properties, autowire and check dependencies
//! 7. initialize (hooks, init method, hooks)
//! 8. reconcile the early reference with the finished instance
//! 9. register a disposal callback
//!
//! Singleton creation is serialized by one reentrant lock, so a nested
//! creation on the same thread proceeds while other threads wait for the
//! finished instance.

use crate::cache::{CacheStage, Disposal, InstanceCache};
use crate::component::{ComponentType, Injectable, Instance, downcast, instance};
use crate::config::ContainerConfig;
use crate::descriptor::{
    Argument, Arguments, Autowire, ComponentDescriptor, ConstructionStrategy, Constructor, DependencyCheck,
    FactoryMethod, MergedDescriptor, ParamSpec, PropertyValue, PropertyValues, Role, Tier, ValueParser,
};
use crate::hook::{HookCapabilities, HookChain, InstanceHookRef};
use crate::resolver::DependencyRequest;
use crate::store::{DescriptorRegistry, predict_type};
use crate::{ContainerError, CreationPhase, Result};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

const STATE_ACTIVE: u8 = 0;
const STATE_FAILED: u8 = 1;
const STATE_DESTROYED: u8 = 2;

// =============================================================================
// Creation stack
// =============================================================================

struct CreationFrame {
    factory: u64,
    name: String,
    prototype: bool,
}

thread_local! {
    /// Components being created on this thread, innermost last
    static CREATION_STACK: RefCell<Vec<CreationFrame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame pushed by [`enter_creation`] when dropped
struct CreationFrameGuard;

impl Drop for CreationFrameGuard {
    fn drop(&mut self) {
        CREATION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn enter_creation(factory: u64, name: &str, prototype: bool) -> CreationFrameGuard {
    CREATION_STACK.with(|stack| {
        stack.borrow_mut().push(CreationFrame {
            factory,
            name: name.to_string(),
            prototype,
        })
    });
    CreationFrameGuard
}

fn prototype_in_creation(factory: u64, name: &str) -> bool {
    CREATION_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .any(|f| f.factory == factory && f.prototype && f.name == name)
    })
}

pub(crate) fn creation_chain(factory: u64) -> Vec<String> {
    CREATION_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .filter(|f| f.factory == factory)
            .map(|f| f.name.clone())
            .collect()
    })
}

/// The portion of the creation chain that loops back to `name`
fn cycle_through(factory: u64, name: &str) -> Vec<String> {
    let chain = creation_chain(factory);
    let start = chain.iter().position(|n| n == name).unwrap_or(0);
    let mut cycle = chain[start..].to_vec();
    cycle.push(name.to_string());
    cycle
}

// =============================================================================
// Per-creation state
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum ChosenStrategy {
    Supplier,
    FactoryMethod(usize),
    Constructor(usize),
}

struct CreationContext {
    explicit_args: Option<Vec<Instance>>,
    strategy: Option<ChosenStrategy>,
}

impl CreationContext {
    fn new(explicit_args: Option<Vec<Instance>>) -> Self {
        Self {
            explicit_args,
            strategy: None,
        }
    }

    /// Descriptor constructor arguments overlaid with caller-supplied ones
    fn argument_values(&self, merged: &MergedDescriptor) -> BTreeMap<usize, PropertyValue> {
        let mut values = merged.constructor_args().clone();
        if let Some(args) = &self.explicit_args {
            for (index, value) in args.iter().enumerate() {
                values.insert(index, PropertyValue::Value(Arc::clone(value)));
            }
        }
        values
    }
}

/// A constructor or factory method considered during greedy selection
struct Candidate<'a> {
    index: usize,
    params: &'a [ParamSpec],
    public: bool,
    return_type: Option<ComponentType>,
}

impl<'a> Candidate<'a> {
    fn constructor(index: usize, ctor: &'a Constructor) -> Self {
        Self {
            index,
            params: ctor.params(),
            public: ctor.is_public(),
            return_type: None,
        }
    }

    fn factory_method(index: usize, method: &'a FactoryMethod) -> Self {
        Self {
            index,
            params: method.params(),
            public: true,
            return_type: Some(method.return_type()),
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// The creation engine behind a [`Container`](crate::Container).
pub struct ComponentFactory {
    pub(crate) id: u64,
    pub(crate) store: Arc<dyn DescriptorRegistry>,
    pub(crate) hooks: Arc<HookChain>,
    pub(crate) cache: InstanceCache,
    pub(crate) config: ContainerConfig,
    state: AtomicU8,
    failure: Mutex<Option<String>>,
    ineligible: Mutex<Vec<String>>,
}

impl ComponentFactory {
    pub(crate) fn new(store: Arc<dyn DescriptorRegistry>, config: ContainerConfig) -> Self {
        let id = NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            factory_id = id,
            circular_references = config.circular_references_allowed(),
            lenient = config.is_lenient(),
            "Creating component factory"
        );

        Self {
            id,
            store,
            hooks: Arc::new(HookChain::new()),
            cache: InstanceCache::new(),
            config,
            state: AtomicU8::new(STATE_ACTIVE),
            failure: Mutex::new(None),
            ineligible: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    #[inline]
    pub fn store(&self) -> &dyn DescriptorRegistry {
        self.store.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    #[inline]
    pub fn instance_hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Register a descriptor
    pub fn define(&self, descriptor: ComponentDescriptor) -> Result<()> {
        self.store.define(descriptor)
    }

    pub fn alias(&self, name: &str, alias: &str) -> Result<()> {
        self.store.alias(name, alias)
    }

    /// Register a ready-made singleton under `name`
    pub fn register_singleton<T: Injectable>(&self, name: &str, value: T) -> Result<()> {
        self.register_singleton_instance(name, instance(value))
    }

    /// Register a ready-made, already erased singleton
    pub fn register_singleton_instance(&self, name: &str, value: Instance) -> Result<()> {
        if !self.cache.register_manual(name, value) {
            return Err(ContainerError::descriptor(
                name,
                "a singleton with this name is already registered",
            ));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            component = name,
            "Registered singleton instance"
        );

        Ok(())
    }

    /// Append an instance hook; one already registered moves to the end
    pub fn add_instance_hook(&self, hook: InstanceHookRef) {
        self.hooks.add(hook);
    }

    pub fn instance_hook_count(&self) -> usize {
        self.hooks.len()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Whether a descriptor or a singleton exists under `name`
    pub fn contains(&self, name: &str) -> bool {
        let name = self.store.canonical_name(name);
        self.store.contains_descriptor(&name) || self.cache.contains(&name)
    }

    pub fn is_singleton_instantiated(&self, name: &str) -> bool {
        self.cache.finished(&self.store.canonical_name(name)).is_some()
    }

    /// Current cache stage of a singleton, if it has one
    pub fn singleton_stage(&self, name: &str) -> Option<CacheStage> {
        self.cache.stage(&self.store.canonical_name(name))
    }

    /// Record that `dependent` depends on `provider`
    pub fn register_dependent(&self, provider: &str, dependent: &str) {
        let provider = self.store.canonical_name(provider);
        let dependent = self.store.canonical_name(dependent);
        self.cache.register_dependent(&provider, &dependent);
    }

    /// Components that received `name` as a dependency
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.cache.dependents_of(&self.store.canonical_name(name))
    }

    /// Components `name` received as dependencies
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.cache.dependencies_of(&self.store.canonical_name(name))
    }

    /// Components created before every instance hook was registered
    pub fn ineligible_components(&self) -> Vec<String> {
        self.ineligible.lock().clone()
    }

    pub(crate) fn record_ineligible(&self, name: &str) {
        let mut ineligible = self.ineligible.lock();
        if !ineligible.iter().any(|n| n == name) {
            ineligible.push(name.to_string());
        }
    }

    pub(crate) fn is_infrastructure(&self, name: &str) -> bool {
        self.store
            .get(name)
            .is_some_and(|d| d.role_marker() == Role::Infrastructure)
    }

    // =========================================================================
    // State
    // =========================================================================

    pub(crate) fn mark_failed(&self, reason: String) {
        *self.failure.lock() = Some(reason);
        self.state.store(STATE_FAILED, Ordering::Release);
    }

    pub(crate) fn mark_destroyed(&self) {
        self.state.store(STATE_DESTROYED, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_ACTIVE
    }

    fn check_usable(&self, name: &str) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE => Ok(()),
            STATE_FAILED => Err(ContainerError::StartupFailed {
                reason: self
                    .failure
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
            _ => Err(ContainerError::Destroyed {
                name: name.to_string(),
            }),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get the component named `name`, creating it if needed
    pub fn get(&self, name: &str) -> Result<Instance> {
        self.do_get(name, None)
    }

    /// Create with caller-supplied constructor or factory-method arguments.
    ///
    /// The arguments only apply when an instance is actually created.
    pub fn get_with_args(&self, name: &str, args: Vec<Instance>) -> Result<Instance> {
        self.do_get(name, Some(args))
    }

    /// [`get`](Self::get), downcast to `T`
    pub fn get_typed<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        downcast::<T>(name, self.get(name)?)
    }

    fn do_get(&self, name: &str, args: Option<Vec<Instance>>) -> Result<Instance> {
        self.check_usable(name)?;
        let name = self.store.canonical_name(name);

        if let Some(finished) = self.cache.finished(&name) {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = %name,
                "Returning cached singleton"
            );
            return Ok(finished);
        }

        let merged = match self.store.resolve(&name) {
            Ok(merged) => merged,
            Err(ContainerError::NoSuchComponent { .. }) => {
                return Err(ContainerError::no_such_component(name));
            }
            Err(e) => return Err(ContainerError::creation(&name, CreationPhase::Resolution, e)),
        };
        if merged.is_abstract() {
            return Err(ContainerError::creation(
                &name,
                CreationPhase::Resolution,
                ContainerError::descriptor(&name, "abstract template cannot be instantiated"),
            ));
        }

        if merged.is_singleton() {
            self.get_singleton(&name, &merged, args)
        } else {
            self.get_prototype(&name, &merged, args)
        }
    }

    fn get_singleton(&self, name: &str, merged: &Arc<MergedDescriptor>, args: Option<Vec<Instance>>) -> Result<Instance> {
        let _creation = self.cache.lock_creation();

        if let Some(existing) = self
            .cache
            .get_singleton(name, true)
            .map_err(|e| ContainerError::creation(name, CreationPhase::EarlyReference, e))?
        {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = name,
                "Returning early reference of singleton in creation"
            );
            return Ok(existing);
        }

        if self.cache.is_destroying() {
            return Err(ContainerError::Destroyed {
                name: name.to_string(),
            });
        }
        if !self.cache.begin_creation(name) {
            return Err(ContainerError::CurrentlyInCreation {
                name: name.to_string(),
                cycle: cycle_through(self.id, name),
            });
        }

        let result = {
            let _frame = enter_creation(self.id, name, false);
            self.create_component(name, merged, args)
        };
        self.cache.end_creation(name);

        match result {
            Ok(created) => {
                self.cache.add_finished(name, Arc::clone(&created));
                Ok(created)
            }
            Err(e) => {
                // dependents may already hold this instance's early reference
                self.cache.destroy_singleton(name);
                Err(e)
            }
        }
    }

    fn get_prototype(&self, name: &str, merged: &Arc<MergedDescriptor>, args: Option<Vec<Instance>>) -> Result<Instance> {
        if prototype_in_creation(self.id, name) {
            return Err(ContainerError::CurrentlyInCreation {
                name: name.to_string(),
                cycle: cycle_through(self.id, name),
            });
        }
        let _frame = enter_creation(self.id, name, true);
        self.create_component(name, merged, args)
    }

    /// Create every non-lazy, non-abstract singleton.
    pub fn preinstantiate_singletons(&self) -> Result<()> {
        let names = self.store.names();

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            descriptor_count = names.len(),
            "Pre-instantiating singletons"
        );

        for name in names {
            let merged = self.store.resolve(&name)?;
            if !merged.is_abstract() && merged.is_singleton() && !merged.is_lazy_init() {
                self.get(&name)?;
            }
        }
        Ok(())
    }

    /// Dispose all singletons, dependents before their dependencies
    pub fn destroy_singletons(&self) {
        self.cache.destroy_all();
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create an instance for a merged descriptor: validation, the
    /// before-instantiation short circuit, then the full lifecycle.
    pub(crate) fn create_component(
        &self,
        name: &str,
        merged: &MergedDescriptor,
        args: Option<Vec<Instance>>,
    ) -> Result<Instance> {
        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            component = name,
            scope = merged.scope_or_default().as_str(),
            "Creating instance of component"
        );

        self.validate(name, merged)
            .map_err(|e| ContainerError::creation(name, CreationPhase::Resolution, e))?;

        match self.resolve_before_instantiation(name, merged) {
            Ok(Some(substitute)) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "lifecycle_container",
                    component = name,
                    "Instantiation short-circuited by instance hook"
                );
                return Ok(substitute);
            }
            Ok(None) => {}
            Err(e) => return Err(ContainerError::creation(name, CreationPhase::BeforeInstantiation, e)),
        }

        self.do_create(name, merged, CreationContext::new(args))
    }

    fn validate(&self, name: &str, merged: &MergedDescriptor) -> Result<()> {
        if !merged.is_public_type() && !self.config.non_public_access_allowed() {
            return Err(ContainerError::descriptor(
                name,
                "component type is not public and non-public access is not allowed",
            ));
        }
        if merged.strategy().is_none() {
            return Err(ContainerError::descriptor(name, "no construction strategy declared"));
        }
        predict_type(merged)?;
        Ok(())
    }

    fn resolve_before_instantiation(&self, name: &str, merged: &MergedDescriptor) -> Result<Option<Instance>> {
        if merged.is_synthetic() || !self.hooks.has(HookCapabilities::INSTANTIATION) {
            return Ok(None);
        }
        let ty = predict_type(merged)?;
        match self.hooks.before_instantiation(ty, name)? {
            Some(substitute) => self.hooks.after_initialization(substitute, name).map(Some),
            None => Ok(None),
        }
    }

    fn do_create(&self, name: &str, merged: &MergedDescriptor, mut ctx: CreationContext) -> Result<Instance> {
        let raw = self
            .create_instance(name, merged, &mut ctx)
            .map_err(|e| ContainerError::creation(name, CreationPhase::Instantiation, e))?;

        merged
            .post_process_once(|| {
                if self.hooks.has(HookCapabilities::MERGED_DESCRIPTOR) {
                    self.hooks.post_process_merged(merged, name)
                } else {
                    Ok(())
                }
            })
            .map_err(|e| ContainerError::creation(name, CreationPhase::MergedDescriptor, e))?;

        let early_exposure =
            merged.is_singleton() && self.config.circular_references_allowed() && self.cache.is_in_creation(name);
        if early_exposure {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = name,
                "Eagerly caching component to allow for resolving potential circular references"
            );

            let hooks = Arc::clone(&self.hooks);
            let exposed = Arc::clone(&raw);
            let early_name = name.to_string();
            let synthetic = merged.is_synthetic();
            self.cache.add_pending(
                name,
                Arc::new(move || {
                    if synthetic || !hooks.has(HookCapabilities::EARLY_REFERENCE) {
                        Ok(Arc::clone(&exposed))
                    } else {
                        hooks.early_reference(Arc::clone(&exposed), &early_name)
                    }
                }),
            );
        }

        self.populate(name, merged, &raw)
            .map_err(|e| ContainerError::creation(name, CreationPhase::Population, e))?;
        let mut exposed = self
            .initialize(name, Arc::clone(&raw), merged)
            .map_err(|e| ContainerError::creation(name, CreationPhase::Initialization, e))?;

        if early_exposure {
            if let Some(early) = self.cache.get_singleton(name, false)? {
                if Arc::ptr_eq(&exposed, &raw) {
                    exposed = early;
                } else if !self.config.raw_injection_allowed() {
                    let dependents = self.cache.dependents_of(name);
                    if !dependents.is_empty() {
                        return Err(ContainerError::creation(
                            name,
                            CreationPhase::CycleCheck,
                            ContainerError::CircularWrapping {
                                name: name.to_string(),
                                dependents,
                            },
                        ));
                    }
                }
            }
        }

        if merged.is_singleton() {
            self.register_disposal(name, &raw, merged);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            component = name,
            strategy = ?ctx.strategy,
            "Finished creating instance of component"
        );

        Ok(exposed)
    }

    // -------------------------------------------------------------------------
    // Instantiation
    // -------------------------------------------------------------------------

    fn create_instance(&self, name: &str, merged: &MergedDescriptor, ctx: &mut CreationContext) -> Result<Instance> {
        match merged.strategy() {
            Some(ConstructionStrategy::Supplier(supplier)) => {
                ctx.strategy = Some(ChosenStrategy::Supplier);
                supplier()
            }
            Some(ConstructionStrategy::FactoryMethod {
                factory_component,
                methods,
            }) => self.instantiate_with_factory_method(name, merged, factory_component.as_deref(), methods, ctx),
            Some(ConstructionStrategy::Constructors(ctors)) => self.instantiate_with_constructor(name, merged, ctors, ctx),
            None => Err(ContainerError::descriptor(name, "no construction strategy declared")),
        }
    }

    fn instantiate_with_factory_method(
        &self,
        name: &str,
        merged: &MergedDescriptor,
        factory_component: Option<&str>,
        methods: &[FactoryMethod],
        ctx: &mut CreationContext,
    ) -> Result<Instance> {
        let factory_instance = match factory_component {
            Some(factory_name) => {
                let factory_name = self.store.canonical_name(factory_name);
                if factory_name == name {
                    return Err(ContainerError::descriptor(
                        name,
                        "factory component reference points back to the same descriptor",
                    ));
                }
                let factory_instance = self.get(&factory_name)?;
                self.cache.register_dependent(&factory_name, name);
                Some(factory_instance)
            }
            None => None,
        };
        let on_instance = factory_instance.is_some();
        let values = ctx.argument_values(merged);
        let eager = merged.order_marker().tier() != Tier::PriorityOrdered;

        if ctx.explicit_args.is_none() {
            if let Some(&index) = merged.resolved_factory_method.get() {
                if let Some(method) = methods.get(index) {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "lifecycle_container",
                        component = name,
                        method = method.name(),
                        "Using previously resolved factory method"
                    );
                    let mut providers = Vec::new();
                    let args = self.build_arguments(name, method.params(), &values, eager, &mut providers)?;
                    self.record_dependents(&providers, name);
                    ctx.strategy = Some(ChosenStrategy::FactoryMethod(index));
                    return method.invoke(factory_instance.as_ref(), Arguments::new(name, args));
                }
            }
        }

        let candidates: Vec<Candidate<'_>> = methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_instance_method() == on_instance)
            .map(|(i, m)| Candidate::factory_method(i, m))
            .collect();
        if candidates.is_empty() {
            return Err(ContainerError::descriptor(
                name,
                if on_instance {
                    "no factory method invocable on the factory component"
                } else {
                    "no static factory method declared"
                },
            ));
        }

        let (index, args, providers) = self.select_candidate(name, candidates, &values, eager, "factory method")?;
        self.record_dependents(&providers, name);
        if ctx.explicit_args.is_none() {
            let _ = merged.resolved_factory_method.set(index);
        }
        ctx.strategy = Some(ChosenStrategy::FactoryMethod(index));
        methods[index].invoke(factory_instance.as_ref(), Arguments::new(name, args))
    }

    fn instantiate_with_constructor(
        &self,
        name: &str,
        merged: &MergedDescriptor,
        ctors: &[Constructor],
        ctx: &mut CreationContext,
    ) -> Result<Instance> {
        let values = ctx.argument_values(merged);
        let eager = merged.order_marker().tier() != Tier::PriorityOrdered;

        if ctx.explicit_args.is_none() {
            if let Some(index) = merged.resolved_constructor() {
                if let Some(ctor) = ctors.get(index) {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "lifecycle_container",
                        component = name,
                        constructor = index,
                        "Using previously resolved constructor"
                    );
                    let mut providers = Vec::new();
                    let args = self.build_arguments(name, ctor.params(), &values, eager, &mut providers)?;
                    self.record_dependents(&providers, name);
                    ctx.strategy = Some(ChosenStrategy::Constructor(index));
                    return ctor.construct(Arguments::new(name, args));
                }
            }
        }

        let suggested = if merged.is_synthetic() || !self.hooks.has(HookCapabilities::CONSTRUCTOR_CANDIDATES) {
            None
        } else {
            self.hooks.candidate_constructors(merged, name)?
        };

        let indices: Vec<usize> = if let Some(suggested) = suggested {
            suggested
        } else if merged.autowire_mode() == Autowire::Constructor || !values.is_empty() {
            (0..ctors.len()).collect()
        } else if let Some(preferred) = merged.preferred_constructor_indices() {
            preferred.to_vec()
        } else {
            let index = ctors
                .iter()
                .position(|c| c.params().is_empty())
                .ok_or_else(|| ContainerError::descriptor(name, "no default constructor found"))?;
            let _ = merged.resolved_constructor.set(index);
            ctx.strategy = Some(ChosenStrategy::Constructor(index));
            return ctors[index].construct(Arguments::new(name, Vec::new()));
        };

        let mut candidates = Vec::with_capacity(indices.len());
        for index in indices {
            let ctor = ctors.get(index).ok_or_else(|| {
                ContainerError::descriptor(name, format!("constructor candidate #{index} does not exist"))
            })?;
            candidates.push(Candidate::constructor(index, ctor));
        }

        let (index, args, providers) = self.select_candidate(name, candidates, &values, eager, "constructor")?;
        self.record_dependents(&providers, name);
        if ctx.explicit_args.is_none() {
            let _ = merged.resolved_constructor.set(index);
        }
        ctx.strategy = Some(ChosenStrategy::Constructor(index));
        ctors[index].construct(Arguments::new(name, args))
    }

    /// Greedy selection: public before non-public, more parameters first,
    /// first fully satisfiable candidate wins. Further satisfiable
    /// candidates of the same arity make the choice ambiguous.
    ///
    /// Also returns the providers the winning candidate's arguments came
    /// from; nothing is recorded for candidates that were tried and dropped.
    fn select_candidate(
        &self,
        name: &str,
        mut candidates: Vec<Candidate<'_>>,
        values: &BTreeMap<usize, PropertyValue>,
        eager: bool,
        what: &str,
    ) -> Result<(usize, Vec<Argument>, Vec<String>)> {
        let min_args = values.keys().next_back().map_or(0, |last| last + 1);
        candidates.sort_by(|a, b| {
            b.public
                .cmp(&a.public)
                .then_with(|| b.params.len().cmp(&a.params.len()))
        });

        let mut chosen: Option<(&Candidate<'_>, Vec<Argument>, Vec<String>)> = None;
        let mut ambiguous: Vec<&Candidate<'_>> = Vec::new();
        let mut last_error = None;

        for candidate in &candidates {
            if let Some((best, _, _)) = &chosen {
                if candidate.params.len() < best.params.len() {
                    break;
                }
            }
            if candidate.params.len() < min_args {
                continue;
            }
            let mut providers = Vec::new();
            match self.build_arguments(name, candidate.params, values, eager, &mut providers) {
                Ok(args) => {
                    if chosen.is_none() {
                        chosen = Some((candidate, args, providers));
                    } else {
                        ambiguous.push(candidate);
                    }
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "lifecycle_container",
                        component = name,
                        candidate = candidate.index,
                        error = %e,
                        "Skipping unsatisfiable candidate"
                    );
                    last_error = Some(e);
                }
            }
        }

        let Some((best, args, providers)) = chosen else {
            return Err(last_error.unwrap_or_else(|| {
                ContainerError::descriptor(
                    name,
                    format!("no {what} accepts {min_args} explicit argument(s)"),
                )
            }));
        };

        if !ambiguous.is_empty() {
            let mixed_return_types = ambiguous.iter().any(|c| c.return_type != best.return_type);
            if mixed_return_types || !self.config.is_lenient() {
                let mut indices = vec![best.index];
                indices.extend(ambiguous.iter().map(|c| c.index));
                return Err(ContainerError::descriptor(
                    name,
                    format!(
                        "ambiguous {what} matches: candidates {indices:?} all take {} argument(s)",
                        best.params.len()
                    ),
                ));
            }
        }

        Ok((best.index, args, providers))
    }

    fn build_arguments(
        &self,
        name: &str,
        params: &[ParamSpec],
        values: &BTreeMap<usize, PropertyValue>,
        eager: bool,
        providers: &mut Vec<String>,
    ) -> Result<Vec<Argument>> {
        params
            .iter()
            .enumerate()
            .map(|(index, param)| match values.get(&index) {
                Some(value) => self
                    .resolve_value(name, param.name(), param.ty(), param.parser(), value, providers)
                    .map(Argument::One),
                None => self.resolve_providers(&DependencyRequest::for_param(param).eager(eager), Some(name), providers),
            })
            .collect()
    }

    /// Turn a declared value into an instance of `target`. A referenced
    /// component is appended to `providers`.
    fn resolve_value(
        &self,
        component: &str,
        property: &str,
        target: ComponentType,
        parser: Option<ValueParser>,
        value: &PropertyValue,
        providers: &mut Vec<String>,
    ) -> Result<Instance> {
        let raw = match value {
            PropertyValue::Value(value) => Arc::clone(value),
            PropertyValue::Text(text) => instance(text.clone()),
            PropertyValue::Reference(reference) => {
                let reference = self.store.canonical_name(reference);
                let resolved = self.get(&reference)?;
                let matches = self.store.is_type_match(&reference, target);
                providers.push(reference);
                if matches {
                    return Ok(resolved);
                }
                resolved
            }
        };

        if target.is_instance(&raw) {
            return Ok(raw);
        }
        match (raw.downcast_ref::<String>(), parser) {
            (Some(text), Some(parse)) => parse(text).map_err(|e| ContainerError::PropertyConversion {
                component: component.to_string(),
                property: property.to_string(),
                target: target.name(),
                reason: e.to_string(),
            }),
            _ => Err(ContainerError::PropertyConversion {
                component: component.to_string(),
                property: property.to_string(),
                target: target.name(),
                reason: "incompatible value type".to_string(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Population
    // -------------------------------------------------------------------------

    fn populate(&self, name: &str, merged: &MergedDescriptor, raw: &Instance) -> Result<()> {
        let hooked = !merged.is_synthetic() && self.hooks.has(HookCapabilities::INSTANTIATION);

        if hooked && !self.hooks.after_instantiation(raw, name)? {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = name,
                "Property population vetoed by instance hook"
            );
            return Ok(());
        }

        let mut properties = merged.properties().clone();
        match merged.autowire_mode() {
            Autowire::ByName => self.autowire_by_name(name, merged, &mut properties)?,
            Autowire::ByType => self.autowire_by_type(name, merged, &mut properties)?,
            Autowire::No | Autowire::Constructor => {}
        }

        if hooked {
            match self.hooks.post_process_properties(properties, raw, name)? {
                Some(next) => properties = next,
                None => return Ok(()),
            }
        }

        if merged.dependency_check_mode() == DependencyCheck::Objects {
            self.check_dependencies(name, merged, &properties)?;
        }

        self.apply_properties(name, merged, raw, &properties)
    }

    fn autowire_by_name(&self, name: &str, merged: &MergedDescriptor, properties: &mut PropertyValues) -> Result<()> {
        for setter in merged.setters() {
            if properties.contains(setter.name()) || setter.parser().is_some() {
                continue;
            }
            if self.contains(setter.name()) {
                let provider = self.store.canonical_name(setter.name());
                let value = self.get(&provider)?;
                self.cache.register_dependent(&provider, name);
                properties.set(setter.name(), PropertyValue::Value(value));

                #[cfg(feature = "logging")]
                trace!(
                    target: "lifecycle_container",
                    component = name,
                    property = setter.name(),
                    "Autowired property by name"
                );
            } else {
                #[cfg(feature = "logging")]
                trace!(
                    target: "lifecycle_container",
                    component = name,
                    property = setter.name(),
                    "Not autowiring property by name: no matching component"
                );
            }
        }
        Ok(())
    }

    fn autowire_by_type(&self, name: &str, merged: &MergedDescriptor, properties: &mut PropertyValues) -> Result<()> {
        let eager = merged.order_marker().tier() != Tier::PriorityOrdered;
        for setter in merged.setters() {
            if properties.contains(setter.name()) || setter.parser().is_some() {
                continue;
            }
            let request = DependencyRequest::of_type(setter.target())
                .field(setter.name())
                .optional()
                .eager(eager);
            if let Argument::One(value) = self.resolve_dependency(&request, Some(name))? {
                properties.set(setter.name(), PropertyValue::Value(value));
            }
        }
        Ok(())
    }

    fn check_dependencies(&self, name: &str, merged: &MergedDescriptor, properties: &PropertyValues) -> Result<()> {
        match merged.setters().iter().find(|s| !properties.contains(s.name())) {
            Some(unsatisfied) => Err(ContainerError::UnsatisfiedDependency {
                component: name.to_string(),
                dependency: unsatisfied.name().to_string(),
                chain: creation_chain(self.id),
            }),
            None => Ok(()),
        }
    }

    fn apply_properties(
        &self,
        name: &str,
        merged: &MergedDescriptor,
        raw: &Instance,
        properties: &PropertyValues,
    ) -> Result<()> {
        for (property, value) in properties.iter() {
            let setter = merged
                .setters()
                .iter()
                .find(|s| s.name() == property)
                .ok_or_else(|| ContainerError::descriptor(name, format!("no setter for property '{property}'")))?;
            let mut providers = Vec::new();
            let converted = self.resolve_value(name, property, setter.target(), setter.parser(), value, &mut providers)?;
            self.record_dependents(&providers, name);
            setter.apply(raw, converted)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Initialization and disposal
    // -------------------------------------------------------------------------

    fn initialize(&self, name: &str, instance: Instance, merged: &MergedDescriptor) -> Result<Instance> {
        let hooked = !merged.is_synthetic();
        let mut wrapped = instance;

        if hooked {
            wrapped = self.hooks.before_initialization(wrapped, name)?;
        }

        if let Some(init) = merged.init() {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = name,
                method = init.name(),
                "Invoking init method"
            );
            init.invoke(&wrapped)?;
        }

        if hooked {
            wrapped = self.hooks.after_initialization(wrapped, name)?;
        }
        Ok(wrapped)
    }

    fn register_disposal(&self, name: &str, raw: &Instance, merged: &MergedDescriptor) {
        let hooks = self.hooks.destruction_hooks(raw);
        let method = merged.destroy().cloned();
        if method.is_some() || !hooks.is_empty() {
            self.cache
                .register_disposal(name, Disposal::new(Arc::clone(raw), method, hooks));
        }
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("id", &self.id)
            .field("descriptors", &self.store.len())
            .field("hooks", &self.hooks.len())
            .field("cache", &self.cache)
            .finish()
    }
}
