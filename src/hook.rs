//! Extension hooks
//!
//! Three kinds of hooks extend the container:
//!
//! - [`DefinitionRegistryHook`] - adds or edits descriptors before any
//!   application component exists
//! - [`FactoryHook`] - inspects or edits the factory once all descriptors
//!   are known
//! - [`InstanceHook`] - participates in the creation of every component
//!
//! Hooks are components themselves. A hook descriptor produces an
//! `Arc<dyn ...Hook>` value, so the pipeline can discover hooks by type.

use crate::component::{ComponentType, Instance};
use crate::descriptor::{ComponentDescriptor, MergedDescriptor, OrderMarker, PropertyValues, Role};
use crate::factory::ComponentFactory;
use crate::store::DescriptorRegistry;
use crate::{ContainerError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

// =============================================================================
// Hook traits
// =============================================================================

/// Hook run against the whole factory after descriptors are loaded
pub trait FactoryHook: Send + Sync {
    fn post_process_factory(&self, factory: &ComponentFactory) -> Result<()>;
}

/// Hook that may register further descriptors, including other hooks.
///
/// Runs before every [`FactoryHook`]. Its own factory phase runs together
/// with the explicitly supplied factory hooks.
pub trait DefinitionRegistryHook: Send + Sync {
    fn post_process_registry(&self, registry: &dyn DescriptorRegistry) -> Result<()>;

    fn post_process_factory(&self, _factory: &ComponentFactory) -> Result<()> {
        Ok(())
    }
}

/// Hook participating in component creation.
///
/// Every method has a pass-through default. The container only calls the
/// methods whose group is declared in [`InstanceHook::capabilities`].
pub trait InstanceHook: Send + Sync {
    /// Method groups this hook implements
    fn capabilities(&self) -> HookCapabilities {
        HookCapabilities::INITIALIZATION
    }

    /// Return a substitute to skip normal creation
    fn before_instantiation(&self, _ty: Option<ComponentType>, _name: &str) -> Result<Option<Instance>> {
        Ok(None)
    }

    /// Return `false` to skip property population
    fn after_instantiation(&self, _instance: &Instance, _name: &str) -> Result<bool> {
        Ok(true)
    }

    /// Edit the property values; `None` skips applying them
    fn post_process_properties(
        &self,
        properties: PropertyValues,
        _instance: &Instance,
        _name: &str,
    ) -> Result<Option<PropertyValues>> {
        Ok(Some(properties))
    }

    /// Constructor candidates (indices) to try, most preferred first
    fn candidate_constructors(&self, _merged: &MergedDescriptor, _name: &str) -> Result<Option<Vec<usize>>> {
        Ok(None)
    }

    /// Reference handed out to circular dependents before initialization
    fn early_reference(&self, instance: Instance, _name: &str) -> Result<Instance> {
        Ok(instance)
    }

    /// Enrich merged descriptor metadata, once per descriptor
    fn post_process_merged(&self, _merged: &MergedDescriptor, _name: &str) -> Result<()> {
        Ok(())
    }

    fn before_initialization(&self, instance: Instance, _name: &str) -> Result<Instance> {
        Ok(instance)
    }

    fn after_initialization(&self, instance: Instance, _name: &str) -> Result<Instance> {
        Ok(instance)
    }

    /// Whether `before_destruction` must run for this instance
    fn requires_destruction(&self, _instance: &Instance) -> bool {
        true
    }

    fn before_destruction(&self, _instance: &Instance, _name: &str) -> Result<()> {
        Ok(())
    }
}

pub type InstanceHookRef = Arc<dyn InstanceHook>;
pub type FactoryHookRef = Arc<dyn FactoryHook>;
pub type RegistryHookRef = Arc<dyn DefinitionRegistryHook>;

// =============================================================================
// Capabilities
// =============================================================================

/// Method groups an [`InstanceHook`] implements
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HookCapabilities(u8);

impl HookCapabilities {
    pub const NONE: Self = Self(0);
    /// `before_initialization` / `after_initialization`
    pub const INITIALIZATION: Self = Self(1);
    /// `before_instantiation` / `after_instantiation` / `post_process_properties`
    pub const INSTANTIATION: Self = Self(1 << 1);
    /// `candidate_constructors`
    pub const CONSTRUCTOR_CANDIDATES: Self = Self(1 << 2);
    /// `early_reference`
    pub const EARLY_REFERENCE: Self = Self(1 << 3);
    /// `post_process_merged`
    pub const MERGED_DESCRIPTOR: Self = Self(1 << 4);
    /// `requires_destruction` / `before_destruction`
    pub const DESTRUCTION: Self = Self(1 << 5);

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for HookCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for HookCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(HookCapabilities, &str); 6] = [
            (HookCapabilities::INITIALIZATION, "INITIALIZATION"),
            (HookCapabilities::INSTANTIATION, "INSTANTIATION"),
            (HookCapabilities::CONSTRUCTOR_CANDIDATES, "CONSTRUCTOR_CANDIDATES"),
            (HookCapabilities::EARLY_REFERENCE, "EARLY_REFERENCE"),
            (HookCapabilities::MERGED_DESCRIPTOR, "MERGED_DESCRIPTOR"),
            (HookCapabilities::DESTRUCTION, "DESTRUCTION"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "HookCapabilities({})", set.join(" | "))
    }
}

// =============================================================================
// Hooks as components
// =============================================================================

impl ComponentDescriptor {
    /// Descriptor for an instance hook built by `f`
    pub fn instance_hook<H, F>(name: impl Into<String>, f: F) -> Self
    where
        H: InstanceHook + 'static,
        F: Fn() -> Result<H> + Send + Sync + 'static,
    {
        Self::new(name)
            .supplier(move || f().map(|h| Arc::new(h) as InstanceHookRef))
            .role(Role::Infrastructure)
    }

    /// Descriptor for a factory hook built by `f`
    pub fn factory_hook<H, F>(name: impl Into<String>, f: F) -> Self
    where
        H: FactoryHook + 'static,
        F: Fn() -> Result<H> + Send + Sync + 'static,
    {
        Self::new(name)
            .supplier(move || f().map(|h| Arc::new(h) as FactoryHookRef))
            .role(Role::Infrastructure)
    }

    /// Descriptor for a definition-registration hook built by `f`.
    ///
    /// Also matches [`FactoryHookRef`], so a registry hook registered too
    /// late for the registration phase still gets its factory phase.
    pub fn registry_hook<H, F>(name: impl Into<String>, f: F) -> Self
    where
        H: DefinitionRegistryHook + 'static,
        F: Fn() -> Result<H> + Send + Sync + 'static,
    {
        Self::new(name)
            .supplier(move || f().map(|h| Arc::new(h) as RegistryHookRef))
            .also_matches(ComponentType::of::<FactoryHookRef>())
            .role(Role::Infrastructure)
    }
}

/// Factory phase of a registry hook, seen as a plain factory hook
struct RegistryAsFactory(RegistryHookRef);

impl FactoryHook for RegistryAsFactory {
    fn post_process_factory(&self, factory: &ComponentFactory) -> Result<()> {
        self.0.post_process_factory(factory)
    }
}

pub(crate) fn as_instance_hook(name: &str, instance: &Instance) -> Result<InstanceHookRef> {
    instance
        .downcast_ref::<InstanceHookRef>()
        .cloned()
        .ok_or_else(|| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<InstanceHookRef>(),
        })
}

pub(crate) fn as_registry_hook(name: &str, instance: &Instance) -> Result<RegistryHookRef> {
    instance
        .downcast_ref::<RegistryHookRef>()
        .cloned()
        .ok_or_else(|| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<RegistryHookRef>(),
        })
}

pub(crate) fn as_factory_hook(name: &str, instance: &Instance) -> Result<FactoryHookRef> {
    if let Some(hook) = instance.downcast_ref::<FactoryHookRef>() {
        return Ok(Arc::clone(hook));
    }
    as_registry_hook(name, instance)
        .map(|hook| Arc::new(RegistryAsFactory(hook)) as FactoryHookRef)
        .map_err(|_| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<FactoryHookRef>(),
        })
}

/// Whether the instance is itself an instance hook
#[inline]
pub(crate) fn is_instance_hook(instance: &Instance) -> bool {
    instance.is::<InstanceHookRef>()
}

/// Stable sort by tier, then order value; ties keep discovery order.
pub(crate) fn sort_by_order<T>(items: &mut [(OrderMarker, T)]) {
    items.sort_by_key(|(marker, _)| marker.sort_key());
}

// =============================================================================
// Instance hook chain
// =============================================================================

#[derive(Clone)]
struct RegisteredHook {
    hook: InstanceHookRef,
    capabilities: HookCapabilities,
}

/// Ordered list of instance hooks.
///
/// Readers take a snapshot `Arc`, so a creation in progress never observes
/// a half-updated chain and hooks run without any lock held.
pub struct HookChain {
    hooks: RwLock<Arc<Vec<RegisteredHook>>>,
    declared: RwLock<HookCapabilities>,
}

impl HookChain {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Arc::new(Vec::new())),
            declared: RwLock::new(HookCapabilities::NONE),
        }
    }

    /// Append a hook. A hook already in the chain moves to the end.
    pub fn add(&self, hook: InstanceHookRef) {
        let capabilities = hook.capabilities();
        let mut guard = self.hooks.write();
        let mut next: Vec<RegisteredHook> = guard
            .iter()
            .filter(|h| !Arc::ptr_eq(&h.hook, &hook))
            .cloned()
            .collect();
        next.push(RegisteredHook { hook, capabilities });

        let declared = next
            .iter()
            .fold(HookCapabilities::NONE, |acc, h| acc | h.capabilities);
        *self.declared.write() = declared;

        #[cfg(feature = "logging")]
        trace!(
            target: "lifecycle_container",
            hook_count = next.len(),
            capabilities = ?capabilities,
            "Registered instance hook"
        );

        *guard = Arc::new(next);
    }

    #[inline]
    fn snapshot(&self) -> Arc<Vec<RegisteredHook>> {
        Arc::clone(&self.hooks.read())
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any registered hook declares `capability`
    #[inline]
    pub fn has(&self, capability: HookCapabilities) -> bool {
        self.declared.read().intersects(capability)
    }

    /// Position of `hook` in the chain
    pub fn position(&self, hook: &InstanceHookRef) -> Option<usize> {
        self.snapshot().iter().position(|h| Arc::ptr_eq(&h.hook, hook))
    }

    fn with(&self, capability: HookCapabilities) -> impl Iterator<Item = InstanceHookRef> {
        let snapshot = self.snapshot();
        let hooks: Vec<InstanceHookRef> = snapshot
            .iter()
            .filter(|h| h.capabilities.contains(capability))
            .map(|h| Arc::clone(&h.hook))
            .collect();
        hooks.into_iter()
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    pub(crate) fn before_instantiation(&self, ty: Option<ComponentType>, name: &str) -> Result<Option<Instance>> {
        for hook in self.with(HookCapabilities::INSTANTIATION) {
            let substitute = hook
                .before_instantiation(ty, name)
                .map_err(|e| ContainerError::hook("before instantiation", e))?;
            if substitute.is_some() {
                return Ok(substitute);
            }
        }
        Ok(None)
    }

    pub(crate) fn after_instantiation(&self, instance: &Instance, name: &str) -> Result<bool> {
        for hook in self.with(HookCapabilities::INSTANTIATION) {
            let proceed = hook
                .after_instantiation(instance, name)
                .map_err(|e| ContainerError::hook("after instantiation", e))?;
            if !proceed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn post_process_properties(
        &self,
        mut properties: PropertyValues,
        instance: &Instance,
        name: &str,
    ) -> Result<Option<PropertyValues>> {
        for hook in self.with(HookCapabilities::INSTANTIATION) {
            match hook
                .post_process_properties(properties, instance, name)
                .map_err(|e| ContainerError::hook("property post-processing", e))?
            {
                Some(next) => properties = next,
                None => return Ok(None),
            }
        }
        Ok(Some(properties))
    }

    pub(crate) fn candidate_constructors(&self, merged: &MergedDescriptor, name: &str) -> Result<Option<Vec<usize>>> {
        for hook in self.with(HookCapabilities::CONSTRUCTOR_CANDIDATES) {
            let candidates = hook
                .candidate_constructors(merged, name)
                .map_err(|e| ContainerError::hook("constructor determination", e))?;
            if candidates.is_some() {
                return Ok(candidates);
            }
        }
        Ok(None)
    }

    pub(crate) fn early_reference(&self, mut instance: Instance, name: &str) -> Result<Instance> {
        for hook in self.with(HookCapabilities::EARLY_REFERENCE) {
            instance = hook
                .early_reference(instance, name)
                .map_err(|e| ContainerError::hook("early reference", e))?;
        }
        Ok(instance)
    }

    pub(crate) fn post_process_merged(&self, merged: &MergedDescriptor, name: &str) -> Result<()> {
        for hook in self.with(HookCapabilities::MERGED_DESCRIPTOR) {
            hook.post_process_merged(merged, name)
                .map_err(|e| ContainerError::hook("merged descriptor post-processing", e))?;
        }
        Ok(())
    }

    pub(crate) fn before_initialization(&self, mut instance: Instance, name: &str) -> Result<Instance> {
        for hook in self.with(HookCapabilities::INITIALIZATION) {
            instance = hook
                .before_initialization(instance, name)
                .map_err(|e| ContainerError::hook("before initialization", e))?;
        }
        Ok(instance)
    }

    pub(crate) fn after_initialization(&self, mut instance: Instance, name: &str) -> Result<Instance> {
        for hook in self.with(HookCapabilities::INITIALIZATION) {
            instance = hook
                .after_initialization(instance, name)
                .map_err(|e| ContainerError::hook("after initialization", e))?;
        }
        Ok(instance)
    }

    /// Hooks that must run before `instance` is disposed
    pub(crate) fn destruction_hooks(&self, instance: &Instance) -> Vec<InstanceHookRef> {
        self.with(HookCapabilities::DESTRUCTION)
            .filter(|hook| hook.requires_destruction(instance))
            .collect()
    }
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("len", &self.len())
            .field("declared", &*self.declared.read())
            .finish()
    }
}
