//! Descriptor storage
//!
//! The container consumes descriptors through the [`DescriptorRegistry`]
//! trait. [`DescriptorStore`] is the default implementation, backed by
//! `DashMap` for concurrent lookups.

use crate::component::ComponentType;
use crate::descriptor::{ComponentDescriptor, ConstructionStrategy, MergedDescriptor};
use crate::{ContainerError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Descriptor lookup and registration, as used by the creation engine and
/// by definition-registration hooks.
pub trait DescriptorRegistry: Send + Sync {
    /// Register or replace a descriptor
    fn define(&self, descriptor: ComponentDescriptor) -> Result<()>;

    /// Remove a descriptor
    fn remove(&self, name: &str) -> Result<()>;

    /// Raw (unmerged) descriptor
    fn get(&self, name: &str) -> Option<ComponentDescriptor>;

    /// Whether a descriptor is registered under this name (aliases resolved)
    fn contains_descriptor(&self, name: &str) -> bool;

    /// Register `alias` for `name`
    fn alias(&self, name: &str, alias: &str) -> Result<()>;

    /// All aliases of a canonical name
    fn aliases(&self, name: &str) -> Vec<String>;

    /// Follow aliases to the canonical name
    fn canonical_name(&self, name: &str) -> String;

    /// Descriptor names in registration order
    fn names(&self) -> Vec<String>;

    /// Effective descriptor, merged with its parent templates
    fn resolve(&self, name: &str) -> Result<Arc<MergedDescriptor>>;

    /// Names of descriptors whose component matches `ty`, in registration order
    fn names_of_type(
        &self,
        ty: ComponentType,
        include_non_singletons: bool,
        allow_eager_init: bool,
    ) -> Vec<String>;

    /// Whether the component under `name` matches `ty`
    fn is_type_match(&self, name: &str, ty: ComponentType) -> bool;

    /// Drop every cached merged descriptor
    fn invalidate_merged_cache(&self);

    /// Refuse further registrations
    fn freeze(&self);

    fn is_frozen(&self) -> bool;

    /// Number of registered descriptors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Predict the component type of a merged descriptor.
///
/// The declared type wins; otherwise the factory methods' shared return
/// type. Candidates with differing return types make the type ambiguous.
pub(crate) fn predict_type(merged: &MergedDescriptor) -> Result<Option<ComponentType>> {
    merged
        .predicted_type
        .get_or_try_init(|| {
            if let Some(ty) = merged.declared_type() {
                return Ok(Some(ty));
            }
            match merged.strategy() {
                Some(ConstructionStrategy::FactoryMethod { methods, .. }) => {
                    let mut types = methods.iter().map(|m| m.return_type());
                    let Some(first) = types.next() else {
                        return Ok(None);
                    };
                    if types.all(|t| t == first) {
                        Ok(Some(first))
                    } else {
                        Err(ContainerError::descriptor(
                            merged.name(),
                            "ambiguous factory method return type",
                        ))
                    }
                }
                _ => Ok(None),
            }
        })
        .copied()
}

/// Default descriptor store.
///
/// Uses `DashMap` with `ahash` for descriptor and merged-cache lookups and
/// keeps a separate name list to preserve registration order.
pub struct DescriptorStore {
    descriptors: DashMap<String, ComponentDescriptor, RandomState>,
    merged: DashMap<String, Arc<MergedDescriptor>, RandomState>,
    aliases: DashMap<String, String, RandomState>,
    order: RwLock<Vec<String>>,
    frozen: AtomicBool,
    allow_overriding: AtomicBool,
}

impl DescriptorStore {
    /// Create an empty store.
    ///
    /// Uses 8 shards; component graphs are small and the store is mostly
    /// read after startup.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create with pre-allocated capacity
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 64 { 8 } else { 32 };
        Self {
            descriptors: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
            merged: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
            aliases: DashMap::with_hasher_and_shard_amount(RandomState::new(), 8),
            order: RwLock::new(Vec::with_capacity(capacity)),
            frozen: AtomicBool::new(false),
            allow_overriding: AtomicBool::new(true),
        }
    }

    /// Whether `define` may replace an existing descriptor
    pub fn set_allow_overriding(&self, allow: bool) {
        self.allow_overriding.store(allow, Ordering::Relaxed);
    }

    fn merge_chain(&self, name: &str, visiting: &mut Vec<String>) -> Result<ComponentDescriptor> {
        if visiting.iter().any(|n| n == name) {
            visiting.push(name.to_string());
            return Err(ContainerError::descriptor(
                name,
                format!("parent template loop: {}", visiting.join(" -> ")),
            ));
        }
        visiting.push(name.to_string());

        let descriptor = self
            .descriptors
            .get(name)
            .map(|d| d.value().clone())
            .ok_or_else(|| ContainerError::no_such_component(name))?;

        match descriptor.parent_name() {
            None => Ok(descriptor),
            Some(parent) => {
                let parent = self.canonical_name(parent);
                let parent_merged = self.merge_chain(&parent, visiting).map_err(|e| match e {
                    ContainerError::NoSuchComponent { name: missing } => ContainerError::descriptor(
                        descriptor.name(),
                        format!("parent template '{missing}' not found"),
                    ),
                    other => other,
                })?;
                Ok(descriptor.merged_onto(&parent_merged))
            }
        }
    }

    fn types_of(&self, name: &str) -> Option<(Arc<MergedDescriptor>, Vec<ComponentType>)> {
        let merged = self.resolve(name).ok()?;
        let mut types: Vec<ComponentType> = predict_type(&merged).ok().flatten().into_iter().collect();
        types.extend(merged.extra_types().iter().copied());
        Some((merged, types))
    }
}

impl DescriptorRegistry for DescriptorStore {
    fn define(&self, descriptor: ComponentDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if self.is_frozen() {
            return Err(ContainerError::Frozen { name });
        }
        if name.is_empty() {
            return Err(ContainerError::descriptor(name, "descriptor name must not be empty"));
        }

        let exists = self.descriptors.contains_key(&name);
        if exists && !self.allow_overriding.load(Ordering::Relaxed) {
            return Err(ContainerError::descriptor(
                name,
                "a descriptor with this name is already registered and overriding is disabled",
            ));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            component = %name,
            scope = descriptor.scope_or_default().as_str(),
            overriding = exists,
            descriptor_count = self.descriptors.len() + usize::from(!exists),
            "Registering component descriptor"
        );

        self.aliases.remove(&name);
        self.descriptors.insert(name.clone(), descriptor);
        if !exists {
            self.order.write().push(name);
        }
        // children may inherit from the replaced descriptor
        self.merged.clear();
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let name = self.canonical_name(name);
        if self.is_frozen() {
            return Err(ContainerError::Frozen { name });
        }
        if self.descriptors.remove(&name).is_none() {
            return Err(ContainerError::no_such_component(name));
        }
        self.order.write().retain(|n| *n != name);
        self.merged.clear();
        Ok(())
    }

    fn get(&self, name: &str) -> Option<ComponentDescriptor> {
        let name = self.canonical_name(name);
        self.descriptors.get(&name).map(|d| d.value().clone())
    }

    fn contains_descriptor(&self, name: &str) -> bool {
        self.descriptors.contains_key(&self.canonical_name(name))
    }

    fn alias(&self, name: &str, alias: &str) -> Result<()> {
        if alias == name {
            self.aliases.remove(alias);
            return Ok(());
        }
        if self.descriptors.contains_key(alias) {
            return Err(ContainerError::descriptor(
                alias,
                format!("cannot alias '{name}': a descriptor with this name exists"),
            ));
        }
        if self.canonical_name(name) == alias {
            return Err(ContainerError::descriptor(
                alias,
                format!("alias '{alias}' for '{name}' would create a cycle"),
            ));
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "lifecycle_container",
            component = name,
            alias = alias,
            "Registering alias"
        );

        self.aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    fn aliases(&self, name: &str) -> Vec<String> {
        let pairs: Vec<(String, String)> = self
            .aliases
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut found: Vec<String> = pairs
            .into_iter()
            .filter(|(_, target)| self.canonical_name(target) == name)
            .map(|(alias, _)| alias)
            .collect();
        found.sort();
        found
    }

    fn canonical_name(&self, name: &str) -> String {
        let mut current = name.to_string();
        // bounded: alias() rejects cycles
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(&current) {
                Some(target) => current = target.value().clone(),
                None => break,
            }
        }
        current
    }

    fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    fn resolve(&self, name: &str) -> Result<Arc<MergedDescriptor>> {
        let name = self.canonical_name(name);
        if let Some(merged) = self.merged.get(&name) {
            return Ok(Arc::clone(merged.value()));
        }

        let descriptor = self.merge_chain(&name, &mut Vec::new())?;
        let merged = Arc::new(MergedDescriptor::new(descriptor));
        // first writer wins so concurrent resolvers share cached decisions
        let entry = self.merged.entry(name).or_insert(merged);
        Ok(Arc::clone(entry.value()))
    }

    fn names_of_type(
        &self,
        ty: ComponentType,
        include_non_singletons: bool,
        allow_eager_init: bool,
    ) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| {
                let Some((merged, types)) = self.types_of(name) else {
                    return false;
                };
                !merged.is_abstract()
                    && (include_non_singletons || merged.is_singleton())
                    && (allow_eager_init || !merged.uses_factory_component())
                    && types.contains(&ty)
            })
            .collect()
    }

    fn is_type_match(&self, name: &str, ty: ComponentType) -> bool {
        self.types_of(name)
            .map(|(_, types)| types.contains(&ty))
            .unwrap_or(false)
    }

    fn invalidate_merged_cache(&self) {
        #[cfg(feature = "logging")]
        trace!(
            target: "lifecycle_container",
            cached = self.merged.len(),
            "Invalidating merged descriptor cache"
        );

        self.merged.clear();
    }

    fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            descriptor_count = self.descriptors.len(),
            "Descriptor store frozen - no further registrations allowed"
        );
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.descriptors.len()
    }
}

impl Default for DescriptorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DescriptorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorStore")
            .field("count", &self.len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Scope;
    use crate::descriptor::{Constructor, FactoryMethod};

    struct Engine;
    struct Wheel;
    trait Part {}

    #[test]
    fn test_define_and_resolve() {
        let store = DescriptorStore::new();
        store
            .define(ComponentDescriptor::new("engine").supplier(|| Ok(Engine)))
            .unwrap();

        assert!(store.contains_descriptor("engine"));
        let merged = store.resolve("engine").unwrap();
        assert_eq!(merged.name(), "engine");

        // cached
        let again = store.resolve("engine").unwrap();
        assert!(Arc::ptr_eq(&merged, &again));

        store.invalidate_merged_cache();
        let fresh = store.resolve("engine").unwrap();
        assert!(!Arc::ptr_eq(&merged, &fresh));
    }

    #[test]
    fn test_aliases() {
        let store = DescriptorStore::new();
        store
            .define(ComponentDescriptor::new("engine").supplier(|| Ok(Engine)))
            .unwrap();
        store.alias("engine", "motor").unwrap();
        store.alias("motor", "drive").unwrap();

        assert_eq!(store.canonical_name("drive"), "engine");
        assert!(store.contains_descriptor("drive"));
        assert_eq!(store.aliases("engine"), vec!["drive".to_string(), "motor".to_string()]);
        assert!(store.alias("drive", "engine").is_err());
    }

    #[test]
    fn test_names_of_type_filters() {
        let store = DescriptorStore::new();
        store
            .define(ComponentDescriptor::new("e1").supplier(|| Ok(Engine)))
            .unwrap();
        store
            .define(
                ComponentDescriptor::new("e2")
                    .supplier(|| Ok(Engine))
                    .scope(Scope::Prototype),
            )
            .unwrap();
        store
            .define(
                ComponentDescriptor::new("w")
                    .supplier(|| Ok(Wheel))
                    .also_matches(ComponentType::of::<dyn Part>()),
            )
            .unwrap();
        store
            .define(ComponentDescriptor::new("template").of::<Engine>().abstract_template())
            .unwrap();

        let ty = ComponentType::of::<Engine>();
        assert_eq!(store.names_of_type(ty, true, true), vec!["e1", "e2"]);
        assert_eq!(store.names_of_type(ty, false, true), vec!["e1"]);
        assert_eq!(store.names_of_type(ComponentType::of::<dyn Part>(), true, true), vec!["w"]);
        assert!(store.is_type_match("w", ComponentType::of::<Wheel>()));
    }

    #[test]
    fn test_eager_init_excludes_factory_components() {
        let store = DescriptorStore::new();
        store
            .define(
                ComponentDescriptor::new("made")
                    .factory_component("factory")
                    .factory_method(FactoryMethod::on::<Engine, Wheel, _>("wheel", vec![], |_, _| {
                        Ok(Wheel)
                    })),
            )
            .unwrap();

        let ty = ComponentType::of::<Wheel>();
        assert_eq!(store.names_of_type(ty, true, true), vec!["made"]);
        assert!(store.names_of_type(ty, true, false).is_empty());
    }

    #[test]
    fn test_ambiguous_factory_return_type() {
        let store = DescriptorStore::new();
        store
            .define(
                ComponentDescriptor::new("x")
                    .factory_method(FactoryMethod::new("make", vec![], |_| Ok(Engine)))
                    .factory_method(FactoryMethod::new("make", vec![], |_| Ok(Wheel))),
            )
            .unwrap();

        let merged = store.resolve("x").unwrap();
        assert!(matches!(predict_type(&merged), Err(ContainerError::Descriptor { .. })));
    }

    #[test]
    fn test_parent_loop_detected() {
        let store = DescriptorStore::new();
        store
            .define(ComponentDescriptor::new("a").parent("b").of::<Engine>())
            .unwrap();
        store
            .define(ComponentDescriptor::new("b").parent("a"))
            .unwrap();

        let err = store.resolve("a").unwrap_err();
        assert!(matches!(err, ContainerError::Descriptor { .. }));
    }

    #[test]
    fn test_frozen_and_overriding() {
        let store = DescriptorStore::new();
        store.set_allow_overriding(false);
        store
            .define(ComponentDescriptor::new("e").constructor(Constructor::new(vec![], |_| Ok(Engine))))
            .unwrap();
        assert!(store.define(ComponentDescriptor::new("e").supplier(|| Ok(Engine))).is_err());

        store.freeze();
        let err = store
            .define(ComponentDescriptor::new("late").supplier(|| Ok(Engine)))
            .unwrap_err();
        assert!(matches!(err, ContainerError::Frozen { .. }));
    }
}
