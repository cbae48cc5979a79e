//! Component value types
//!
//! These types describe what the container hands out and how a component's
//! type is identified for by-type lookup.

use crate::{ContainerError, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A realized component, type-erased.
///
/// Singletons are shared through the cache; prototypes are handed to the
/// caller and owned by it.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Marker trait for types that can be managed by the container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Injectable for T {}

/// Erase a value into an [`Instance`].
#[inline]
pub fn instance<T: Injectable>(value: T) -> Instance {
    Arc::new(value)
}

/// Downcast an [`Instance`] to a concrete type.
///
/// `name` is only used to build the `TypeMismatch` error.
#[inline]
pub fn downcast<T: Injectable>(name: &str, instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| ContainerError::TypeMismatch {
        name: name.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

/// Identity of a type for matching components by type.
///
/// Works for unsized types too, so `ComponentType::of::<dyn Trait>()` can be
/// used as a marker type on descriptors.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    /// Identity of `T`
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Human-readable type name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether an erased instance holds a value of this type.
    #[inline]
    pub fn is_instance(&self, instance: &Instance) -> bool {
        (**instance).type_id() == self.id
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Component scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One shared instance, cached by the container
    #[default]
    Singleton,

    /// A new instance on every request
    Prototype,
}

impl Scope {
    /// Lowercase label used in log output
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {}

    #[derive(Debug)]
    struct English;

    #[test]
    fn test_component_type_identity() {
        assert_eq!(ComponentType::of::<English>(), ComponentType::of::<English>());
        assert_ne!(ComponentType::of::<English>(), ComponentType::of::<dyn Greeter>());
        assert!(ComponentType::of::<English>().name().ends_with("English"));
    }

    #[test]
    fn test_is_instance() {
        let erased = instance(English);
        assert!(ComponentType::of::<English>().is_instance(&erased));
        assert!(!ComponentType::of::<String>().is_instance(&erased));
    }

    #[test]
    fn test_downcast_mismatch() {
        let erased = instance(English);
        let err = downcast::<String>("english", erased).unwrap_err();
        assert!(matches!(err, ContainerError::TypeMismatch { ref name, .. } if name == "english"));
    }
}
