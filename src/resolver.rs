//! Dependency resolution
//!
//! Finds the provider(s) for an injection point. Resolution by name hint
//! comes first; otherwise all components matching the requested type are
//! collected and narrowed down:
//!
//! 1. a single `primary` candidate wins (several primaries is an error)
//! 2. otherwise the lowest `priority` value wins
//! 3. otherwise a candidate whose name or alias equals the injection
//!    point's own name wins
//!
//! Every successful resolution records a dependent edge from the provider
//! to the requesting component.

use crate::component::{ComponentType, Injectable, Instance, downcast};
use crate::descriptor::{Argument, Cardinality, OrderMarker, ParamSpec};
use crate::factory::{ComponentFactory, creation_chain};
use crate::{ContainerError, Result};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// What an injection point asks for
#[derive(Debug, Clone)]
pub struct DependencyRequest {
    ty: ComponentType,
    name_hint: Option<String>,
    field_name: Option<String>,
    required: bool,
    eager: bool,
    cardinality: Cardinality,
}

impl DependencyRequest {
    /// Required single provider of `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::of_type(ComponentType::of::<T>())
    }

    pub fn of_type(ty: ComponentType) -> Self {
        Self {
            ty,
            name_hint: None,
            field_name: None,
            required: true,
            eager: true,
            cardinality: Cardinality::Single,
        }
    }

    /// Every provider of `ty`
    pub fn all(ty: ComponentType) -> Self {
        Self {
            required: false,
            cardinality: Cardinality::All,
            ..Self::of_type(ty)
        }
    }

    /// Request matching a constructor or factory-method parameter
    pub fn for_param(param: &ParamSpec) -> Self {
        Self {
            field_name: Some(param.name().to_string()),
            required: param.is_required(),
            cardinality: param.cardinality(),
            ..Self::of_type(param.ty())
        }
    }

    /// Prefer the component with this name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name_hint = Some(name.into());
        self
    }

    /// Name of the injection point, used as the last tie-breaker
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Whether candidates needing a factory component may be considered
    #[must_use]
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    pub fn ty(&self) -> ComponentType {
        self.ty
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    fn describe(&self) -> String {
        match &self.field_name {
            Some(field) => format!("{field}: {}", self.ty),
            None => self.ty.name().to_string(),
        }
    }
}

impl ComponentFactory {
    /// Resolve `request` on behalf of `requesting`.
    ///
    /// Returns [`Argument::Absent`] for an unsatisfied optional request.
    pub fn resolve_dependency(&self, request: &DependencyRequest, requesting: Option<&str>) -> Result<Argument> {
        let mut providers = Vec::new();
        let argument = self.resolve_providers(request, requesting, &mut providers)?;
        if let Some(requesting) = requesting {
            self.record_dependents(&providers, requesting);
        }
        Ok(argument)
    }

    /// Resolve `request` without recording dependent edges. The names of
    /// the providers used are appended to `providers`.
    pub(crate) fn resolve_providers(
        &self,
        request: &DependencyRequest,
        requesting: Option<&str>,
        providers: &mut Vec<String>,
    ) -> Result<Argument> {
        if request.cardinality == Cardinality::All {
            let all = self.resolve_all(request.ty, requesting, request.eager, providers)?;
            return Ok(Argument::Many(all.into_iter().map(|(_, i)| i).collect()));
        }

        if let Some(hint) = &request.name_hint {
            let hint = self.store.canonical_name(hint);
            if self.matches_type(&hint, request.ty) {
                return self.provide(&hint, providers).map(Argument::One);
            }
        }

        let candidates = self.find_candidates(request.ty, requesting, request.eager);
        let chosen = match candidates.len() {
            0 => None,
            1 => candidates.into_iter().next(),
            _ => match self.determine_candidate(request.ty, &candidates, request.field_name.as_deref())? {
                Some(chosen) => Some(chosen),
                None if request.required => {
                    return Err(ContainerError::NoUniqueComponent {
                        type_name: request.ty.name(),
                        candidates,
                    });
                }
                None => {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "lifecycle_container",
                        dependency = %request.describe(),
                        candidates = ?candidates,
                        "Optional dependency is ambiguous - leaving it absent"
                    );
                    None
                }
            },
        };

        match chosen {
            Some(name) => self.provide(&name, providers).map(Argument::One),
            None if request.required => Err(ContainerError::UnsatisfiedDependency {
                component: requesting.unwrap_or("<caller>").to_string(),
                dependency: request.describe(),
                chain: creation_chain(self.id),
            }),
            None => Ok(Argument::Absent),
        }
    }

    /// Get the single component matching `ty`
    pub fn get_by_type(&self, ty: ComponentType) -> Result<Instance> {
        let candidates = self.find_candidates(ty, None, true);
        let chosen = match candidates.len() {
            0 => return Err(ContainerError::no_such_component(ty.name())),
            1 => candidates.into_iter().next(),
            _ => match self.determine_candidate(ty, &candidates, None)? {
                Some(chosen) => Some(chosen),
                None => {
                    return Err(ContainerError::NoUniqueComponent {
                        type_name: ty.name(),
                        candidates,
                    });
                }
            },
        };
        match chosen {
            Some(name) => self.get(&name),
            None => Err(ContainerError::no_such_component(ty.name())),
        }
    }

    /// [`get_by_type`](Self::get_by_type) for a concrete `T`
    pub fn get_by_type_typed<T: Injectable>(&self) -> Result<Arc<T>> {
        let ty = ComponentType::of::<T>();
        downcast::<T>(ty.name(), self.get_by_type(ty)?)
    }

    /// Every component matching `ty`, sorted by order marker
    pub fn get_all_of_type(&self, ty: ComponentType) -> Result<Vec<(String, Instance)>> {
        self.resolve_all(ty, None, true, &mut Vec::new())
    }

    pub(crate) fn record_dependents(&self, providers: &[String], dependent: &str) {
        for provider in providers {
            self.cache.register_dependent(provider, dependent);
        }
    }

    /// Names of the autowire candidates matching `ty`: descriptors in
    /// registration order, then registered singletons
    pub fn names_of_type(&self, ty: ComponentType) -> Vec<String> {
        self.find_candidates(ty, None, true)
    }

    fn resolve_all(
        &self,
        ty: ComponentType,
        requesting: Option<&str>,
        eager: bool,
        providers: &mut Vec<String>,
    ) -> Result<Vec<(String, Instance)>> {
        let mut named: Vec<(OrderMarker, String)> = self
            .find_candidates(ty, requesting, eager)
            .into_iter()
            .map(|name| (self.order_of(&name), name))
            .collect();
        named.sort_by_key(|(marker, _)| marker.sort_key());

        named
            .into_iter()
            .map(|(_, name)| self.provide(&name, providers).map(|i| (name, i)))
            .collect()
    }

    fn provide(&self, name: &str, providers: &mut Vec<String>) -> Result<Instance> {
        let provided = self.get(name)?;
        providers.push(name.to_string());
        Ok(provided)
    }

    fn matches_type(&self, name: &str, ty: ComponentType) -> bool {
        if self.store.contains_descriptor(name) {
            return self.store.is_type_match(name, ty);
        }
        self.cache.finished(name).is_some_and(|i| ty.is_instance(&i))
    }

    fn order_of(&self, name: &str) -> OrderMarker {
        self.store
            .resolve(name)
            .map(|m| m.order_marker())
            .unwrap_or_default()
    }

    /// Candidate names for `ty`, excluding the requester itself unless it
    /// is the only match.
    fn find_candidates(&self, ty: ComponentType, requesting: Option<&str>, eager: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .names_of_type(ty, true, eager)
            .into_iter()
            .filter(|name| {
                self.store
                    .resolve(name)
                    .is_ok_and(|m| m.is_autowire_candidate())
            })
            .collect();

        for manual in self.cache.manual_names() {
            if names.contains(&manual) {
                continue;
            }
            if self.cache.finished(&manual).is_some_and(|i| ty.is_instance(&i)) {
                names.push(manual);
            }
        }

        if let Some(requesting) = requesting {
            if names.iter().any(|n| n != requesting) {
                names.retain(|n| n != requesting);
            }
        }
        names
    }

    fn determine_candidate(
        &self,
        ty: ComponentType,
        candidates: &[String],
        field_name: Option<&str>,
    ) -> Result<Option<String>> {
        let primaries: Vec<&String> = candidates
            .iter()
            .filter(|name| self.store.resolve(name).is_ok_and(|m| m.is_primary()))
            .collect();
        match primaries.as_slice() {
            [single] => return Ok(Some((*single).clone())),
            [] => {}
            _ => {
                return Err(ContainerError::NoUniqueComponent {
                    type_name: ty.name(),
                    candidates: primaries.into_iter().cloned().collect(),
                });
            }
        }

        let mut prioritized: Vec<(i32, &String)> = candidates
            .iter()
            .filter_map(|name| {
                let priority = self.store.resolve(name).ok()?.priority_value()?;
                Some((priority, name))
            })
            .collect();
        prioritized.sort_by_key(|(priority, _)| *priority);
        match prioritized.as_slice() {
            [] => {}
            [(_, best)] => return Ok(Some((*best).clone())),
            [(first, best), (second, _), ..] => {
                if first == second {
                    let tied = prioritized
                        .iter()
                        .filter(|(p, _)| p == first)
                        .map(|(_, n)| (*n).clone())
                        .collect();
                    return Err(ContainerError::NoUniqueComponent {
                        type_name: ty.name(),
                        candidates: tied,
                    });
                }
                return Ok(Some((*best).clone()));
            }
        }

        if let Some(field) = field_name {
            let matched = candidates
                .iter()
                .find(|name| *name == field || self.store.aliases(name).iter().any(|a| a == field));
            if let Some(matched) = matched {
                return Ok(Some(matched.clone()));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::descriptor::{ComponentDescriptor, Constructor};
    use crate::store::DescriptorStore;

    trait Codec: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct Json;
    struct Yaml;

    impl Codec for Json {
        fn name(&self) -> &'static str {
            "json"
        }
    }

    impl Codec for Yaml {
        fn name(&self) -> &'static str {
            "yaml"
        }
    }

    type CodecRef = Arc<dyn Codec>;

    fn codec(name: &str, c: fn() -> CodecRef) -> ComponentDescriptor {
        ComponentDescriptor::new(name).supplier(move || Ok(c()))
    }

    fn factory() -> ComponentFactory {
        ComponentFactory::new(Arc::new(DescriptorStore::new()), ContainerConfig::default())
    }

    fn codec_name(arg: Argument) -> &'static str {
        match arg {
            Argument::One(i) => i.downcast_ref::<CodecRef>().unwrap().name(),
            _ => panic!("expected a single provider"),
        }
    }

    #[test]
    fn test_single_candidate() {
        let f = factory();
        f.define(codec("json", || Arc::new(Json))).unwrap();

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>(), Some("client"))
            .unwrap();
        assert_eq!(codec_name(arg), "json");
        assert_eq!(f.dependents_of("json"), vec!["client"]);
    }

    #[test]
    fn test_primary_wins() {
        let f = factory();
        f.define(codec("json", || Arc::new(Json))).unwrap();
        f.define(codec("yaml", || Arc::new(Yaml)).primary(true)).unwrap();

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>(), None)
            .unwrap();
        assert_eq!(codec_name(arg), "yaml");
    }

    #[test]
    fn test_two_primaries_fail() {
        let f = factory();
        f.define(codec("json", || Arc::new(Json)).primary(true)).unwrap();
        f.define(codec("yaml", || Arc::new(Yaml)).primary(true)).unwrap();

        let err = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>().optional(), None)
            .unwrap_err();
        assert!(matches!(err, ContainerError::NoUniqueComponent { ref candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn test_priority_then_name_match() {
        let f = factory();
        f.define(codec("json", || Arc::new(Json)).priority(10)).unwrap();
        f.define(codec("yaml", || Arc::new(Yaml)).priority(1)).unwrap();
        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>(), None)
            .unwrap();
        assert_eq!(codec_name(arg), "yaml");

        let f = factory();
        f.define(codec("json", || Arc::new(Json))).unwrap();
        f.define(codec("yaml", || Arc::new(Yaml))).unwrap();
        f.alias("json", "codec").unwrap();
        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>().field("codec"), None)
            .unwrap();
        assert_eq!(codec_name(arg), "json");
    }

    #[test]
    fn test_ambiguous_required_and_optional() {
        let f = factory();
        f.define(codec("json", || Arc::new(Json))).unwrap();
        f.define(codec("yaml", || Arc::new(Yaml))).unwrap();

        let err = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>(), None)
            .unwrap_err();
        assert!(matches!(err, ContainerError::NoUniqueComponent { .. }));

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>().optional(), None)
            .unwrap();
        assert!(matches!(arg, Argument::Absent));
    }

    #[test]
    fn test_missing_required_and_optional() {
        let f = factory();
        let err = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>(), Some("client"))
            .unwrap_err();
        assert!(matches!(err, ContainerError::UnsatisfiedDependency { ref component, .. } if component == "client"));

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>().optional(), None)
            .unwrap();
        assert!(matches!(arg, Argument::Absent));
    }

    #[test]
    fn test_all_sorted_by_order() {
        use crate::descriptor::OrderMarker;

        let f = factory();
        f.define(codec("json", || Arc::new(Json))).unwrap();
        f.define(codec("yaml", || Arc::new(Yaml)).order(OrderMarker::Ordered(1)))
            .unwrap();

        let all = f.get_all_of_type(ComponentType::of::<CodecRef>()).unwrap();
        let names: Vec<&str> = all.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["yaml", "json"]);

        match f
            .resolve_dependency(&DependencyRequest::all(ComponentType::of::<CodecRef>()), None)
            .unwrap()
        {
            Argument::Many(values) => assert_eq!(values.len(), 2),
            _ => panic!("expected all providers"),
        }
    }

    #[test]
    fn test_self_reference_excluded() {
        struct Node;

        let f = factory();
        f.define(ComponentDescriptor::new("a").constructor(Constructor::new(vec![], |_| Ok(Node))).of::<Node>())
            .unwrap();
        f.define(ComponentDescriptor::new("b").constructor(Constructor::new(vec![], |_| Ok(Node))).of::<Node>())
            .unwrap();

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<Node>(), Some("a"))
            .unwrap();
        match arg {
            Argument::One(_) => assert_eq!(f.dependencies_of("a"), vec!["b"]),
            _ => panic!("expected b"),
        }
    }

    #[test]
    fn test_manual_singletons_and_name_hint() {
        let f = factory();
        f.register_singleton("port", 8080u16).unwrap();
        f.register_singleton("other_port", 9090u16).unwrap();

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<u16>().named("other_port"), None)
            .unwrap();
        match arg {
            Argument::One(i) => assert_eq!(*i.downcast_ref::<u16>().unwrap(), 9090),
            _ => panic!("expected hinted provider"),
        }

        assert_eq!(f.names_of_type(ComponentType::of::<u16>()), vec!["port", "other_port"]);
        assert!(f.get_by_type(ComponentType::of::<u16>()).is_err());
    }

    #[test]
    fn test_get_by_type_typed() {
        struct Clock(u64);

        let f = factory();
        f.define(ComponentDescriptor::new("clock").supplier(|| Ok(Clock(42))))
            .unwrap();
        assert_eq!(f.get_by_type_typed::<Clock>().unwrap().0, 42);
    }

    #[test]
    fn test_non_candidates_skipped() {
        let f = factory();
        f.define(codec("json", || Arc::new(Json)).autowire_candidate(false))
            .unwrap();
        f.define(codec("yaml", || Arc::new(Yaml))).unwrap();

        let arg = f
            .resolve_dependency(&DependencyRequest::of::<CodecRef>(), None)
            .unwrap();
        assert_eq!(codec_name(arg), "yaml");
    }
}
