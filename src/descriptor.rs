//! Component descriptors
//!
//! A [`ComponentDescriptor`] is the declarative recipe for one component:
//! its type, how to construct it, which properties to set and which
//! lifecycle methods to call. Construction is described by data
//! ([`ConstructionStrategy`]) instead of reflection, so the container only
//! has to pick a strategy once per descriptor.

use crate::component::{ComponentType, Injectable, Instance, Scope, downcast, instance};
use crate::{ContainerError, Result};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// Values
// =============================================================================

/// Parses text into an instance of a fixed type
pub type ValueParser = fn(&str) -> Result<Instance>;

fn parse_value<V>(text: &str) -> Result<Instance>
where
    V: FromStr + Injectable,
    V::Err: fmt::Display,
{
    text.parse::<V>()
        .map(instance)
        .map_err(|e| ContainerError::custom(e.to_string()))
}

/// A property or constructor-argument value as declared on a descriptor
#[derive(Clone)]
pub enum PropertyValue {
    /// A ready value
    Value(Instance),
    /// Another component, by name
    Reference(String),
    /// Text converted to the target type on injection
    Text(String),
}

impl PropertyValue {
    /// A ready value
    pub fn value<T: Injectable>(value: T) -> Self {
        Self::Value(instance(value))
    }

    /// A reference to another component
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// Text converted on injection
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Reference(name) => write!(f, "Reference({name})"),
            Self::Text(text) => write!(f, "Text({text:?})"),
        }
    }
}

/// Ordered property bindings, name -> value.
#[derive(Clone, Debug, Default)]
pub struct PropertyValues {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertyValues {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a binding, keeping first-insertion order
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a binding
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether a binding exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a binding
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn merge_from(&mut self, other: &PropertyValues) {
        for (name, value) in other.iter() {
            self.set(name, value.clone());
        }
    }
}

// =============================================================================
// Injection points
// =============================================================================

/// A property setter declared by a component type.
///
/// Setters take `&T`: a component may already be shared as an early
/// reference while its properties are populated, so late-bound fields use
/// interior mutability (`OnceCell`, `Mutex`, ...).
#[derive(Clone)]
pub struct PropertySetter {
    name: String,
    target: ComponentType,
    parser: Option<ValueParser>,
    apply: Arc<dyn Fn(&Instance, Instance) -> Result<()> + Send + Sync>,
}

impl PropertySetter {
    /// Setter receiving an `Arc<V>`
    pub fn new<T, V, F>(name: impl Into<String>, f: F) -> Self
    where
        T: Injectable,
        V: Injectable,
        F: Fn(&T, Arc<V>) -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let setter_name = name.clone();
        Self {
            name,
            target: ComponentType::of::<V>(),
            parser: None,
            apply: Arc::new(move |target, value| {
                let this = target.downcast_ref::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                    name: setter_name.clone(),
                    expected: std::any::type_name::<T>(),
                })?;
                f(this, downcast::<V>(&setter_name, value)?)
            }),
        }
    }

    /// Setter for a value that may also be given as text
    pub fn parsed<T, V, F>(name: impl Into<String>, f: F) -> Self
    where
        T: Injectable,
        V: FromStr + Injectable,
        V::Err: fmt::Display,
        F: Fn(&T, Arc<V>) -> Result<()> + Send + Sync + 'static,
    {
        let mut setter = Self::new::<T, V, F>(name, f);
        setter.parser = Some(parse_value::<V>);
        setter
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type the setter accepts
    pub fn target(&self) -> ComponentType {
        self.target
    }

    pub(crate) fn parser(&self) -> Option<ValueParser> {
        self.parser
    }

    pub(crate) fn apply(&self, target: &Instance, value: Instance) -> Result<()> {
        (self.apply)(target, value)
    }
}

impl fmt::Debug for PropertySetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySetter")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

/// How many providers a parameter takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one provider (absent allowed when optional)
    Single,
    /// Every provider of the type, ordered
    All,
}

/// A constructor or factory-method parameter
#[derive(Clone)]
pub struct ParamSpec {
    name: String,
    ty: ComponentType,
    required: bool,
    cardinality: Cardinality,
    parser: Option<ValueParser>,
}

impl ParamSpec {
    /// Required parameter of type `V`
    pub fn of<V: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ComponentType::of::<V>(),
            required: true,
            cardinality: Cardinality::Single,
            parser: None,
        }
    }

    /// Optional parameter of type `V`
    pub fn optional<V: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::of::<V>(name)
        }
    }

    /// Every component of type `V`
    pub fn all<V: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            required: false,
            cardinality: Cardinality::All,
            ..Self::of::<V>(name)
        }
    }

    /// Required parameter that may also be given as text
    pub fn parsed<V>(name: impl Into<String>) -> Self
    where
        V: FromStr + Injectable,
        V::Err: fmt::Display,
    {
        Self {
            parser: Some(parse_value::<V>),
            ..Self::of::<V>(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ComponentType {
        self.ty
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub(crate) fn parser(&self) -> Option<ValueParser> {
        self.parser
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("required", &self.required)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

/// A resolved constructor or factory-method argument
#[derive(Clone, Debug)]
pub enum Argument {
    One(Instance),
    Many(Vec<Instance>),
    Absent,
}

/// Arguments handed to a constructor or factory method
pub struct Arguments {
    component: String,
    values: Vec<Argument>,
}

impl Arguments {
    pub(crate) fn new(component: impl Into<String>, values: Vec<Argument>) -> Self {
        Self {
            component: component.into(),
            values,
        }
    }

    /// Name of the component being constructed
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Required argument at `index`
    pub fn get<T: Injectable>(&self, index: usize) -> Result<Arc<T>> {
        self.optional::<T>(index)?.ok_or_else(|| ContainerError::UnsatisfiedDependency {
            component: self.component.clone(),
            dependency: format!("argument #{index}"),
            chain: vec![self.component.clone()],
        })
    }

    /// Optional argument at `index`
    pub fn optional<T: Injectable>(&self, index: usize) -> Result<Option<Arc<T>>> {
        match self.values.get(index) {
            Some(Argument::One(value)) => downcast::<T>(&self.component, value.clone()).map(Some),
            Some(Argument::Many(_)) => Err(ContainerError::TypeMismatch {
                name: self.component.clone(),
                expected: std::any::type_name::<T>(),
            }),
            Some(Argument::Absent) | None => Ok(None),
        }
    }

    /// Multi-valued argument at `index`
    pub fn all<T: Injectable>(&self, index: usize) -> Result<Vec<Arc<T>>> {
        match self.values.get(index) {
            Some(Argument::Many(values)) => values
                .iter()
                .map(|v| downcast::<T>(&self.component, v.clone()))
                .collect(),
            Some(Argument::One(value)) => Ok(vec![downcast::<T>(&self.component, value.clone())?]),
            Some(Argument::Absent) | None => Ok(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// =============================================================================
// Construction strategies
// =============================================================================

type ConstructFn = Arc<dyn Fn(Arguments) -> Result<Instance> + Send + Sync>;
type FactoryInvokeFn = Arc<dyn Fn(Option<&Instance>, Arguments) -> Result<Instance> + Send + Sync>;
type SupplierFn = Arc<dyn Fn() -> Result<Instance> + Send + Sync>;

/// One way of constructing a component from its parameters
#[derive(Clone)]
pub struct Constructor {
    params: Vec<ParamSpec>,
    public: bool,
    construct: ConstructFn,
}

impl Constructor {
    pub fn new<T, F>(params: Vec<ParamSpec>, f: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            params,
            public: true,
            construct: Arc::new(move |args| f(args).map(instance)),
        }
    }

    /// No-argument constructor
    pub fn default_of<T: Injectable + Default>() -> Self {
        Self::new(Vec::new(), |_| Ok(T::default()))
    }

    /// Mark the constructor non-public; sorted after public ones
    #[must_use]
    pub fn non_public(mut self) -> Self {
        self.public = false;
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub(crate) fn construct(&self, args: Arguments) -> Result<Instance> {
        (self.construct)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .field("public", &self.public)
            .finish()
    }
}

/// A factory method candidate, static or on a factory component
#[derive(Clone)]
pub struct FactoryMethod {
    name: String,
    return_type: ComponentType,
    params: Vec<ParamSpec>,
    on_instance: bool,
    invoke: FactoryInvokeFn,
}

impl FactoryMethod {
    /// Static factory method
    pub fn new<T, F>(name: impl Into<String>, params: Vec<ParamSpec>, f: F) -> Self
    where
        T: Injectable,
        F: Fn(Arguments) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            return_type: ComponentType::of::<T>(),
            params,
            on_instance: false,
            invoke: Arc::new(move |_, args| f(args).map(instance)),
        }
    }

    /// Method invoked on a factory component of type `Fac`
    pub fn on<Fac, T, F>(name: impl Into<String>, params: Vec<ParamSpec>, f: F) -> Self
    where
        Fac: Injectable,
        T: Injectable,
        F: Fn(&Fac, Arguments) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            return_type: ComponentType::of::<T>(),
            params,
            on_instance: true,
            invoke: Arc::new(move |factory, args| {
                let factory = factory
                    .and_then(|f| f.downcast_ref::<Fac>())
                    .ok_or_else(|| ContainerError::TypeMismatch {
                        name: args.component().to_string(),
                        expected: std::any::type_name::<Fac>(),
                    })?;
                f(factory, args).map(instance)
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> ComponentType {
        self.return_type
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn is_instance_method(&self) -> bool {
        self.on_instance
    }

    pub(crate) fn invoke(&self, factory: Option<&Instance>, args: Arguments) -> Result<Instance> {
        (self.invoke)(factory, args)
    }
}

impl fmt::Debug for FactoryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryMethod")
            .field("name", &self.name)
            .field("return_type", &self.return_type)
            .field("params", &self.params)
            .finish()
    }
}

/// How a component's raw instance is produced
#[derive(Clone)]
pub enum ConstructionStrategy {
    /// Explicit supplier callback
    Supplier(SupplierFn),
    /// Factory method, optionally on another component
    FactoryMethod {
        factory_component: Option<String>,
        methods: Vec<FactoryMethod>,
    },
    /// One of the listed constructors
    Constructors(Vec<Constructor>),
}

impl fmt::Debug for ConstructionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supplier(_) => f.write_str("Supplier"),
            Self::FactoryMethod {
                factory_component,
                methods,
            } => f
                .debug_struct("FactoryMethod")
                .field("factory_component", factory_component)
                .field("methods", methods)
                .finish(),
            Self::Constructors(ctors) => f.debug_tuple("Constructors").field(ctors).finish(),
        }
    }
}

/// A named init or destroy callback
#[derive(Clone)]
pub struct LifecycleMethod {
    name: String,
    call: Arc<dyn Fn(&Instance) -> Result<()> + Send + Sync>,
}

impl LifecycleMethod {
    pub fn new<T, F>(name: impl Into<String>, f: F) -> Self
    where
        T: Injectable,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let method = name.clone();
        Self {
            name,
            call: Arc::new(move |target| {
                let this = target.downcast_ref::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                    name: method.clone(),
                    expected: std::any::type_name::<T>(),
                })?;
                f(this)
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, target: &Instance) -> Result<()> {
        (self.call)(target)
    }
}

impl fmt::Debug for LifecycleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LifecycleMethod({})", self.name)
    }
}

// =============================================================================
// Markers
// =============================================================================

/// Autowiring applied during property population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autowire {
    #[default]
    No,
    ByName,
    ByType,
    /// Autowire the greediest satisfiable constructor
    Constructor,
}

/// Whether unsatisfied setters fail creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyCheck {
    #[default]
    None,
    Objects,
}

/// Application component or container infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Application,
    Infrastructure,
}

/// Priority tier, in invocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    PriorityOrdered,
    Ordered,
    Plain,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::PriorityOrdered => "priority-ordered",
            Tier::Ordered => "ordered",
            Tier::Plain => "plain",
        }
    }
}

/// Declared ordering of a component: tier plus secondary order value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMarker {
    PriorityOrdered(i32),
    Ordered(i32),
    #[default]
    Unordered,
}

impl OrderMarker {
    pub fn tier(&self) -> Tier {
        match self {
            OrderMarker::PriorityOrdered(_) => Tier::PriorityOrdered,
            OrderMarker::Ordered(_) => Tier::Ordered,
            OrderMarker::Unordered => Tier::Plain,
        }
    }

    /// Secondary order value; unordered sorts last
    pub fn value(&self) -> i32 {
        match self {
            OrderMarker::PriorityOrdered(v) | OrderMarker::Ordered(v) => *v,
            OrderMarker::Unordered => i32::MAX,
        }
    }

    /// Key for the ordering comparator: tier first, then value
    pub fn sort_key(&self) -> (Tier, i32) {
        (self.tier(), self.value())
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// Declarative recipe for one component.
///
/// Built fluently:
///
/// ```rust
/// use lifecycle_container::{ComponentDescriptor, Constructor, ParamSpec, Scope};
/// use std::sync::Arc;
///
/// struct Repo;
/// struct Service { repo: Arc<Repo> }
///
/// let repo = ComponentDescriptor::new("repo").supplier(|| Ok(Repo));
/// let service = ComponentDescriptor::new("service")
///     .of::<Service>()
///     .scope(Scope::Prototype)
///     .constructor(Constructor::new(vec![ParamSpec::of::<Repo>("repo")], |args| {
///         Ok(Service { repo: args.get::<Repo>(0)? })
///     }));
/// ```
#[derive(Clone, Debug)]
pub struct ComponentDescriptor {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) declared_type: Option<ComponentType>,
    pub(crate) extra_types: Vec<ComponentType>,
    pub(crate) strategy: Option<ConstructionStrategy>,
    pub(crate) scope: Option<Scope>,
    pub(crate) constructor_args: BTreeMap<usize, PropertyValue>,
    pub(crate) preferred_constructors: Option<Vec<usize>>,
    pub(crate) properties: PropertyValues,
    pub(crate) setters: Vec<PropertySetter>,
    pub(crate) autowire: Option<Autowire>,
    pub(crate) dependency_check: Option<DependencyCheck>,
    pub(crate) init_method: Option<LifecycleMethod>,
    pub(crate) destroy_method: Option<LifecycleMethod>,
    pub(crate) order: Option<OrderMarker>,
    pub(crate) priority: Option<i32>,
    pub(crate) lazy_init: Option<bool>,
    pub(crate) primary: bool,
    pub(crate) is_abstract: bool,
    pub(crate) synthetic: bool,
    pub(crate) role: Role,
    pub(crate) public_type: bool,
    pub(crate) autowire_candidate: bool,
}

impl ComponentDescriptor {
    /// Empty descriptor; pick a type and strategy with the builder methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            declared_type: None,
            extra_types: Vec::new(),
            strategy: None,
            scope: None,
            constructor_args: BTreeMap::new(),
            preferred_constructors: None,
            properties: PropertyValues::new(),
            setters: Vec::new(),
            autowire: None,
            dependency_check: None,
            init_method: None,
            destroy_method: None,
            order: None,
            priority: None,
            lazy_init: None,
            primary: false,
            is_abstract: false,
            synthetic: false,
            role: Role::Application,
            public_type: true,
            autowire_candidate: true,
        }
    }

    /// Declare the component's concrete type
    #[must_use]
    pub fn of<T: Injectable>(mut self) -> Self {
        self.declared_type = Some(ComponentType::of::<T>());
        self
    }

    /// Additional type the component can be matched by (e.g. a trait marker)
    #[must_use]
    pub fn also_matches(mut self, ty: ComponentType) -> Self {
        if !self.extra_types.contains(&ty) {
            self.extra_types.push(ty);
        }
        self
    }

    /// Inherit unset fields from a template descriptor
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Construct with an explicit supplier; also declares the type
    #[must_use]
    pub fn supplier<T, F>(mut self, f: F) -> Self
    where
        T: Injectable,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.declared_type = Some(ComponentType::of::<T>());
        self.strategy = Some(ConstructionStrategy::Supplier(Arc::new(move || f().map(instance))));
        self
    }

    /// Add a constructor candidate
    #[must_use]
    pub fn constructor(mut self, ctor: Constructor) -> Self {
        match &mut self.strategy {
            Some(ConstructionStrategy::Constructors(ctors)) => ctors.push(ctor),
            _ => self.strategy = Some(ConstructionStrategy::Constructors(vec![ctor])),
        }
        self
    }

    /// Add a static factory method candidate
    #[must_use]
    pub fn factory_method(mut self, method: FactoryMethod) -> Self {
        match &mut self.strategy {
            Some(ConstructionStrategy::FactoryMethod { methods, .. }) => methods.push(method),
            _ => {
                self.strategy = Some(ConstructionStrategy::FactoryMethod {
                    factory_component: None,
                    methods: vec![method],
                })
            }
        }
        self
    }

    /// Invoke factory methods on another component
    #[must_use]
    pub fn factory_component(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self.strategy {
            Some(ConstructionStrategy::FactoryMethod {
                factory_component, ..
            }) => *factory_component = Some(name),
            _ => {
                self.strategy = Some(ConstructionStrategy::FactoryMethod {
                    factory_component: Some(name),
                    methods: Vec::new(),
                })
            }
        }
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Explicit constructor argument at `index`
    #[must_use]
    pub fn constructor_arg(mut self, index: usize, value: PropertyValue) -> Self {
        self.constructor_args.insert(index, value);
        self
    }

    /// Constructor candidates (by index) to prefer when nothing else decides
    #[must_use]
    pub fn preferred_constructors(mut self, indices: Vec<usize>) -> Self {
        self.preferred_constructors = Some(indices);
        self
    }

    /// Bind a property value
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.set(name, value);
        self
    }

    /// Declare a property setter
    #[must_use]
    pub fn setter(mut self, setter: PropertySetter) -> Self {
        self.setters.retain(|s| s.name != setter.name);
        self.setters.push(setter);
        self
    }

    #[must_use]
    pub fn autowire(mut self, mode: Autowire) -> Self {
        self.autowire = Some(mode);
        self
    }

    #[must_use]
    pub fn dependency_check(mut self, check: DependencyCheck) -> Self {
        self.dependency_check = Some(check);
        self
    }

    #[must_use]
    pub fn init_method(mut self, method: LifecycleMethod) -> Self {
        self.init_method = Some(method);
        self
    }

    #[must_use]
    pub fn destroy_method(mut self, method: LifecycleMethod) -> Self {
        self.destroy_method = Some(method);
        self
    }

    #[must_use]
    pub fn order(mut self, order: OrderMarker) -> Self {
        self.order = Some(order);
        self
    }

    /// Priority for by-type tie-breaking; lower wins
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn lazy_init(mut self, lazy: bool) -> Self {
        self.lazy_init = Some(lazy);
        self
    }

    #[must_use]
    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    /// Template only; never instantiated
    #[must_use]
    pub fn abstract_template(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Skip instance hooks for this component
    #[must_use]
    pub fn synthetic(mut self, synthetic: bool) -> Self {
        self.synthetic = synthetic;
        self
    }

    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Declare the component type non-public
    #[must_use]
    pub fn non_public(mut self) -> Self {
        self.public_type = false;
        self
    }

    #[must_use]
    pub fn autowire_candidate(mut self, candidate: bool) -> Self {
        self.autowire_candidate = candidate;
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn declared_type(&self) -> Option<ComponentType> {
        self.declared_type
    }

    pub fn extra_types(&self) -> &[ComponentType] {
        &self.extra_types
    }

    pub fn strategy(&self) -> Option<&ConstructionStrategy> {
        self.strategy.as_ref()
    }

    pub fn scope_or_default(&self) -> Scope {
        self.scope.unwrap_or_default()
    }

    pub fn is_singleton(&self) -> bool {
        self.scope_or_default() == Scope::Singleton
    }

    pub fn is_prototype(&self) -> bool {
        self.scope_or_default() == Scope::Prototype
    }

    pub fn constructor_args(&self) -> &BTreeMap<usize, PropertyValue> {
        &self.constructor_args
    }

    pub fn preferred_constructor_indices(&self) -> Option<&[usize]> {
        self.preferred_constructors.as_deref()
    }

    pub fn properties(&self) -> &PropertyValues {
        &self.properties
    }

    pub fn setters(&self) -> &[PropertySetter] {
        &self.setters
    }

    pub fn autowire_mode(&self) -> Autowire {
        self.autowire.unwrap_or_default()
    }

    pub fn dependency_check_mode(&self) -> DependencyCheck {
        self.dependency_check.unwrap_or_default()
    }

    pub fn init(&self) -> Option<&LifecycleMethod> {
        self.init_method.as_ref()
    }

    pub fn destroy(&self) -> Option<&LifecycleMethod> {
        self.destroy_method.as_ref()
    }

    pub fn order_marker(&self) -> OrderMarker {
        self.order.unwrap_or_default()
    }

    pub fn priority_value(&self) -> Option<i32> {
        self.priority
    }

    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init.unwrap_or(false)
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn role_marker(&self) -> Role {
        self.role
    }

    pub fn is_public_type(&self) -> bool {
        self.public_type
    }

    pub fn is_autowire_candidate(&self) -> bool {
        self.autowire_candidate
    }

    /// Whether construction goes through another component's factory method
    pub fn uses_factory_component(&self) -> bool {
        matches!(
            self.strategy,
            Some(ConstructionStrategy::FactoryMethod {
                factory_component: Some(_),
                ..
            })
        )
    }

    /// Overlay this (child) descriptor onto an already-merged parent.
    ///
    /// Fields the child leaves unset are inherited; property bindings,
    /// constructor arguments and setters merge with child entries winning.
    /// `abstract` is never inherited.
    pub(crate) fn merged_onto(&self, parent: &ComponentDescriptor) -> ComponentDescriptor {
        let mut merged = parent.clone();
        merged.name = self.name.clone();
        merged.parent = self.parent.clone();
        if self.declared_type.is_some() {
            merged.declared_type = self.declared_type;
        }
        for ty in &self.extra_types {
            if !merged.extra_types.contains(ty) {
                merged.extra_types.push(*ty);
            }
        }
        if self.strategy.is_some() {
            merged.strategy = self.strategy.clone();
        }
        if self.scope.is_some() {
            merged.scope = self.scope;
        }
        for (index, value) in &self.constructor_args {
            merged.constructor_args.insert(*index, value.clone());
        }
        if self.preferred_constructors.is_some() {
            merged.preferred_constructors = self.preferred_constructors.clone();
        }
        merged.properties.merge_from(&self.properties);
        for setter in &self.setters {
            merged.setters.retain(|s| s.name != setter.name);
            merged.setters.push(setter.clone());
        }
        if self.autowire.is_some() {
            merged.autowire = self.autowire;
        }
        if self.dependency_check.is_some() {
            merged.dependency_check = self.dependency_check;
        }
        if self.init_method.is_some() {
            merged.init_method = self.init_method.clone();
        }
        if self.destroy_method.is_some() {
            merged.destroy_method = self.destroy_method.clone();
        }
        if self.order.is_some() {
            merged.order = self.order;
        }
        if self.priority.is_some() {
            merged.priority = self.priority;
        }
        if self.lazy_init.is_some() {
            merged.lazy_init = self.lazy_init;
        }
        merged.primary = self.primary;
        merged.is_abstract = self.is_abstract;
        merged.synthetic = self.synthetic;
        merged.role = self.role;
        merged.public_type = self.public_type && parent.public_type;
        merged.autowire_candidate = self.autowire_candidate;
        merged
    }
}

// =============================================================================
// Merged descriptor
// =============================================================================

/// Effective descriptor used for creation, plus decisions cached on it.
///
/// Produced by the store from a descriptor and its parent templates.
/// Dropped from the store's cache on invalidation, which also forgets the
/// cached decisions.
pub struct MergedDescriptor {
    descriptor: ComponentDescriptor,
    pub(crate) resolved_constructor: OnceCell<usize>,
    pub(crate) resolved_factory_method: OnceCell<usize>,
    pub(crate) predicted_type: OnceCell<Option<ComponentType>>,
    post_processed: Mutex<bool>,
    attributes: RwLock<HashMap<String, String>>,
}

impl MergedDescriptor {
    pub(crate) fn new(descriptor: ComponentDescriptor) -> Self {
        Self {
            descriptor,
            resolved_constructor: OnceCell::new(),
            resolved_factory_method: OnceCell::new(),
            predicted_type: OnceCell::new(),
            post_processed: Mutex::new(false),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    /// Metadata attached by merged-descriptor hooks
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.read().get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.write().insert(key.into(), value.into());
    }

    /// Index of the constructor chosen by an earlier creation, if any
    pub fn resolved_constructor(&self) -> Option<usize> {
        self.resolved_constructor.get().copied()
    }

    pub fn is_post_processed(&self) -> bool {
        *self.post_processed.lock()
    }

    /// Run `f` unless it already succeeded for this descriptor.
    pub(crate) fn post_process_once<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut done = self.post_processed.lock();
        if !*done {
            f()?;
            *done = true;
        }
        Ok(())
    }
}

impl std::ops::Deref for MergedDescriptor {
    type Target = ComponentDescriptor;

    fn deref(&self) -> &Self::Target {
        &self.descriptor
    }
}

impl fmt::Debug for MergedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedDescriptor")
            .field("name", &self.descriptor.name)
            .field("resolved_constructor", &self.resolved_constructor.get())
            .field("post_processed", &self.is_post_processed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Engine;

    struct Car {
        wheels: OnceCell<Arc<u32>>,
    }

    #[test]
    fn test_builder_declares_type_and_strategy() {
        let d = ComponentDescriptor::new("engine").supplier(|| Ok(Engine));
        assert_eq!(d.declared_type(), Some(ComponentType::of::<Engine>()));
        assert!(matches!(d.strategy(), Some(ConstructionStrategy::Supplier(_))));
        assert!(d.is_singleton());
    }

    #[test]
    fn test_merge_child_wins() {
        let parent = ComponentDescriptor::new("base")
            .of::<Engine>()
            .scope(Scope::Prototype)
            .property("a", PropertyValue::text("1"))
            .property("b", PropertyValue::text("2"))
            .abstract_template();
        let child = ComponentDescriptor::new("child")
            .parent("base")
            .property("b", PropertyValue::text("3"))
            .constructor(Constructor::default_of::<Engine>());

        let merged = child.merged_onto(&parent);
        assert_eq!(merged.name(), "child");
        assert!(merged.is_prototype());
        assert!(!merged.is_abstract());
        assert_eq!(merged.declared_type(), Some(ComponentType::of::<Engine>()));
        assert!(matches!(merged.properties().get("a"), Some(PropertyValue::Text(t)) if t == "1"));
        assert!(matches!(merged.properties().get("b"), Some(PropertyValue::Text(t)) if t == "3"));
    }

    #[test]
    fn test_parsed_setter_applies() {
        let setter = PropertySetter::parsed::<Car, u32, _>("wheels", |car, v| {
            car.wheels.set(v).map_err(|_| ContainerError::custom("set twice"))
        });
        let car = instance(Car {
            wheels: OnceCell::new(),
        });
        let value = (setter.parser().unwrap())("4").unwrap();
        setter.apply(&car, value).unwrap();
        assert_eq!(**car.downcast_ref::<Car>().unwrap().wheels.get().unwrap(), 4);
    }

    #[test]
    fn test_order_marker_sorting() {
        let mut markers = vec![
            OrderMarker::Unordered,
            OrderMarker::Ordered(1),
            OrderMarker::PriorityOrdered(5),
            OrderMarker::Ordered(-1),
        ];
        markers.sort_by_key(|m| m.sort_key());
        assert_eq!(
            markers,
            vec![
                OrderMarker::PriorityOrdered(5),
                OrderMarker::Ordered(-1),
                OrderMarker::Ordered(1),
                OrderMarker::Unordered,
            ]
        );
    }

    #[test]
    fn test_post_process_once() {
        let merged = MergedDescriptor::new(ComponentDescriptor::new("x"));
        let mut calls = 0;
        merged.post_process_once(|| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        merged.post_process_once(|| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(merged.is_post_processed());
    }

    #[test]
    fn test_arguments_access() {
        let args = Arguments::new(
            "x",
            vec![
                Argument::One(instance(7u32)),
                Argument::Absent,
                Argument::Many(vec![instance(1u32), instance(2u32)]),
            ],
        );
        assert_eq!(*args.get::<u32>(0).unwrap(), 7);
        assert!(args.optional::<u32>(1).unwrap().is_none());
        assert!(args.get::<u32>(1).is_err());
        assert_eq!(args.all::<u32>(2).unwrap().len(), 2);
        assert!(args.get::<String>(0).is_err());
    }
}
