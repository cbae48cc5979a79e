//! Error types for component creation and the startup pipeline

use std::fmt;
use thiserror::Error;

/// The step of a component's creation in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreationPhase {
    /// Resolving the effective (merged) descriptor
    Resolution,
    /// Hooks attempting to short-circuit instantiation
    BeforeInstantiation,
    /// Selecting and running the instantiation strategy
    Instantiation,
    /// Hooks enriching merged descriptor metadata
    MergedDescriptor,
    /// Producing an early reference for a circular dependency
    EarlyReference,
    /// Populating properties and dependencies
    Population,
    /// Init methods and initialization hooks
    Initialization,
    /// Comparing the early reference against the finished instance
    CycleCheck,
}

impl fmt::Display for CreationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resolution => "descriptor resolution",
            Self::BeforeInstantiation => "before-instantiation hooks",
            Self::Instantiation => "instantiation",
            Self::MergedDescriptor => "merged descriptor post-processing",
            Self::EarlyReference => "early reference exposure",
            Self::Population => "property population",
            Self::Initialization => "initialization",
            Self::CycleCheck => "circular reference check",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while defining, creating or disposing components
#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    /// Malformed or ambiguous descriptor
    #[error("Invalid descriptor '{name}': {reason}")]
    Descriptor { name: String, reason: String },

    /// An extension hook failed
    #[error("Extension hook failed during {phase}")]
    Hook {
        phase: &'static str,
        #[source]
        source: Box<ContainerError>,
    },

    /// A required dependency could not be resolved
    #[error(
        "Unsatisfied dependency '{dependency}' of component '{component}' (requested via {})",
        chain.join(" -> ")
    )]
    UnsatisfiedDependency {
        component: String,
        dependency: String,
        chain: Vec<String>,
    },

    /// A component was wrapped after its raw early reference had been injected
    #[error(
        "Component '{name}' has been injected into [{}] in its raw version as part of a \
         circular reference, but has eventually been wrapped",
        dependents.join(", ")
    )]
    CircularWrapping {
        name: String,
        dependents: Vec<String>,
    },

    /// A component was requested again while it was still being created
    #[error("Component '{name}' is currently in creation: {}", cycle.join(" -> "))]
    CurrentlyInCreation { name: String, cycle: Vec<String> },

    /// No descriptor or singleton under that name
    #[error("No component named '{name}'")]
    NoSuchComponent { name: String },

    /// By-type lookup found more than one candidate and no tie-breaker applied
    #[error("Expected a single component of type {type_name}, found [{}]", candidates.join(", "))]
    NoUniqueComponent {
        type_name: &'static str,
        candidates: Vec<String>,
    },

    /// The instance does not have the requested type
    #[error("Component '{name}' is not of type {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },

    /// A property or argument value could not be converted to its target type
    #[error("Cannot convert value for '{property}' of component '{component}' to {target}: {reason}")]
    PropertyConversion {
        component: String,
        property: String,
        target: &'static str,
        reason: String,
    },

    /// Creation of a component failed; wraps the originating cause
    #[error("Error creating component '{name}' during {phase}")]
    Creation {
        name: String,
        phase: CreationPhase,
        #[source]
        source: Box<ContainerError>,
    },

    /// The descriptor store is frozen and cannot be modified
    #[error("Descriptor store is frozen - cannot register '{name}'")]
    Frozen { name: String },

    /// The startup pipeline failed earlier; the container is unusable
    #[error("Container startup failed: {reason}")]
    StartupFailed { reason: String },

    /// The container is being or has been destroyed
    #[error("Container has been destroyed - cannot create '{name}'")]
    Destroyed { name: String },

    /// Error raised by user code (constructors, hooks, init methods)
    #[error("{0}")]
    Custom(String),
}

impl ContainerError {
    /// Create a Descriptor error
    #[inline]
    pub fn descriptor(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Descriptor {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a NoSuchComponent error
    #[inline]
    pub fn no_such_component(name: impl Into<String>) -> Self {
        Self::NoSuchComponent { name: name.into() }
    }

    /// Create a Custom error, for use by constructors and hooks
    #[inline]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Wrap an error raised by a hook
    #[inline]
    pub fn hook(phase: &'static str, source: ContainerError) -> Self {
        Self::Hook {
            phase,
            source: Box::new(source),
        }
    }

    /// Wrap `source` as a creation failure of `name`, unless it already is one.
    pub fn creation(name: &str, phase: CreationPhase, source: ContainerError) -> Self {
        match source {
            Self::Creation { name: ref inner, .. } if inner == name => source,
            other => Self::Creation {
                name: name.to_string(),
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Walk the `Creation` / `Hook` wrappers down to the originating error.
    pub fn root_cause(&self) -> &ContainerError {
        let mut current = self;
        loop {
            match current {
                Self::Creation { source, .. } | Self::Hook { source, .. } => current = source,
                other => return other,
            }
        }
    }

    /// Names of the components along the creation chain, outermost first.
    pub fn creation_chain(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = self;
        loop {
            match current {
                Self::Creation { name, source, .. } => {
                    names.push(name.as_str());
                    current = source;
                }
                Self::Hook { source, .. } => current = source,
                _ => return names,
            }
        }
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;
