//! Container configuration

/// Behavior switches of a container.
///
/// ```rust
/// use lifecycle_container::ContainerConfig;
///
/// let config = ContainerConfig::default()
///     .allow_circular_references(false)
///     .eager_singletons(false);
/// assert!(!config.circular_references_allowed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerConfig {
    allow_circular_references: bool,
    allow_raw_injection_despite_wrapping: bool,
    allow_non_public_access: bool,
    allow_descriptor_overriding: bool,
    lenient_construction: bool,
    eager_singletons: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            allow_raw_injection_despite_wrapping: false,
            allow_non_public_access: true,
            allow_descriptor_overriding: true,
            lenient_construction: true,
            eager_singletons: true,
        }
    }
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose early references so singleton cycles can resolve
    #[must_use]
    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    /// Tolerate dependents holding the raw instance of a component that
    /// was wrapped during initialization
    #[must_use]
    pub fn allow_raw_injection_despite_wrapping(mut self, allow: bool) -> Self {
        self.allow_raw_injection_despite_wrapping = allow;
        self
    }

    /// Allow creating components whose type is declared non-public
    #[must_use]
    pub fn allow_non_public_access(mut self, allow: bool) -> Self {
        self.allow_non_public_access = allow;
        self
    }

    #[must_use]
    pub fn allow_descriptor_overriding(mut self, allow: bool) -> Self {
        self.allow_descriptor_overriding = allow;
        self
    }

    /// Pick the first of several equally greedy constructors instead of failing
    #[must_use]
    pub fn lenient_construction(mut self, lenient: bool) -> Self {
        self.lenient_construction = lenient;
        self
    }

    /// Create non-lazy singletons during refresh
    #[must_use]
    pub fn eager_singletons(mut self, eager: bool) -> Self {
        self.eager_singletons = eager;
        self
    }

    #[inline]
    pub fn circular_references_allowed(&self) -> bool {
        self.allow_circular_references
    }

    #[inline]
    pub fn raw_injection_allowed(&self) -> bool {
        self.allow_raw_injection_despite_wrapping
    }

    #[inline]
    pub fn non_public_access_allowed(&self) -> bool {
        self.allow_non_public_access
    }

    #[inline]
    pub fn descriptor_overriding_allowed(&self) -> bool {
        self.allow_descriptor_overriding
    }

    #[inline]
    pub fn is_lenient(&self) -> bool {
        self.lenient_construction
    }

    #[inline]
    pub fn singletons_eager(&self) -> bool {
        self.eager_singletons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert!(config.circular_references_allowed());
        assert!(!config.raw_injection_allowed());
        assert!(config.non_public_access_allowed());
        assert!(config.descriptor_overriding_allowed());
        assert!(config.is_lenient());
        assert!(config.singletons_eager());
    }

    #[test]
    fn test_builder() {
        let config = ContainerConfig::new()
            .allow_raw_injection_despite_wrapping(true)
            .lenient_construction(false);
        assert!(config.raw_injection_allowed());
        assert!(!config.is_lenient());
    }
}
