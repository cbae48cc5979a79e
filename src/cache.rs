//! Singleton instance cache
//!
//! Tracks every singleton through three stages:
//!
//! - `Pending` - a callback that produces an early reference on demand
//! - `Early` - the early reference, already handed to a circular dependent
//! - `Finished` - the fully initialized instance
//!
//! All stages live in one map so that promotion is a single replacement
//! under the map lock, and a name is never visible in two stages at once.
//!
//! The cache also owns the "currently in creation" set, the dependency
//! graph between components and the disposal registry.

use crate::component::Instance;
use crate::descriptor::LifecycleMethod;
use crate::hook::InstanceHookRef;
use crate::Result;
use ahash::RandomState;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Produces the early reference of a component still being created
pub type EarlyReferenceFn = Arc<dyn Fn() -> Result<Instance> + Send + Sync>;

enum Stage {
    Pending(EarlyReferenceFn),
    Early(Instance),
    Finished(Instance),
}

/// Observable stage of a cached singleton
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStage {
    Pending,
    Early,
    Finished,
}

/// Disposal callback registered for a finished singleton
pub(crate) struct Disposal {
    instance: Instance,
    method: Option<LifecycleMethod>,
    hooks: Vec<InstanceHookRef>,
}

impl Disposal {
    pub(crate) fn new(instance: Instance, method: Option<LifecycleMethod>, hooks: Vec<InstanceHookRef>) -> Self {
        Self {
            instance,
            method,
            hooks,
        }
    }

    fn dispose(&self, name: &str) -> Result<()> {
        for hook in &self.hooks {
            hook.before_destruction(&self.instance, name)?;
        }
        if let Some(method) = &self.method {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = name,
                method = method.name(),
                "Invoking destroy method"
            );
            method.invoke(&self.instance)?;
        }
        Ok(())
    }
}

/// Shared state for singleton creation
pub struct InstanceCache {
    entries: Mutex<HashMap<String, Stage, RandomState>>,
    /// Finished singletons, in completion order
    registered: Mutex<Vec<String>>,
    /// Singletons registered from outside, without a descriptor
    manual: Mutex<Vec<String>>,
    in_creation: Mutex<HashSet<String, RandomState>>,
    creation_lock: ReentrantMutex<()>,
    /// provider -> components that depend on it
    dependents: Mutex<HashMap<String, Vec<String>, RandomState>>,
    /// component -> providers it depends on
    dependencies: Mutex<HashMap<String, Vec<String>, RandomState>>,
    disposals: Mutex<Vec<(String, Disposal)>>,
    destroying: AtomicBool,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::with_hasher(RandomState::new())),
            registered: Mutex::new(Vec::new()),
            manual: Mutex::new(Vec::new()),
            in_creation: Mutex::new(HashSet::with_hasher(RandomState::new())),
            creation_lock: ReentrantMutex::new(()),
            dependents: Mutex::new(HashMap::with_hasher(RandomState::new())),
            dependencies: Mutex::new(HashMap::with_hasher(RandomState::new())),
            disposals: Mutex::new(Vec::new()),
            destroying: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Finished instance, if any. Never blocks on creation.
    #[inline]
    pub fn finished(&self, name: &str) -> Option<Instance> {
        match self.entries.lock().get(name) {
            Some(Stage::Finished(instance)) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<CacheStage> {
        self.entries.lock().get(name).map(|stage| match stage {
            Stage::Pending(_) => CacheStage::Pending,
            Stage::Early(_) => CacheStage::Early,
            Stage::Finished(_) => CacheStage::Finished,
        })
    }

    /// Look up a singleton in any stage.
    ///
    /// With `allow_early`, a pending callback is invoked and its result
    /// promoted to the early stage. The callback runs with the map unlocked.
    pub fn get_singleton(&self, name: &str, allow_early: bool) -> Result<Option<Instance>> {
        let factory = {
            let entries = self.entries.lock();
            match entries.get(name) {
                Some(Stage::Finished(instance)) | Some(Stage::Early(instance)) => {
                    return Ok(Some(Arc::clone(instance)));
                }
                Some(Stage::Pending(factory)) if allow_early => Arc::clone(factory),
                _ => return Ok(None),
            }
        };

        let early = factory()?;

        let mut entries = self.entries.lock();
        match entries.get(name) {
            Some(Stage::Pending(_)) => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "lifecycle_container",
                    component = name,
                    "Promoted pending singleton to early reference"
                );
                entries.insert(name.to_string(), Stage::Early(Arc::clone(&early)));
                Ok(Some(early))
            }
            Some(Stage::Finished(instance)) | Some(Stage::Early(instance)) => Ok(Some(Arc::clone(instance))),
            None => Ok(None),
        }
    }

    /// Register an early-reference callback unless the name is already finished
    pub fn add_pending(&self, name: &str, factory: EarlyReferenceFn) {
        let mut entries = self.entries.lock();
        if !matches!(entries.get(name), Some(Stage::Finished(_))) {
            entries.insert(name.to_string(), Stage::Pending(factory));
        }
    }

    /// Promote to finished, replacing any pending or early entry
    pub fn add_finished(&self, name: &str, instance: Instance) {
        let previous = self
            .entries
            .lock()
            .insert(name.to_string(), Stage::Finished(instance));
        if !matches!(previous, Some(Stage::Finished(_))) {
            self.registered.lock().push(name.to_string());
        }
    }

    /// Register an externally created singleton.
    ///
    /// Returns `false` if the name is already taken.
    pub fn register_manual(&self, name: &str, instance: Instance) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(name.to_string(), Stage::Finished(instance));
        drop(entries);
        self.registered.lock().push(name.to_string());
        self.manual.lock().push(name.to_string());
        true
    }

    /// Names of externally registered singletons
    pub fn manual_names(&self) -> Vec<String> {
        self.manual.lock().clone()
    }

    /// Drop a singleton in every stage
    pub fn remove(&self, name: &str) -> Option<Instance> {
        let removed = self.entries.lock().remove(name);
        self.registered.lock().retain(|n| n != name);
        self.manual.lock().retain(|n| n != name);
        match removed {
            Some(Stage::Finished(instance)) | Some(Stage::Early(instance)) => Some(instance),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Finished singleton names, in completion order
    pub fn finished_names(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    // =========================================================================
    // Creation tracking
    // =========================================================================

    /// Serializes singleton creation; reentrant for nested creations
    #[inline]
    pub fn lock_creation(&self) -> ReentrantMutexGuard<'_, ()> {
        self.creation_lock.lock()
    }

    /// Mark `name` as in creation. Returns `false` if it already is.
    pub fn begin_creation(&self, name: &str) -> bool {
        self.in_creation.lock().insert(name.to_string())
    }

    pub fn end_creation(&self, name: &str) {
        self.in_creation.lock().remove(name);
    }

    pub fn is_in_creation(&self, name: &str) -> bool {
        self.in_creation.lock().contains(name)
    }

    // =========================================================================
    // Dependency graph
    // =========================================================================

    /// Record that `dependent` received `provider`
    pub fn register_dependent(&self, provider: &str, dependent: &str) {
        if provider == dependent {
            return;
        }
        {
            let mut dependents = self.dependents.lock();
            let list = dependents.entry(provider.to_string()).or_default();
            if list.iter().any(|d| d == dependent) {
                return;
            }
            list.push(dependent.to_string());
        }
        self.dependencies
            .lock()
            .entry(dependent.to_string())
            .or_default()
            .push(provider.to_string());
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.dependencies.lock().get(name).cloned().unwrap_or_default()
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    pub(crate) fn register_disposal(&self, name: &str, disposal: Disposal) {
        let mut disposals = self.disposals.lock();
        disposals.retain(|(n, _)| n != name);
        disposals.push((name.to_string(), disposal));
    }

    pub fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::Acquire)
    }

    /// Destroy one singleton, its dependents first.
    pub fn destroy_singleton(&self, name: &str) {
        self.remove(name);
        let disposal = {
            let mut disposals = self.disposals.lock();
            disposals
                .iter()
                .position(|(n, _)| n == name)
                .map(|pos| disposals.remove(pos).1)
        };
        self.destroy_component(name, disposal);
    }

    fn destroy_component(&self, name: &str, disposal: Option<Disposal>) {
        let dependents = self.dependents.lock().remove(name).unwrap_or_default();
        if !dependents.is_empty() {
            #[cfg(feature = "logging")]
            trace!(
                target: "lifecycle_container",
                component = name,
                dependents = ?dependents,
                "Destroying dependent components first"
            );
            for dependent in &dependents {
                self.destroy_singleton(dependent);
            }
        }

        if let Some(disposal) = disposal {
            if let Err(_e) = disposal.dispose(name) {
                #[cfg(feature = "logging")]
                warn!(
                    target: "lifecycle_container",
                    component = name,
                    error = %_e,
                    "Destruction of component failed"
                );
            }
        }

        let mut dependencies = self.dependencies.lock();
        for providers in dependencies.values_mut() {
            providers.retain(|p| p != name);
        }
        dependencies.remove(name);
    }

    /// Destroy every singleton in reverse registration order.
    ///
    /// Holds the creation lock throughout: a creation already in progress
    /// finishes and is disposed with the rest, later ones see `destroying`.
    pub fn destroy_all(&self) {
        let _creation = self.creation_lock.lock();
        self.destroying.store(true, Ordering::Release);

        let names: Vec<String> = self
            .disposals
            .lock()
            .iter()
            .map(|(n, _)| n.clone())
            .collect();

        #[cfg(feature = "logging")]
        debug!(
            target: "lifecycle_container",
            disposable = names.len(),
            singletons = self.registered.lock().len(),
            "Destroying singletons"
        );

        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }

        self.entries.lock().clear();
        self.registered.lock().clear();
        self.manual.lock().clear();
        self.dependents.lock().clear();
        self.dependencies.lock().clear();
    }
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCache")
            .field("entries", &self.entries.lock().len())
            .field("in_creation", &self.in_creation.lock().len())
            .field("disposals", &self.disposals.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::instance;
    use crate::ContainerError;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pending_promoted_once() {
        let cache = InstanceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cache.add_pending(
            "a",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(instance(1u32))
            }),
        );

        assert_eq!(cache.stage("a"), Some(CacheStage::Pending));
        assert!(cache.get_singleton("a", false).unwrap().is_none());

        let first = cache.get_singleton("a", true).unwrap().unwrap();
        let second = cache.get_singleton("a", true).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stage("a"), Some(CacheStage::Early));

        cache.add_finished("a", Arc::clone(&first));
        assert_eq!(cache.stage("a"), Some(CacheStage::Finished));
        assert_eq!(cache.finished_names(), vec!["a"]);
    }

    #[test]
    fn test_failing_early_callback_keeps_pending() {
        let cache = InstanceCache::new();
        cache.add_pending("a", Arc::new(|| Err(ContainerError::custom("nope"))));
        assert!(cache.get_singleton("a", true).is_err());
        assert_eq!(cache.stage("a"), Some(CacheStage::Pending));
    }

    #[test]
    fn test_pending_does_not_replace_finished() {
        let cache = InstanceCache::new();
        cache.add_finished("a", instance(1u32));
        cache.add_pending("a", Arc::new(|| Ok(instance(2u32))));
        assert_eq!(cache.stage("a"), Some(CacheStage::Finished));
    }

    #[test]
    fn test_manual_registration() {
        let cache = InstanceCache::new();
        assert!(cache.register_manual("m", instance(1u32)));
        assert!(!cache.register_manual("m", instance(2u32)));
        assert_eq!(cache.manual_names(), vec!["m"]);
        assert!(cache.finished("m").is_some());
    }

    #[test]
    fn test_destroy_dependents_first() {
        let cache = InstanceCache::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["db", "repo", "service"] {
            cache.add_finished(name, instance(name.to_string()));
            let log = Arc::clone(&order);
            cache.register_disposal(
                name,
                Disposal::new(
                    instance(name.to_string()),
                    Some(LifecycleMethod::new::<String, _>("close", move |s| {
                        log.lock().push(s.clone());
                        Ok(())
                    })),
                    Vec::new(),
                ),
            );
        }
        cache.register_dependent("db", "repo");
        cache.register_dependent("repo", "service");

        // db registered its disposal first, yet its dependents go before it
        cache.destroy_singleton("db");
        assert_eq!(*order.lock(), vec!["service", "repo", "db"]);
        assert!(cache.finished("service").is_none());
    }

    #[test]
    fn test_destroy_all_reverse_order() {
        let cache = InstanceCache::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = Arc::clone(&order);
            cache.add_finished(name, instance(()));
            cache.register_disposal(
                name,
                Disposal::new(
                    instance(()),
                    Some(LifecycleMethod::new::<(), _>("close", move |_| {
                        log.lock().push(name);
                        Ok(())
                    })),
                    Vec::new(),
                ),
            );
        }

        cache.destroy_all();
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert!(cache.is_destroying());
        assert!(cache.finished_names().is_empty());
    }

    #[test]
    fn test_dependency_graph() {
        let cache = InstanceCache::new();
        cache.register_dependent("a", "b");
        cache.register_dependent("a", "b");
        cache.register_dependent("a", "a");
        assert_eq!(cache.dependents_of("a"), vec!["b"]);
        assert_eq!(cache.dependencies_of("b"), vec!["a"]);
        assert!(cache.dependents_of("b").is_empty());
    }
}
