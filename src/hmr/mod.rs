//! Hot Module Replacement
//!
//! Replace changed modules without reloading the whole application. Modules
//! opt in through their [`Hot`] handle:
//!
//! ```text
//! let counter = 0;
//!
//! if (module.hot) {
//!   module.hot.accept();
//!   module.hot.dispose((data) => {
//!     // Save state before unloading
//!     data.counter = counter;
//!   });
//!
//!   // Restore state after loading
//!   if (module.hot.data) {
//!     counter = module.hot.data.counter;
//!   }
//! }
//! ```
//!
//! When a module changes, [`get_affected_module_effects`] walks up the
//! `parents` edges of the module graph to find who takes responsibility for
//! the update. The walk ends in one of three [`ModuleEffect`]s: some module
//! accepted it (and we know exactly which modules are outdated), a module
//! declined it, or nobody accepted it and only a full reload will do.

pub mod apply;
pub mod graph;

pub use apply::{AppliedUpdate, DisposeMode};
pub use graph::{GraphSpec, ModuleGraph, ModuleSpec};

use crate::error::{Error, Result};
use crate::modules::{ModuleCache, ModuleId};
use rustc_hash::FxHashSet as HashSet;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::trace;

/// State that can be preserved across module updates
#[derive(Debug, Clone, Default)]
pub struct HotData {
    data: HashMap<String, Vec<u8>>,
}

impl HotData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: serde::Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.data.insert(key.to_string(), bytes);
        Ok(())
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_raw(&mut self, key: &str, data: Vec<u8>) {
        self.data.insert(key.to_string(), data);
    }

    pub fn get_raw(&self, key: &str) -> Option<&Vec<u8>> {
        self.data.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.data.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Called with the data object that the next instance will receive
pub type DisposeHandler = Rc<dyn Fn(&mut HotData) -> Result<()>>;

/// Called with the accepted dependencies that were just updated
pub type AcceptCallback = Rc<dyn Fn(&[ModuleId]) -> Result<()>>;

/// Called when re-instantiating a self-accepted module fails
pub type AcceptErrorHandler = Rc<dyn Fn(&Error) -> Result<()>>;

/// Modules that invalidated themselves, waiting for the next update round
#[derive(Debug, Clone, Default)]
pub struct InvalidationQueue(Rc<RefCell<Vec<ModuleId>>>);

impl InvalidationQueue {
    pub fn push(&self, id: ModuleId) {
        let mut queue = self.0.borrow_mut();
        if !queue.contains(&id) {
            queue.push(id);
        }
    }

    pub fn take(&self) -> Vec<ModuleId> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Default)]
struct HotState {
    active: bool,
    /// Data handed over by the previous instance's dispose handlers
    data: HotData,
    self_accepted: bool,
    self_accept_error_handler: Option<AcceptErrorHandler>,
    self_declined: bool,
    self_invalidated: bool,
    accepted_dependencies: Vec<(ModuleId, AcceptCallback)>,
    dispose_handlers: Vec<DisposeHandler>,
}

/// Module hot context (available to factories as `ctx.hot()`)
#[derive(Clone, Default)]
pub struct Hot {
    id: ModuleId,
    state: Rc<RefCell<HotState>>,
    invalidations: InvalidationQueue,
}

impl std::fmt::Debug for Hot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Hot")
            .field("id", &self.id)
            .field("active", &state.active)
            .field("self_accepted", &state.self_accepted)
            .field("self_declined", &state.self_declined)
            .field("self_invalidated", &state.self_invalidated)
            .field("accepted_dependencies", &state.accepted_dependencies.len())
            .field("dispose_handlers", &state.dispose_handlers.len())
            .finish()
    }
}

impl Hot {
    pub fn new(id: ModuleId, data: HotData, invalidations: InvalidationQueue) -> Self {
        let state = HotState {
            active: true,
            data,
            ..HotState::default()
        };
        Self {
            id,
            state: Rc::new(RefCell::new(state)),
            invalidations,
        }
    }

    /// Accept hot updates for this module
    pub fn accept(&self) {
        self.state.borrow_mut().self_accepted = true;
    }

    /// Accept hot updates, handling re-instantiation failures locally
    pub fn accept_with_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Error) -> Result<()> + 'static,
    {
        let mut state = self.state.borrow_mut();
        state.self_accepted = true;
        state.self_accept_error_handler = Some(Rc::new(handler));
    }

    /// Accept updates from specific dependencies
    ///
    /// The dependencies are disposed when they change and `callback` runs
    /// afterwards; it usually re-requires them.
    pub fn accept_dependencies<I, F>(&self, deps: I, callback: F)
    where
        I: IntoIterator<Item = ModuleId>,
        F: Fn(&[ModuleId]) -> Result<()> + 'static,
    {
        let callback: AcceptCallback = Rc::new(callback);
        let mut state = self.state.borrow_mut();
        for dep in deps {
            state.accepted_dependencies.retain(|(id, _)| id != &dep);
            state.accepted_dependencies.push((dep, callback.clone()));
        }
    }

    /// Decline updates to this module entirely
    pub fn decline(&self) {
        self.state.borrow_mut().self_declined = true;
    }

    /// Register a handler to run before this instance is disposed
    pub fn dispose<F>(&self, handler: F)
    where
        F: Fn(&mut HotData) -> Result<()> + 'static,
    {
        self.state.borrow_mut().dispose_handlers.push(Rc::new(handler));
    }

    /// Mark this module as outdated; it is replaced on the next update
    pub fn invalidate(&self) {
        self.state.borrow_mut().self_invalidated = true;
        self.invalidations.push(self.id.clone());
    }

    /// Data handed over by the previous instance
    pub fn data(&self) -> HotData {
        self.state.borrow().data.clone()
    }

    /// False once the module instance has been disposed
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Whether this module takes responsibility for its own updates
    pub fn is_self_accepted(&self) -> bool {
        let state = self.state.borrow();
        state.self_accepted && !state.self_invalidated
    }

    pub fn is_self_declined(&self) -> bool {
        self.state.borrow().self_declined
    }

    /// Whether this module accepts updates of the dependency `id`
    pub fn accepts_dependency(&self, id: &ModuleId) -> bool {
        self.dependency_callback(id).is_some()
    }

    pub(crate) fn dependency_callback(&self, id: &ModuleId) -> Option<AcceptCallback> {
        self.state
            .borrow()
            .accepted_dependencies
            .iter()
            .find(|(dep, _)| dep == id)
            .map(|(_, callback)| callback.clone())
    }

    pub(crate) fn self_accept_error_handler(&self) -> Option<AcceptErrorHandler> {
        self.state.borrow().self_accept_error_handler.clone()
    }

    pub(crate) fn dispose_handlers(&self) -> Vec<DisposeHandler> {
        self.state.borrow().dispose_handlers.clone()
    }

    pub(crate) fn deactivate(&self) {
        self.state.borrow_mut().active = false;
    }
}

/// A parent that accepted an update of one specific dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedDependency {
    pub parent: ModuleId,
    pub dependency: ModuleId,
}

/// The outcome of classifying a hot update for one changed module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModuleEffect {
    /// Nobody accepted the update; a full reload is required
    Unaccepted { dependency_chain: Vec<ModuleId> },
    /// A module on the way declined updates to itself
    SelfDeclined {
        dependency_chain: Vec<ModuleId>,
        module_id: ModuleId,
    },
    /// The update can be applied by replacing `outdated_modules`
    Accepted {
        /// First accepting module discovered
        module_id: ModuleId,
        /// Modules to dispose and re-instantiate, children first
        outdated_modules: Vec<ModuleId>,
        accepted_dependencies: Vec<AcceptedDependency>,
    },
}

impl ModuleEffect {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ModuleEffect::Accepted { .. })
    }
}

struct QueueItem {
    module_id: ModuleId,
    dependency_chain: Vec<ModuleId>,
}

/// Classify an update of `module_id` against the current module graph
///
/// The walk is breadth-first over `parents`. Each module is enqueued at most
/// once, so cycles terminate; when several modules accept, the one discovered
/// first (closest to the changed module, then parent order) is reported.
pub fn get_affected_module_effects(
    cache: &ModuleCache,
    runtime_modules: &HashSet<ModuleId>,
    module_id: &ModuleId,
) -> ModuleEffect {
    if !cache.contains(module_id) {
        // Never instantiated: the new factory simply replaces the old one.
        return ModuleEffect::Accepted {
            module_id: module_id.clone(),
            outdated_modules: vec![module_id.clone()],
            accepted_dependencies: Vec::new(),
        };
    }

    let mut outdated = Vec::new();
    let mut acceptors: Vec<ModuleId> = Vec::new();
    let mut accepted_dependencies = Vec::new();
    let mut cycle_chain: Option<Vec<ModuleId>> = None;
    let mut unaccepted_chain: Option<Vec<ModuleId>> = None;

    let mut enqueued = HashSet::default();
    enqueued.insert(module_id.clone());
    let mut queue = VecDeque::from([QueueItem {
        module_id: module_id.clone(),
        dependency_chain: Vec::new(),
    }]);

    while let Some(QueueItem {
        module_id,
        mut dependency_chain,
    }) = queue.pop_front()
    {
        let Some(module) = cache.get(&module_id) else {
            continue;
        };
        let module = module.borrow();
        dependency_chain.push(module_id.clone());

        if module.hot.is_self_declined() {
            trace!(module = %module_id, "update declined");
            return ModuleEffect::SelfDeclined {
                dependency_chain,
                module_id,
            };
        }

        outdated.push(module_id.clone());

        if module.hot.is_self_accepted() {
            trace!(module = %module_id, "update accepted");
            acceptors.push(module_id.clone());
            continue;
        }

        if runtime_modules.contains(&module_id) || module.parents.is_empty() {
            // Keep walking: a declining module on another path still vetoes.
            if unaccepted_chain.is_none() {
                unaccepted_chain = Some(dependency_chain);
            }
            continue;
        }

        for parent_id in &module.parents {
            let Some(parent) = cache.get(parent_id) else {
                continue;
            };
            if parent.borrow().hot.accepts_dependency(&module_id) {
                trace!(module = %module_id, parent = %parent_id, "dependency update accepted");
                accepted_dependencies.push(AcceptedDependency {
                    parent: parent_id.clone(),
                    dependency: module_id.clone(),
                });
                if !acceptors.contains(parent_id) {
                    acceptors.push(parent_id.clone());
                }
                continue;
            }
            if !enqueued.insert(parent_id.clone()) {
                if cycle_chain.is_none() {
                    let mut chain = dependency_chain.clone();
                    chain.push(parent_id.clone());
                    cycle_chain = Some(chain);
                }
                continue;
            }
            queue.push_back(QueueItem {
                module_id: parent_id.clone(),
                dependency_chain: dependency_chain.clone(),
            });
        }
    }

    if let Some(dependency_chain) = unaccepted_chain {
        return ModuleEffect::Unaccepted { dependency_chain };
    }

    match acceptors.into_iter().next() {
        Some(acceptor) => ModuleEffect::Accepted {
            module_id: acceptor,
            outdated_modules: order_bottom_up(cache, &outdated),
            accepted_dependencies,
        },
        None => ModuleEffect::Unaccepted {
            dependency_chain: cycle_chain.unwrap_or_else(|| vec![module_id.clone()]),
        },
    }
}

/// Union of the effects of several changed modules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutdatedModules {
    /// Modules to dispose and re-instantiate, children first
    pub modules: Vec<ModuleId>,
    pub accepted_dependencies: Vec<AcceptedDependency>,
}

impl OutdatedModules {
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.accepted_dependencies.is_empty()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains(id)
    }
}

/// Classify every changed module; any rejection rejects the whole batch
pub fn compute_outdated_modules<'a, I>(
    cache: &ModuleCache,
    runtime_modules: &HashSet<ModuleId>,
    changed: I,
) -> Result<OutdatedModules>
where
    I: IntoIterator<Item = &'a ModuleId>,
{
    let mut modules = Vec::new();
    let mut seen = HashSet::default();
    let mut accepted_dependencies = Vec::new();

    for id in changed {
        let effect = get_affected_module_effects(cache, runtime_modules, id);
        if let Some(err) = Error::rejected(&effect) {
            return Err(err);
        }
        if let ModuleEffect::Accepted {
            outdated_modules,
            accepted_dependencies: deps,
            ..
        } = effect
        {
            for module in outdated_modules {
                if seen.insert(module.clone()) {
                    modules.push(module);
                }
            }
            for dep in deps {
                if !accepted_dependencies.contains(&dep) {
                    accepted_dependencies.push(dep);
                }
            }
        }
    }

    Ok(OutdatedModules {
        modules: order_bottom_up(cache, &modules),
        accepted_dependencies,
    })
}

/// Order `modules` so that each comes after its children within the set
///
/// Modules unrelated by a `children` edge keep their relative order.
pub(crate) fn order_bottom_up(cache: &ModuleCache, modules: &[ModuleId]) -> Vec<ModuleId> {
    let members: HashSet<&ModuleId> = modules.iter().collect();
    let mut visited: HashSet<ModuleId> = HashSet::default();
    let mut ordered = Vec::with_capacity(modules.len());

    for root in modules {
        if visited.contains(root) {
            continue;
        }
        let mut stack = vec![(root.clone(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                ordered.push(id);
                continue;
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            stack.push((id.clone(), true));
            if let Some(module) = cache.get(&id) {
                for child in module.borrow().children.iter().rev() {
                    if members.contains(child) && !visited.contains(child) {
                        stack.push((child.clone(), false));
                    }
                }
            }
        }
    }

    ordered
}
