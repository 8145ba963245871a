//! The module runtime
//!
//! [`Runtime`] owns every piece of shared state: the module cache, the table
//! of registered factories, chunk bookkeeping, in-flight chunk loads, the
//! update dispatcher and the data carried between module instances. It is a
//! cheap, cloneable handle; clones share the same state.
//!
//! Execution is single threaded. Module factories, dispose handlers and update
//! listeners run synchronously and may call back into the runtime, so no
//! `RefCell` borrow is ever held across one of those calls.

pub mod config;

pub use config::RuntimeConfig;

use crate::chunks::{ChunkLoader, ChunkRegistry, NoopBackend, RegistrationQueue, RuntimeBackend};
use crate::dispatcher::UpdateDispatcher;
use crate::error::{Error, Result};
use crate::hmr::{HotData, Hot, InvalidationQueue};
use crate::modules::{ChunkPath, Module, ModuleCache, ModuleContext, ModuleFactory, ModuleId, ModuleRef, SourceInfo};
use crate::protocol::ServerMessage;
use crate::value::interop_namespace;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, warn};

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) backend: Rc<dyn RuntimeBackend>,
    pub(crate) cache: RefCell<ModuleCache>,
    pub(crate) factories: RefCell<HashMap<ModuleId, ModuleFactory>>,
    /// Data saved by dispose handlers, consumed by the next instance
    pub(crate) hot_data: RefCell<HashMap<ModuleId, HotData>>,
    /// Modules instantiated as chunk entries; updates cannot bubble past them
    pub(crate) runtime_modules: RefCell<HashSet<ModuleId>>,
    pub(crate) chunks: RefCell<ChunkRegistry>,
    pub(crate) loader: ChunkLoader,
    pub(crate) registrations: RegistrationQueue,
    pub(crate) dispatcher: UpdateDispatcher<ServerMessage>,
    pub(crate) invalidations: InvalidationQueue,
    refresh_helpers: RefCell<Option<Rc<dyn Any>>>,
    restarts: Cell<u64>,
}

/// Handle to a module runtime
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("modules", &self.inner.cache.borrow().len())
            .field("factories", &self.inner.factories.borrow().len())
            .field("restarts", &self.inner.restarts.get())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Rc::new(NoopBackend))
    }
}

impl Runtime {
    /// Create a runtime with the default configuration
    pub fn new(backend: Rc<dyn RuntimeBackend>) -> Self {
        Self::with_config(backend, RuntimeConfig::default())
    }

    /// Create a runtime with a custom configuration
    pub fn with_config(backend: Rc<dyn RuntimeBackend>, config: RuntimeConfig) -> Self {
        Self::from_parts(backend, config, RegistrationQueue::new())
    }

    /// Create a runtime draining an existing registration queue
    ///
    /// Backends that deliver chunks by pushing registrations (the way a
    /// script tag would) share this queue with the runtime.
    pub fn from_parts(
        backend: Rc<dyn RuntimeBackend>,
        config: RuntimeConfig,
        registrations: RegistrationQueue,
    ) -> Self {
        let inner = RuntimeInner {
            config,
            backend,
            cache: RefCell::new(ModuleCache::new()),
            factories: RefCell::new(HashMap::default()),
            hot_data: RefCell::new(HashMap::default()),
            runtime_modules: RefCell::new(HashSet::default()),
            chunks: RefCell::new(ChunkRegistry::default()),
            loader: ChunkLoader::default(),
            registrations,
            dispatcher: UpdateDispatcher::new(),
            invalidations: InvalidationQueue::default(),
            refresh_helpers: RefCell::new(None),
            restarts: Cell::new(0),
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Queue that chunk registrations are pushed onto
    pub fn registrations(&self) -> RegistrationQueue {
        self.inner.registrations.clone()
    }

    /// Get a module record
    pub fn get(&self, id: &ModuleId) -> Option<ModuleRef> {
        self.inner.cache.borrow().get(id)
    }

    /// Ids of all cached modules, sorted
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.inner.cache.borrow().ids()
    }

    /// Whether a factory is registered for `id`
    pub fn has_factory(&self, id: &ModuleId) -> bool {
        self.inner.factories.borrow().contains_key(id)
    }

    /// Modules instantiated as chunk entries
    pub fn runtime_modules(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.inner.runtime_modules.borrow().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Install the helper set handed to factories through `refresh_helpers()`
    pub fn set_refresh_helpers(&self, helpers: Rc<dyn Any>) {
        *self.inner.refresh_helpers.borrow_mut() = Some(helpers);
    }

    pub fn refresh_helpers(&self) -> Option<Rc<dyn Any>> {
        self.inner.refresh_helpers.borrow().clone()
    }

    /// How many times the runtime has been restarted
    pub fn restart_count(&self) -> u64 {
        self.inner.restarts.get()
    }

    /// Return the module record, instantiating it first if needed
    ///
    /// An existing record is returned as is, whether it is loaded, still
    /// evaluating further up the stack, or failed. Callers check `error`.
    pub fn get_or_instantiate(&self, id: &ModuleId, source: SourceInfo) -> Result<ModuleRef> {
        if let Some(module) = self.get(id) {
            return Ok(module);
        }
        self.instantiate_module(id, source)
    }

    /// Return a chunk entry module, instantiating it first if needed
    pub fn get_or_instantiate_runtime_module(
        &self,
        id: &ModuleId,
        chunk_path: &ChunkPath,
    ) -> Result<ModuleRef> {
        if let Some(module) = self.get(id) {
            if let Some(err) = &module.borrow().error {
                return Err(err.clone());
            }
            return Ok(module);
        }
        self.instantiate_module(
            id,
            SourceInfo::Runtime {
                chunk_path: chunk_path.clone(),
            },
        )
    }

    /// Resolve `id` on behalf of `parent`, recording the dependency edge
    pub(crate) fn get_or_instantiate_from_parent(
        &self,
        id: &ModuleId,
        parent: &ModuleRef,
    ) -> Result<ModuleRef> {
        let (parent_id, active) = {
            let record = parent.borrow();
            (record.id.clone(), record.hot.is_active())
        };
        if !active && self.inner.config.warn_on_non_hot_import {
            warn!(
                module = %id,
                parent = %parent_id,
                "module is being required from a disposed module instance"
            );
        }

        if let Some(module) = self.get(id) {
            parent.borrow_mut().add_child(id);
            module.borrow_mut().add_parent(&parent_id);
            return Ok(module);
        }
        if !self.has_factory(id) {
            return Err(Error::factory_unavailable(id, &SourceInfo::Parent { parent_id }));
        }
        // Linked before evaluation so the child's own requires see the edge.
        parent.borrow_mut().add_child(id);
        self.instantiate_module(id, SourceInfo::Parent { parent_id })
    }

    /// Create a fresh record for `id` and run its factory
    pub(crate) fn instantiate_module(&self, id: &ModuleId, source: SourceInfo) -> Result<ModuleRef> {
        let factory = self.inner.factories.borrow().get(id).cloned();
        let Some(factory) = factory else {
            return Err(Error::factory_unavailable(id, &source));
        };

        let data = self.inner.hot_data.borrow_mut().remove(id).unwrap_or_default();
        let parents = match source {
            SourceInfo::Runtime { .. } => {
                self.inner.runtime_modules.borrow_mut().insert(id.clone());
                Vec::new()
            }
            SourceInfo::Parent { parent_id } => vec![parent_id],
            SourceInfo::Update { parents } => parents.unwrap_or_default(),
        };

        let hot = Hot::new(id.clone(), data, self.inner.invalidations.clone());
        let module = Rc::new(RefCell::new(Module::new(id.clone(), parents, hot)));
        // Inserted before evaluation so that cycles find the in-progress record.
        self.inner.cache.borrow_mut().insert(module.clone());

        debug!(module = %id, "instantiating module");
        let ctx = ModuleContext::new(self.clone(), module.clone());
        if let Err(err) = factory(&ctx) {
            warn!(module = %id, error = %err, "module factory failed");
            module.borrow_mut().error = Some(err.clone());
            return Err(err);
        }

        {
            let mut record = module.borrow_mut();
            record.loaded = true;
            // A namespace handed out mid-evaluation misses later exports.
            if let Some(namespace) = &record.interop_namespace {
                interop_namespace(&record.exports, namespace, record.interop_allow_default);
            }
        }
        Ok(module)
    }

    /// Remove a module from the cache, running its dispose handlers first
    ///
    /// Children are not disposed. Disposing an absent id is a no-op.
    pub fn dispose(&self, id: &ModuleId) -> Result<()> {
        self.dispose_module(id, crate::hmr::DisposeMode::Clear)
    }

    /// Tear down all runtime state and ask the host to bootstrap again
    ///
    /// Outstanding chunk loads are abandoned: when they settle they no longer
    /// touch the runtime.
    pub fn restart(&self) {
        warn!("restarting runtime");
        self.inner.loader.abandon();

        // Dropped outside of the borrows: records own closures of their own.
        let cache = std::mem::take(&mut *self.inner.cache.borrow_mut());
        let factories = std::mem::take(&mut *self.inner.factories.borrow_mut());
        drop(cache);
        drop(factories);

        self.inner.hot_data.borrow_mut().clear();
        self.inner.runtime_modules.borrow_mut().clear();
        *self.inner.chunks.borrow_mut() = ChunkRegistry::default();
        self.inner.registrations.clear();
        self.inner.dispatcher.clear();
        self.inner.invalidations.clear();
        self.inner.restarts.set(self.inner.restarts.get() + 1);

        self.inner.backend.restart();
    }

    /// Register a listener for update messages addressed to `path`
    ///
    /// Messages that arrived before the listener are delivered immediately;
    /// errors returned by the listener are collected.
    pub fn register_update_listener<F>(&self, path: impl Into<ChunkPath>, listener: F) -> Vec<Error>
    where
        F: Fn(&ServerMessage) -> Result<()> + 'static,
    {
        self.inner.dispatcher.register(path.into(), Rc::new(listener))
    }

    /// Deliver an update message to the listeners of `path`
    pub fn deliver_update(&self, path: impl Into<ChunkPath>, message: ServerMessage) -> Vec<Error> {
        self.inner.dispatcher.deliver(&path.into(), message)
    }
}
