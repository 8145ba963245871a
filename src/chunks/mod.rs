//! Chunk registration and loading
//!
//! A chunk is a group of module factories shipped together. Chunks reach the
//! runtime through an append-only [`RegistrationQueue`]: the host (or a
//! backend, once it has fetched a chunk) pushes a [`ChunkRegistration`] and
//! the runtime drains the queue, inserting the factories without running them.
//!
//! Fetching is delegated to a [`RuntimeBackend`]. The runtime de-duplicates
//! concurrent requests for the same chunk: every caller that asks while a load
//! is in flight shares one future and the backend sees one fetch.

use crate::error::{Error, Result};
use crate::modules::{ChunkPath, ModuleFactory, ModuleId, SourceInfo};
use crate::runtime::Runtime;
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Parameters of a chunk that carries runtime entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevRuntimeParams {
    /// Chunks that must be registered before the entries run
    pub other_chunks: Vec<ChunkPath>,
    /// Entry modules to instantiate once the chunk is evaluated
    pub runtime_module_ids: Vec<ModuleId>,
}

/// A chunk's module factories, as pushed by the host
#[derive(Clone)]
pub struct ChunkRegistration {
    pub path: ChunkPath,
    pub modules: Vec<(ModuleId, ModuleFactory)>,
    pub params: Option<DevRuntimeParams>,
}

impl std::fmt::Debug for ChunkRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&ModuleId> = self.modules.iter().map(|(id, _)| id).collect();
        f.debug_struct("ChunkRegistration")
            .field("path", &self.path)
            .field("modules", &ids)
            .field("params", &self.params)
            .finish()
    }
}

impl ChunkRegistration {
    pub fn new(path: impl Into<ChunkPath>) -> Self {
        Self {
            path: path.into(),
            modules: Vec::new(),
            params: None,
        }
    }

    /// Add a module factory
    pub fn module(mut self, id: impl Into<ModuleId>, factory: ModuleFactory) -> Self {
        self.modules.push((id.into(), factory));
        self
    }

    /// Mark the chunk for evaluation of the given entries
    pub fn params(mut self, params: DevRuntimeParams) -> Self {
        self.params = Some(params);
        self
    }
}

/// Append-only channel of chunk registrations
#[derive(Debug, Clone, Default)]
pub struct RegistrationQueue(Rc<RefCell<VecDeque<ChunkRegistration>>>);

impl RegistrationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, registration: ChunkRegistration) {
        self.0.borrow_mut().push_back(registration);
    }

    pub(crate) fn pop(&self) -> Option<ChunkRegistration> {
        self.0.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Drop queued registrations of `path`, returning how many were dropped
    pub(crate) fn discard(&self, path: &ChunkPath) -> usize {
        let mut queue = self.0.borrow_mut();
        let before = queue.len();
        queue.retain(|registration| &registration.path != path);
        before - queue.len()
    }
}

/// Platform-specific chunk operations
///
/// Only `load_chunk` and `restart` are required. A backend that cannot
/// refresh or remove chunk content leaves the defaults, and the runtime falls
/// back to a restart where it would have needed them.
pub trait RuntimeBackend {
    /// Fetch a chunk. On success the chunk must have pushed its registration
    /// onto the runtime's registration queue.
    fn load_chunk(&self, path: &ChunkPath, source: &SourceInfo) -> LocalBoxFuture<'static, Result<()>>;

    /// Fetch a fresh copy of a previously loaded chunk
    fn reload_chunk(&self, _path: &ChunkPath) -> Option<LocalBoxFuture<'static, Result<()>>> {
        None
    }

    /// Remove a chunk's content; returns false when unsupported
    fn unload_chunk(&self, _path: &ChunkPath) -> bool {
        false
    }

    /// Re-bootstrap the application from scratch
    fn restart(&self);
}

/// A backend for hosts that register every chunk up front
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl RuntimeBackend for NoopBackend {
    fn load_chunk(&self, path: &ChunkPath, _source: &SourceInfo) -> LocalBoxFuture<'static, Result<()>> {
        future::ready(Err(Error::Unsupported(format!("fetching chunk {}", path)))).boxed_local()
    }

    fn restart(&self) {}
}

/// Which modules live in which chunks
#[derive(Debug, Default)]
pub(crate) struct ChunkRegistry {
    loaded: HashSet<ChunkPath>,
    chunk_modules: HashMap<ChunkPath, HashSet<ModuleId>>,
    module_chunks: HashMap<ModuleId, HashSet<ChunkPath>>,
    /// Chunk lists whose updates the runtime subscribed to
    chunk_lists: HashMap<ChunkPath, Vec<ChunkPath>>,
    /// Registered chunks whose entries wait for other chunks
    pending_evaluations: Vec<(ChunkPath, DevRuntimeParams)>,
}

impl ChunkRegistry {
    pub(crate) fn is_loaded(&self, path: &ChunkPath) -> bool {
        self.loaded.contains(path)
    }

    pub(crate) fn mark_loaded(&mut self, path: &ChunkPath) {
        self.loaded.insert(path.clone());
    }

    pub(crate) fn add_module_to_chunk(&mut self, id: &ModuleId, path: &ChunkPath) {
        self.chunk_modules.entry(path.clone()).or_default().insert(id.clone());
        self.module_chunks.entry(id.clone()).or_default().insert(path.clone());
    }

    /// Returns true when the module is left in no chunk at all
    pub(crate) fn remove_module_from_chunk(&mut self, id: &ModuleId, path: &ChunkPath) -> bool {
        if let Some(modules) = self.chunk_modules.get_mut(path) {
            modules.remove(id);
            if modules.is_empty() {
                self.chunk_modules.remove(path);
            }
        }
        match self.module_chunks.get_mut(id) {
            Some(chunks) => {
                chunks.remove(path);
                if chunks.is_empty() {
                    self.module_chunks.remove(id);
                    return true;
                }
                false
            }
            None => true,
        }
    }

    /// Modules of a chunk, sorted
    pub(crate) fn chunk_modules(&self, path: &ChunkPath) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self
            .chunk_modules
            .get(path)
            .map(|modules| modules.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Take the first pending evaluation whose chunk dependencies are loaded
    fn take_ready_evaluation(&mut self) -> Option<(ChunkPath, DevRuntimeParams)> {
        let index = self.pending_evaluations.iter().position(|(_, params)| {
            params.other_chunks.iter().all(|chunk| self.loaded.contains(chunk))
        })?;
        Some(self.pending_evaluations.remove(index))
    }
}

type SharedLoad = Shared<LocalBoxFuture<'static, Result<()>>>;

/// Registry of in-flight chunk loads
#[derive(Default)]
pub(crate) struct ChunkLoader {
    in_flight: RefCell<HashMap<ChunkPath, SharedLoad>>,
    /// Bumped on restart so that abandoned loads leave the registry alone
    epoch: Cell<u64>,
}

impl ChunkLoader {
    fn get(&self, path: &ChunkPath) -> Option<SharedLoad> {
        self.in_flight.borrow().get(path).cloned()
    }

    fn insert(&self, path: ChunkPath, load: SharedLoad) {
        self.in_flight.borrow_mut().insert(path, load);
    }

    /// Remove a settled load; false if it was abandoned by a restart
    fn settle(&self, path: &ChunkPath, epoch: u64) -> bool {
        if epoch != self.epoch.get() {
            return false;
        }
        self.in_flight.borrow_mut().remove(path);
        true
    }

    pub(crate) fn abandon(&self) {
        self.epoch.set(self.epoch.get() + 1);
        self.in_flight.borrow_mut().clear();
    }

    fn len(&self) -> usize {
        self.in_flight.borrow().len()
    }
}

impl Runtime {
    /// Register a chunk's factories and evaluate its entries when ready
    ///
    /// A factory already registered under the same id is kept. Entries run as
    /// soon as every chunk listed in `other_chunks` has been registered.
    pub fn register_chunk(&self, registration: ChunkRegistration) -> Result<()> {
        let ChunkRegistration {
            path,
            modules,
            params,
        } = registration;
        debug!(chunk = %path, modules = modules.len(), "registering chunk");

        {
            let mut factories = self.inner.factories.borrow_mut();
            let mut chunks = self.inner.chunks.borrow_mut();
            for (id, factory) in modules {
                chunks.add_module_to_chunk(&id, &path);
                factories.entry(id).or_insert(factory);
            }
            chunks.mark_loaded(&path);
            if let Some(params) = params {
                chunks.pending_evaluations.push((path, params));
            }
        }

        self.evaluate_ready_chunks()
    }

    fn evaluate_ready_chunks(&self) -> Result<()> {
        loop {
            let ready = self.inner.chunks.borrow_mut().take_ready_evaluation();
            let Some((path, params)) = ready else {
                break;
            };
            for id in &params.runtime_module_ids {
                self.get_or_instantiate_runtime_module(id, &path)?;
            }
        }

        let chunks = self.inner.chunks.borrow();
        for (path, params) in &chunks.pending_evaluations {
            trace!(chunk = %path, waiting_for = ?params.other_chunks, "deferring chunk evaluation");
        }
        Ok(())
    }

    /// Register every queued chunk, including ones queued while draining
    pub fn drain_registrations(&self) -> Result<usize> {
        let mut drained = 0;
        while let Some(registration) = self.inner.registrations.pop() {
            self.register_chunk(registration)?;
            drained += 1;
        }
        Ok(drained)
    }

    pub fn is_chunk_loaded(&self, path: &ChunkPath) -> bool {
        self.inner.chunks.borrow().is_loaded(path)
    }

    /// Number of chunk loads currently in flight
    pub fn pending_loads(&self) -> usize {
        self.inner.loader.len()
    }

    /// Load a chunk, sharing any load of the same chunk already in flight
    ///
    /// The returned future resolves once the chunk's factories are
    /// registered. A chunk that is already registered resolves immediately.
    pub fn load_chunk(
        &self,
        path: impl Into<ChunkPath>,
        source: SourceInfo,
    ) -> LocalBoxFuture<'static, Result<()>> {
        let path = path.into();
        if self.is_chunk_loaded(&path) {
            return future::ready(Ok(())).boxed_local();
        }
        if let Some(load) = self.inner.loader.get(&path) {
            trace!(chunk = %path, "joining in-flight chunk load");
            return load.boxed_local();
        }

        debug!(chunk = %path, source = ?source, "loading chunk");
        let fetch = self.inner.backend.load_chunk(&path, &source);
        let epoch = self.inner.loader.epoch.get();
        let runtime = Rc::downgrade(&self.inner);
        let chunk = path.clone();

        let load = async move {
            let result = fetch.await;
            let Some(inner) = runtime.upgrade() else {
                return result;
            };
            let runtime = Runtime { inner };
            if !runtime.inner.loader.settle(&chunk, epoch) {
                // Abandoned by a restart: what it fetched belongs to the old state.
                let dropped = runtime.inner.registrations.discard(&chunk);
                debug!(chunk = %chunk, dropped, "abandoned chunk load settled");
                return result;
            }

            match result {
                Ok(()) => {
                    runtime.drain_registrations()?;
                    if runtime.is_chunk_loaded(&chunk) {
                        Ok(())
                    } else {
                        Err(Error::ChunkNotRegistered(chunk))
                    }
                }
                Err(err) => {
                    let err = Error::chunk_load_failed(&chunk, &source, &err);
                    warn!(error = %err, "chunk load failed");
                    Err(err)
                }
            }
        }
        .boxed_local()
        .shared();

        self.inner.loader.insert(path, load.clone());
        load.boxed_local()
    }

    /// Fetch a fresh copy of a chunk, if the backend supports it
    pub fn reload_chunk(&self, path: impl Into<ChunkPath>) -> LocalBoxFuture<'static, Result<()>> {
        let path = path.into();
        match self.inner.backend.reload_chunk(&path) {
            Some(reload) => reload,
            None => future::ready(Err(Error::Unsupported(format!("reloading chunk {}", path))))
                .boxed_local(),
        }
    }

    /// Forget a chunk and ask the backend to remove its content
    ///
    /// Returns false when the backend cannot unload chunks.
    pub fn unload_chunk(&self, path: &ChunkPath) -> bool {
        self.inner.chunks.borrow_mut().loaded.remove(path);
        let supported = self.inner.backend.unload_chunk(path);
        if !supported {
            debug!(chunk = %path, "backend cannot unload chunks");
        }
        supported
    }

    /// Record a chunk list and subscribe to its updates
    ///
    /// Updates addressed to `list_path` are applied as hot updates; if they
    /// cannot be, the runtime restarts.
    pub fn register_chunk_list(
        &self,
        list_path: impl Into<ChunkPath>,
        chunk_paths: Vec<ChunkPath>,
    ) -> Vec<Error> {
        let list_path = list_path.into();
        self.inner
            .chunks
            .borrow_mut()
            .chunk_lists
            .insert(list_path.clone(), chunk_paths);

        let runtime = Rc::downgrade(&self.inner);
        let list = list_path.clone();
        self.register_update_listener(list_path, move |message| match runtime.upgrade() {
            Some(inner) => Runtime { inner }.handle_server_message(&list, message),
            None => Ok(()),
        })
    }

    /// Chunks listed by a registered chunk list
    pub fn chunk_list(&self, list_path: &ChunkPath) -> Option<Vec<ChunkPath>> {
        self.inner.chunks.borrow().chunk_lists.get(list_path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::factory;
    use std::cell::Cell;

    fn id(name: &str) -> ModuleId {
        ModuleId::from(name)
    }

    #[test]
    fn test_first_factory_wins() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("a.js").module(
                "shared.js",
                factory(|ctx| {
                    ctx.exports().set("from", "a");
                    Ok(())
                }),
            ))
            .unwrap();
        runtime
            .register_chunk(ChunkRegistration::new("b.js").module(
                "shared.js",
                factory(|ctx| {
                    ctx.exports().set("from", "b");
                    Ok(())
                }),
            ))
            .unwrap();

        let module = runtime
            .get_or_instantiate(&id("shared.js"), SourceInfo::Update { parents: None })
            .unwrap();
        assert_eq!(module.borrow().exports.get("from").as_str(), Some("a"));
    }

    #[test]
    fn test_entries_wait_for_other_chunks() {
        let runtime = Runtime::default();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();

        runtime
            .register_chunk(
                ChunkRegistration::new("runtime.js")
                    .module(
                        "entry.js",
                        factory(move |ctx| {
                            counter.set(counter.get() + 1);
                            ctx.require("lib.js")?;
                            Ok(())
                        }),
                    )
                    .params(DevRuntimeParams {
                        other_chunks: vec![ChunkPath::from("lib-chunk.js")],
                        runtime_module_ids: vec![id("entry.js")],
                    }),
            )
            .unwrap();
        assert_eq!(runs.get(), 0);

        runtime
            .register_chunk(ChunkRegistration::new("lib-chunk.js").module("lib.js", factory(|_| Ok(()))))
            .unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(runtime.runtime_modules(), vec![id("entry.js")]);
    }

    #[test]
    fn test_drain_picks_up_late_registrations() {
        let runtime = Runtime::default();
        let queue = runtime.registrations();
        let late = queue.clone();

        queue.push(
            ChunkRegistration::new("first.js")
                .module(
                    "first-entry.js",
                    factory(move |_| {
                        late.push(ChunkRegistration::new("second.js"));
                        Ok(())
                    }),
                )
                .params(DevRuntimeParams {
                    other_chunks: vec![],
                    runtime_module_ids: vec![id("first-entry.js")],
                }),
        );

        assert_eq!(runtime.drain_registrations().unwrap(), 2);
        assert!(runtime.is_chunk_loaded(&ChunkPath::from("second.js")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_module_from_chunk() {
        let mut registry = ChunkRegistry::default();
        let shared = id("shared.js");
        registry.add_module_to_chunk(&shared, &ChunkPath::from("a.js"));
        registry.add_module_to_chunk(&shared, &ChunkPath::from("b.js"));

        assert!(!registry.remove_module_from_chunk(&shared, &ChunkPath::from("a.js")));
        assert!(registry.remove_module_from_chunk(&shared, &ChunkPath::from("b.js")));
        assert!(registry.chunk_modules(&ChunkPath::from("a.js")).is_empty());
    }

    #[test]
    fn test_noop_backend_cannot_fetch() {
        let runtime = Runtime::default();
        let result = futures::executor::block_on(runtime.load_chunk(
            "missing.js",
            SourceInfo::Parent {
                parent_id: id("app.js"),
            },
        ));
        match result {
            Err(Error::ChunkLoadFailed { reason, .. }) => assert_eq!(reason, "from module app.js"),
            other => panic!("expected load failure, got {:?}", other),
        }
        assert_eq!(runtime.pending_loads(), 0);
    }

    #[test]
    fn test_unload_without_backend_support() {
        let runtime = Runtime::default();
        runtime.register_chunk(ChunkRegistration::new("a.js")).unwrap();
        assert!(!runtime.unload_chunk(&ChunkPath::from("a.js")));
        assert!(!runtime.is_chunk_loaded(&ChunkPath::from("a.js")));
    }
}
