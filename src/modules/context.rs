//! Execution context handed to module factories
//!
//! A factory never sees the runtime's registries. It gets a [`ModuleContext`]
//! exposing only capabilities: its own exports, require/import by id, export
//! declaration, its hot handle, a read-only view of the cache, and chunk
//! loading. Contexts are cheap to clone, so handlers registered during
//! evaluation (accept callbacks, for instance) may keep one around.

use crate::error::Result;
use crate::hmr::Hot;
use crate::modules::{ChunkPath, ModuleId, ModuleRef, SourceInfo};
use crate::runtime::Runtime;
use crate::value::{interop_namespace, ExportFlags, Exports, Getter, Value};
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::rc::Rc;

/// Capabilities available to a running module factory
#[derive(Clone)]
pub struct ModuleContext {
    runtime: Runtime,
    module: ModuleRef,
    id: ModuleId,
    exports: Exports,
    hot: Hot,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext").field("id", &self.id).finish()
    }
}

impl ModuleContext {
    pub(crate) fn new(runtime: Runtime, module: ModuleRef) -> Self {
        let (id, exports, hot) = {
            let record = module.borrow();
            (record.id.clone(), record.exports.clone(), record.hot.clone())
        };
        Self {
            runtime,
            module,
            id,
            exports,
            hot,
        }
    }

    /// Id of the module being evaluated
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// This module's exports object
    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// This module's record
    pub fn module(&self) -> ModuleRef {
        self.module.clone()
    }

    /// This module's hot handle
    pub fn hot(&self) -> &Hot {
        &self.hot
    }

    /// Read-only view of the module cache
    pub fn cache(&self) -> CacheHandle {
        CacheHandle {
            runtime: self.runtime.clone(),
        }
    }

    /// Require a module CommonJS style, returning its exports object
    ///
    /// A module that is still evaluating (a dependency cycle) returns its
    /// in-progress exports. A module whose factory failed re-raises its error.
    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports> {
        let module = self.runtime.get_or_instantiate_from_parent(&id.into(), &self.module)?;
        let record = module.borrow();
        if let Some(err) = &record.error {
            return Err(err.clone());
        }
        Ok(record.exports.clone())
    }

    /// Import a module ES-module style, returning a namespace object
    ///
    /// ES-module exports are returned as they are. Other exports are wrapped
    /// in a namespace that is built once and cached on the module record.
    pub fn import(&self, id: impl Into<ModuleId>, allow_export_default: bool) -> Result<Exports> {
        let module = self.runtime.get_or_instantiate_from_parent(&id.into(), &self.module)?;
        let mut record = module.borrow_mut();
        if let Some(err) = &record.error {
            return Err(err.clone());
        }
        if let Some(namespace) = &record.interop_namespace {
            return Ok(namespace.clone());
        }
        if record.exports.is_es_module() {
            return Ok(record.exports.clone());
        }

        let namespace = Exports::new();
        interop_namespace(&record.exports, &namespace, allow_export_default);
        record.interop_namespace = Some(namespace.clone());
        record.interop_allow_default = allow_export_default;
        Ok(namespace)
    }

    /// Declare ES-module exports backed by getters
    pub fn esm_export<I, S>(&self, getters: I)
    where
        I: IntoIterator<Item = (S, Getter)>,
        S: Into<String>,
    {
        self.exports.insert_flags(ExportFlags::ES_MODULE);
        for (name, getter) in getters {
            self.exports.define_getter(name, getter);
        }
    }

    /// Export a single value as the whole module
    pub fn export_value(&self, value: impl Into<Value>) {
        self.exports.set_value(value.into());
    }

    /// Load a chunk on behalf of this module
    pub fn load_chunk(&self, path: impl Into<ChunkPath>) -> LocalBoxFuture<'static, Result<()>> {
        self.runtime.load_chunk(
            path,
            SourceInfo::Parent {
                parent_id: self.id.clone(),
            },
        )
    }

    /// Helpers injected by a UI live-editing integration, if any
    pub fn refresh_helpers(&self) -> Option<Rc<dyn Any>> {
        self.runtime.refresh_helpers()
    }
}

/// Read-only access to the module cache
#[derive(Clone)]
pub struct CacheHandle {
    runtime: Runtime,
}

impl CacheHandle {
    pub fn get(&self, id: &ModuleId) -> Option<ModuleRef> {
        self.runtime.get(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.runtime.get(id).is_some()
    }

    /// Ids of all cached modules, sorted
    pub fn ids(&self) -> Vec<ModuleId> {
        self.runtime.module_ids()
    }

    pub fn len(&self) -> usize {
        self.runtime.module_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
