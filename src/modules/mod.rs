//! Module records and the module cache
//!
//! Every instantiated module has exactly one [`Module`] record in the
//! [`ModuleCache`]. Records are created *before* their factory runs, which is
//! what lets a dependency cycle resolve: the second request for a module that
//! is still evaluating finds the in-progress record and receives its
//! (partially populated) exports instead of running the factory again.
//!
//! # Example
//! ```text
//! // a.js
//! const b = require("b.js");   // b.js requires a.js back and sees a's
//! exports.ready = true;        // in-progress exports object
//! ```

pub mod context;

pub use context::{CacheHandle, ModuleContext};

use crate::error::{Error, Result};
use crate::hmr::Hot;
use crate::value::Exports;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Module identifier
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub String);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Path of a chunk, as emitted by the build tool
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkPath(pub String);

impl std::fmt::Display for ChunkPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChunkPath {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for ChunkPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// The executable unit that populates a module's exports
///
/// A factory runs once per instantiation. It reports failure by returning an
/// error; the error is recorded on the module and re-raised to the requester.
pub type ModuleFactory = Rc<dyn Fn(&ModuleContext) -> Result<()>>;

/// Wrap a closure as a module factory
pub fn factory<F>(f: F) -> ModuleFactory
where
    F: Fn(&ModuleContext) -> Result<()> + 'static,
{
    Rc::new(f)
}

/// Why a module is being instantiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInfo {
    /// Pulled in by an evaluated chunk's entry list
    Runtime { chunk_path: ChunkPath },
    /// Pulled in because another module required it
    Parent { parent_id: ModuleId },
    /// Pulled in while applying a hot update
    Update { parents: Option<Vec<ModuleId>> },
}

/// One instantiated module
#[derive(Debug)]
pub struct Module {
    pub id: ModuleId,
    /// Exports object, mutated in place and never replaced
    pub exports: Exports,
    /// Set at most once, when the factory fails
    pub error: Option<Error>,
    /// True once the factory completed without error
    pub loaded: bool,
    /// Modules this module required, in first-require order
    pub children: Vec<ModuleId>,
    /// Modules that required this module, in first-require order
    pub parents: Vec<ModuleId>,
    pub hot: Hot,
    /// Cached namespace view used by default-style imports
    pub(crate) interop_namespace: Option<Exports>,
    /// `allow_export_default` the namespace was built with
    pub(crate) interop_allow_default: bool,
}

/// Shared handle to a module record
pub type ModuleRef = Rc<RefCell<Module>>;

impl Module {
    pub fn new(id: ModuleId, parents: Vec<ModuleId>, hot: Hot) -> Self {
        Self {
            id,
            exports: Exports::new(),
            error: None,
            loaded: false,
            children: Vec::new(),
            parents,
            hot,
            interop_namespace: None,
            interop_allow_default: false,
        }
    }

    /// True while the factory is running (or was interrupted without error)
    pub fn is_evaluating(&self) -> bool {
        !self.loaded && self.error.is_none()
    }

    pub fn add_child(&mut self, id: &ModuleId) {
        if !self.children.contains(id) {
            self.children.push(id.clone());
        }
    }

    pub fn add_parent(&mut self, id: &ModuleId) {
        if !self.parents.contains(id) {
            self.parents.push(id.clone());
        }
    }

    pub fn remove_parent(&mut self, id: &ModuleId) {
        self.parents.retain(|parent| parent != id);
    }

    pub fn interop_namespace(&self) -> Option<&Exports> {
        self.interop_namespace.as_ref()
    }
}

/// Arena of module records, keyed by module id
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: HashMap<ModuleId, ModuleRef>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a module record
    pub fn get(&self, id: &ModuleId) -> Option<ModuleRef> {
        self.modules.get(id).cloned()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    /// Insert a record, replacing any previous record for the same id
    pub fn insert(&mut self, module: ModuleRef) {
        let id = module.borrow().id.clone();
        self.modules.insert(id, module);
    }

    /// Remove a record; absent ids are ignored
    pub fn remove(&mut self, id: &ModuleId) -> Option<ModuleRef> {
        self.modules.remove(id)
    }

    /// Record that `parent` required `child`, on both records
    pub fn link(&self, parent: &ModuleId, child: &ModuleId) {
        if let Some(module) = self.modules.get(parent) {
            module.borrow_mut().add_child(child);
        }
        if let Some(module) = self.modules.get(child) {
            module.borrow_mut().add_parent(parent);
        }
    }

    /// Ids of all cached modules, sorted
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.modules.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn clear(&mut self) {
        self.modules.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ModuleRef {
        Rc::new(RefCell::new(Module::new(
            ModuleId::from(id),
            Vec::new(),
            Hot::default(),
        )))
    }

    #[test]
    fn test_link_is_mutual() {
        let mut cache = ModuleCache::new();
        cache.insert(record("a.js"));
        cache.insert(record("b.js"));
        cache.link(&ModuleId::from("a.js"), &ModuleId::from("b.js"));
        cache.link(&ModuleId::from("a.js"), &ModuleId::from("b.js"));

        let a = cache.get(&ModuleId::from("a.js")).unwrap();
        let b = cache.get(&ModuleId::from("b.js")).unwrap();
        assert_eq!(a.borrow().children, vec![ModuleId::from("b.js")]);
        assert_eq!(b.borrow().parents, vec![ModuleId::from("a.js")]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut cache = ModuleCache::new();
        assert!(cache.remove(&ModuleId::from("missing.js")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_new_module_is_evaluating() {
        let module = record("a.js");
        assert!(module.borrow().is_evaluating());
        module.borrow_mut().loaded = true;
        assert!(!module.borrow().is_evaluating());
    }
}
