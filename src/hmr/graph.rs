//! Module graphs described as data
//!
//! Lets update classification run against a graph read from JSON, without
//! evaluating any module code:
//!
//! ```json
//! {
//!   "modules": [
//!     { "id": "app.js", "runtime": true },
//!     { "id": "page.js", "parents": ["app.js"], "accept": true },
//!     { "id": "button.js", "parents": ["page.js"] }
//!   ]
//! }
//! ```

use super::{get_affected_module_effects, Hot, HotData, InvalidationQueue, ModuleEffect};
use crate::error::Result;
use crate::modules::{Module, ModuleCache, ModuleId};
use rustc_hash::FxHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Hot-update behaviour of one module in a graph description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSpec {
    pub id: ModuleId,
    /// Modules that require this one, in require order
    pub parents: Vec<ModuleId>,
    pub accept: bool,
    pub decline: bool,
    /// Dependencies whose updates this module accepts
    pub accept_dependencies: Vec<ModuleId>,
    /// Instantiated as a chunk entry
    pub runtime: bool,
}

/// A module graph read from JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub modules: Vec<ModuleSpec>,
}

impl GraphSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build module records for every described module
    pub fn build(&self) -> ModuleGraph {
        let mut cache = ModuleCache::new();
        let mut runtime_modules = HashSet::default();
        let queue = InvalidationQueue::default();

        for spec in &self.modules {
            let hot = Hot::new(spec.id.clone(), HotData::new(), queue.clone());
            if spec.accept {
                hot.accept();
            }
            if spec.decline {
                hot.decline();
            }
            if !spec.accept_dependencies.is_empty() {
                hot.accept_dependencies(spec.accept_dependencies.iter().cloned(), |_| Ok(()));
            }
            if spec.runtime {
                runtime_modules.insert(spec.id.clone());
            }
            cache.insert(Rc::new(RefCell::new(Module::new(spec.id.clone(), Vec::new(), hot))));
        }
        for spec in &self.modules {
            for parent in &spec.parents {
                cache.link(parent, &spec.id);
            }
        }

        ModuleGraph {
            cache,
            runtime_modules,
        }
    }
}

/// Module records built from a [`GraphSpec`]
#[derive(Debug, Default)]
pub struct ModuleGraph {
    pub cache: ModuleCache,
    pub runtime_modules: HashSet<ModuleId>,
}

impl ModuleGraph {
    /// Classify an update of `id`
    pub fn effect(&self, id: &ModuleId) -> ModuleEffect {
        get_affected_module_effects(&self.cache, &self.runtime_modules, id)
    }
}
