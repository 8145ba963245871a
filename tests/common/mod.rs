//! Shared test helpers for integration tests

use futures::future::{FutureExt, LocalBoxFuture};
use hotswap::chunks::{ChunkRegistration, RegistrationQueue, RuntimeBackend};
use hotswap::modules::{factory, ChunkPath, ModuleFactory, ModuleId, SourceInfo};
use hotswap::{Error, Runtime, RuntimeConfig};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// A backend serving chunks from memory, the way a dev server would
///
/// Fetching a chunk pushes its registration onto the runtime's queue when the
/// returned future is first polled.
#[derive(Default)]
pub struct MockBackend {
    queue: RegistrationQueue,
    served: RefCell<HashMap<ChunkPath, ChunkRegistration>>,
    failing: RefCell<HashSet<ChunkPath>>,
    fetches: RefCell<Vec<ChunkPath>>,
    restarts: Cell<u32>,
}

#[allow(dead_code)]
impl MockBackend {
    /// Serve `registration` for fetches of its path
    pub fn serve(&self, registration: ChunkRegistration) {
        self.served
            .borrow_mut()
            .insert(registration.path.clone(), registration);
    }

    /// Make fetches of `path` fail until `recover` is called
    pub fn fail(&self, path: &str) {
        self.failing.borrow_mut().insert(ChunkPath::from(path));
    }

    pub fn recover(&self, path: &str) {
        self.failing.borrow_mut().remove(&ChunkPath::from(path));
    }

    /// Number of fetches issued for `path`
    pub fn fetch_count(&self, path: &str) -> usize {
        let path = ChunkPath::from(path);
        self.fetches.borrow().iter().filter(|p| **p == path).count()
    }

    pub fn restart_count(&self) -> u32 {
        self.restarts.get()
    }
}

impl RuntimeBackend for MockBackend {
    fn load_chunk(&self, path: &ChunkPath, _source: &SourceInfo) -> LocalBoxFuture<'static, hotswap::Result<()>> {
        self.fetches.borrow_mut().push(path.clone());
        let failing = self.failing.borrow().contains(path);
        let registration = self.served.borrow().get(path).cloned();
        let queue = self.queue.clone();
        let path = path.clone();

        async move {
            if failing {
                return Err(Error::thrown(format!("network error fetching {}", path)));
            }
            if let Some(registration) = registration {
                queue.push(registration);
            }
            Ok(())
        }
        .boxed_local()
    }

    fn restart(&self) {
        self.restarts.set(self.restarts.get() + 1);
    }
}

/// A runtime wired to a fresh mock backend
#[allow(dead_code)]
pub fn mock_runtime() -> (Runtime, Rc<MockBackend>) {
    mock_runtime_with(RuntimeConfig::default())
}

#[allow(dead_code)]
pub fn mock_runtime_with(config: RuntimeConfig) -> (Runtime, Rc<MockBackend>) {
    let backend = Rc::new(MockBackend::default());
    let runtime = Runtime::from_parts(backend.clone(), config, backend.queue.clone());
    (runtime, backend)
}

#[allow(dead_code)]
pub fn id(name: &str) -> ModuleId {
    ModuleId::from(name)
}

/// A module exporting `value` under `name`
#[allow(dead_code)]
pub fn constant(name: &'static str, value: f64) -> ModuleFactory {
    factory(move |ctx| {
        ctx.exports().set(name, value);
        Ok(())
    })
}

/// Read a numeric export of a cached module
#[allow(dead_code)]
pub fn number_export(runtime: &Runtime, module: &str, name: &str) -> Option<f64> {
    runtime.get(&id(module))?.borrow().exports.get(name).as_number()
}

/// Record every call into a shared log
#[allow(dead_code)]
pub fn log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}
