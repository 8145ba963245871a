//! Applying hot updates to a running module graph
//!
//! An update goes through three phases. First the changed modules are
//! classified against the graph as it is, before anything is touched; a single
//! rejection rejects the whole update. Then chunk membership is updated, which
//! tells us which deleted modules are gone for good. Finally outdated modules
//! are disposed children first, the new factories are installed and the
//! self-accepting modules are instantiated again.

use super::{compute_outdated_modules, order_bottom_up, AcceptCallback, AcceptErrorHandler, HotData, OutdatedModules};
use crate::error::{Error, Result};
use crate::modules::{ChunkPath, ModuleFactory, ModuleId, SourceInfo};
use crate::protocol::{ChunkUpdate, EcmascriptMergedUpdate, IssueSeverity, ServerMessage};
use crate::runtime::Runtime;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// What happens to a module's hot data when it is disposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeMode {
    /// The module is replaced; its dispose data goes to the next instance
    Replace,
    /// The module is removed; its hot data is dropped
    Clear,
}

/// Summary of an applied update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedUpdate {
    pub outdated_modules: Vec<ModuleId>,
    /// Modules removed along with their chunks
    pub disposed_modules: Vec<ModuleId>,
    pub reinstantiated: Vec<ModuleId>,
    /// Update rounds, including rounds for invalidated modules
    pub rounds: usize,
}

#[derive(Debug, Default)]
struct ChangedModules {
    added: Vec<ModuleId>,
    modified: Vec<ModuleId>,
    deleted: Vec<ModuleId>,
    chunks_added: Vec<(ChunkPath, Vec<ModuleId>)>,
    chunks_deleted: Vec<(ChunkPath, Vec<ModuleId>)>,
    /// Chunks deleted as a whole
    chunks_removed: Vec<ChunkPath>,
}

/// Accept callback of a parent, with the dependencies it is called for
struct PendingCallback {
    parent: ModuleId,
    callback: AcceptCallback,
    dependencies: Vec<ModuleId>,
}

impl Runtime {
    /// Apply a merged update: new factories plus chunk membership changes
    ///
    /// Nothing is modified when the update is rejected. Any other error leaves
    /// the runtime in an indeterminate state; callers restart.
    pub fn apply_merged_update(&self, update: &EcmascriptMergedUpdate) -> Result<AppliedUpdate> {
        let changed = self.compute_changed_modules(update);
        debug!(
            added = ?changed.added,
            modified = ?changed.modified,
            deleted = ?changed.deleted,
            "applying update"
        );

        let outdated = {
            let cache = self.inner.cache.borrow();
            let runtime_modules = self.inner.runtime_modules.borrow();
            compute_outdated_modules(&cache, &runtime_modules, &changed.modified)?
        };
        let disposed = self.update_chunks_phase(&changed);
        self.apply_internal(outdated, disposed, update.entries.clone())
    }

    /// Replace the modules that invalidated themselves since the last update
    pub fn apply_invalidations(&self) -> Result<AppliedUpdate> {
        if self.inner.invalidations.is_empty() {
            return Ok(AppliedUpdate::default());
        }
        self.apply_internal(OutdatedModules::default(), Vec::new(), Vec::new())
    }

    /// Route a server message received for the chunk list `list`
    pub(crate) fn handle_server_message(&self, list: &ChunkPath, message: &ServerMessage) -> Result<()> {
        match message {
            ServerMessage::Restart => {
                info!(chunk_list = %list, "server requested a restart");
                self.restart();
                Ok(())
            }
            ServerMessage::NotFound => {
                warn!(chunk_list = %list, "chunk list no longer exists on the server");
                self.restart();
                Ok(())
            }
            ServerMessage::Issues(issues) => {
                for issue in issues {
                    match issue.severity {
                        IssueSeverity::Error => {
                            error!(file = %issue.file_path, "{}", issue.title)
                        }
                        IssueSeverity::Warning => {
                            warn!(file = %issue.file_path, "{}", issue.title)
                        }
                        IssueSeverity::Info => info!(file = %issue.file_path, "{}", issue.title),
                    }
                }
                Ok(())
            }
            ServerMessage::Partial(update) => match self.apply_merged_update(update) {
                Ok(applied) => {
                    info!(
                        chunk_list = %list,
                        outdated = applied.outdated_modules.len(),
                        rounds = applied.rounds,
                        "applied update"
                    );
                    Ok(())
                }
                Err(err) if self.inner.config.restart_on_apply_failure => {
                    error!(chunk_list = %list, error = %err, "cannot apply update, restarting");
                    self.restart();
                    Ok(())
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Run a module's dispose handlers and remove it from the cache
    pub(crate) fn dispose_module(&self, id: &ModuleId, mode: DisposeMode) -> Result<()> {
        let Some(module) = self.get(id) else {
            return Ok(());
        };
        let (hot, children) = {
            let record = module.borrow();
            (record.hot.clone(), record.children.clone())
        };

        let mut data = HotData::new();
        for handler in hot.dispose_handlers() {
            handler(&mut data).map_err(|err| Error::DisposeFailed {
                id: id.clone(),
                message: err.to_string(),
            })?;
        }
        hot.deactivate();

        let removed = self.inner.cache.borrow_mut().remove(id);
        drop(removed);
        for child in &children {
            if let Some(child) = self.get(child) {
                child.borrow_mut().remove_parent(id);
            }
        }

        match mode {
            DisposeMode::Replace => {
                self.inner.hot_data.borrow_mut().insert(id.clone(), data);
            }
            DisposeMode::Clear => {
                self.inner.hot_data.borrow_mut().remove(id);
            }
        }
        debug!(module = %id, mode = ?mode, "disposed module");
        Ok(())
    }

    fn compute_changed_modules(&self, update: &EcmascriptMergedUpdate) -> ChangedModules {
        let mut changed = ChangedModules::default();
        let mut added: HashSet<ModuleId> = HashSet::default();
        let mut deleted: HashSet<ModuleId> = HashSet::default();

        {
            let chunks = self.inner.chunks.borrow();
            for (path, chunk_update) in &update.chunks {
                match chunk_update {
                    ChunkUpdate::Added { modules } => {
                        added.extend(modules.iter().cloned());
                        changed.chunks_added.push((path.clone(), modules.clone()));
                    }
                    ChunkUpdate::Deleted => {
                        let modules = chunks.chunk_modules(path);
                        deleted.extend(modules.iter().cloned());
                        changed.chunks_deleted.push((path.clone(), modules));
                        changed.chunks_removed.push(path.clone());
                    }
                    ChunkUpdate::Partial {
                        added: added_modules,
                        deleted: deleted_modules,
                    } => {
                        added.extend(added_modules.iter().cloned());
                        deleted.extend(deleted_modules.iter().cloned());
                        changed.chunks_added.push((path.clone(), added_modules.clone()));
                        changed.chunks_deleted.push((path.clone(), deleted_modules.clone()));
                    }
                }
            }
        }

        // Moved from one chunk to another.
        let moved: Vec<ModuleId> = added.intersection(&deleted).cloned().collect();
        for id in &moved {
            added.remove(id);
            deleted.remove(id);
        }

        for (id, _) in &update.entries {
            if added.contains(id) {
                changed.added.push(id.clone());
            } else {
                changed.modified.push(id.clone());
            }
        }
        changed.deleted = deleted.into_iter().collect();
        changed.deleted.sort();
        changed
    }

    /// Update chunk membership; returns the modules left in no chunk
    fn update_chunks_phase(&self, changed: &ChangedModules) -> Vec<ModuleId> {
        let mut disposed = Vec::new();
        {
            let mut chunks = self.inner.chunks.borrow_mut();
            for (path, modules) in &changed.chunks_added {
                for id in modules {
                    chunks.add_module_to_chunk(id, path);
                }
                chunks.mark_loaded(path);
            }
            for (path, modules) in &changed.chunks_deleted {
                for id in modules {
                    if chunks.remove_module_from_chunk(id, path) && !disposed.contains(id) {
                        disposed.push(id.clone());
                    }
                }
            }
        }

        for path in &changed.chunks_removed {
            self.unload_chunk(path);
        }
        disposed
    }

    fn apply_internal(
        &self,
        outdated: OutdatedModules,
        disposed: Vec<ModuleId>,
        factories: Vec<(ModuleId, ModuleFactory)>,
    ) -> Result<AppliedUpdate> {
        let max_rounds = self.inner.config.max_invalidation_rounds;
        let mut applied = AppliedUpdate::default();
        let mut outdated = outdated;
        let mut disposed = disposed;
        let mut factories = factories;

        loop {
            if applied.rounds == max_rounds {
                return Err(Error::InvalidationLoop { rounds: max_rounds });
            }
            applied.rounds += 1;

            let round = self.merge_invalidations(std::mem::take(&mut outdated))?;
            self.apply_round(
                round,
                std::mem::take(&mut disposed),
                std::mem::take(&mut factories),
                &mut applied,
            )?;

            // Modules may have invalidated themselves while being instantiated.
            if self.inner.invalidations.is_empty() {
                return Ok(applied);
            }
        }
    }

    fn merge_invalidations(&self, mut outdated: OutdatedModules) -> Result<OutdatedModules> {
        let queued = self.inner.invalidations.take();
        if queued.is_empty() {
            return Ok(outdated);
        }
        debug!(modules = ?queued, "replacing invalidated modules");

        let cache = self.inner.cache.borrow();
        let invalidated = compute_outdated_modules(&cache, &self.inner.runtime_modules.borrow(), &queued)?;
        for id in invalidated.modules {
            if !outdated.contains(&id) {
                outdated.modules.push(id);
            }
        }
        for dep in invalidated.accepted_dependencies {
            if !outdated.accepted_dependencies.contains(&dep) {
                outdated.accepted_dependencies.push(dep);
            }
        }
        outdated.modules = order_bottom_up(&cache, &outdated.modules);
        Ok(outdated)
    }

    fn apply_round(
        &self,
        outdated: OutdatedModules,
        disposed: Vec<ModuleId>,
        factories: Vec<(ModuleId, ModuleFactory)>,
        applied: &mut AppliedUpdate,
    ) -> Result<()> {
        // Captured before disposal removes the records.
        let mut self_accepted: Vec<(ModuleId, Option<AcceptErrorHandler>)> = Vec::new();
        let mut parents: HashMap<ModuleId, Vec<ModuleId>> = HashMap::default();
        for id in &outdated.modules {
            let Some(module) = self.get(id) else {
                continue;
            };
            let module = module.borrow();
            if module.hot.is_self_accepted() {
                self_accepted.push((id.clone(), module.hot.self_accept_error_handler()));
            }
            parents.insert(id.clone(), module.parents.clone());
        }
        let callbacks = self.pending_callbacks(&outdated);

        for id in &outdated.modules {
            self.dispose_module(id, DisposeMode::Replace)?;
        }
        for id in &disposed {
            self.dispose_module(id, DisposeMode::Clear)?;
            self.inner.factories.borrow_mut().remove(id);
        }
        {
            let mut registered = self.inner.factories.borrow_mut();
            for (id, factory) in factories {
                registered.insert(id, factory);
            }
        }

        let mut errors = Vec::new();
        for (id, handler) in self_accepted {
            // Already required by a module instantiated earlier in this round.
            if self.get(&id).is_some() {
                continue;
            }
            let source = SourceInfo::Update {
                parents: parents.remove(&id),
            };
            match self.instantiate_module(&id, source) {
                Ok(_) => applied.reinstantiated.push(id),
                Err(err) => match handler {
                    Some(handler) => {
                        if let Err(handler_err) = handler(&err) {
                            errors.push(handler_err);
                            errors.push(err);
                        }
                    }
                    None => errors.push(err),
                },
            }
        }

        for PendingCallback {
            parent,
            callback,
            dependencies,
        } in callbacks
        {
            debug!(module = %parent, dependencies = ?dependencies, "running accept callback");
            if let Err(err) = callback(&dependencies) {
                warn!(module = %parent, error = %err, "accept callback failed");
                errors.push(err);
            }
        }

        applied.outdated_modules.extend(outdated.modules);
        applied.disposed_modules.extend(disposed);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ApplyFailed { errors })
        }
    }

    /// Accept callbacks to run once the accepted dependencies are replaced
    ///
    /// Parents that are outdated themselves are skipped: their new instance
    /// requires the dependencies again anyway.
    fn pending_callbacks(&self, outdated: &OutdatedModules) -> Vec<PendingCallback> {
        let mut pending: Vec<PendingCallback> = Vec::new();
        for dep in &outdated.accepted_dependencies {
            if outdated.contains(&dep.parent) {
                continue;
            }
            let Some(parent) = self.get(&dep.parent) else {
                continue;
            };
            let Some(callback) = parent.borrow().hot.dependency_callback(&dep.dependency) else {
                continue;
            };

            let existing = pending
                .iter_mut()
                .find(|p| p.parent == dep.parent && Rc::ptr_eq(&p.callback, &callback));
            match existing {
                Some(entry) => entry.dependencies.push(dep.dependency.clone()),
                None => pending.push(PendingCallback {
                    parent: dep.parent.clone(),
                    callback,
                    dependencies: vec![dep.dependency.clone()],
                }),
            }
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{ChunkRegistration, NoopBackend};
    use crate::modules::factory;
    use crate::protocol::Issue;
    use crate::runtime::RuntimeConfig;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    fn id(name: &str) -> ModuleId {
        ModuleId::from(name)
    }

    fn instantiate(runtime: &Runtime, name: &str) {
        runtime
            .get_or_instantiate(&id(name), SourceInfo::Update { parents: None })
            .unwrap();
    }

    fn exported(runtime: &Runtime, name: &str, key: &str) -> Option<f64> {
        runtime.get(&id(name))?.borrow().exports.get(key).as_number()
    }

    /// A self-accepting module exporting `version`
    fn versioned(version: i32) -> ModuleFactory {
        factory(move |ctx| {
            ctx.hot().accept();
            ctx.exports().set("version", version);
            Ok(())
        })
    }

    #[test]
    fn test_self_accepted_module_is_reinstantiated() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module("counter.js", versioned(1)))
            .unwrap();
        instantiate(&runtime, "counter.js");
        let before = runtime.get(&id("counter.js")).unwrap();

        let update = EcmascriptMergedUpdate::new().entry("counter.js", versioned(2));
        let applied = runtime.apply_merged_update(&update).unwrap();

        assert_eq!(applied.outdated_modules, vec![id("counter.js")]);
        assert_eq!(applied.reinstantiated, vec![id("counter.js")]);
        assert_eq!(applied.rounds, 1);
        assert_eq!(exported(&runtime, "counter.js", "version"), Some(2.0));
        assert!(!before.borrow().hot.is_active());
    }

    #[test]
    fn test_dispose_data_reaches_next_instance() {
        let runtime = Runtime::default();
        let restored = Rc::new(Cell::new(None));
        let seen = restored.clone();
        let stateful = factory(move |ctx| {
            ctx.hot().accept();
            seen.set(ctx.hot().data().get::<u32>("clicks")?);
            ctx.hot().dispose(|data| data.set("clicks", &7u32));
            Ok(())
        });
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module("button.js", stateful.clone()))
            .unwrap();
        instantiate(&runtime, "button.js");
        assert_eq!(restored.get(), None);

        runtime
            .apply_merged_update(&EcmascriptMergedUpdate::new().entry("button.js", stateful))
            .unwrap();
        assert_eq!(restored.get(), Some(7));
    }

    #[test]
    fn test_update_bubbles_to_accepting_parent() {
        let runtime = Runtime::default();
        let page_runs = Rc::new(Cell::new(0));
        let counter = page_runs.clone();
        runtime
            .register_chunk(
                ChunkRegistration::new("main.js")
                    .module(
                        "page.js",
                        factory(move |ctx| {
                            counter.set(counter.get() + 1);
                            ctx.hot().accept();
                            let label = ctx.require("label.js")?;
                            ctx.exports().set("label", label.get("text"));
                            Ok(())
                        }),
                    )
                    .module(
                        "label.js",
                        factory(|ctx| {
                            ctx.exports().set("text", "old");
                            Ok(())
                        }),
                    ),
            )
            .unwrap();
        instantiate(&runtime, "page.js");

        let update = EcmascriptMergedUpdate::new().entry(
            "label.js",
            factory(|ctx| {
                ctx.exports().set("text", "new");
                Ok(())
            }),
        );
        let applied = runtime.apply_merged_update(&update).unwrap();

        assert_eq!(applied.outdated_modules, vec![id("label.js"), id("page.js")]);
        assert_eq!(page_runs.get(), 2);
        let page = runtime.get(&id("page.js")).unwrap();
        assert_eq!(page.borrow().exports.get("label").as_str(), Some("new"));
        let label = runtime.get(&id("label.js")).unwrap();
        assert_eq!(label.borrow().parents, vec![id("page.js")]);
    }

    #[test]
    fn test_rejected_update_changes_nothing() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module(
                "plain.js",
                factory(|ctx| {
                    ctx.exports().set("version", 1);
                    Ok(())
                }),
            ))
            .unwrap();
        instantiate(&runtime, "plain.js");

        let err = runtime
            .apply_merged_update(&EcmascriptMergedUpdate::new().entry("plain.js", versioned(2)))
            .unwrap_err();
        assert!(matches!(err, Error::UpdateRejected { .. }));
        assert_eq!(exported(&runtime, "plain.js", "version"), Some(1.0));
    }

    #[test]
    fn test_dependency_accept_callback() {
        let runtime = Runtime::default();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = calls.clone();
        runtime
            .register_chunk(
                ChunkRegistration::new("main.js")
                    .module(
                        "app.js",
                        factory(move |ctx| {
                            ctx.require("style.js")?;
                            let log = log.clone();
                            let ctx_for_callback = ctx.clone();
                            ctx.hot().accept_dependencies([id("style.js")], move |deps| {
                                log.borrow_mut().extend(deps.iter().cloned());
                                ctx_for_callback.require("style.js")?;
                                Ok(())
                            });
                            Ok(())
                        }),
                    )
                    .module("style.js", factory(|_| Ok(()))),
            )
            .unwrap();
        instantiate(&runtime, "app.js");
        let app = runtime.get(&id("app.js")).unwrap();

        let applied = runtime
            .apply_merged_update(&EcmascriptMergedUpdate::new().entry("style.js", factory(|_| Ok(()))))
            .unwrap();

        assert_eq!(applied.outdated_modules, vec![id("style.js")]);
        assert_eq!(*calls.borrow(), vec![id("style.js")]);
        assert!(Rc::ptr_eq(&app, &runtime.get(&id("app.js")).unwrap()));
        assert!(runtime.get(&id("style.js")).is_some());
    }

    #[test]
    fn test_deleted_chunk_disposes_its_modules() {
        let runtime = Runtime::default();
        let cleaned = Rc::new(Cell::new(false));
        let flag = cleaned.clone();
        runtime
            .register_chunk(ChunkRegistration::new("lazy.js").module(
                "widget.js",
                factory(move |ctx| {
                    let flag = flag.clone();
                    ctx.hot().dispose(move |_| {
                        flag.set(true);
                        Ok(())
                    });
                    Ok(())
                }),
            ))
            .unwrap();
        instantiate(&runtime, "widget.js");

        let update = EcmascriptMergedUpdate::new().chunk("lazy.js", ChunkUpdate::Deleted);
        let applied = runtime.apply_merged_update(&update).unwrap();

        assert_eq!(applied.disposed_modules, vec![id("widget.js")]);
        assert!(cleaned.get());
        assert!(runtime.get(&id("widget.js")).is_none());
        assert!(!runtime.has_factory(&id("widget.js")));
        assert!(!runtime.is_chunk_loaded(&ChunkPath::from("lazy.js")));
    }

    #[test]
    fn test_module_moved_between_chunks_is_modified() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("a.js").module("moving.js", versioned(1)))
            .unwrap();
        instantiate(&runtime, "moving.js");

        let update = EcmascriptMergedUpdate::new()
            .entry("moving.js", versioned(2))
            .chunk(
                "b.js",
                ChunkUpdate::Added {
                    modules: vec![id("moving.js")],
                },
            )
            .chunk(
                "a.js",
                ChunkUpdate::Partial {
                    added: vec![],
                    deleted: vec![id("moving.js")],
                },
            );
        let applied = runtime.apply_merged_update(&update).unwrap();

        assert!(applied.disposed_modules.is_empty());
        assert_eq!(applied.reinstantiated, vec![id("moving.js")]);
        assert!(runtime.is_chunk_loaded(&ChunkPath::from("b.js")));
        assert_eq!(exported(&runtime, "moving.js", "version"), Some(2.0));
    }

    #[test]
    fn test_invalidated_module_is_replaced() {
        let runtime = Runtime::default();
        let root_runs = Rc::new(Cell::new(0));
        let counter = root_runs.clone();
        runtime
            .register_chunk(
                ChunkRegistration::new("main.js")
                    .module(
                        "root.js",
                        factory(move |ctx| {
                            counter.set(counter.get() + 1);
                            ctx.hot().accept();
                            ctx.require("leaf.js")?;
                            Ok(())
                        }),
                    )
                    .module("leaf.js", factory(|_| Ok(()))),
            )
            .unwrap();
        instantiate(&runtime, "root.js");

        runtime.get(&id("leaf.js")).unwrap().borrow().hot.invalidate();
        let applied = runtime.apply_invalidations().unwrap();

        assert_eq!(applied.outdated_modules, vec![id("leaf.js"), id("root.js")]);
        assert_eq!(root_runs.get(), 2);
        assert!(runtime.apply_invalidations().unwrap().outdated_modules.is_empty());
    }

    #[test]
    fn test_invalidation_rounds_are_bounded() {
        let config = RuntimeConfig {
            max_invalidation_rounds: 3,
            ..RuntimeConfig::default()
        };
        let runtime = Runtime::with_config(Rc::new(NoopBackend), config);
        runtime
            .register_chunk(
                ChunkRegistration::new("main.js")
                    .module(
                        "root.js",
                        factory(|ctx| {
                            ctx.hot().accept();
                            ctx.require("restless.js")?;
                            Ok(())
                        }),
                    )
                    .module(
                        "restless.js",
                        factory(|ctx| {
                            ctx.hot().invalidate();
                            Ok(())
                        }),
                    ),
            )
            .unwrap();
        instantiate(&runtime, "root.js");

        let err = runtime.apply_invalidations().unwrap_err();
        assert_eq!(err, Error::InvalidationLoop { rounds: 3 });
        assert!(err.requires_restart());
    }

    #[test]
    fn test_reinstantiation_error_goes_to_handler() {
        let runtime = Runtime::default();
        let handled = Rc::new(RefCell::new(None));
        let sink = handled.clone();
        let first = factory(move |ctx| {
            let sink = sink.clone();
            ctx.hot().accept_with_error_handler(move |err| {
                *sink.borrow_mut() = Some(err.clone());
                Ok(())
            });
            Ok(())
        });
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module("fragile.js", first))
            .unwrap();
        instantiate(&runtime, "fragile.js");

        let update = EcmascriptMergedUpdate::new()
            .entry("fragile.js", factory(|_| Err(Error::thrown("SyntaxError: oops"))));
        runtime.apply_merged_update(&update).unwrap();

        assert_eq!(*handled.borrow(), Some(Error::thrown("SyntaxError: oops")));
    }

    #[test]
    fn test_reinstantiation_error_without_handler_fails() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module("fragile.js", versioned(1)))
            .unwrap();
        instantiate(&runtime, "fragile.js");

        let update = EcmascriptMergedUpdate::new()
            .entry("fragile.js", factory(|_| Err(Error::thrown("SyntaxError: oops"))));
        match runtime.apply_merged_update(&update) {
            Err(Error::ApplyFailed { errors }) => {
                assert_eq!(errors, vec![Error::thrown("SyntaxError: oops")])
            }
            other => panic!("expected apply failure, got {:?}", other),
        }
    }

    #[test]
    fn test_failing_dispose_handler_aborts() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module(
                "stubborn.js",
                factory(|ctx| {
                    ctx.hot().accept();
                    ctx.hot().dispose(|_| Err(Error::thrown("cannot let go")));
                    Ok(())
                }),
            ))
            .unwrap();
        instantiate(&runtime, "stubborn.js");

        let err = runtime
            .apply_merged_update(&EcmascriptMergedUpdate::new().entry("stubborn.js", versioned(2)))
            .unwrap_err();
        assert!(matches!(err, Error::DisposeFailed { .. }));
        assert!(err.requires_restart());
    }

    #[test]
    fn test_server_messages() {
        let runtime = Runtime::default();
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module(
                "plain.js",
                factory(|_| Ok(())),
            ))
            .unwrap();
        instantiate(&runtime, "plain.js");
        let errors = runtime.register_chunk_list("list.json", vec![ChunkPath::from("main.js")]);
        assert!(errors.is_empty());

        let issues = ServerMessage::Issues(vec![Issue {
            severity: IssueSeverity::Warning,
            file_path: "plain.js".to_string(),
            title: "unused variable".to_string(),
        }]);
        assert!(runtime.deliver_update("list.json", issues).is_empty());
        assert_eq!(runtime.restart_count(), 0);

        // Nobody accepts plain.js: the runtime falls back to a restart.
        let update = EcmascriptMergedUpdate::new().entry("plain.js", factory(|_| Ok(())));
        assert!(runtime
            .deliver_update("list.json", ServerMessage::Partial(update))
            .is_empty());
        assert_eq!(runtime.restart_count(), 1);
        assert!(runtime.module_ids().is_empty());
    }

    #[test]
    fn test_apply_failure_without_restart_is_reported() {
        let config = RuntimeConfig {
            restart_on_apply_failure: false,
            ..RuntimeConfig::default()
        };
        let runtime = Runtime::with_config(Rc::new(NoopBackend), config);
        runtime
            .register_chunk(ChunkRegistration::new("main.js").module(
                "plain.js",
                factory(|_| Ok(())),
            ))
            .unwrap();
        instantiate(&runtime, "plain.js");

        let result = runtime.handle_server_message(
            &ChunkPath::from("list.json"),
            &ServerMessage::Partial(EcmascriptMergedUpdate::new().entry("plain.js", factory(|_| Ok(())))),
        );
        assert!(matches!(result, Err(Error::UpdateRejected { .. })));
        assert_eq!(runtime.restart_count(), 0);
    }
}
