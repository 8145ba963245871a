//! Update listener registry
//!
//! The development transport delivers update messages addressed by chunk
//! path. Listeners and messages may arrive in either order: a message for a
//! path nobody listens to yet is kept until the first listener for that path
//! registers.

use crate::error::{Error, Result};
use crate::modules::ChunkPath;
use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{trace, warn};

/// A listener for update messages of one chunk path
pub type UpdateCallback<M> = Rc<dyn Fn(&M) -> Result<()>>;

/// Routes update messages to listeners by chunk path
pub struct UpdateDispatcher<M> {
    listeners: RefCell<HashMap<ChunkPath, Vec<UpdateCallback<M>>>>,
    /// Messages that arrived before any listener for their path
    pending: RefCell<HashMap<ChunkPath, Vec<M>>>,
}

impl<M> Default for UpdateDispatcher<M> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(HashMap::default()),
            pending: RefCell::new(HashMap::default()),
        }
    }
}

impl<M> std::fmt::Debug for UpdateDispatcher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateDispatcher")
            .field("listeners", &self.listeners.borrow().len())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl<M> UpdateDispatcher<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, delivering any messages queued for its path
    pub fn register(&self, path: ChunkPath, listener: UpdateCallback<M>) -> Vec<Error> {
        self.listeners
            .borrow_mut()
            .entry(path.clone())
            .or_default()
            .push(listener);

        let queued = self.pending.borrow_mut().remove(&path).unwrap_or_default();
        let mut errors = Vec::new();
        for message in queued {
            trace!(chunk = %path, "delivering queued update");
            errors.extend(self.deliver(&path, message));
        }
        errors
    }

    /// Deliver a message to every listener of `path`, in registration order
    ///
    /// A failing listener does not stop the others; failures are returned.
    pub fn deliver(&self, path: &ChunkPath, message: M) -> Vec<Error> {
        // Listeners may register or deliver while being called.
        let listeners = self.listeners.borrow().get(path).cloned().unwrap_or_default();
        if listeners.is_empty() {
            trace!(chunk = %path, "no listener yet, queueing update");
            self.pending
                .borrow_mut()
                .entry(path.clone())
                .or_default()
                .push(message);
            return Vec::new();
        }

        let mut errors = Vec::new();
        for listener in listeners {
            if let Err(err) = listener(&message) {
                warn!(chunk = %path, error = %err, "update listener failed");
                errors.push(err);
            }
        }
        errors
    }

    /// Number of listeners registered for `path`
    pub fn listener_count(&self, path: &ChunkPath) -> usize {
        self.listeners.borrow().get(path).map_or(0, Vec::len)
    }

    /// Number of messages waiting for a listener on `path`
    pub fn pending_count(&self, path: &ChunkPath) -> usize {
        self.pending.borrow().get(path).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
        self.pending.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, name: &'static str) -> UpdateCallback<String> {
        let log = log.clone();
        Rc::new(move |message: &String| -> Result<()> {
            log.borrow_mut().push(format!("{}:{}", name, message));
            Ok(())
        })
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let dispatcher = UpdateDispatcher::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let path = ChunkPath::from("list.json");

        dispatcher.register(path.clone(), recorder(&log, "first"));
        dispatcher.register(path.clone(), recorder(&log, "second"));
        dispatcher.deliver(&path, "update".to_string());

        assert_eq!(*log.borrow(), vec!["first:update", "second:update"]);
    }

    #[test]
    fn test_message_before_listener_is_queued() {
        let dispatcher = UpdateDispatcher::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let path = ChunkPath::from("list.json");

        dispatcher.deliver(&path, "early".to_string());
        assert_eq!(dispatcher.pending_count(&path), 1);

        dispatcher.register(path.clone(), recorder(&log, "late"));
        assert_eq!(*log.borrow(), vec!["late:early"]);
        assert_eq!(dispatcher.pending_count(&path), 0);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let dispatcher = UpdateDispatcher::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let path = ChunkPath::from("list.json");

        dispatcher.register(path.clone(), Rc::new(|_: &String| -> Result<()> { Err(Error::thrown("listener broke")) }));
        dispatcher.register(path.clone(), recorder(&log, "ok"));

        let errors = dispatcher.deliver(&path, "update".to_string());
        assert_eq!(errors, vec![Error::thrown("listener broke")]);
        assert_eq!(*log.borrow(), vec!["ok:update"]);
    }

    #[test]
    fn test_paths_are_independent() {
        let dispatcher = UpdateDispatcher::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        dispatcher.register(ChunkPath::from("a.json"), recorder(&log, "a"));
        dispatcher.deliver(&ChunkPath::from("b.json"), "for-b".to_string());

        assert!(log.borrow().is_empty());
        assert_eq!(dispatcher.listener_count(&ChunkPath::from("a.json")), 1);
        assert_eq!(dispatcher.pending_count(&ChunkPath::from("b.json")), 1);
    }
}
