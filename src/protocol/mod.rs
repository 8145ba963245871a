//! Messages sent by the development server
//!
//! The runtime only routes these by chunk path and, for partial updates,
//! reads the new module factories and chunk membership changes.

use crate::modules::{ChunkPath, ModuleFactory, ModuleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An update message for one chunk list
#[derive(Clone)]
pub enum ServerMessage {
    /// New module code and chunk membership changes
    Partial(EcmascriptMergedUpdate),
    /// The server asks for a full reload
    Restart,
    /// The chunk list no longer exists on the server
    NotFound,
    /// Compilation problems to surface to the developer
    Issues(Vec<Issue>),
}

impl fmt::Debug for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Partial(update) => f.debug_tuple("Partial").field(update).finish(),
            ServerMessage::Restart => write!(f, "Restart"),
            ServerMessage::NotFound => write!(f, "NotFound"),
            ServerMessage::Issues(issues) => f.debug_tuple("Issues").field(issues).finish(),
        }
    }
}

/// Severity of a compilation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// A compilation issue reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub file_path: String,
    pub title: String,
}

/// How one chunk changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkUpdate {
    /// A new chunk containing `modules`
    Added { modules: Vec<ModuleId> },
    /// The chunk is gone, along with its modules
    Deleted,
    /// Modules moved in or out of an existing chunk
    Partial {
        added: Vec<ModuleId>,
        deleted: Vec<ModuleId>,
    },
}

/// A hot update covering every chunk of a chunk list
#[derive(Clone, Default)]
pub struct EcmascriptMergedUpdate {
    /// New factories for added and modified modules
    pub entries: Vec<(ModuleId, ModuleFactory)>,
    pub chunks: Vec<(ChunkPath, ChunkUpdate)>,
}

impl fmt::Debug for EcmascriptMergedUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<&ModuleId> = self.entries.iter().map(|(id, _)| id).collect();
        f.debug_struct("EcmascriptMergedUpdate")
            .field("entries", &entries)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl EcmascriptMergedUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new factory for a module
    pub fn entry(mut self, id: impl Into<ModuleId>, factory: ModuleFactory) -> Self {
        self.entries.push((id.into(), factory));
        self
    }

    /// Record a chunk membership change
    pub fn chunk(mut self, path: impl Into<ChunkPath>, update: ChunkUpdate) -> Self {
        self.chunks.push((path.into(), update));
        self
    }
}
