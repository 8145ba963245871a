//! Error types for the hotswap module runtime

use crate::hmr::ModuleEffect;
use crate::modules::{ChunkPath, ModuleId, SourceInfo};
use std::fmt;
use thiserror::Error;

/// Why an update could not be applied incrementally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// No module on the path accepted the update
    Unaccepted,
    /// A module on the path declined updates to itself
    SelfDeclined,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionKind::Unaccepted => write!(f, "unaccepted"),
            RejectionKind::SelfDeclined => write!(f, "self-declined"),
        }
    }
}

/// Main error type for hotswap
///
/// Errors are `Clone` because a failed module record keeps its error so that
/// later requires observe the same failure, and because concurrent chunk loads
/// share a single settled result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A module was requested but no factory is registered for it
    #[error("ModuleError: module {id} was instantiated {reason}, but the module factory is not available. It might have been deleted in an HMR update.")]
    ModuleFactoryUnavailable { id: ModuleId, reason: String },

    /// A module factory (or a handler it registered) failed
    #[error("{message}")]
    Thrown { message: String },

    /// The backend failed to fetch a chunk
    #[error("ChunkLoadError: failed to load chunk {path} {reason}: {message}")]
    ChunkLoadFailed {
        path: ChunkPath,
        reason: String,
        message: String,
    },

    /// A chunk fetch settled without the chunk registering itself
    #[error("ChunkLoadError: chunk {0} was fetched but never registered")]
    ChunkNotRegistered(ChunkPath),

    /// An update could not be applied incrementally
    #[error("UpdateError: cannot apply update ({kind}): {}", format_chain(chain))]
    UpdateRejected { kind: RejectionKind, chain: Vec<ModuleId> },

    /// A dispose handler failed, leaving runtime state indeterminate
    #[error("UpdateError: dispose handler of module {id} failed: {message}")]
    DisposeFailed { id: ModuleId, message: String },

    /// Re-instantiating outdated modules failed
    #[error("UpdateError: {} module(s) failed while applying update: {}", errors.len(), join_errors(errors))]
    ApplyFailed { errors: Vec<Error> },

    /// Modules kept invalidating themselves while an update was applied
    #[error("UpdateError: modules were still invalidating themselves after {rounds} update rounds")]
    InvalidationLoop { rounds: usize },

    /// The backend does not support the requested refinement
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Hot data could not be (de)serialized
    #[error("SerializationError: {0}")]
    Serialization(String),

    /// Invalid runtime configuration
    #[error("ConfigError: {0}")]
    Config(String),
}

impl Error {
    /// Create an error from a value thrown by module code
    pub fn thrown(message: impl Into<String>) -> Self {
        Error::Thrown {
            message: message.into(),
        }
    }

    /// Create a missing-factory error explaining why the module was requested
    pub fn factory_unavailable(id: &ModuleId, source: &SourceInfo) -> Self {
        let reason = match source {
            SourceInfo::Runtime { chunk_path } => {
                format!("as a runtime entry of chunk {}", chunk_path)
            }
            SourceInfo::Parent { parent_id } => {
                format!("because it was required from module {}", parent_id)
            }
            SourceInfo::Update { .. } => "because of an HMR update".to_string(),
        };
        Error::ModuleFactoryUnavailable {
            id: id.clone(),
            reason,
        }
    }

    /// Create a chunk load failure explaining who requested the chunk
    pub fn chunk_load_failed(path: &ChunkPath, source: &SourceInfo, cause: &Error) -> Self {
        let reason = match source {
            SourceInfo::Runtime { chunk_path } => format!("from runtime for chunk {}", chunk_path),
            SourceInfo::Parent { parent_id } => format!("from module {}", parent_id),
            SourceInfo::Update { .. } => "from an HMR update".to_string(),
        };
        Error::ChunkLoadFailed {
            path: path.clone(),
            reason,
            message: cause.to_string(),
        }
    }

    /// Convert a rejected module effect into an error, if it is one
    pub fn rejected(effect: &ModuleEffect) -> Option<Self> {
        match effect {
            ModuleEffect::Unaccepted { dependency_chain } => Some(Error::UpdateRejected {
                kind: RejectionKind::Unaccepted,
                chain: dependency_chain.clone(),
            }),
            ModuleEffect::SelfDeclined {
                dependency_chain, ..
            } => Some(Error::UpdateRejected {
                kind: RejectionKind::SelfDeclined,
                chain: dependency_chain.clone(),
            }),
            ModuleEffect::Accepted { .. } => None,
        }
    }

    /// Whether the only sensible recovery is a full restart
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            Error::UpdateRejected { .. }
                | Error::DisposeFailed { .. }
                | Error::ApplyFailed { .. }
                | Error::InvalidationLoop { .. }
                | Error::Unsupported(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

fn format_chain(chain: &[ModuleId]) -> String {
    let ids: Vec<String> = chain.iter().map(|id| id.to_string()).collect();
    format!("dependency chain: {}", ids.join(" -> "))
}

fn join_errors(errors: &[Error]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    messages.join("; ")
}

/// Result type alias for hotswap
pub type Result<T> = std::result::Result<T, Error>;
