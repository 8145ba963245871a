//! Prelude module for convenient imports
//!
//! This module provides the most commonly used types for writing module
//! factories and driving the runtime. Import everything from this module for
//! quick access:
//!
//! ```no_run
//! use hotswap::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let runtime = Runtime::default();
//!     runtime.register_chunk(ChunkRegistration::new("main.js").module(
//!         "answer.js",
//!         factory(|ctx| {
//!             ctx.export_value(42);
//!             Ok(())
//!         }),
//!     ))?;
//!     Ok(())
//! }
//! ```

// Core runtime types
pub use crate::runtime::{Runtime, RuntimeConfig};

// Error handling
pub use crate::error::{Error, Result};

// Module records and factories
pub use crate::modules::{factory, ChunkPath, ModuleContext, ModuleFactory, ModuleId, SourceInfo};

// Values and exports
pub use crate::value::{function, getter, Exports, Value};

// Chunk loading
pub use crate::chunks::{ChunkRegistration, DevRuntimeParams, RuntimeBackend};

// HMR (Hot Module Replacement)
pub use crate::hmr::{AppliedUpdate, Hot, HotData, ModuleEffect};

// Update protocol
pub use crate::protocol::{ChunkUpdate, EcmascriptMergedUpdate, ServerMessage};

// Version constant
pub use crate::VERSION;
