//! Hotswap: a development-time module runtime with hot module replacement
//!
//! Hotswap is the piece of a bundler's development build that runs in the
//! application: it keeps the registry of module factories shipped in chunks,
//! instantiates modules on demand, loads further chunks, and applies hot
//! updates pushed by the development server without reloading the whole
//! application.
//!
//! # Quick Start
//!
//! ```no_run
//! use hotswap::chunks::ChunkRegistration;
//! use hotswap::modules::{factory, ModuleId, SourceInfo};
//! use hotswap::Runtime;
//!
//! fn main() -> hotswap::Result<()> {
//!     let runtime = Runtime::default();
//!     runtime.register_chunk(ChunkRegistration::new("main.js").module(
//!         "greeting.js",
//!         factory(|ctx| {
//!             ctx.hot().accept();
//!             ctx.exports().set("message", "hello");
//!             Ok(())
//!         }),
//!     ))?;
//!
//!     let module = runtime.get_or_instantiate(
//!         &ModuleId::from("greeting.js"),
//!         SourceInfo::Update { parents: None },
//!     )?;
//!     println!("{:?}", module.borrow().exports.get("message"));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`runtime`], [`modules`], [`value`], [`error`](Error) |
//! | **Loading** | [`chunks`] |
//! | **Updates** | [`hmr`], [`dispatcher`], [`protocol`] |
// Clippy configuration for the hotswap runtime.
//
// - type_complexity: factory and handler types are Rc<dyn Fn(..) -> Result<..>>
// - new_without_default: builders keep an explicit `new`
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

pub mod chunks;
pub mod dispatcher;
pub mod hmr;
pub mod modules;
pub mod prelude;
pub mod protocol;
pub mod runtime;
pub mod value;

mod error;

pub use error::{Error, RejectionKind, Result};
pub use runtime::{Runtime, RuntimeConfig};
pub use value::{Exports, Value};

/// Hotswap version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
