//! jitmsg: in-process JIT compilation of textual Cranelift IR.
//!
//! A host hands over an IR program as text and gets back the native address
//! of a named function in it. The crate owns everything in between: parsing
//! and verification, a fixed aggressive optimization pipeline, registration
//! into an executable namespace, symbol resolution, and resets that let a
//! name be compiled again.
//!
//! # Architecture
//!
//! ```text
//! Session (explicit handle, one per process in production)
//!   ├── ingest:    text → verified CompilationUnit (`jitmsg-<n>`)
//!   ├── optimizer: fixed speed_and_size pipeline, OptimizationStats
//!   ├── namespace: link, lower, define, finalize, resolve
//!   └── reset:     drop every symbol and unmap its code
//!
//! target: host CPU name, feature string, triple and data layout
//! ffi:    C surface over one process-wide session (include/jitmsg.h)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use jitmsg::Session;
//!
//! let mut session = Session::initialize()?;
//! let add = session.compile(
//!     "add",
//!     b"function %add(i64, i64) -> i64 {
//! block0(v0: i64, v1: i64):
//!     v2 = iadd v0, v1
//!     return v2
//! }",
//! )?;
//! assert!(!add.as_ptr().is_null());
//! # Ok::<(), jitmsg::JitError>(())
//! ```

pub mod error;
pub mod ffi;
pub mod ingest;
mod namespace;
pub mod optimizer;
pub mod session;
pub mod target;
pub mod types;

pub use error::{Diagnostic, ErrorKind, JitError};
pub use ingest::{CompilationUnit, ModuleNames};
pub use optimizer::OptimizationStats;
pub use session::Session;
pub use target::{host_cpu_features, host_cpu_name};
pub use types::{CompiledFunction, JitConfig};

#[cfg(test)]
mod tests;
